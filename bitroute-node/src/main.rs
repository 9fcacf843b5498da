// BitRoute CLI: send files into a new room, or receive them from one.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use bitroute_core::{format_file_size, ReceivedFile, TransferProgress, TransferStatus};
use bitroute_node::{config, Client, LinkState, OutgoingFile};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bitroute", version, about = "Peer-to-peer encrypted file transfer")]
struct Cli {
    /// Config file (default: ~/.config/bitroute/config.toml, then /etc/bitroute/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a room, print its link, and send the files once a peer joins.
    Send {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Join a room by id or link and save incoming files.
    Receive {
        room: String,
        /// Download directory (overrides config).
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("bitroute=info,bitroute_node=info")),
        )
        .init();

    let cfg = config::load(cli.config.as_deref()).context("loading config")?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let mut client = Client::new(cfg);
        let result = match cli.command {
            Command::Send { files } => send(&mut client, files).await,
            Command::Receive { room, out } => {
                let dir = out.unwrap_or_else(|| client.config().download_dir.clone());
                receive(&mut client, &room, &dir).await
            }
        };
        client.disconnect().await;
        result
    })
}

async fn send(client: &mut Client, paths: Vec<PathBuf>) -> anyhow::Result<()> {
    let mut files = Vec::with_capacity(paths.len());
    for p in &paths {
        let f = OutgoingFile::from_path(p)
            .await
            .with_context(|| format!("opening {}", p.display()))?;
        files.push(f);
    }

    let link = client.create_room().await.context("creating room")?;
    println!("Share this link: {link}");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let ids = client.add_files(files, tx).await?;
    let mut pending: HashSet<_> = ids.into_iter().collect();
    let mut failed = 0usize;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    while !pending.is_empty() {
        tokio::select! {
            p = rx.recv() => {
                let Some(p) = p else { break };
                print_progress(&p);
                if p.status.is_terminal() {
                    pending.remove(&p.id);
                    if p.status == TransferStatus::Error {
                        failed += 1;
                    }
                }
            }
            r = &mut shutdown => {
                r?;
                for id in pending.drain() {
                    client.cancel_transfer(&id).await;
                }
                println!("Cancelled.");
            }
        }
    }
    if failed > 0 {
        bail!("{failed} file(s) failed");
    }
    Ok(())
}

async fn receive(client: &mut Client, room: &str, dir: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    client.join_room(room, tx).await.context("joining room")?;
    println!("Joined room; waiting for files (Ctrl+C to stop).");

    let mut link = client
        .link_state()
        .context("session closed while joining")?;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            f = rx.recv() => {
                let Some(f) = f else { break };
                let path = save(dir, &f).await?;
                println!(
                    "Received {} ({}, {}) -> {}",
                    f.name,
                    format_file_size(f.data.len() as u64),
                    f.mime_type,
                    path.display()
                );
            }
            changed = link.changed() => {
                if changed.is_err() || matches!(&*link.borrow(), LinkState::Closed) {
                    println!("Peer disconnected.");
                    break;
                }
            }
            r = &mut shutdown => {
                r?;
                break;
            }
        }
    }
    Ok(())
}

/// Write `f` into `dir` under its base name.
async fn save(dir: &Path, f: &ReceivedFile) -> anyhow::Result<PathBuf> {
    let name = Path::new(&f.name)
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| f.id.as_str().into());
    let path = dir.join(name);
    tokio::fs::write(&path, &f.data)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

fn print_progress(p: &TransferProgress) {
    match p.status {
        TransferStatus::Preparing => println!("{}: queued ({})", p.filename, format_file_size(p.size)),
        TransferStatus::Transferring => {
            let eta = p
                .eta
                .map(|d| format!(", {}s left", d.as_secs()))
                .unwrap_or_default();
            println!(
                "{}: {}% ({}/s{})",
                p.filename,
                p.progress,
                format_file_size(p.speed as u64),
                eta
            );
        }
        TransferStatus::Completed => println!("{}: done", p.filename),
        TransferStatus::Error => println!(
            "{}: failed: {}",
            p.filename,
            p.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
