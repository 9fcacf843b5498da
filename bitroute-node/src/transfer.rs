//! Outbound transfer engine: FIFO queue drained by one worker, encrypted chunked sends with
//! flow control, progress events, and cancellation.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bitroute_core::outbound::OffsetError;
use bitroute_core::progress::SpeedMeter;
use bitroute_core::{
    crypto, encode_chunk, ControlMessage, CryptoError, OutboundTransfer, TransferId,
    TransferProgress, WireError,
};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::session::{LinkState, SessionLink};
use crate::transport::{DataChannel, TransportError};

/// A file to send: a name, its declared size, and a byte source.
pub struct OutgoingFile {
    pub name: String,
    pub size: u64,
    reader: Box<dyn AsyncRead + Send + Unpin>,
}

impl OutgoingFile {
    pub fn from_reader(
        name: impl Into<String>,
        size: u64,
        reader: Box<dyn AsyncRead + Send + Unpin>,
    ) -> Self {
        Self {
            name: name.into(),
            size,
            reader,
        }
    }

    pub fn from_bytes(name: impl Into<String>, data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        Self::from_reader(name, size, Box::new(std::io::Cursor::new(data)))
    }

    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        Ok(Self::from_reader(name, size, Box::new(file)))
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub high_water_mark: usize,
    pub drain_poll: Duration,
    pub error_backoff: Duration,
    pub sample_interval: Duration,
}

impl From<&Config> for EngineSettings {
    fn from(c: &Config) -> Self {
        Self {
            high_water_mark: c.high_water_mark,
            drain_poll: c.drain_poll(),
            error_backoff: c.error_backoff(),
            sample_interval: c.sample_interval(),
        }
    }
}

struct Job {
    transfer: OutboundTransfer,
    reader: Box<dyn AsyncRead + Send + Unpin>,
    progress: mpsc::UnboundedSender<TransferProgress>,
    token: CancellationToken,
}

enum Outcome {
    Completed,
    Cancelled,
}

struct Inner {
    /// Queued and in-flight transfers. An id absent from this table emits nothing more.
    active: Mutex<HashMap<TransferId, CancellationToken>>,
    link: watch::Receiver<LinkState>,
    settings: EngineSettings,
}

/// Handle to the transfer engine; clones share one queue and worker. The worker drains
/// what is queued after the last handle is dropped.
#[derive(Clone)]
pub struct TransferEngine {
    inner: Arc<Inner>,
    queue: mpsc::UnboundedSender<Job>,
}

impl TransferEngine {
    /// Start the worker. `remote_cancels` carries peer cancels for our outbound ids.
    pub fn spawn(
        link: watch::Receiver<LinkState>,
        remote_cancels: Option<mpsc::UnboundedReceiver<TransferId>>,
        settings: EngineSettings,
    ) -> Self {
        let (queue, jobs) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            active: Mutex::new(HashMap::new()),
            link,
            settings,
        });
        tokio::spawn(run_worker(inner.clone(), jobs));
        if let Some(mut rx) = remote_cancels {
            let inner = inner.clone();
            tokio::spawn(async move {
                while let Some(id) = rx.recv().await {
                    inner.stop(&id).await;
                }
            });
        }
        TransferEngine { inner, queue }
    }

    /// Queue files in order. Each gets a `preparing` event right away.
    pub async fn add_files(
        &self,
        files: Vec<OutgoingFile>,
        progress: mpsc::UnboundedSender<TransferProgress>,
    ) -> Vec<TransferId> {
        let mut ids = Vec::with_capacity(files.len());
        for file in files {
            let id = TransferId::generate();
            let now = Instant::now();
            let transfer = OutboundTransfer::new(id.clone(), file.name, file.size, now)
                .with_meter(SpeedMeter::with_interval(now, self.inner.settings.sample_interval));
            let token = CancellationToken::new();
            {
                let mut table = self.inner.active.lock().await;
                table.insert(id.clone(), token.clone());
                let _ = progress.send(transfer.progress());
            }
            info!(event = "transfer_queued", id = %id, name = %transfer.name(), size = transfer.size());
            let job = Job {
                transfer,
                reader: file.reader,
                progress: progress.clone(),
                token,
            };
            if self.queue.send(job).is_err() {
                warn!(event = "transfer_queue_closed", id = %id);
                self.inner.active.lock().await.remove(&id);
                continue;
            }
            ids.push(id);
        }
        ids
    }

    /// Stop `id` and tell the peer (best effort). Returns false if `id` is not queued or
    /// in flight. No progress event for `id` is emitted after this returns.
    pub async fn cancel_transfer(&self, id: &TransferId) -> bool {
        if !self.inner.stop(id).await {
            return false;
        }
        self.inner.notify_cancel(id).await;
        true
    }

    pub async fn is_active(&self, id: &TransferId) -> bool {
        self.inner.active.lock().await.contains_key(id)
    }

    pub async fn active_count(&self) -> usize {
        self.inner.active.lock().await.len()
    }
}

impl Inner {
    async fn stop(&self, id: &TransferId) -> bool {
        let token = self.active.lock().await.remove(id);
        match token {
            Some(token) => {
                token.cancel();
                info!(event = "transfer_cancelled", id = %id);
                true
            }
            None => false,
        }
    }

    /// Best-effort `cancel` to the peer so it drops what it buffered for `id`.
    async fn notify_cancel(&self, id: &TransferId) {
        let channel = match &*self.link.borrow() {
            LinkState::Ready(link) => Some(link.channel.clone()),
            _ => None,
        };
        if let Some(ch) = channel {
            send_control(ch.as_ref(), &ControlMessage::Cancel { id: id.clone() })
                .await
                .unwrap_or_else(|e| debug!(event = "cancel_not_sent", id = %id, %e));
        }
    }

    async fn emit(&self, tx: &mpsc::UnboundedSender<TransferProgress>, p: TransferProgress) {
        let table = self.active.lock().await;
        if table.contains_key(&p.id) {
            let _ = tx.send(p);
        }
    }

    /// Emit a terminal event and retire the id.
    async fn finish(&self, tx: &mpsc::UnboundedSender<TransferProgress>, p: TransferProgress) {
        let mut table = self.active.lock().await;
        if table.remove(&p.id).is_some() {
            let _ = tx.send(p);
        }
    }

    /// Wait for an open link. `Ok(None)` if the transfer was cancelled while waiting.
    async fn wait_for_link(
        &self,
        token: &CancellationToken,
    ) -> Result<Option<SessionLink>, TransferError> {
        let mut rx = self.link.clone();
        loop {
            let state = rx.borrow_and_update().clone();
            match state {
                LinkState::Ready(link) => return Ok(Some(link)),
                LinkState::Closed => return Err(TransferError::ChannelNotOpen),
                LinkState::Pending => {}
            }
            tokio::select! {
                _ = token.cancelled() => return Ok(None),
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(TransferError::ChannelNotOpen);
                    }
                }
            }
        }
    }

    /// Pause while the channel buffers more than the high-water mark. `false` on cancel.
    async fn wait_for_drain(
        &self,
        ch: &dyn DataChannel,
        token: &CancellationToken,
    ) -> Result<bool, TransferError> {
        loop {
            if token.is_cancelled() {
                return Ok(false);
            }
            if !ch.is_open() {
                return Err(TransferError::ChannelNotOpen);
            }
            if ch.buffered_amount().await <= self.settings.high_water_mark {
                return Ok(true);
            }
            tokio::select! {
                _ = token.cancelled() => return Ok(false),
                _ = sleep(self.settings.drain_poll) => {}
            }
        }
    }

    async fn send_file(
        &self,
        job: &mut Job,
        link: SessionLink,
    ) -> Result<Outcome, TransferError> {
        let ch = link.channel;
        if !ch.is_open() {
            return Err(TransferError::ChannelNotOpen);
        }
        let t = &mut job.transfer;
        t.start();
        send_control(ch.as_ref(), &t.file_info()).await?;
        self.emit(&job.progress, t.progress()).await;

        let mut buf = vec![0u8; t.chunk_size() as usize];
        while !t.is_complete() {
            if !self.wait_for_drain(ch.as_ref(), &job.token).await? {
                return Ok(Outcome::Cancelled);
            }
            let len = t.next_chunk_len() as usize;
            job.reader.read_exact(&mut buf[..len]).await?;
            let encrypted = crypto::encrypt(&buf[..len], &link.peer_key)?;
            let frame = encode_chunk(t.id(), encrypted)?;
            ch.send_text(frame.header).await?;
            ch.send_binary(Bytes::from(frame.payload)).await?;
            let p = t.advance(len as u64, Instant::now())?;
            self.emit(&job.progress, p).await;
        }
        if job.token.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }
        send_control(ch.as_ref(), &t.file_complete()).await?;
        Ok(Outcome::Completed)
    }
}

async fn send_control(ch: &dyn DataChannel, msg: &ControlMessage) -> Result<(), TransferError> {
    let text = msg.to_json().map_err(|e| TransferError::Wire(WireError::Encode(e)))?;
    ch.send_text(text).await?;
    Ok(())
}

async fn run_worker(inner: Arc<Inner>, mut jobs: mpsc::UnboundedReceiver<Job>) {
    while let Some(mut job) = jobs.recv().await {
        let id = job.transfer.id().clone();
        if job.token.is_cancelled() {
            debug!(event = "transfer_skipped", id = %id);
            continue;
        }
        let result = match inner.wait_for_link(&job.token).await {
            Ok(Some(link)) => inner.send_file(&mut job, link).await,
            Ok(None) => Ok(Outcome::Cancelled),
            Err(e) => Err(e),
        };
        match result {
            Ok(Outcome::Completed) => {
                info!(event = "transfer_completed", id = %id, bytes = job.transfer.size());
                let p = job.transfer.complete();
                inner.finish(&job.progress, p).await;
            }
            Ok(Outcome::Cancelled) => {
                debug!(event = "transfer_stopped", id = %id, offset = job.transfer.offset());
            }
            Err(e) => {
                warn!(event = "transfer_failed", id = %id, %e);
                let p = job.transfer.fail(e.to_string());
                inner.finish(&job.progress, p).await;
                if !matches!(e, TransferError::ChannelNotOpen) {
                    inner.notify_cancel(&id).await;
                    sleep(inner.settings.error_backoff).await;
                }
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("data channel is not open")]
    ChannelNotOpen,
    #[error("encryption: {0}")]
    Encryption(#[from] CryptoError),
    #[error("read: {0}")]
    Io(#[from] std::io::Error),
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("framing: {0}")]
    Wire(#[from] WireError),
    #[error(transparent)]
    Offset(#[from] OffsetError),
}
