//! Caller-facing API: create or join a room, queue files, cancel, disconnect.

use std::sync::Arc;

use bitroute_core::{ReceivedFile, TransferId, TransferProgress};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::config::Config;
use crate::relay::WebSocketRelay;
use crate::rtc::RtcConnector;
use crate::session::{LinkState, PeerSession, SessionError, SessionHooks, SessionSettings};
use crate::signaling::SignalingClient;
use crate::transfer::{EngineSettings, OutgoingFile, TransferEngine};
use crate::transport::{PeerConnector, RelayConnector};

pub const ROOM_ID_LEN: usize = 10;

/// New random room id.
pub fn generate_room_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ROOM_ID_LEN)
        .map(char::from)
        .collect()
}

/// Shareable link for `room_id`.
pub fn share_link(base: &str, room_id: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), room_id)
}

/// Room id from a bare id or a shared link (its last non-empty path segment).
pub fn parse_room(input: &str) -> Option<String> {
    let input = input.trim();
    let path = input.split(['?', '#']).next().unwrap_or(input);
    path.rsplit('/')
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

struct Active {
    session: PeerSession,
    engine: TransferEngine,
    link: watch::Receiver<LinkState>,
}

pub struct Client {
    config: Config,
    peers: Arc<dyn PeerConnector>,
    signaling: SignalingClient,
    active: Option<Active>,
}

impl Client {
    /// Client over the WebSocket relay and webrtc-rs.
    pub fn new(config: Config) -> Self {
        Self::with_transports(config, Arc::new(WebSocketRelay), Arc::new(RtcConnector))
    }

    pub fn with_transports(
        config: Config,
        relay: Arc<dyn RelayConnector>,
        peers: Arc<dyn PeerConnector>,
    ) -> Self {
        let signaling = SignalingClient::new(relay, &config);
        Self {
            config,
            peers,
            signaling,
            active: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn room_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.session.room_id())
    }

    /// Watch the session's channel state.
    pub fn link_state(&self) -> Option<watch::Receiver<LinkState>> {
        self.active.as_ref().map(|a| a.link.clone())
    }

    /// Open a new room as the sender; returns its shareable link.
    pub async fn create_room(&mut self) -> Result<String, SessionError> {
        self.reap_closed().await?;
        let room_id = generate_room_id();
        let channel = self.signaling.connect().await?;
        let (link_tx, link_rx) = watch::channel(LinkState::Pending);
        let (cancel_tx, cancel_rx) = mpsc::unbounded_channel();
        let engine = TransferEngine::spawn(
            link_rx.clone(),
            Some(cancel_rx),
            EngineSettings::from(&self.config),
        );
        let session = PeerSession::create(
            channel,
            room_id.clone(),
            self.peers.clone(),
            self.session_settings(),
            link_tx,
            SessionHooks {
                files: None,
                remote_cancels: Some(cancel_tx),
            },
        )
        .await?;
        let link = share_link(&self.config.share_base_url, &room_id);
        info!(event = "room_created", room = %room_id, link = %link);
        self.active = Some(Active {
            session,
            engine,
            link: link_rx,
        });
        Ok(link)
    }

    /// Join a room by id or link; completed files are delivered on `on_file`.
    pub async fn join_room(
        &mut self,
        room_or_link: &str,
        on_file: mpsc::UnboundedSender<ReceivedFile>,
    ) -> Result<(), SessionError> {
        self.reap_closed().await?;
        let room_id = parse_room(room_or_link)
            .ok_or_else(|| SessionError::HandshakeRejected("empty room id".into()))?;
        let channel = self.signaling.connect().await?;
        let (link_tx, link_rx) = watch::channel(LinkState::Pending);
        let (cancel_tx, cancel_rx) = mpsc::unbounded_channel();
        let engine = TransferEngine::spawn(
            link_rx.clone(),
            Some(cancel_rx),
            EngineSettings::from(&self.config),
        );
        let session = PeerSession::join(
            channel,
            room_id,
            self.peers.clone(),
            self.session_settings(),
            link_tx,
            SessionHooks {
                files: Some(on_file),
                remote_cancels: Some(cancel_tx),
            },
        )
        .await?;
        self.active = Some(Active {
            session,
            engine,
            link: link_rx,
        });
        Ok(())
    }

    /// Queue files for sending; progress for each arrives on `on_progress`.
    pub async fn add_files(
        &self,
        files: Vec<OutgoingFile>,
        on_progress: mpsc::UnboundedSender<TransferProgress>,
    ) -> Result<Vec<TransferId>, SessionError> {
        let active = self.active.as_ref().ok_or(SessionError::NotConnected)?;
        Ok(active.engine.add_files(files, on_progress).await)
    }

    pub async fn cancel_transfer(&self, id: &TransferId) -> bool {
        match &self.active {
            Some(a) => a.engine.cancel_transfer(id).await,
            None => false,
        }
    }

    /// Tear down the session. Queued transfers fail with `ChannelNotOpen`.
    pub async fn disconnect(&mut self) {
        if let Some(active) = self.active.take() {
            info!(event = "disconnect", room = %active.session.room_id());
            active.session.disconnect().await;
        }
    }

    /// Drop a session that closed on its own; `AlreadyActive` if one is still live.
    async fn reap_closed(&mut self) -> Result<(), SessionError> {
        let Some(active) = &self.active else {
            return Ok(());
        };
        if !active.link.borrow().is_closed() {
            return Err(SessionError::AlreadyActive);
        }
        self.disconnect().await;
        Ok(())
    }

    fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            ice_servers: self.config.ice_servers.clone(),
            room_timeout: self.config.room_timeout(),
        }
    }
}
