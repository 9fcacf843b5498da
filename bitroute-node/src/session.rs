//! Peer session actor: drives the handshake over signaling, owns the peer connection and the
//! receive side, and publishes the open channel (bundled with the peer key) to the engine.

use std::sync::Arc;
use std::time::Duration;

use bitroute_core::{
    AssemblerEvent, ControlMessage, Handshake, HandshakeError, HandshakeState, IceCandidate,
    KeyPair, PublicKey, ReceiveAssembler, ReceivedFile, Role, SignalingMessage, TransferId,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::IceServer;
use crate::signaling::{SignalingChannel, SignalingError};
use crate::transport::{
    ChannelMessage, DataChannel, PeerConnection, PeerConnector, PeerEvent, TransportError,
};

/// Label of the single data channel.
pub const DATA_CHANNEL_LABEL: &str = "fileTransfer";

/// An open data channel together with the peer's public key. Holding one is the only way to
/// send, so no chunk can go out before the key has arrived.
#[derive(Clone)]
pub struct SessionLink {
    pub channel: Arc<dyn DataChannel>,
    pub peer_key: PublicKey,
}

#[derive(Clone)]
pub enum LinkState {
    Pending,
    Ready(SessionLink),
    Closed,
}

impl LinkState {
    pub fn is_closed(&self) -> bool {
        matches!(self, LinkState::Closed)
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub ice_servers: Vec<IceServer>,
    pub room_timeout: Duration,
}

/// Where the session delivers things it does not handle itself.
#[derive(Default)]
pub struct SessionHooks {
    /// Completed inbound files.
    pub files: Option<mpsc::UnboundedSender<ReceivedFile>>,
    /// Peer `cancel` for ids that are not inbound, i.e. our own outbound transfers.
    pub remote_cancels: Option<mpsc::UnboundedSender<TransferId>>,
}

enum Command {
    Disconnect(oneshot::Sender<()>),
}

/// Handle to a running session actor.
pub struct PeerSession {
    role: Role,
    room_id: String,
    commands: mpsc::UnboundedSender<Command>,
    task: Option<JoinHandle<()>>,
}

impl PeerSession {
    /// Sender side: create `room_id`; resolves once the relay confirmed the room and our
    /// offer has been sent.
    pub async fn create(
        signaling: SignalingChannel,
        room_id: String,
        peers: Arc<dyn PeerConnector>,
        settings: SessionSettings,
        link: watch::Sender<LinkState>,
        hooks: SessionHooks,
    ) -> Result<PeerSession, SessionError> {
        let first = SignalingMessage::Create {
            room_id: room_id.clone(),
        };
        Self::start(Role::Sender, first, signaling, room_id, peers, settings, link, hooks).await
    }

    /// Receiver side: join `room_id`; resolves once the relay confirmed the join.
    pub async fn join(
        signaling: SignalingChannel,
        room_id: String,
        peers: Arc<dyn PeerConnector>,
        settings: SessionSettings,
        link: watch::Sender<LinkState>,
        hooks: SessionHooks,
    ) -> Result<PeerSession, SessionError> {
        let first = SignalingMessage::Join {
            room_id: room_id.clone(),
        };
        Self::start(Role::Receiver, first, signaling, room_id, peers, settings, link, hooks).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn start(
        role: Role,
        first: SignalingMessage,
        signaling: SignalingChannel,
        room_id: String,
        peers: Arc<dyn PeerConnector>,
        settings: SessionSettings,
        link: watch::Sender<LinkState>,
        hooks: SessionHooks,
    ) -> Result<PeerSession, SessionError> {
        let mut handshake = Handshake::new(role);
        handshake.on_signaling_connected()?;
        signaling.send(&first)?;
        info!(event = "room_requested", room = %room_id, role = ?role, endpoint = %signaling.endpoint());

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let actor = Actor {
            room_id: room_id.clone(),
            handshake,
            keypair: KeyPair::generate(),
            signaling: Some(signaling),
            peers,
            ice_servers: settings.ice_servers,
            peer_tx,
            pc: None,
            channel: None,
            assembler: ReceiveAssembler::new(),
            pending_candidates: Vec::new(),
            link,
            ready: Some(ready_tx),
            hooks,
        };
        let task = tokio::spawn(actor.run(cmd_rx, peer_rx));
        let session = PeerSession {
            role,
            room_id,
            commands: cmd_tx,
            task: Some(task),
        };

        match timeout(settings.room_timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => Ok(session),
            Ok(Ok(Err(e))) => {
                session.disconnect().await;
                Err(e)
            }
            Ok(Err(_)) => Err(SessionError::NotConnected),
            Err(_) => {
                warn!(event = "room_timeout", room = %session.room_id);
                session.disconnect().await;
                Err(SessionError::Timeout(settings.room_timeout))
            }
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Close the channel and peer connection and stop the actor.
    pub async fn disconnect(mut self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Disconnect(tx)).is_ok() {
            let _ = rx.await;
        }
        drop(self.commands);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    /// Whether the actor has stopped, on its own or after `disconnect`.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }
}

struct Actor {
    room_id: String,
    handshake: Handshake,
    keypair: KeyPair,
    signaling: Option<SignalingChannel>,
    peers: Arc<dyn PeerConnector>,
    ice_servers: Vec<IceServer>,
    peer_tx: mpsc::UnboundedSender<PeerEvent>,
    pc: Option<Arc<dyn PeerConnection>>,
    channel: Option<Arc<dyn DataChannel>>,
    assembler: ReceiveAssembler,
    /// Candidates relayed before the remote description was applied.
    pending_candidates: Vec<IceCandidate>,
    link: watch::Sender<LinkState>,
    ready: Option<oneshot::Sender<Result<(), SessionError>>>,
    hooks: SessionHooks,
}

async fn next_signal(ch: &mut Option<SignalingChannel>) -> Option<SignalingMessage> {
    match ch {
        Some(c) => c.recv().await,
        None => std::future::pending().await,
    }
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut peer_events: mpsc::UnboundedReceiver<PeerEvent>,
    ) {
        loop {
            tokio::select! {
                cmd = commands.recv() => {
                    let done = match cmd {
                        Some(Command::Disconnect(done)) => Some(done),
                        None => None,
                    };
                    self.shutdown().await;
                    if let Some(done) = done {
                        let _ = done.send(());
                    }
                    return;
                }
                msg = next_signal(&mut self.signaling) => match msg {
                    Some(msg) => self.on_signaling(msg).await,
                    None => self.on_signaling_lost().await,
                },
                Some(ev) = peer_events.recv() => self.on_peer_event(ev).await,
            }
            if self.handshake.is_closed() {
                // Closed on its own. Dropping `commands` lets a pending disconnect resolve.
                return;
            }
        }
    }

    async fn on_signaling(&mut self, msg: SignalingMessage) {
        let kind = msg.kind();
        let result = match msg {
            SignalingMessage::RoomCreated {} | SignalingMessage::RoomJoined {} => {
                self.on_room_ready().await
            }
            SignalingMessage::Offer {
                sdp, public_key, ..
            } => self.on_offer(sdp, public_key).await,
            SignalingMessage::Answer {
                sdp, public_key, ..
            } => self.on_answer(sdp, public_key).await,
            SignalingMessage::IceCandidate { candidate, .. } => {
                self.on_remote_candidate(candidate).await;
                Ok(())
            }
            SignalingMessage::Error { message } => {
                if self.handshake.state() == HandshakeState::ChannelOpen {
                    warn!(event = "relay_error_ignored", %message);
                    Ok(())
                } else {
                    Err(SessionError::HandshakeRejected(message))
                }
            }
            SignalingMessage::Create { .. } | SignalingMessage::Join { .. } => {
                debug!(event = "signaling_unexpected", kind);
                Ok(())
            }
        };
        match result {
            Ok(()) => {}
            // Out-of-order messages are dropped; the handshake stays where it was.
            Err(SessionError::Handshake(e)) => {
                warn!(event = "signaling_out_of_order", kind, %e);
            }
            Err(e) => self.fail(e).await,
        }
    }

    async fn on_room_ready(&mut self) -> Result<(), SessionError> {
        self.handshake.on_room_ready()?;
        let pc = self
            .peers
            .open(&self.ice_servers, self.peer_tx.clone())
            .await?;
        self.pc = Some(pc.clone());
        match self.handshake.role() {
            Role::Sender => {
                pc.create_data_channel(DATA_CHANNEL_LABEL).await?;
                let sdp = pc.create_offer().await?;
                self.signal(&SignalingMessage::Offer {
                    room_id: self.room_id.clone(),
                    sdp,
                    public_key: self.keypair.public_key().clone(),
                })?;
                self.handshake.on_offer_sent()?;
                info!(event = "offer_sent", room = %self.room_id);
            }
            Role::Receiver => {
                info!(event = "room_joined", room = %self.room_id);
            }
        }
        self.resolve_ready(Ok(()));
        Ok(())
    }

    async fn on_offer(&mut self, sdp: String, key: PublicKey) -> Result<(), SessionError> {
        self.handshake.on_offer(key)?;
        let pc = self.pc.clone().ok_or(SessionError::NotConnected)?;
        let answer = pc.create_answer(&sdp).await?;
        self.signal(&SignalingMessage::Answer {
            room_id: self.room_id.clone(),
            sdp: answer,
            public_key: self.keypair.public_key().clone(),
        })?;
        self.handshake.on_answer_sent()?;
        info!(event = "answer_sent", room = %self.room_id);
        self.flush_candidates().await;
        Ok(())
    }

    async fn on_answer(&mut self, sdp: String, key: PublicKey) -> Result<(), SessionError> {
        self.handshake.on_answer(key)?;
        let pc = self.pc.clone().ok_or(SessionError::NotConnected)?;
        pc.apply_answer(&sdp).await?;
        info!(event = "answer_applied", room = %self.room_id);
        self.flush_candidates().await;
        Ok(())
    }

    async fn on_remote_candidate(&mut self, candidate: IceCandidate) {
        match (&self.pc, self.handshake.can_apply_candidate()) {
            (Some(pc), true) => {
                if let Err(e) = pc.add_ice_candidate(candidate).await {
                    warn!(event = "ice_candidate_rejected", %e);
                }
            }
            _ => self.pending_candidates.push(candidate),
        }
    }

    async fn flush_candidates(&mut self) {
        let Some(pc) = self.pc.clone() else { return };
        for candidate in std::mem::take(&mut self.pending_candidates) {
            if let Err(e) = pc.add_ice_candidate(candidate).await {
                warn!(event = "ice_candidate_rejected", %e);
            }
        }
    }

    async fn on_signaling_lost(&mut self) {
        self.signaling = None;
        if self.handshake.state() == HandshakeState::ChannelOpen {
            info!(event = "signaling_lost", "relay gone; continuing on the data channel");
        } else {
            self.fail(SessionError::SignalingUnavailable(SignalingError::Closed))
                .await;
        }
    }

    async fn on_peer_event(&mut self, ev: PeerEvent) {
        match ev {
            PeerEvent::LocalCandidate(candidate) => {
                if self.signaling.is_some() {
                    let msg = SignalingMessage::IceCandidate {
                        room_id: self.room_id.clone(),
                        candidate,
                    };
                    if let Err(e) = self.signal(&msg) {
                        debug!(event = "ice_candidate_not_sent", %e);
                    }
                }
            }
            PeerEvent::ChannelOpen(channel) => match self.handshake.on_channel_open() {
                Ok(key) => {
                    let peer_key = key.clone();
                    self.channel = Some(channel.clone());
                    self.link
                        .send_replace(LinkState::Ready(SessionLink { channel, peer_key }));
                    info!(event = "channel_open", room = %self.room_id);
                }
                Err(e) => {
                    warn!(event = "channel_open_rejected", %e);
                    channel.close().await;
                }
            },
            PeerEvent::Message(ChannelMessage::Text(text)) => self.on_text(&text).await,
            PeerEvent::Message(ChannelMessage::Binary(data)) => {
                let result = self.assembler.on_binary(data.to_vec(), &self.keypair);
                self.on_assembly(result).await;
            }
            PeerEvent::ChannelClosed => {
                info!(event = "channel_closed", room = %self.room_id);
                self.fail(SessionError::Transport(TransportError::Closed))
                    .await;
            }
            PeerEvent::Failed(reason) => {
                self.fail(SessionError::Transport(TransportError::Rtc(reason)))
                    .await;
            }
        }
    }

    async fn on_text(&mut self, text: &str) {
        let msg = match ControlMessage::from_json(text) {
            Ok(m) => m,
            Err(e) => {
                warn!(event = "control_malformed", %e);
                return;
            }
        };
        if let ControlMessage::Cancel { id } = &msg {
            if !self.assembler.is_active(id) {
                debug!(event = "remote_cancel", id = %id);
                if let Some(tx) = &self.hooks.remote_cancels {
                    let _ = tx.send(id.clone());
                }
                return;
            }
        }
        let result = self.assembler.on_control(msg);
        self.on_assembly(result).await;
    }

    async fn on_assembly(
        &mut self,
        result: Result<AssemblerEvent, bitroute_core::AssemblyError>,
    ) {
        let event = match result {
            Ok(ev) => ev,
            Err(e) => {
                warn!(event = "inbound_rejected", %e);
                return;
            }
        };
        match event {
            AssemblerEvent::Started { id, name, size } => {
                info!(event = "inbound_started", id = %id, name = %name, size);
            }
            AssemblerEvent::HeaderAccepted | AssemblerEvent::FragmentBuffered => {}
            AssemblerEvent::ChunkReceived {
                id, received, ack, ..
            } => {
                debug!(event = "chunk_received", id = %id, received);
                self.send_control(&ack).await;
            }
            AssemblerEvent::Completed(file) => {
                info!(event = "inbound_completed", id = %file.id, name = %file.name, bytes = file.data.len());
                if let Some(tx) = &self.hooks.files {
                    let _ = tx.send(file);
                }
            }
            AssemblerEvent::Cancelled(id) => {
                info!(event = "inbound_cancelled", id = %id);
            }
            AssemblerEvent::NotInbound(msg) => {
                if let ControlMessage::Ack { id, progress } = msg {
                    debug!(event = "peer_ack", id = %id, progress);
                }
            }
        }
    }

    async fn send_control(&self, msg: &ControlMessage) {
        let Some(ch) = &self.channel else { return };
        match msg.to_json() {
            Ok(text) => {
                if let Err(e) = ch.send_text(text).await {
                    debug!(event = "control_send_failed", %e);
                }
            }
            Err(e) => warn!(event = "control_encode_failed", %e),
        }
    }

    fn signal(&self, msg: &SignalingMessage) -> Result<(), SignalingError> {
        match &self.signaling {
            Some(ch) => ch.send(msg),
            None => Err(SignalingError::Closed),
        }
    }

    fn resolve_ready(&mut self, result: Result<(), SessionError>) {
        if let Some(tx) = self.ready.take() {
            let _ = tx.send(result);
        }
    }

    /// Abort the session: surface `err` to a pending create/join and close everything.
    async fn fail(&mut self, err: SessionError) {
        warn!(event = "session_failed", room = %self.room_id, state = %self.handshake.state(), %err);
        self.resolve_ready(Err(err));
        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        self.handshake.close();
        self.link.send_replace(LinkState::Closed);
        if let Some(ch) = self.channel.take() {
            ch.close().await;
        }
        if let Some(pc) = self.pc.take() {
            pc.close().await;
        }
        self.signaling = None;
        self.resolve_ready(Err(SessionError::NotConnected));
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("signaling unavailable: {0}")]
    SignalingUnavailable(#[from] SignalingError),
    #[error("rejected by relay: {0}")]
    HandshakeRejected(String),
    #[error("room setup timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("handshake: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("no active session")]
    NotConnected,
    #[error("a session is already active")]
    AlreadyActive,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::SignalingClient;
    use crate::testutil::{FlakyRelay, MemoryPeers, RelayHub};

    fn settings(room_timeout: Duration) -> SessionSettings {
        SessionSettings {
            ice_servers: Vec::new(),
            room_timeout,
        }
    }

    async fn signaling(hub: &RelayHub) -> SignalingChannel {
        let relay = Arc::new(FlakyRelay::new(hub.clone(), &[]));
        SignalingClient::with_settings(
            relay,
            vec!["mem".into()],
            Duration::from_secs(1),
            1,
            Duration::from_millis(10),
        )
        .connect()
        .await
        .unwrap()
    }

    async fn wait_ready(rx: &mut watch::Receiver<LinkState>) -> SessionLink {
        loop {
            if let LinkState::Ready(link) = rx.borrow_and_update().clone() {
                return link;
            }
            rx.changed().await.unwrap();
        }
    }

    async fn pair(
        hub: &RelayHub,
        peers: &MemoryPeers,
        room: &str,
    ) -> (
        PeerSession,
        watch::Receiver<LinkState>,
        PeerSession,
        watch::Receiver<LinkState>,
        mpsc::UnboundedReceiver<ReceivedFile>,
    ) {
        let (stx, srx) = watch::channel(LinkState::Pending);
        let sender = PeerSession::create(
            signaling(hub).await,
            room.into(),
            Arc::new(peers.clone()),
            settings(Duration::from_secs(5)),
            stx,
            SessionHooks::default(),
        )
        .await
        .unwrap();
        let (rtx, rrx) = watch::channel(LinkState::Pending);
        let (ftx, frx) = mpsc::unbounded_channel();
        let receiver = PeerSession::join(
            signaling(hub).await,
            room.into(),
            Arc::new(peers.clone()),
            settings(Duration::from_secs(5)),
            rtx,
            SessionHooks {
                files: Some(ftx),
                remote_cancels: None,
            },
        )
        .await
        .unwrap();
        (sender, srx, receiver, rrx, frx)
    }

    #[tokio::test]
    async fn handshake_exchanges_keys() {
        let hub = RelayHub::new();
        let peers = MemoryPeers::new();
        let (sender, mut srx, receiver, mut rrx, _files) = pair(&hub, &peers, "room1").await;
        assert_eq!(sender.role(), Role::Sender);
        assert_eq!(receiver.room_id(), "room1");

        let s_link = wait_ready(&mut srx).await;
        let r_link = wait_ready(&mut rrx).await;
        assert!(s_link.channel.is_open());
        assert!(r_link.channel.is_open());
        // Each side holds the other's key, and they differ.
        assert_ne!(s_link.peer_key, r_link.peer_key);

        sender.disconnect().await;
        assert!(srx.borrow().is_closed());
        receiver.disconnect().await;
    }

    #[tokio::test]
    async fn sender_candidates_reach_receiver() {
        let hub = RelayHub::new();
        let peers = MemoryPeers::new();
        let (_s, _srx, _r, mut rrx, _files) = pair(&hub, &peers, "room-ice").await;
        wait_ready(&mut rrx).await;
        // Trickled after the offer; the receiver buffers it until its answer is applied.
        for _ in 0..50 {
            if peers.candidates_applied() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(peers.candidates_applied() >= 1);
    }

    #[tokio::test]
    async fn join_unknown_room_is_rejected() {
        let hub = RelayHub::new();
        let (tx, rx) = watch::channel(LinkState::Pending);
        let join = PeerSession::join(
            signaling(&hub).await,
            "missing".into(),
            Arc::new(MemoryPeers::new()),
            settings(Duration::from_secs(5)),
            tx,
            SessionHooks::default(),
        );
        let result = timeout(Duration::from_secs(10), join)
            .await
            .expect("join returned");
        assert_eq!(hub.room_count(), 0);
        match result {
            Err(SessionError::HandshakeRejected(m)) => assert_eq!(m, "Room not found"),
            Err(other) => panic!("expected HandshakeRejected, got {other}"),
            Ok(_) => panic!("expected HandshakeRejected"),
        }
        assert!(rx.borrow().is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_relay_times_out() {
        let (tx, _rx) = watch::channel(LinkState::Pending);
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (_in_tx, in_rx) = mpsc::unbounded_channel();
        // A relay that accepts the link but never answers.
        struct Silent(std::sync::Mutex<Option<crate::transport::RelayLink>>);
        #[async_trait::async_trait]
        impl crate::transport::RelayConnector for Silent {
            async fn open(
                &self,
                _endpoint: &str,
            ) -> Result<crate::transport::RelayLink, TransportError> {
                self.0.lock().unwrap().take().ok_or(TransportError::Closed)
            }
        }
        let relay = Arc::new(Silent(std::sync::Mutex::new(Some(
            crate::transport::RelayLink {
                outbound: out_tx,
                inbound: in_rx,
            },
        ))));
        let ch = SignalingClient::with_settings(
            relay,
            vec!["silent".into()],
            Duration::from_secs(1),
            1,
            Duration::from_millis(10),
        )
        .connect()
        .await
        .unwrap();
        let result = PeerSession::create(
            ch,
            "r".into(),
            Arc::new(MemoryPeers::new()),
            settings(Duration::from_secs(30)),
            tx,
            SessionHooks::default(),
        )
        .await;
        assert!(matches!(result, Err(SessionError::Timeout(_))));
    }

    #[tokio::test]
    async fn relay_loss_after_open_is_not_fatal() {
        let hub = RelayHub::new();
        let peers = MemoryPeers::new();
        let (sender, mut srx, _receiver, mut rrx, _files) = pair(&hub, &peers, "room2").await;
        let s_link = wait_ready(&mut srx).await;
        wait_ready(&mut rrx).await;

        hub.drop_connections();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(&*srx.borrow(), LinkState::Ready(_)));
        assert!(s_link.channel.is_open());
        sender.disconnect().await;
    }

    #[tokio::test]
    async fn channel_close_closes_session() {
        let hub = RelayHub::new();
        let peers = MemoryPeers::new();
        let (_sender, mut srx, _receiver, mut rrx, _files) = pair(&hub, &peers, "room3").await;
        wait_ready(&mut srx).await;
        wait_ready(&mut rrx).await;

        peers.close_all();
        while !srx.borrow_and_update().is_closed() {
            srx.changed().await.unwrap();
        }
        while !rrx.borrow_and_update().is_closed() {
            rrx.changed().await.unwrap();
        }
    }

    #[tokio::test]
    async fn disconnect_after_peer_left_returns() {
        let hub = RelayHub::new();
        let peers = MemoryPeers::new();
        let (sender, mut srx, receiver, mut rrx, _files) = pair(&hub, &peers, "room5").await;
        assert_eq!(hub.room_count(), 1);
        wait_ready(&mut srx).await;
        wait_ready(&mut rrx).await;

        sender.disconnect().await;
        while !rrx.borrow_and_update().is_closed() {
            rrx.changed().await.unwrap();
        }
        // The receiver's actor stopped on its own; tearing it down must not wait forever.
        for _ in 0..100 {
            if receiver.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(receiver.is_finished());
        timeout(Duration::from_secs(10), receiver.disconnect())
            .await
            .expect("disconnect returned");
    }

    #[tokio::test]
    async fn unknown_cancel_goes_to_hook() {
        let hub = RelayHub::new();
        let peers = MemoryPeers::new();
        let (stx, mut srx) = watch::channel(LinkState::Pending);
        let (ctx, mut crx) = mpsc::unbounded_channel();
        let _sender = PeerSession::create(
            signaling(&hub).await,
            "room4".into(),
            Arc::new(peers.clone()),
            settings(Duration::from_secs(5)),
            stx,
            SessionHooks {
                files: None,
                remote_cancels: Some(ctx),
            },
        )
        .await
        .unwrap();
        let (rtx, mut rrx) = watch::channel(LinkState::Pending);
        let _receiver = PeerSession::join(
            signaling(&hub).await,
            "room4".into(),
            Arc::new(peers.clone()),
            settings(Duration::from_secs(5)),
            rtx,
            SessionHooks::default(),
        )
        .await
        .unwrap();
        wait_ready(&mut srx).await;
        let r_link = wait_ready(&mut rrx).await;

        let cancel = ControlMessage::Cancel { id: "out-1".into() };
        r_link
            .channel
            .send_text(cancel.to_json().unwrap())
            .await
            .unwrap();
        assert_eq!(crx.recv().await.unwrap().as_str(), "out-1");
    }
}
