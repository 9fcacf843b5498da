//! In-memory relay, peer network, and recording channel for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bitroute_core::{ControlMessage, IceCandidate, SignalingMessage};
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::config::IceServer;
use crate::transport::{
    ChannelMessage, DataChannel, PeerConnection, PeerConnector, PeerEvent, RelayConnector,
    RelayLink, TransportError,
};

// ---- relay ----

#[derive(Default)]
struct Room {
    sender: Option<u64>,
    receiver: Option<u64>,
    offer: Option<String>,
    /// Sender candidates relayed before anyone joined.
    early_candidates: Vec<String>,
}

#[derive(Default)]
struct HubState {
    next_conn: u64,
    conns: HashMap<u64, mpsc::UnboundedSender<String>>,
    rooms: HashMap<String, Room>,
}

/// Relay server with the same room rules as the production relay.
#[derive(Clone, Default)]
pub struct RelayHub {
    state: Arc<Mutex<HubState>>,
}

impl RelayHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self) -> RelayLink {
        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, mut from_client) = mpsc::unbounded_channel::<String>();
        let id = {
            let mut s = self.state.lock().unwrap();
            s.next_conn += 1;
            let id = s.next_conn;
            s.conns.insert(id, to_client);
            id
        };
        let hub = self.clone();
        tokio::spawn(async move {
            while let Some(text) = from_client.recv().await {
                hub.handle(id, &text);
            }
            hub.state.lock().unwrap().conns.remove(&id);
        });
        RelayLink { outbound, inbound }
    }

    /// Send a raw frame to every connected client.
    pub fn broadcast_raw(&self, text: &str) {
        let s = self.state.lock().unwrap();
        for tx in s.conns.values() {
            let _ = tx.send(text.to_string());
        }
    }

    /// Drop every client connection, as if the relay went away.
    pub fn drop_connections(&self) {
        self.state.lock().unwrap().conns.clear();
    }

    pub fn room_count(&self) -> usize {
        self.state.lock().unwrap().rooms.len()
    }

    fn handle(&self, conn: u64, text: &str) {
        let Ok(msg) = SignalingMessage::from_json(text) else {
            return;
        };
        let mut s = self.state.lock().unwrap();
        let reply = |s: &HubState, to: u64, m: SignalingMessage| {
            if let Some(tx) = s.conns.get(&to) {
                let _ = tx.send(m.to_json().unwrap());
            }
        };
        match msg {
            SignalingMessage::Create { room_id } => {
                if s.rooms.contains_key(&room_id) {
                    let m = SignalingMessage::Error {
                        message: "Room already exists".into(),
                    };
                    reply(&*s, conn, m);
                    return;
                }
                s.rooms.insert(
                    room_id,
                    Room {
                        sender: Some(conn),
                        ..Room::default()
                    },
                );
                reply(&*s, conn, SignalingMessage::RoomCreated {});
            }
            SignalingMessage::Join { room_id } => {
                if !s.rooms.contains_key(&room_id) {
                    let m = SignalingMessage::Error {
                        message: "Room not found".into(),
                    };
                    reply(&*s, conn, m);
                    return;
                }
                let Some(room) = s.rooms.get_mut(&room_id) else {
                    return;
                };
                if room.receiver.is_some() {
                    let m = SignalingMessage::Error {
                        message: "Room is full".into(),
                    };
                    reply(&*s, conn, m);
                    return;
                }
                room.receiver = Some(conn);
                let offer = room.offer.clone();
                let early = std::mem::take(&mut room.early_candidates);
                reply(&*s, conn, SignalingMessage::RoomJoined {});
                if let (Some(offer), Some(tx)) = (offer, s.conns.get(&conn)) {
                    let _ = tx.send(offer);
                    for c in early {
                        let _ = tx.send(c);
                    }
                }
            }
            SignalingMessage::Offer { ref room_id, .. } => {
                let Some(room) = s.rooms.get_mut(room_id) else {
                    return;
                };
                room.offer = Some(text.to_string());
                if let Some(to) = room.receiver {
                    if let Some(tx) = s.conns.get(&to) {
                        let _ = tx.send(text.to_string());
                    }
                }
            }
            SignalingMessage::Answer { ref room_id, .. }
            | SignalingMessage::IceCandidate { ref room_id, .. } => {
                let Some(room) = s.rooms.get_mut(room_id) else {
                    return;
                };
                let to = if room.sender == Some(conn) {
                    room.receiver
                } else {
                    room.sender
                };
                if to.is_none() && room.sender == Some(conn) {
                    room.early_candidates.push(text.to_string());
                    return;
                }
                if let Some(tx) = to.and_then(|to| s.conns.get(&to)) {
                    let _ = tx.send(text.to_string());
                }
            }
            _ => {}
        }
    }
}

/// Relay connector over a `RelayHub`. Endpoints listed as failing refuse to connect;
/// failing endpoints whose name starts with `hang` never answer.
pub struct FlakyRelay {
    hub: RelayHub,
    failing: Vec<String>,
    attempts: Mutex<Vec<String>>,
}

impl FlakyRelay {
    pub fn new(hub: RelayHub, failing: &[&str]) -> Self {
        Self {
            hub,
            failing: failing.iter().map(|s| s.to_string()).collect(),
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl RelayConnector for FlakyRelay {
    async fn open(&self, endpoint: &str) -> Result<RelayLink, TransportError> {
        self.attempts.lock().unwrap().push(endpoint.to_string());
        if self.failing.iter().any(|f| f == endpoint) {
            if endpoint.starts_with("hang") {
                std::future::pending::<()>().await;
            }
            return Err(TransportError::Connect {
                endpoint: endpoint.to_string(),
                reason: "connection refused".into(),
            });
        }
        Ok(self.hub.connect())
    }
}

// ---- peers ----

/// One end of an in-memory data channel; frames go straight to the other end's session.
pub struct MemChannel {
    open: Arc<AtomicBool>,
    local: mpsc::UnboundedSender<PeerEvent>,
    remote: mpsc::UnboundedSender<PeerEvent>,
}

impl MemChannel {
    fn pair(
        a: mpsc::UnboundedSender<PeerEvent>,
        b: mpsc::UnboundedSender<PeerEvent>,
    ) -> (Arc<MemChannel>, Arc<MemChannel>) {
        let open = Arc::new(AtomicBool::new(true));
        (
            Arc::new(MemChannel {
                open: open.clone(),
                local: a.clone(),
                remote: b.clone(),
            }),
            Arc::new(MemChannel {
                open,
                local: b,
                remote: a,
            }),
        )
    }

    fn deliver(&self, m: ChannelMessage) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.remote
            .send(PeerEvent::Message(m))
            .map_err(|_| TransportError::Closed)
    }

    fn shut(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.local.send(PeerEvent::ChannelClosed);
            let _ = self.remote.send(PeerEvent::ChannelClosed);
        }
    }
}

#[async_trait]
impl DataChannel for MemChannel {
    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.deliver(ChannelMessage::Text(text))
    }

    async fn send_binary(&self, data: Bytes) -> Result<(), TransportError> {
        self.deliver(ChannelMessage::Binary(data))
    }

    async fn buffered_amount(&self) -> usize {
        0
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.shut();
    }
}

struct PeerShared {
    events: mpsc::UnboundedSender<PeerEvent>,
    has_channel: AtomicBool,
    pending: Mutex<Option<Arc<MemChannel>>>,
    channel: Mutex<Option<Arc<MemChannel>>>,
}

#[derive(Default)]
struct NetState {
    next: u64,
    offers: HashMap<u64, Arc<PeerShared>>,
    channels: Vec<Arc<MemChannel>>,
}

/// Peer network that links an offerer and answerer through their SDP strings.
#[derive(Clone, Default)]
pub struct MemoryPeers {
    state: Arc<Mutex<NetState>>,
    candidates: Arc<AtomicUsize>,
}

impl MemoryPeers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close every data channel in the network.
    pub fn close_all(&self) {
        let channels = std::mem::take(&mut self.state.lock().unwrap().channels);
        for ch in channels {
            ch.shut();
        }
    }

    pub fn candidates_applied(&self) -> usize {
        self.candidates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerConnector for MemoryPeers {
    async fn open(
        &self,
        _ice_servers: &[IceServer],
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerConnection>, TransportError> {
        Ok(Arc::new(MemPeer {
            net: self.clone(),
            shared: Arc::new(PeerShared {
                events,
                has_channel: AtomicBool::new(false),
                pending: Mutex::new(None),
                channel: Mutex::new(None),
            }),
        }))
    }
}

struct MemPeer {
    net: MemoryPeers,
    shared: Arc<PeerShared>,
}

#[async_trait]
impl PeerConnection for MemPeer {
    async fn create_data_channel(&self, _label: &str) -> Result<(), TransportError> {
        self.shared.has_channel.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn create_offer(&self) -> Result<String, TransportError> {
        let mut s = self.net.state.lock().unwrap();
        s.next += 1;
        let id = s.next;
        s.offers.insert(id, self.shared.clone());
        let _ = self.shared.events.send(PeerEvent::LocalCandidate(IceCandidate {
            candidate: format!("candidate:{id} 1 udp 1 127.0.0.1 9 typ host"),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }));
        Ok(format!("mem-offer {id}"))
    }

    async fn create_answer(&self, offer_sdp: &str) -> Result<String, TransportError> {
        let id: u64 = offer_sdp
            .strip_prefix("mem-offer ")
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| TransportError::Rtc(format!("bad offer sdp {offer_sdp:?}")))?;
        let offerer = self
            .net
            .state
            .lock()
            .unwrap()
            .offers
            .remove(&id)
            .ok_or_else(|| TransportError::Rtc("unknown offer".into()))?;
        if !offerer.has_channel.load(Ordering::SeqCst) {
            return Err(TransportError::Rtc("offer has no data channel".into()));
        }
        let (a, b) = MemChannel::pair(offerer.events.clone(), self.shared.events.clone());
        *offerer.pending.lock().unwrap() = Some(a.clone());
        *self.shared.channel.lock().unwrap() = Some(b.clone());
        self.net.state.lock().unwrap().channels.extend([a, b.clone()]);
        let _ = self.shared.events.send(PeerEvent::ChannelOpen(b));
        Ok(format!("mem-answer {id}"))
    }

    async fn apply_answer(&self, answer_sdp: &str) -> Result<(), TransportError> {
        if !answer_sdp.starts_with("mem-answer ") {
            return Err(TransportError::Rtc("bad answer sdp".into()));
        }
        let ch = self
            .shared
            .pending
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| TransportError::Rtc("answer without offer".into()))?;
        *self.shared.channel.lock().unwrap() = Some(ch.clone());
        let _ = self.shared.events.send(PeerEvent::ChannelOpen(ch));
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: IceCandidate) -> Result<(), TransportError> {
        self.net.candidates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        let ch = self.shared.channel.lock().unwrap().take();
        if let Some(ch) = ch {
            ch.shut();
        }
    }
}

// ---- recording channel ----

/// Data channel that records what is sent. With `stall_at`, the buffered amount jumps
/// to that value after the first binary frame and never drains.
pub struct RecordingChannel {
    sent: Mutex<Vec<ChannelMessage>>,
    open: AtomicBool,
    binaries: AtomicUsize,
    stall_at: Option<usize>,
}

impl RecordingChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            open: AtomicBool::new(true),
            binaries: AtomicUsize::new(0),
            stall_at: None,
        })
    }

    pub fn stalling(buffered: usize) -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            open: AtomicBool::new(true),
            binaries: AtomicUsize::new(0),
            stall_at: Some(buffered),
        })
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub fn binary_count(&self) -> usize {
        self.binaries.load(Ordering::SeqCst)
    }

    /// Control messages sent so far, chunk headers included.
    pub fn controls(&self) -> Vec<ControlMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| match m {
                ChannelMessage::Text(t) => ControlMessage::from_json(t).ok(),
                ChannelMessage::Binary(_) => None,
            })
            .collect()
    }

    pub fn sent(&self) -> Vec<ChannelMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataChannel for RecordingChannel {
    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.sent.lock().unwrap().push(ChannelMessage::Text(text));
        Ok(())
    }

    async fn send_binary(&self, data: Bytes) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.sent.lock().unwrap().push(ChannelMessage::Binary(data));
        self.binaries.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn buffered_amount(&self) -> usize {
        match self.stall_at {
            Some(n) if self.binary_count() > 0 => n,
            _ => 0,
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.set_open(false);
    }
}
