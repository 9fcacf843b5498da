//! Transport seams: relay links, peer connections, data channels.
//!
//! Session and transfer logic only talk to these traits. Production adapters live in
//! `relay` (WebSocket) and `rtc` (webrtc-rs).

use std::sync::Arc;

use async_trait::async_trait;
use bitroute_core::IceCandidate;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::config::IceServer;

/// An open text link to one relay endpoint. Dropping `outbound` closes the link.
pub struct RelayLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn open(&self, endpoint: &str) -> Result<RelayLink, TransportError>;
}

/// A frame received on the data channel.
#[derive(Debug, Clone)]
pub enum ChannelMessage {
    Text(String),
    Binary(Bytes),
}

/// Events reported by a peer connection to its owning session.
pub enum PeerEvent {
    /// Local ICE candidate to trickle to the peer.
    LocalCandidate(IceCandidate),
    ChannelOpen(Arc<dyn DataChannel>),
    Message(ChannelMessage),
    ChannelClosed,
    Failed(String),
}

impl std::fmt::Debug for PeerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerEvent::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(c).finish(),
            PeerEvent::ChannelOpen(_) => f.write_str("ChannelOpen"),
            PeerEvent::Message(m) => f.debug_tuple("Message").field(m).finish(),
            PeerEvent::ChannelClosed => f.write_str("ChannelClosed"),
            PeerEvent::Failed(e) => f.debug_tuple("Failed").field(e).finish(),
        }
    }
}

#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn open(
        &self,
        ice_servers: &[IceServer],
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerConnection>, TransportError>;
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Create a reliable, ordered data channel. Its open event arrives as `PeerEvent::ChannelOpen`.
    async fn create_data_channel(&self, label: &str) -> Result<(), TransportError>;
    /// Create and apply a local offer; returns its SDP once candidate gathering completes.
    async fn create_offer(&self) -> Result<String, TransportError>;
    /// Apply a remote offer, then create and apply the local answer; returns its SDP.
    async fn create_answer(&self, offer_sdp: &str) -> Result<String, TransportError>;
    async fn apply_answer(&self, answer_sdp: &str) -> Result<(), TransportError>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;
    async fn close(&self);
}

#[async_trait]
pub trait DataChannel: Send + Sync {
    async fn send_text(&self, text: String) -> Result<(), TransportError>;
    async fn send_binary(&self, data: Bytes) -> Result<(), TransportError>;
    /// Bytes queued locally and not yet handed to the network.
    async fn buffered_amount(&self) -> usize;
    fn is_open(&self) -> bool;
    async fn close(&self);
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect to {endpoint} failed: {reason}")]
    Connect { endpoint: String, reason: String },
    #[error("send failed: {0}")]
    Send(String),
    #[error("link closed")]
    Closed,
    #[error("webrtc: {0}")]
    Rtc(String),
}
