//! Signaling protocol: JSON control messages carried by the relay, and relay endpoint rotation.

use serde::{Deserialize, Serialize};

use crate::crypto::PublicKey;

/// A trickled ICE candidate in its browser JSON form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// All relay messages, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingMessage {
    /// Sender asks the relay to open a room.
    Create {
        #[serde(rename = "roomId")]
        room_id: String,
    },
    /// Receiver asks to enter an existing room.
    Join {
        #[serde(rename = "roomId")]
        room_id: String,
    },
    RoomCreated {},
    RoomJoined {},
    /// Sender's session description plus its public key.
    Offer {
        #[serde(rename = "roomId")]
        room_id: String,
        sdp: String,
        #[serde(rename = "publicKey")]
        public_key: PublicKey,
    },
    /// Receiver's session description plus its public key.
    Answer {
        #[serde(rename = "roomId")]
        room_id: String,
        sdp: String,
        #[serde(rename = "publicKey")]
        public_key: PublicKey,
    },
    IceCandidate {
        #[serde(rename = "roomId")]
        room_id: String,
        candidate: IceCandidate,
    },
    /// Relay-reported failure (unknown room, room full, ...).
    Error { message: String },
}

impl SignalingMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Wire name of the message type, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::Create { .. } => "create",
            SignalingMessage::Join { .. } => "join",
            SignalingMessage::RoomCreated {} => "room_created",
            SignalingMessage::RoomJoined {} => "room_joined",
            SignalingMessage::Offer { .. } => "offer",
            SignalingMessage::Answer { .. } => "answer",
            SignalingMessage::IceCandidate { .. } => "ice_candidate",
            SignalingMessage::Error { .. } => "error",
        }
    }
}

/// Sticky rotation over relay endpoints: each connect starts at the last endpoint that worked.
#[derive(Debug, Clone)]
pub struct EndpointRotation {
    len: usize,
    start: usize,
}

impl EndpointRotation {
    pub fn new(len: usize) -> Self {
        Self { len, start: 0 }
    }

    /// Endpoint indices in attempt order for one pass.
    pub fn order(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).map(move |i| (self.start + i) % self.len)
    }

    /// Remember `index` as the first endpoint to try next time.
    pub fn mark_success(&mut self, index: usize) {
        if index < self.len {
            self.start = index;
        }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
