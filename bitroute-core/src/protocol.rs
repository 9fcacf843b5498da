//! Data-channel control messages (JSON text frames) and transfer identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque transfer identifier, unique per file within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(String);

impl TransferId {
    /// New random id.
    pub fn generate() -> Self {
        TransferId(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TransferId {
    fn from(s: &str) -> Self {
        TransferId(s.to_string())
    }
}

impl From<String> for TransferId {
    fn from(s: String) -> Self {
        TransferId(s)
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Control messages multiplexed with binary chunk frames on the data channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Announces a file before any of its chunks.
    FileInfo {
        id: TransferId,
        name: String,
        size: u64,
        #[serde(rename = "chunkSize")]
        chunk_size: u64,
    },
    /// Precedes exactly one binary frame of `size` bytes. `iv` is base64.
    ChunkHeader { id: TransferId, iv: String, size: u64 },
    FileComplete { id: TransferId },
    /// Receiver telemetry: percent of the file received so far.
    Ack { id: TransferId, progress: u8 },
    Cancel { id: TransferId },
}

impl ControlMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn id(&self) -> &TransferId {
        match self {
            ControlMessage::FileInfo { id, .. }
            | ControlMessage::ChunkHeader { id, .. }
            | ControlMessage::FileComplete { id }
            | ControlMessage::Ack { id, .. }
            | ControlMessage::Cancel { id } => id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_info_field_names() {
        let msg = ControlMessage::FileInfo {
            id: "t1".into(),
            name: "report.pdf".into(),
            size: 1234,
            chunk_size: 65536,
        };
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "file_info");
        assert_eq!(value["id"], "t1");
        assert_eq!(value["chunkSize"], 65536);
    }

    #[test]
    fn parses_peer_messages() {
        let ack = ControlMessage::from_json(r#"{"type":"ack","id":"x","progress":42}"#).unwrap();
        assert_eq!(
            ack,
            ControlMessage::Ack {
                id: "x".into(),
                progress: 42
            }
        );
        let cancel = ControlMessage::from_json(r#"{"type":"cancel","id":"x"}"#).unwrap();
        assert_eq!(cancel.id().as_str(), "x");
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = TransferId::generate();
        let b = TransferId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }
}
