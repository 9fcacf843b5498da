//! Chunk framing: a `chunk_header` text frame, then the binary payload it announces.
//!
//! A payload may arrive split across several binary messages of at most
//! [`MAX_MESSAGE_LEN`] bytes each. The header's `size` is always the whole payload.

use std::ops::Range;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::chunk::MAX_CHUNK_SIZE;
use crate::crypto::{EncryptedChunk, IV_LEN, WRAPPED_KEY_LEN};
use crate::protocol::{ControlMessage, TransferId};

/// Largest binary payload accepted: biggest chunk plus wrap prefix and GCM tag.
pub const MAX_PAYLOAD_LEN: u64 = MAX_CHUNK_SIZE + WRAPPED_KEY_LEN as u64 + 16;

/// Largest single data-channel message; SCTP stacks commonly cap at 64 KiB.
pub const MAX_MESSAGE_LEN: usize = 64 * 1024;

/// Byte ranges that split a payload of `len` bytes into channel-sized messages.
pub fn fragment_ranges(len: usize) -> impl Iterator<Item = Range<usize>> {
    (0..len)
        .step_by(MAX_MESSAGE_LEN)
        .map(move |start| start..(start + MAX_MESSAGE_LEN).min(len))
}

/// One chunk ready for the channel: send `header` as text, then `payload` as binary.
#[derive(Debug, Clone)]
pub struct ChunkFrame {
    pub header: String,
    pub payload: Vec<u8>,
}

/// Build the header/payload pair for an encrypted chunk.
pub fn encode_chunk(id: &TransferId, chunk: EncryptedChunk) -> Result<ChunkFrame, WireError> {
    let len = chunk.payload.len() as u64;
    if len > MAX_PAYLOAD_LEN {
        return Err(WireError::TooLarge);
    }
    let header = ControlMessage::ChunkHeader {
        id: id.clone(),
        iv: STANDARD.encode(chunk.iv),
        size: len,
    }
    .to_json()
    .map_err(WireError::Encode)?;
    Ok(ChunkFrame {
        header,
        payload: chunk.payload,
    })
}

/// A chunk payload matched to the header that announced it.
#[derive(Debug, Clone)]
pub struct FramedChunk {
    pub id: TransferId,
    pub iv: [u8; IV_LEN],
    pub payload: Vec<u8>,
}

#[derive(Debug)]
struct Pending {
    id: TransferId,
    iv: [u8; IV_LEN],
    size: u64,
    buf: Vec<u8>,
}

/// Pairs binary frames with the preceding `chunk_header`, joining fragments.
#[derive(Debug, Default)]
pub struct FrameReader {
    pending: Option<Pending>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a header. A header still waiting for (part of) its payload is dropped and
    /// reported.
    pub fn on_header(&mut self, id: TransferId, iv: &str, size: u64) -> Result<(), WireError> {
        let stale = self.pending.take();
        if size > MAX_PAYLOAD_LEN {
            return Err(WireError::TooLarge);
        }
        let raw = STANDARD
            .decode(iv.as_bytes())
            .map_err(|_| WireError::InvalidIv)?;
        let iv: [u8; IV_LEN] = raw.try_into().map_err(|_| WireError::InvalidIv)?;
        self.pending = Some(Pending {
            id,
            iv,
            size,
            buf: Vec::with_capacity(size as usize),
        });
        match stale {
            Some(old) => Err(WireError::MissingPayload(old.id)),
            None => Ok(()),
        }
    }

    /// Append a binary frame to the pending payload. `Ok(None)` while more fragments are
    /// due; the finished chunk once `size` bytes have arrived.
    pub fn on_binary(&mut self, fragment: Vec<u8>) -> Result<Option<FramedChunk>, WireError> {
        let mut p = self.pending.take().ok_or(WireError::NoPendingHeader)?;
        let total = p.buf.len() as u64 + fragment.len() as u64;
        if total > p.size {
            return Err(WireError::LengthMismatch {
                id: p.id,
                expected: p.size,
                actual: total,
            });
        }
        if p.buf.is_empty() && total == p.size {
            p.buf = fragment;
        } else {
            p.buf.extend_from_slice(&fragment);
        }
        if total < p.size {
            self.pending = Some(p);
            return Ok(None);
        }
        Ok(Some(FramedChunk {
            id: p.id,
            iv: p.iv,
            payload: p.buf,
        }))
    }

    /// Bytes of the pending payload received so far.
    pub fn buffered(&self) -> usize {
        self.pending.as_ref().map_or(0, |p| p.buf.len())
    }

    /// Forget a pending header for `id` (e.g. the transfer was cancelled).
    pub fn discard(&mut self, id: &TransferId) {
        if matches!(&self.pending, Some(p) if p.id == *id) {
            self.pending = None;
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("encode error: {0}")]
    Encode(serde_json::Error),
    #[error("payload too large")]
    TooLarge,
    #[error("invalid iv")]
    InvalidIv,
    #[error("binary frame without chunk header")]
    NoPendingHeader,
    #[error("chunk header for {0} was not followed by its payload")]
    MissingPayload(TransferId),
    #[error("payload for {id}: expected {expected} bytes, got {actual}")]
    LengthMismatch {
        id: TransferId,
        expected: u64,
        actual: u64,
    },
}
