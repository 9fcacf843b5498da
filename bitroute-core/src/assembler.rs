//! Receive side: rebuild files from the inbound control + chunk stream.
//!
//! Delivery is assumed ordered and reliable. There are no sequence numbers: buffers are
//! concatenated in arrival order.

use std::collections::HashMap;

use crate::crypto::{self, CryptoError, KeyPair};
use crate::mime;
use crate::progress;
use crate::protocol::{ControlMessage, TransferId};
use crate::wire::{FrameReader, WireError};

/// Receive-side state of one file, opened by `file_info`.
#[derive(Debug)]
pub struct InboundTransfer {
    pub id: TransferId,
    pub name: String,
    pub size: u64,
    pub chunk_size: u64,
    buffers: Vec<Vec<u8>>,
    received: u64,
}

impl InboundTransfer {
    fn new(id: TransferId, name: String, size: u64, chunk_size: u64) -> Self {
        Self {
            id,
            name,
            size,
            chunk_size,
            buffers: Vec::new(),
            received: 0,
        }
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    fn push(&mut self, bytes: Vec<u8>) -> Result<(), AssemblyError> {
        let next = self.received + bytes.len() as u64;
        if next > self.size {
            return Err(AssemblyError::Overflow {
                id: self.id.clone(),
                size: self.size,
            });
        }
        self.received = next;
        self.buffers.push(bytes);
        Ok(())
    }

    fn into_bytes(self) -> Vec<u8> {
        self.buffers.concat()
    }
}

/// A fully reassembled file.
#[derive(Debug, Clone)]
pub struct ReceivedFile {
    pub id: TransferId,
    pub name: String,
    pub mime_type: &'static str,
    pub data: Vec<u8>,
}

/// What the host should do after feeding the assembler.
#[derive(Debug)]
pub enum AssemblerEvent {
    /// A new inbound file was announced.
    Started { id: TransferId, name: String, size: u64 },
    /// A header was recorded; wait for its binary frame.
    HeaderAccepted,
    /// Part of a chunk payload arrived; more fragments are due.
    FragmentBuffered,
    /// A chunk was appended; send `ack` back to the peer.
    ChunkReceived {
        id: TransferId,
        received: u64,
        progress: u8,
        ack: ControlMessage,
    },
    /// The file is complete; hand it to the caller.
    Completed(ReceivedFile),
    /// The peer cancelled this transfer; its buffers are gone.
    Cancelled(TransferId),
    /// Not an inbound-stream message (e.g. `ack`); route elsewhere.
    NotInbound(ControlMessage),
}

/// Table of inbound transfers for one session.
#[derive(Debug, Default)]
pub struct ReceiveAssembler {
    transfers: HashMap<TransferId, InboundTransfer>,
    frames: FrameReader,
}

impl ReceiveAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, id: &TransferId) -> bool {
        self.transfers.contains_key(id)
    }

    pub fn active_count(&self) -> usize {
        self.transfers.len()
    }

    pub fn get(&self, id: &TransferId) -> Option<&InboundTransfer> {
        self.transfers.get(id)
    }

    /// Process a control message received on the data channel.
    pub fn on_control(&mut self, msg: ControlMessage) -> Result<AssemblerEvent, AssemblyError> {
        match msg {
            ControlMessage::FileInfo {
                id,
                name,
                size,
                chunk_size,
            } => {
                // No resumption: a repeated file_info starts over.
                self.frames.discard(&id);
                self.transfers.insert(
                    id.clone(),
                    InboundTransfer::new(id.clone(), name.clone(), size, chunk_size),
                );
                Ok(AssemblerEvent::Started { id, name, size })
            }
            ControlMessage::ChunkHeader { id, iv, size } => {
                if !self.transfers.contains_key(&id) {
                    return Err(AssemblyError::UnknownTransfer(id));
                }
                match self.frames.on_header(id, &iv, size) {
                    Ok(()) => Ok(AssemblerEvent::HeaderAccepted),
                    Err(WireError::MissingPayload(stale)) => {
                        // The stale transfer lost a chunk and can never complete.
                        self.transfers.remove(&stale);
                        Err(WireError::MissingPayload(stale).into())
                    }
                    Err(e) => Err(e.into()),
                }
            }
            ControlMessage::FileComplete { id } => {
                let transfer = self
                    .transfers
                    .remove(&id)
                    .ok_or_else(|| AssemblyError::UnknownTransfer(id.clone()))?;
                if transfer.received != transfer.size {
                    return Err(AssemblyError::SizeMismatch {
                        id,
                        expected: transfer.size,
                        received: transfer.received,
                    });
                }
                let name = transfer.name.clone();
                let mime_type = mime::mime_for(&name);
                Ok(AssemblerEvent::Completed(ReceivedFile {
                    id,
                    name,
                    mime_type,
                    data: transfer.into_bytes(),
                }))
            }
            ControlMessage::Cancel { id } => {
                self.frames.discard(&id);
                match self.transfers.remove(&id) {
                    Some(_) => Ok(AssemblerEvent::Cancelled(id)),
                    None => Err(AssemblyError::UnknownTransfer(id)),
                }
            }
            other @ ControlMessage::Ack { .. } => Ok(AssemblerEvent::NotInbound(other)),
        }
    }

    /// Process a binary frame: join it to its header's payload and, once the payload is
    /// whole, decrypt and append. A decryption failure or overflow discards the transfer.
    pub fn on_binary(
        &mut self,
        fragment: Vec<u8>,
        keypair: &KeyPair,
    ) -> Result<AssemblerEvent, AssemblyError> {
        let Some(framed) = self.frames.on_binary(fragment)? else {
            return Ok(AssemblerEvent::FragmentBuffered);
        };
        let id = framed.id;
        let transfer = self
            .transfers
            .get_mut(&id)
            .ok_or_else(|| AssemblyError::UnknownTransfer(id.clone()))?;

        let plain = match crypto::decrypt(&framed.iv, &framed.payload, keypair) {
            Ok(p) => p,
            Err(source) => {
                self.transfers.remove(&id);
                return Err(AssemblyError::Decrypt { id, source });
            }
        };
        if let Err(e) = transfer.push(plain) {
            self.transfers.remove(&id);
            return Err(e);
        }

        let received = transfer.received;
        let pct = progress::percent(received, transfer.size);
        Ok(AssemblerEvent::ChunkReceived {
            ack: ControlMessage::Ack {
                id: id.clone(),
                progress: pct,
            },
            id,
            received,
            progress: pct,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("unknown transfer {0}")]
    UnknownTransfer(TransferId),
    #[error("framing: {0}")]
    Wire(#[from] WireError),
    #[error("chunk for {id} failed to decrypt: {source}")]
    Decrypt { id: TransferId, source: CryptoError },
    #[error("transfer {id} exceeded declared size {size}")]
    Overflow { id: TransferId, size: u64 },
    #[error("transfer {id} completed with {received} of {expected} bytes")]
    SizeMismatch {
        id: TransferId,
        expected: u64,
        received: u64,
    },
}
