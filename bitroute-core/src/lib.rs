//! BitRoute protocol core.
//! Host-driven: no I/O; the host feeds relay and data-channel events and performs the I/O.

pub mod assembler;
pub mod chunk;
pub mod crypto;
pub mod handshake;
pub mod mime;
pub mod outbound;
pub mod progress;
pub mod protocol;
pub mod signaling;
pub mod wire;

pub use assembler::{AssemblerEvent, AssemblyError, ReceiveAssembler, ReceivedFile};
pub use chunk::{chunk_size_for, MAX_CHUNK_SIZE};
pub use crypto::{CryptoError, EncryptedChunk, KeyPair, PublicKey};
pub use handshake::{Handshake, HandshakeError, HandshakeState, Role};
pub use outbound::OutboundTransfer;
pub use progress::{format_file_size, TransferProgress, TransferStatus};
pub use protocol::{ControlMessage, TransferId};
pub use signaling::{EndpointRotation, IceCandidate, SignalingMessage};
pub use wire::{encode_chunk, fragment_ranges, ChunkFrame, FrameReader, WireError, MAX_MESSAGE_LEN};
