//! BitRoute host: relay signaling with failover, WebRTC peer sessions, and encrypted chunked
//! file transfer on tokio.

pub mod client;
pub mod config;
pub mod relay;
pub mod rtc;
pub mod session;
pub mod signaling;
pub mod transfer;
pub mod transport;

#[cfg(test)]
mod testutil;

pub use client::{parse_room, share_link, Client};
pub use config::Config;
pub use session::{LinkState, SessionError};
pub use transfer::{OutgoingFile, TransferError};
