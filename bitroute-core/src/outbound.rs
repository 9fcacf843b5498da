//! Outbound transfer state: offset tracking, status, and progress snapshots for one file.

use std::time::Instant;

use crate::chunk;
use crate::progress::{self, SpeedMeter, TransferProgress, TransferStatus};
use crate::protocol::{ControlMessage, TransferId};

/// Send-side state of one file. `offset` only moves forward and never passes `size`.
#[derive(Debug, Clone)]
pub struct OutboundTransfer {
    id: TransferId,
    name: String,
    size: u64,
    chunk_size: u64,
    offset: u64,
    status: TransferStatus,
    meter: SpeedMeter,
}

impl OutboundTransfer {
    pub fn new(id: TransferId, name: impl Into<String>, size: u64, now: Instant) -> Self {
        Self {
            id,
            name: name.into(),
            size,
            chunk_size: chunk::chunk_size_for(size),
            offset: 0,
            status: TransferStatus::Preparing,
            meter: SpeedMeter::new(now),
        }
    }

    /// Replace the speed meter (e.g. to use a different sample interval).
    pub fn with_meter(mut self, meter: SpeedMeter) -> Self {
        self.meter = meter;
        self
    }

    pub fn id(&self) -> &TransferId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    /// The `file_info` announcement for this file.
    pub fn file_info(&self) -> ControlMessage {
        ControlMessage::FileInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            size: self.size,
            chunk_size: self.chunk_size,
        }
    }

    pub fn file_complete(&self) -> ControlMessage {
        ControlMessage::FileComplete {
            id: self.id.clone(),
        }
    }

    pub fn start(&mut self) {
        self.status = TransferStatus::Transferring;
    }

    /// Length of the next chunk to read; 0 once every byte has been sent.
    pub fn next_chunk_len(&self) -> u64 {
        self.chunk_size.min(self.size - self.offset)
    }

    pub fn is_complete(&self) -> bool {
        self.offset == self.size
    }

    /// Record `len` more bytes sent and return the resulting progress.
    pub fn advance(&mut self, len: u64, now: Instant) -> Result<TransferProgress, OffsetError> {
        let next = self
            .offset
            .checked_add(len)
            .filter(|n| *n <= self.size)
            .ok_or(OffsetError {
                offset: self.offset,
                len,
                size: self.size,
            })?;
        self.offset = next;
        self.meter.update(now, self.offset);
        Ok(self.progress())
    }

    pub fn complete(&mut self) -> TransferProgress {
        self.status = TransferStatus::Completed;
        self.progress()
    }

    pub fn fail(&mut self, error: impl Into<String>) -> TransferProgress {
        self.status = TransferStatus::Error;
        let mut p = self.progress();
        p.error = Some(error.into());
        p
    }

    /// Snapshot of the current state.
    pub fn progress(&self) -> TransferProgress {
        let percent = match self.status {
            TransferStatus::Preparing => 0,
            TransferStatus::Completed => 100,
            _ if self.size == 0 => 0,
            _ => progress::percent(self.offset, self.size),
        };
        TransferProgress {
            id: self.id.clone(),
            filename: self.name.clone(),
            size: self.size,
            bytes_transferred: self.offset,
            progress: percent,
            speed: self.meter.speed(),
            eta: self.meter.eta(self.size - self.offset),
            status: self.status,
            error: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("advancing offset {offset} by {len} would pass size {size}")]
pub struct OffsetError {
    pub offset: u64,
    pub len: u64,
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn walks_file_in_policy_chunks() {
        let t0 = Instant::now();
        let size = 5 * 1024 * 1024;
        let mut t = OutboundTransfer::new("f".into(), "movie.mp4", size, t0);
        assert_eq!(t.chunk_size(), 256 * 1024);
        assert_eq!(t.progress().status, TransferStatus::Preparing);
        t.start();

        let mut chunks = 0;
        let mut last = 0u8;
        while !t.is_complete() {
            let len = t.next_chunk_len();
            let p = t.advance(len, t0 + Duration::from_millis(100 * (chunks + 1))).unwrap();
            assert!(p.progress >= last);
            last = p.progress;
            chunks += 1;
        }
        assert_eq!(chunks, 20);
        assert_eq!(last, 100);
        assert_eq!(t.next_chunk_len(), 0);
        let done = t.complete();
        assert_eq!(done.status, TransferStatus::Completed);
        assert_eq!(done.progress, 100);
        assert_eq!(done.bytes_transferred, size);
    }

    #[test]
    fn offset_cannot_pass_size() {
        let mut t = OutboundTransfer::new("f".into(), "a.txt", 10, Instant::now());
        t.start();
        t.advance(8, Instant::now()).unwrap();
        assert!(t.advance(3, Instant::now()).is_err());
        assert_eq!(t.offset(), 8);
        assert_eq!(t.next_chunk_len(), 2);
    }

    #[test]
    fn short_last_chunk() {
        let mut t = OutboundTransfer::new("f".into(), "a.bin", 64 * 1024 + 5, Instant::now());
        t.start();
        assert_eq!(t.next_chunk_len(), 64 * 1024);
        t.advance(64 * 1024, Instant::now()).unwrap();
        assert_eq!(t.next_chunk_len(), 5);
    }

    #[test]
    fn empty_file_completes_immediately() {
        let mut t = OutboundTransfer::new("f".into(), "empty", 0, Instant::now());
        t.start();
        assert!(t.is_complete());
        assert_eq!(t.progress().progress, 0);
        assert_eq!(t.complete().progress, 100);
    }

    #[test]
    fn failure_keeps_progress() {
        let mut t = OutboundTransfer::new("f".into(), "a.bin", 100, Instant::now());
        t.start();
        t.advance(50, Instant::now()).unwrap();
        let p = t.fail("boom");
        assert_eq!(p.status, TransferStatus::Error);
        assert_eq!(p.progress, 50);
        assert_eq!(p.error.as_deref(), Some("boom"));
    }

    #[test]
    fn file_info_matches_state() {
        let t = OutboundTransfer::new("f1".into(), "doc.pdf", 2 * 1024 * 1024, Instant::now());
        assert_eq!(
            t.file_info(),
            ControlMessage::FileInfo {
                id: "f1".into(),
                name: "doc.pdf".into(),
                size: 2 * 1024 * 1024,
                chunk_size: 256 * 1024,
            }
        );
    }
}
