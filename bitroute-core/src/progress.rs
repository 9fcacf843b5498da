//! Progress events, rolling speed estimation, and human-readable sizes.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::protocol::TransferId;

/// Default minimum time between speed samples.
pub const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Preparing,
    Transferring,
    Completed,
    Error,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Error)
    }
}

/// One progress update for an outbound file.
#[derive(Debug, Clone, Serialize)]
pub struct TransferProgress {
    pub id: TransferId,
    pub filename: String,
    pub size: u64,
    pub bytes_transferred: u64,
    /// Whole percent, 0..=100.
    pub progress: u8,
    /// Bytes per second from the last sample window.
    pub speed: f64,
    /// Estimated time remaining; `None` while the speed is zero.
    pub eta: Option<Duration>,
    pub status: TransferStatus,
    pub error: Option<String>,
}

/// Rolling speed estimate, resampled at most once per `min_interval`.
#[derive(Debug, Clone)]
pub struct SpeedMeter {
    last_sample: Instant,
    bytes_at_last_sample: u64,
    speed: f64,
    min_interval: Duration,
}

impl SpeedMeter {
    pub fn new(now: Instant) -> Self {
        Self::with_interval(now, MIN_SAMPLE_INTERVAL)
    }

    pub fn with_interval(now: Instant, min_interval: Duration) -> Self {
        Self {
            last_sample: now,
            bytes_at_last_sample: 0,
            speed: 0.0,
            min_interval,
        }
    }

    /// Feed the running byte total at a chunk boundary; returns the current estimate.
    pub fn update(&mut self, now: Instant, total_bytes: u64) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_sample);
        if elapsed >= self.min_interval && !elapsed.is_zero() {
            let delta = total_bytes.saturating_sub(self.bytes_at_last_sample);
            self.speed = delta as f64 / elapsed.as_secs_f64();
            self.last_sample = now;
            self.bytes_at_last_sample = total_bytes;
        }
        self.speed
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Time to move `remaining` bytes at the current speed.
    pub fn eta(&self, remaining: u64) -> Option<Duration> {
        if self.speed > 0.0 {
            Some(Duration::from_secs_f64(remaining as f64 / self.speed))
        } else {
            None
        }
    }
}

/// Whole percent of `done` out of `total`, clamped to 100.
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let p = (done.min(total) as u128 * 100) / total as u128;
    p as u8
}

/// Format a byte count as e.g. `0 Bytes`, `2 KB`, `1.5 MB`.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut unit = 0;
    let mut value = bytes as f64;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = format!("{:.2}", value);
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, UNITS[unit])
}
