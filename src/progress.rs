//! Progress event channel
//!
//! Producers (download engine, extractor, runtime preparation) push events
//! into an unbounded channel so a slow consumer never blocks I/O.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub type ProgressSender<T> = mpsc::UnboundedSender<T>;
pub type ProgressReceiver<T> = mpsc::UnboundedReceiver<T>;

/// Create a progress channel
pub fn progress_channel<T>() -> (ProgressSender<T>, ProgressReceiver<T>) {
    mpsc::unbounded_channel()
}

/// Send an event, ignoring a consumer that has gone away
pub fn emit<T>(tx: &ProgressSender<T>, event: T) {
    let _ = tx.send(event);
}

/// Byte-level transfer progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteProgress {
    pub bytes_transferred: u64,
    pub total_bytes: u64,
}

impl ByteProgress {
    pub fn new(bytes_transferred: u64, total_bytes: u64) -> Self {
        Self {
            bytes_transferred,
            total_bytes,
        }
    }

    /// Completed fraction in [0, 1]; an empty transfer counts as complete
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 1.0;
        }
        (self.bytes_transferred as f64 / self.total_bytes as f64).clamp(0.0, 1.0)
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_transferred >= self.total_bytes
    }
}

/// Rate limiter for byte progress notifications.
///
/// The first report and the report reaching `total` always go out; in
/// between, a report is sent only after `interval` new bytes.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    total: u64,
    interval: u64,
    last_reported: Option<u64>,
}

impl ProgressThrottle {
    pub fn new(total: u64, interval: u64) -> Self {
        Self {
            total,
            interval: interval.max(1),
            last_reported: None,
        }
    }

    /// Report `bytes` if the cadence allows it. Returns whether an event was sent.
    pub fn report(&mut self, bytes: u64, tx: &ProgressSender<ByteProgress>) -> bool {
        let due = match self.last_reported {
            None => true,
            Some(last) if bytes < last => false,
            Some(last) if last == self.total => false,
            Some(_) if bytes >= self.total => true,
            Some(last) => bytes - last >= self.interval,
        };

        if due {
            self.last_reported = Some(bytes);
            emit(tx, ByteProgress::new(bytes, self.total));
        }
        due
    }

    /// Guarantee the final 100% event
    pub fn finish(&mut self, tx: &ProgressSender<ByteProgress>) {
        if self.last_reported != Some(self.total) {
            self.last_reported = Some(self.total);
            emit(tx, ByteProgress::new(self.total, self.total));
        }
    }

    pub fn last_reported(&self) -> Option<u64> {
        self.last_reported
    }
}
