//! Per-stream byte accounting
//!
//! Written by exactly one pump thread, read by any number of `list` calls.
//! Counters only ever grow.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::streams::stream::Direction;

#[derive(Debug, Default)]
pub struct PumpMetrics {
    bytes_captured: AtomicU64,
    bytes_played: AtomicU64,
    datagrams: AtomicU64,
    transient_errors: AtomicU64,
}

impl PumpMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account a completed transfer of `bytes` in `direction`
    pub fn record_transfer(&self, direction: Direction, bytes: usize) {
        let counter = match direction {
            Direction::CaptureToNetwork => &self.bytes_captured,
            Direction::NetworkToPlayback => &self.bytes_played,
        };
        counter.fetch_add(bytes as u64, Ordering::Relaxed);
        self.datagrams.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the running total of transient errors
    pub fn record_transient_error(&self) -> u64 {
        self.transient_errors.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            bytes_captured: self.bytes_captured.load(Ordering::Relaxed),
            bytes_played: self.bytes_played.load(Ordering::Relaxed),
            datagrams: self.datagrams.load(Ordering::Relaxed),
            transient_errors: self.transient_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub bytes_captured: u64,
    pub bytes_played: u64,
    pub datagrams: u64,
    pub transient_errors: u64,
}
