//! Hardware driver seam
//!
//! The bridge never talks to an audio API directly; it goes through a
//! [`HardwareDriver`] that hands out one [`ChannelHandle`] per opened channel.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::audio::catalog::DeviceInfo;
use crate::audio::port::{HardwarePort, PortRole};
use crate::error::AudioError;

/// Per-channel capture/playback primitives of an audio interface
pub trait HardwareDriver: Send + Sync {
    /// Human readable driver name, for logs
    fn name(&self) -> &str;

    /// Report what the device supports
    fn probe(&self) -> Result<DeviceInfo, AudioError>;

    /// Acquire a channel for exclusive use in `role`
    fn open_channel(
        &self,
        port: &HardwarePort,
        role: PortRole,
    ) -> Result<Box<dyn ChannelHandle>, AudioError>;
}

/// An opened hardware channel
pub trait ChannelHandle: Send {
    /// Next captured frame, or `None` if nothing arrived within `timeout`
    fn read_frame(&mut self, timeout: Duration) -> Result<Option<Bytes>, AudioError>;

    /// Queue a frame for playback, returning the bytes accepted
    fn write_frame(&mut self, frame: &[u8]) -> Result<usize, AudioError>;

    /// Release the channel. Further I/O fails with `ChannelClosed`.
    fn close(&mut self);

    /// Shared handle on the channel's lease. Releasing it from another thread
    /// frees the channel even while this handle is blocked in I/O.
    fn lease(&self) -> Option<ChannelLease>;
}

/// Tracks which channels are currently open, per role
#[derive(Clone, Default)]
pub struct ChannelLeases {
    held: Arc<Mutex<HashSet<(PortRole, u32)>>>,
}

impl ChannelLeases {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, channel: u32, role: PortRole) -> Result<ChannelLease, AudioError> {
        let mut held = self.held.lock();
        if !held.insert((role, channel)) {
            return Err(AudioError::ChannelBusy(channel));
        }
        Ok(ChannelLease {
            inner: Arc::new(LeaseInner {
                leases: self.clone(),
                key: (role, channel),
                released: AtomicBool::new(false),
            }),
        })
    }

    pub fn is_held(&self, channel: u32, role: PortRole) -> bool {
        self.held.lock().contains(&(role, channel))
    }

    pub fn count(&self) -> usize {
        self.held.lock().len()
    }
}

/// Exclusive claim on a channel. Clones share the claim; it is given back on
/// the first `release` or when the last clone drops.
#[derive(Clone)]
pub struct ChannelLease {
    inner: Arc<LeaseInner>,
}

struct LeaseInner {
    leases: ChannelLeases,
    key: (PortRole, u32),
    released: AtomicBool,
}

impl ChannelLease {
    pub fn release(&self) {
        self.inner.release();
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }
}

impl LeaseInner {
    fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.leases.held.lock().remove(&self.key);
        }
    }
}

impl Drop for LeaseInner {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_is_exclusive_per_role() {
        let leases = ChannelLeases::new();
        let capture = leases.acquire(0, PortRole::Capture).unwrap();
        assert!(matches!(
            leases.acquire(0, PortRole::Capture),
            Err(AudioError::ChannelBusy(0))
        ));

        // Same channel, other direction is a different physical port
        let _playback = leases.acquire(0, PortRole::Playback).unwrap();
        assert_eq!(leases.count(), 2);

        drop(capture);
        assert!(!leases.is_held(0, PortRole::Capture));
        assert!(leases.acquire(0, PortRole::Capture).is_ok());
    }

    #[test]
    fn test_shared_lease_released_once() {
        let leases = ChannelLeases::new();
        let lease = leases.acquire(2, PortRole::Playback).unwrap();
        let shared = lease.clone();

        shared.release();
        assert!(lease.is_released());
        assert!(!leases.is_held(2, PortRole::Playback));

        // A new owner is not disturbed when the stale clones go away
        let next = leases.acquire(2, PortRole::Playback).unwrap();
        shared.release();
        drop(lease);
        drop(shared);
        assert!(leases.is_held(2, PortRole::Playback));
        assert!(!next.is_released());
    }
}
