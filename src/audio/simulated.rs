//! Simulated audio interface
//!
//! Stands in for real hardware on hosts without an interface: capture
//! channels produce a paced sine tone, playback channels count the frames
//! written to them and discard the audio.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::catalog::DeviceInfo;
use crate::audio::driver::{ChannelHandle, ChannelLease, ChannelLeases, HardwareDriver};
use crate::audio::port::{HardwarePort, PortRole};
use crate::error::AudioError;

const TONE_HZ: f32 = 440.0;
const TONE_LEVEL: f32 = 0.25;

pub struct SimulatedDriver {
    info: DeviceInfo,
    frame_samples: usize,
    leases: ChannelLeases,
    disconnected: Arc<Mutex<HashSet<u32>>>,
    frames_played: Arc<AtomicU64>,
}

impl SimulatedDriver {
    pub fn new(info: DeviceInfo, frame_samples: usize) -> Self {
        Self {
            info,
            frame_samples,
            leases: ChannelLeases::new(),
            disconnected: Arc::new(Mutex::new(HashSet::new())),
            frames_played: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Simulate unplugging a channel: open handles on it start failing
    pub fn disconnect(&self, channel: u32) {
        self.disconnected.lock().insert(channel);
    }

    pub fn reconnect(&self, channel: u32) {
        self.disconnected.lock().remove(&channel);
    }

    pub fn leases(&self) -> &ChannelLeases {
        &self.leases
    }

    /// Frames accepted by all playback channels so far
    pub fn frames_played(&self) -> u64 {
        self.frames_played.load(Ordering::Relaxed)
    }
}

impl HardwareDriver for SimulatedDriver {
    fn name(&self) -> &str {
        "simulated"
    }

    fn probe(&self) -> Result<DeviceInfo, AudioError> {
        Ok(self.info.clone())
    }

    fn open_channel(
        &self,
        port: &HardwarePort,
        role: PortRole,
    ) -> Result<Box<dyn ChannelHandle>, AudioError> {
        let info = self
            .info
            .channels
            .get(port.channel as usize)
            .ok_or(AudioError::ChannelOutOfRange(port.channel))?;
        if !info.sample_rates.contains(&port.sample_rate) {
            return Err(AudioError::UnsupportedFormat(port.to_string()));
        }
        if self.disconnected.lock().contains(&port.channel) {
            return Err(AudioError::DeviceNotFound(format!("channel {}", port.channel)));
        }

        let lease = self.leases.acquire(port.channel, role)?;
        let frame_period = Duration::from_secs_f64(self.frame_samples as f64 / port.sample_rate as f64);

        Ok(Box::new(SimulatedChannel {
            port: *port,
            frame_samples: self.frame_samples,
            frame_period,
            next_due: Instant::now(),
            phase: 0.0,
            disconnected: self.disconnected.clone(),
            frames_played: self.frames_played.clone(),
            lease: Some(lease),
        }))
    }
}

struct SimulatedChannel {
    port: HardwarePort,
    frame_samples: usize,
    frame_period: Duration,
    next_due: Instant,
    phase: f32,
    disconnected: Arc<Mutex<HashSet<u32>>>,
    frames_played: Arc<AtomicU64>,
    lease: Option<ChannelLease>,
}

impl SimulatedChannel {
    fn check_open(&self) -> Result<(), AudioError> {
        let released = self.lease.as_ref().map_or(true, ChannelLease::is_released);
        if released || self.disconnected.lock().contains(&self.port.channel) {
            return Err(AudioError::ChannelClosed);
        }
        Ok(())
    }

    /// Sleep until the next frame slot, or return false if it is further than `timeout` away
    fn wait_for_slot(&mut self, timeout: Duration) -> bool {
        let now = Instant::now();
        if self.next_due > now {
            let wait = self.next_due - now;
            if wait > timeout {
                std::thread::sleep(timeout);
                return false;
            }
            std::thread::sleep(wait);
        }
        // Don't burst to catch up after a stall
        let floor = Instant::now()
            .checked_sub(self.frame_period)
            .unwrap_or(self.next_due);
        self.next_due = self.next_due.max(floor) + self.frame_period;
        true
    }

    fn tone_frame(&mut self) -> Bytes {
        let step = TAU * TONE_HZ / self.port.sample_rate as f32;
        let mut frame = Vec::with_capacity(self.port.frame_bytes(self.frame_samples));
        for _ in 0..self.frame_samples {
            self.port.sample_format.encode(self.phase.sin() * TONE_LEVEL, &mut frame);
            self.phase = (self.phase + step) % TAU;
        }
        Bytes::from(frame)
    }
}

impl ChannelHandle for SimulatedChannel {
    fn read_frame(&mut self, timeout: Duration) -> Result<Option<Bytes>, AudioError> {
        self.check_open()?;
        if !self.wait_for_slot(timeout) {
            return Ok(None);
        }
        Ok(Some(self.tone_frame()))
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<usize, AudioError> {
        self.check_open()?;
        self.frames_played.fetch_add(1, Ordering::Relaxed);
        Ok(frame.len())
    }

    fn close(&mut self) {
        if let Some(lease) = self.lease.take() {
            lease.release();
        }
    }

    fn lease(&self) -> Option<ChannelLease> {
        self.lease.clone()
    }
}

/// Wraps the simulated driver with slow opens, failing opens and stalled I/O
#[cfg(test)]
pub(crate) mod scripted {
    use super::*;
    use std::sync::atomic::AtomicU32;

    pub struct ScriptedDriver {
        inner: SimulatedDriver,
        open_delay: Duration,
        failing_opens: AtomicU32,
        stall: Option<Duration>,
    }

    impl ScriptedDriver {
        pub fn new(inner: SimulatedDriver) -> Self {
            Self {
                inner,
                open_delay: Duration::ZERO,
                failing_opens: AtomicU32::new(0),
                stall: None,
            }
        }

        /// Every open sleeps this long before doing anything
        pub fn open_delay(mut self, delay: Duration) -> Self {
            self.open_delay = delay;
            self
        }

        /// The next `n` opens fail after their delay
        pub fn failing_opens(self, n: u32) -> Self {
            self.failing_opens.store(n, Ordering::SeqCst);
            self
        }

        /// Every read and write on an opened channel blocks this long first
        pub fn stalled_io(mut self, stall: Duration) -> Self {
            self.stall = Some(stall);
            self
        }

        pub fn leases(&self) -> &ChannelLeases {
            self.inner.leases()
        }
    }

    impl HardwareDriver for ScriptedDriver {
        fn name(&self) -> &str {
            "scripted"
        }

        fn probe(&self) -> Result<DeviceInfo, AudioError> {
            self.inner.probe()
        }

        fn open_channel(
            &self,
            port: &HardwarePort,
            role: PortRole,
        ) -> Result<Box<dyn ChannelHandle>, AudioError> {
            std::thread::sleep(self.open_delay);
            let failing = self
                .failing_opens
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(AudioError::DeviceNotFound("scripted open failure".into()));
            }
            let handle = self.inner.open_channel(port, role)?;
            Ok(match self.stall {
                Some(stall) => Box::new(StalledChannel {
                    inner: handle,
                    stall,
                }),
                None => handle,
            })
        }
    }

    struct StalledChannel {
        inner: Box<dyn ChannelHandle>,
        stall: Duration,
    }

    impl ChannelHandle for StalledChannel {
        fn read_frame(&mut self, timeout: Duration) -> Result<Option<Bytes>, AudioError> {
            std::thread::sleep(self.stall);
            self.inner.read_frame(timeout)
        }

        fn write_frame(&mut self, frame: &[u8]) -> Result<usize, AudioError> {
            std::thread::sleep(self.stall);
            self.inner.write_frame(frame)
        }

        fn close(&mut self) {
            self.inner.close();
        }

        fn lease(&self) -> Option<ChannelLease> {
            self.inner.lease()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::catalog::ChannelInfo;
    use crate::audio::port::SampleFormat;

    fn driver() -> SimulatedDriver {
        SimulatedDriver::new(
            DeviceInfo {
                channels: vec![ChannelInfo::new([48000]), ChannelInfo::new([48000, 96000])],
            },
            48,
        )
    }

    #[test]
    fn test_capture_produces_frames() {
        let driver = driver();
        let port = HardwarePort::new(1, 96000, SampleFormat::F32);
        let mut handle = driver.open_channel(&port, PortRole::Capture).unwrap();

        let frame = handle
            .read_frame(Duration::from_millis(100))
            .unwrap()
            .expect("frame within timeout");
        assert_eq!(frame.len(), 48 * 4);
    }

    #[test]
    fn test_busy_and_release() {
        let driver = driver();
        let port = HardwarePort::new(0, 48000, SampleFormat::I16);
        let mut handle = driver.open_channel(&port, PortRole::Capture).unwrap();

        assert!(matches!(
            driver.open_channel(&port, PortRole::Capture),
            Err(AudioError::ChannelBusy(0))
        ));

        handle.close();
        assert!(matches!(
            handle.read_frame(Duration::from_millis(1)),
            Err(AudioError::ChannelClosed)
        ));
        assert!(driver.open_channel(&port, PortRole::Capture).is_ok());
    }

    #[test]
    fn test_external_release_closes_handle() {
        let driver = driver();
        let port = HardwarePort::new(1, 48000, SampleFormat::I16);
        let mut handle = driver.open_channel(&port, PortRole::Capture).unwrap();

        handle.lease().unwrap().release();
        assert_eq!(driver.leases().count(), 0);
        assert!(matches!(
            handle.read_frame(Duration::from_millis(1)),
            Err(AudioError::ChannelClosed)
        ));
    }

    #[test]
    fn test_disconnect_is_structural() {
        let driver = driver();
        let port = HardwarePort::new(0, 48000, SampleFormat::U16);
        let mut handle = driver.open_channel(&port, PortRole::Playback).unwrap();
        assert_eq!(handle.write_frame(&[0; 8]).unwrap(), 8);
        assert_eq!(driver.frames_played(), 1);

        driver.disconnect(0);
        let err = handle.write_frame(&[0; 8]).unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_rejects_unadvertised_rate() {
        let driver = driver();
        let port = HardwarePort::new(0, 96000, SampleFormat::I16);
        assert!(matches!(
            driver.open_channel(&port, PortRole::Capture),
            Err(AudioError::UnsupportedFormat(_))
        ));
    }
}
