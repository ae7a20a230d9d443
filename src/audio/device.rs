//! cpal-backed hardware driver
//!
//! Each opened channel gets its own thread that owns the cpal stream (streams
//! are not `Send` on every host). The stream always runs with the device's
//! full channel count; only the requested channel is extracted or filled.

use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SizedSample, StreamConfig, SupportedStreamConfigRange};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::{create_shared_buffer, SampleReader, SharedRingBuffer};
use crate::audio::catalog::{ChannelInfo, DeviceInfo};
use crate::audio::driver::{ChannelHandle, ChannelLease, ChannelLeases, HardwareDriver};
use crate::audio::port::{HardwarePort, PortRole, SampleFormat};
use crate::constants::{CAPTURE_QUEUE_FRAMES, COMMON_SAMPLE_RATES, PLAYBACK_QUEUE_FRAMES};
use crate::error::AudioError;

/// How often a parked stream thread checks whether its lease was revoked
const STOP_POLL: Duration = Duration::from_millis(100);

/// Samples that can cross the wire as little-endian bytes
trait WireSample: SizedSample + Send + 'static {
    const SIZE: usize;
    const SILENCE: Self;
    fn put_le(self, out: &mut Vec<u8>);
    fn from_le(bytes: &[u8]) -> Self;
}

impl WireSample for i16 {
    const SIZE: usize = 2;
    const SILENCE: Self = 0;
    fn put_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
    fn from_le(bytes: &[u8]) -> Self {
        i16::from_le_bytes([bytes[0], bytes[1]])
    }
}

impl WireSample for u16 {
    const SIZE: usize = 2;
    const SILENCE: Self = 1 << 15;
    fn put_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
    fn from_le(bytes: &[u8]) -> Self {
        u16::from_le_bytes([bytes[0], bytes[1]])
    }
}

impl WireSample for f32 {
    const SIZE: usize = 4;
    const SILENCE: Self = 0.0;
    fn put_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
    fn from_le(bytes: &[u8]) -> Self {
        f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

/// Driver for a single cpal device
pub struct CpalDriver {
    name: String,
    host_name: Option<String>,
    device_name: Option<String>,
    frame_samples: usize,
    leases: ChannelLeases,
}

impl CpalDriver {
    /// Resolve the device now so a misconfigured daemon fails at start-up
    pub fn new(
        host_name: Option<String>,
        device_name: Option<String>,
        frame_samples: usize,
    ) -> Result<Self, AudioError> {
        let mut driver = Self {
            name: String::new(),
            host_name,
            device_name,
            frame_samples,
            leases: ChannelLeases::new(),
        };
        let device = driver.device()?;
        driver.name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Ok(driver)
    }

    fn host(&self) -> Result<cpal::Host, AudioError> {
        let Some(host_name) = &self.host_name else {
            return Ok(cpal::default_host());
        };

        let host_id = cpal::available_hosts()
            .into_iter()
            .find(|id| id.name().eq_ignore_ascii_case(host_name))
            .ok_or_else(|| AudioError::DeviceNotFound(format!("audio host {}", host_name)))?;

        cpal::host_from_id(host_id).map_err(|e| AudioError::CpalError(e.to_string()))
    }

    fn device(&self) -> Result<cpal::Device, AudioError> {
        let host = self.host()?;

        match &self.device_name {
            Some(name) => host
                .devices()
                .map_err(|e| AudioError::CpalError(e.to_string()))?
                .find(|d| d.name().map(|n| n == *name).unwrap_or(false))
                .ok_or_else(|| AudioError::DeviceNotFound(name.clone())),
            None => host
                .default_input_device()
                .or_else(|| host.default_output_device())
                .ok_or_else(|| AudioError::DeviceNotFound("No default device".to_string())),
        }
    }

    fn supported_configs(
        device: &cpal::Device,
        role: PortRole,
    ) -> Vec<SupportedStreamConfigRange> {
        let configs = match role {
            PortRole::Capture => device.supported_input_configs().map(|it| it.collect()),
            PortRole::Playback => device.supported_output_configs().map(|it| it.collect()),
        };
        configs.unwrap_or_default()
    }

    /// Pick a config carrying the channel at exactly the requested rate and format
    fn select_config(
        device: &cpal::Device,
        port: &HardwarePort,
        role: PortRole,
    ) -> Result<StreamConfig, AudioError> {
        let configs = Self::supported_configs(device, role);
        if configs.iter().all(|c| (c.channels() as u32) <= port.channel) {
            return Err(AudioError::ChannelOutOfRange(port.channel));
        }

        let rate = cpal::SampleRate(port.sample_rate);
        configs
            .into_iter()
            .filter(|c| (c.channels() as u32) > port.channel)
            .filter(|c| c.sample_format() == port.sample_format.to_cpal())
            .find(|c| rate >= c.min_sample_rate() && rate <= c.max_sample_rate())
            .map(|c| c.with_sample_rate(rate).config())
            .ok_or_else(|| AudioError::UnsupportedFormat(port.to_string()))
    }
}

/// Union of channel counts and common rates over a set of config ranges
fn capabilities(configs: &[SupportedStreamConfigRange]) -> Vec<Vec<u32>> {
    let max_channels = configs.iter().map(|c| c.channels() as usize).max().unwrap_or(0);
    let mut per_channel = vec![Vec::new(); max_channels];

    for config in configs {
        // Only formats the bridge can carry count
        if SampleFormat::from_cpal(config.sample_format()).is_none() {
            continue;
        }
        for rate_val in COMMON_SAMPLE_RATES {
            let rate = cpal::SampleRate(rate_val);
            if rate < config.min_sample_rate() || rate > config.max_sample_rate() {
                continue;
            }
            for rates in per_channel.iter_mut().take(config.channels() as usize) {
                if !rates.contains(&rate_val) {
                    rates.push(rate_val);
                }
            }
        }
    }

    per_channel
}

impl HardwareDriver for CpalDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn probe(&self) -> Result<DeviceInfo, AudioError> {
        let device = self.device()?;
        let inputs = capabilities(&Self::supported_configs(&device, PortRole::Capture));
        let outputs = capabilities(&Self::supported_configs(&device, PortRole::Playback));

        let count = inputs.len().max(outputs.len());
        let channels = (0..count)
            .map(|i| {
                let input = inputs.get(i);
                let output = outputs.get(i);
                let rates = input
                    .into_iter()
                    .chain(output)
                    .flatten()
                    .copied();
                let desc = match (input.is_some(), output.is_some()) {
                    (true, true) => "input/output",
                    (true, false) => "input",
                    _ => "output",
                };
                ChannelInfo::new(rates).with_description(desc)
            })
            .collect();

        Ok(DeviceInfo { channels })
    }

    fn open_channel(
        &self,
        port: &HardwarePort,
        role: PortRole,
    ) -> Result<Box<dyn ChannelHandle>, AudioError> {
        let lease = self.leases.acquire(port.channel, role)?;
        let device = self.device()?;
        let config = Self::select_config(&device, port, role)?;

        let channel = CpalChannel::start(device, config, *port, role, self.frame_samples, lease)?;
        Ok(Box::new(channel))
    }
}

enum ChannelIo {
    Capture(Receiver<Bytes>),
    Playback(SharedRingBuffer),
}

/// A cpal stream serving one hardware channel
pub struct CpalChannel {
    port: HardwarePort,
    io: ChannelIo,
    errors: Receiver<AudioError>,
    dropped_frames: Arc<AtomicU64>,
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
    lease: Option<ChannelLease>,
}

impl CpalChannel {
    fn start(
        device: cpal::Device,
        config: StreamConfig,
        port: HardwarePort,
        role: PortRole,
        frame_samples: usize,
        lease: ChannelLease,
    ) -> Result<Self, AudioError> {
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let dropped_frames = Arc::new(AtomicU64::new(0));

        let (io, stream_io) = match role {
            PortRole::Capture => {
                let (frame_tx, frame_rx) = bounded::<Bytes>(CAPTURE_QUEUE_FRAMES);
                (ChannelIo::Capture(frame_rx), StreamIo::Capture(frame_tx))
            }
            PortRole::Playback => {
                let buffer = create_shared_buffer(PLAYBACK_QUEUE_FRAMES);
                (ChannelIo::Playback(buffer.clone()), StreamIo::Playback(buffer))
            }
        };

        let dropped = dropped_frames.clone();
        let stream_lease = lease.clone();
        let thread = thread::Builder::new()
            .name(format!("cpal-{:?}-ch{}", role, port.channel).to_lowercase())
            .spawn(move || {
                let spec = StreamSpec {
                    config,
                    channel: port.channel as usize,
                    frame_samples,
                    io: stream_io,
                    errors: error_tx,
                    dropped,
                };
                let stream = match port.sample_format {
                    SampleFormat::I16 => spec.build::<i16>(&device),
                    SampleFormat::U16 => spec.build::<u16>(&device),
                    SampleFormat::F32 => spec.build::<f32>(&device),
                };
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Park until close() drops the sender or the lease is taken away
                while !stream_lease.is_released() {
                    match stop_rx.recv_timeout(STOP_POLL) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                drop(stream);
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(AudioError::StreamError("stream thread exited".to_string()));
            }
        }

        tracing::debug!("cpal stream running for {} ({:?})", port, role);

        Ok(Self {
            port,
            io,
            errors: error_rx,
            dropped_frames,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
            lease: Some(lease),
        })
    }

    fn check_open(&self) -> Result<(), AudioError> {
        if self.lease.as_ref().map_or(true, ChannelLease::is_released) {
            return Err(AudioError::ChannelClosed);
        }
        match self.errors.try_recv() {
            Ok(e) => Err(e),
            Err(_) => Ok(()),
        }
    }
}

impl ChannelHandle for CpalChannel {
    fn read_frame(&mut self, timeout: Duration) -> Result<Option<Bytes>, AudioError> {
        self.check_open()?;
        let ChannelIo::Capture(frames) = &self.io else {
            return Err(AudioError::StreamError(format!("{} is open for playback", self.port)));
        };
        match frames.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(AudioError::ChannelClosed),
        }
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<usize, AudioError> {
        self.check_open()?;
        let ChannelIo::Playback(buffer) = &self.io else {
            return Err(AudioError::StreamError(format!("{} is open for capture", self.port)));
        };
        if buffer.push(Bytes::copy_from_slice(frame)) {
            Ok(frame.len())
        } else {
            Err(AudioError::BufferOverflow)
        }
    }

    fn close(&mut self) {
        self.stop_tx.take();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        if let Some(lease) = self.lease.take() {
            lease.release();
            tracing::debug!(
                "Released {} ({} frames dropped)",
                self.port,
                self.dropped_frames.load(Ordering::Relaxed)
            );
        }
    }

    fn lease(&self) -> Option<ChannelLease> {
        self.lease.clone()
    }
}

impl Drop for CpalChannel {
    fn drop(&mut self) {
        self.close();
    }
}

enum StreamIo {
    Capture(Sender<Bytes>),
    Playback(SharedRingBuffer),
}

/// Everything the stream thread needs to build its callback
struct StreamSpec {
    config: StreamConfig,
    channel: usize,
    frame_samples: usize,
    io: StreamIo,
    errors: Sender<AudioError>,
    dropped: Arc<AtomicU64>,
}

impl StreamSpec {
    fn build<T: WireSample>(self, device: &cpal::Device) -> Result<cpal::Stream, AudioError> {
        let channels = self.config.channels as usize;
        let channel = self.channel;
        let errors = self.errors;
        let on_error = move |err: cpal::StreamError| {
            let err = match err {
                cpal::StreamError::DeviceNotAvailable => AudioError::ChannelClosed,
                other => AudioError::StreamError(other.to_string()),
            };
            let _ = errors.try_send(err);
        };

        let stream = match self.io {
            StreamIo::Capture(frames) => {
                let frame_bytes = self.frame_samples * T::SIZE;
                let dropped = self.dropped;
                let mut pending = Vec::with_capacity(frame_bytes);
                device.build_input_stream(
                    &self.config,
                    move |data: &[T], _: &cpal::InputCallbackInfo| {
                        for &sample in data.iter().skip(channel).step_by(channels) {
                            sample.put_le(&mut pending);
                            if pending.len() >= frame_bytes {
                                let frame = Bytes::from(std::mem::replace(
                                    &mut pending,
                                    Vec::with_capacity(frame_bytes),
                                ));
                                if let Err(TrySendError::Full(_)) = frames.try_send(frame) {
                                    dropped.fetch_add(1, Ordering::Relaxed);
                                }
                            }
                        }
                    },
                    on_error,
                    None,
                )
            }
            StreamIo::Playback(buffer) => {
                let mut reader = SampleReader::new(buffer);
                let mut scratch = [0u8; 4];
                device.build_output_stream(
                    &self.config,
                    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                        for frame in data.chunks_mut(channels) {
                            for (i, out) in frame.iter_mut().enumerate() {
                                *out = if i == channel && reader.next_sample(&mut scratch[..T::SIZE]) {
                                    T::from_le(&scratch[..T::SIZE])
                                } else {
                                    T::SILENCE
                                };
                            }
                        }
                    },
                    on_error,
                    None,
                )
            }
        };

        stream.map_err(|e| AudioError::StreamError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_sample_roundtrip() {
        let mut out = Vec::new();
        (-1234i16).put_le(&mut out);
        40000u16.put_le(&mut out);
        0.25f32.put_le(&mut out);
        assert_eq!(<i16 as WireSample>::from_le(&out[0..2]), -1234);
        assert_eq!(<u16 as WireSample>::from_le(&out[2..4]), 40000);
        assert_eq!(<f32 as WireSample>::from_le(&out[4..8]), 0.25);
    }

    #[test]
    fn test_driver_probe() {
        // Only meaningful on hosts with an audio device; CI usually has none.
        if let Ok(driver) = CpalDriver::new(None, None, 240) {
            let info = driver.probe().unwrap();
            for channel in &info.channels {
                assert!(channel.sample_rates.windows(2).all(|w| w[0] < w[1]));
            }
        }
    }
}
