//! Stream pump
//!
//! One dedicated thread per active stream moving frames between a hardware
//! channel and a UDP socket.
//!
//! ```text
//! Starting ──acquire ok──▶ Running ──stop──▶ Stopping ──▶ Stopped
//!    │                        │
//!    └──acquire failed──▶ Stopped        └──structural error──▶ Failed
//! ```
//!
//! Startup outcome and the final state travel back over oneshot channels;
//! a failure while running is also reported to the registry's supervisor.
//!
//! The channel lease and socket are parked in a `Reclaim` shared with the
//! handle, so a pump stuck in driver I/O can still be stripped of both.

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::audio::driver::{ChannelHandle, ChannelLease, HardwareDriver};
use crate::config::PumpConfig;
use crate::constants::{MAX_UDP_PAYLOAD, TRANSIENT_LOG_EVERY};
use crate::error::{BackendError, NetworkError};
use crate::network::{DatagramSocket, NetworkEndpoint, NetworkTransport};
use crate::streams::metrics::PumpMetrics;
use crate::streams::stream::{Direction, Stream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

/// Reported to the registry when a running pump dies on its own
#[derive(Debug, Clone)]
pub enum PumpEvent {
    Failed {
        id: Uuid,
        endpoint: NetworkEndpoint,
        reason: String,
    },
}

/// Everything a pump needs to run one stream
pub struct PumpContext {
    pub id: Uuid,
    pub stream: Stream,
    pub driver: Arc<dyn HardwareDriver>,
    pub transport: Arc<dyn NetworkTransport>,
    pub metrics: Arc<PumpMetrics>,
    pub config: PumpConfig,
    pub events: mpsc::UnboundedSender<PumpEvent>,
}

/// Resources the owner can take back from a pump that stopped responding
#[derive(Default)]
struct Reclaim {
    lease: Mutex<Option<ChannelLease>>,
    socket: Mutex<Option<Box<dyn DatagramSocket>>>,
}

impl Reclaim {
    /// Release the channel and close the socket. Waits up to `wait` for a
    /// socket operation in flight on the pump thread.
    fn revoke(&self, wait: Duration) -> bool {
        if let Some(lease) = self.lease.lock().take() {
            lease.release();
        }
        match self.socket.try_lock_for(wait) {
            Some(mut socket) => {
                if let Some(mut socket) = socket.take() {
                    socket.close();
                }
                true
            }
            None => false,
        }
    }
}

/// Owner's side of a running pump
pub struct PumpHandle {
    endpoint: NetworkEndpoint,
    io_timeout: Duration,
    state: Arc<Mutex<PumpState>>,
    reclaim: Arc<Reclaim>,
    stop_tx: Option<Sender<()>>,
    done_rx: Option<oneshot::Receiver<PumpState>>,
    thread: Option<JoinHandle<()>>,
}

impl PumpHandle {
    /// Start a pump and wait until it is running or has given up
    pub async fn spawn(ctx: PumpContext) -> Result<PumpHandle, BackendError> {
        let (startup_tx, startup_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let state = Arc::new(Mutex::new(PumpState::Starting));

        let reclaim = Arc::new(Reclaim::default());
        let endpoint = ctx.stream.endpoint.clone();
        let io_timeout = ctx.config.io_timeout();
        let startup_timeout = ctx.config.startup_timeout();
        let stop_grace = ctx.config.stop_grace();

        let pump = Pump {
            ctx,
            state: state.clone(),
            reclaim: reclaim.clone(),
        };
        let thread = thread::Builder::new()
            .name(format!("pump-{}", endpoint))
            .spawn(move || pump.run(startup_tx, stop_rx, done_tx))
            .map_err(BackendError::Spawn)?;

        let mut handle = PumpHandle {
            endpoint,
            io_timeout,
            state,
            reclaim,
            stop_tx: Some(stop_tx),
            done_rx: Some(done_rx),
            thread: Some(thread),
        };

        match tokio::time::timeout(startup_timeout, startup_rx).await {
            Ok(Ok(Ok(()))) => Ok(handle),
            Ok(Ok(Err(e))) => {
                handle.finish(stop_grace).await;
                Err(e)
            }
            Ok(Err(_)) => {
                handle.finish(stop_grace).await;
                Err(BackendError::PumpVanished)
            }
            Err(_) => {
                // Dropping the startup receiver tells the pump nobody is waiting
                handle.finish(stop_grace).await;
                Err(BackendError::StartupTimeout(startup_timeout.as_millis() as u64))
            }
        }
    }

    pub fn state(&self) -> PumpState {
        *self.state.lock()
    }

    /// Ask the pump to stop and wait up to `grace` for it to release its
    /// channel and socket. Past that, both are taken from it. Returns the
    /// pump's final state.
    pub async fn stop(mut self, grace: Duration) -> PumpState {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.try_send(());
        }
        self.finish(grace).await
    }

    async fn finish(&mut self, grace: Duration) -> PumpState {
        self.stop_tx.take();
        let Some(done_rx) = self.done_rx.take() else {
            return self.state();
        };

        match tokio::time::timeout(grace, done_rx).await {
            Ok(Ok(state)) => {
                if let Some(thread) = self.thread.take() {
                    let _ = tokio::task::spawn_blocking(move || thread.join()).await;
                }
                state
            }
            Ok(Err(_)) => {
                tracing::error!("Pump for {} exited without reporting", self.endpoint);
                self.thread.take();
                self.revoke().await;
                PumpState::Failed
            }
            Err(_) => {
                tracing::warn!(
                    "Pump for {} did not stop within {:?}, revoking its channel and socket",
                    self.endpoint,
                    grace
                );
                self.thread.take();
                self.revoke().await;
                PumpState::Stopped
            }
        }
    }
}

impl PumpHandle {
    async fn revoke(&self) {
        let reclaim = self.reclaim.clone();
        let wait = self.io_timeout * 2;
        let closed = tokio::task::spawn_blocking(move || reclaim.revoke(wait))
            .await
            .unwrap_or(false);
        if !closed {
            tracing::error!("Socket for {} still busy, left to the pump thread", self.endpoint);
        }
    }
}

enum Outcome {
    Stopped,
    Failed(BackendError),
}

struct Pump {
    ctx: PumpContext,
    state: Arc<Mutex<PumpState>>,
    reclaim: Arc<Reclaim>,
}

impl Pump {
    fn set_state(&self, state: PumpState) {
        let mut current = self.state.lock();
        tracing::debug!(
            "Pump {} {:?} -> {:?}",
            self.ctx.stream.endpoint,
            *current,
            state
        );
        *current = state;
    }

    fn run(
        self,
        startup_tx: oneshot::Sender<Result<(), BackendError>>,
        stop_rx: Receiver<()>,
        done_tx: oneshot::Sender<PumpState>,
    ) {
        let (mut channel, socket) = match self.acquire() {
            Ok(io) => io,
            Err(e) => {
                self.set_state(PumpState::Stopped);
                let _ = startup_tx.send(Err(e));
                let _ = done_tx.send(PumpState::Stopped);
                return;
            }
        };
        *self.reclaim.lease.lock() = channel.lease();
        *self.reclaim.socket.lock() = Some(socket);

        self.set_state(PumpState::Running);
        let outcome = if startup_tx.send(Ok(())).is_err() {
            Outcome::Stopped
        } else {
            self.transfer(channel.as_mut(), &stop_rx)
        };

        if let Outcome::Stopped = outcome {
            self.set_state(PumpState::Stopping);
        }
        channel.close();
        self.reclaim.lease.lock().take();
        if let Some(mut socket) = self.reclaim.socket.lock().take() {
            socket.close();
        }

        let final_state = match outcome {
            Outcome::Stopped => PumpState::Stopped,
            Outcome::Failed(e) => {
                let _ = self.ctx.events.send(PumpEvent::Failed {
                    id: self.ctx.id,
                    endpoint: self.ctx.stream.endpoint.clone(),
                    reason: e.to_string(),
                });
                PumpState::Failed
            }
        };
        self.set_state(final_state);
        let _ = done_tx.send(final_state);
    }

    fn acquire(&self) -> Result<(Box<dyn ChannelHandle>, Box<dyn DatagramSocket>), BackendError> {
        let stream = &self.ctx.stream;
        let mut channel = self
            .ctx
            .driver
            .open_channel(&stream.hardware_port, stream.direction.role())?;

        match self.ctx.transport.bind_or_connect(&stream.endpoint, stream.direction) {
            Ok(socket) => Ok((channel, socket)),
            Err(e) => {
                channel.close();
                Err(e.into())
            }
        }
    }

    fn transfer(&self, channel: &mut dyn ChannelHandle, stop_rx: &Receiver<()>) -> Outcome {
        let direction = self.ctx.stream.direction;
        let mut recv_buf = vec![0u8; MAX_UDP_PAYLOAD];

        loop {
            if stop_requested(stop_rx) {
                return Outcome::Stopped;
            }

            let result = match direction {
                Direction::CaptureToNetwork => self.capture_once(channel),
                Direction::NetworkToPlayback => self.playback_once(channel, &mut recv_buf),
            };

            match result {
                Ok(()) => {}
                Err(e) if e.is_transient() => {
                    let count = self.ctx.metrics.record_transient_error();
                    if count == 1 || count % TRANSIENT_LOG_EVERY == 0 {
                        tracing::warn!(
                            "Transient error on {} ({} so far): {}",
                            self.ctx.stream.endpoint,
                            count,
                            e
                        );
                    }
                }
                // Handles revoked by the owner after a stop show up as errors
                Err(_) if stop_requested(stop_rx) => return Outcome::Stopped,
                Err(e) => return Outcome::Failed(e),
            }
        }
    }

    /// Run `op` on the socket unless the owner has taken it back
    fn with_socket<T>(
        &self,
        op: impl FnOnce(&mut dyn DatagramSocket) -> Result<T, NetworkError>,
    ) -> Result<T, BackendError> {
        let mut socket = self.reclaim.socket.lock();
        let socket = socket
            .as_mut()
            .ok_or_else(|| NetworkError::SocketUnusable("socket revoked".into()))?;
        Ok(op(&mut **socket)?)
    }

    fn capture_once(&self, channel: &mut dyn ChannelHandle) -> Result<(), BackendError> {
        let Some(frame) = channel.read_frame(self.ctx.config.io_timeout())? else {
            return Ok(());
        };
        self.with_socket(|socket| {
            for datagram in frame.chunks(self.ctx.config.max_datagram_size) {
                let sent = socket.send(datagram)?;
                self.ctx
                    .metrics
                    .record_transfer(Direction::CaptureToNetwork, sent);
            }
            Ok(())
        })
    }

    fn playback_once(
        &self,
        channel: &mut dyn ChannelHandle,
        buf: &mut [u8],
    ) -> Result<(), BackendError> {
        let Some(len) = self.with_socket(|socket| socket.receive(buf))? else {
            return Ok(());
        };
        let written = channel.write_frame(&buf[..len])?;
        self.ctx
            .metrics
            .record_transfer(Direction::NetworkToPlayback, written);
        Ok(())
    }
}

fn stop_requested(stop_rx: &Receiver<()>) -> bool {
    match stop_rx.try_recv() {
        Err(TryRecvError::Empty) => false,
        Ok(()) | Err(TryRecvError::Disconnected) => true,
    }
}
