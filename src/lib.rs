//! # XLR Bridge
//!
//! Bridges the hardware ports of an audio interface to UDP endpoints.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │            RPC (rpc::server)  POST /oto/AudioInterface.*             │
//! └──────────────────────────────────┬───────────────────────────────────┘
//!                                    ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │               AudioInterfaceService (service facade)                 │
//! └───────────────┬──────────────────────────────────┬───────────────────┘
//!                 ▼                                  ▼
//! ┌───────────────────────────────┐  ┌───────────────────────────────────┐
//! │ StreamRegistry                │  │ CapabilityCatalog                 │
//! │  endpoint ─▶ slot (DashMap)   │  │  channel ─▶ sample rates          │
//! │  supervisor task (failures)   │  └───────────────────────────────────┘
//! └───────┬───────────────┬───────┘
//!         ▼               ▼
//! ┌──────────────┐ ┌──────────────┐
//! │ Pump thread  │ │ Pump thread  │  one per stream
//! │  ch0 ─▶ UDP  │ │  UDP ─▶ ch3  │
//! └──┬────────┬──┘ └──┬────────┬──┘
//!    ▼        ▼       ▼        ▼
//! ┌─────────────────┐ ┌─────────────────┐
//! │ HardwareDriver  │ │ NetworkTransport│
//! │ (cpal/simulated)│ │ (socket2 UDP)   │
//! └─────────────────┘ └─────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod rpc;
pub mod service;
pub mod streams;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default port of the RPC server
    pub const DEFAULT_RPC_PORT: u16 = 8080;

    /// Samples per captured frame (5 ms at 48 kHz)
    pub const DEFAULT_FRAME_SAMPLES: usize = 240;

    /// Upper bound on a single hardware or socket wait inside a pump
    pub const DEFAULT_IO_TIMEOUT_MS: u64 = 50;

    pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 2000;

    pub const DEFAULT_STOP_GRACE_MS: u64 = 2000;

    /// Maximum packet size for UDP
    pub const MAX_PACKET_SIZE: usize = 1472; // MTU - IP/UDP headers

    /// Largest payload a UDP datagram can carry
    pub const MAX_UDP_PAYLOAD: usize = 65_507;

    /// Captured frames buffered between the cpal callback and the pump
    pub const CAPTURE_QUEUE_FRAMES: usize = 64;

    /// Lock-free ring buffer capacity for playback (in frames)
    pub const PLAYBACK_QUEUE_FRAMES: usize = 256;

    /// Rates probed on each device
    pub const COMMON_SAMPLE_RATES: [u32; 6] = [44100, 48000, 88200, 96000, 176400, 192000];

    /// Kernel send/receive buffer size for stream sockets
    pub const SOCKET_BUFFER_BYTES: usize = 1 << 20;

    /// Backlog of stream lifecycle events per subscriber
    pub const EVENT_CHANNEL_CAPACITY: usize = 64;

    /// Log every Nth transient pump error
    pub const TRANSIENT_LOG_EVERY: u64 = 100;

    /// Channels advertised by the simulated driver when none are configured
    pub const DEFAULT_SIMULATED_CHANNELS: usize = 8;
}
