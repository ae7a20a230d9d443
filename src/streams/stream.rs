//! Stream definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::audio::port::{HardwarePort, PortRole};
use crate::network::NetworkEndpoint;

/// Which way audio flows through a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Hardware input sent to a remote endpoint
    CaptureToNetwork,
    /// Datagrams received on a local endpoint played out of the hardware
    NetworkToPlayback,
}

impl Direction {
    pub fn role(self) -> PortRole {
        match self {
            Direction::CaptureToNetwork => PortRole::Capture,
            Direction::NetworkToPlayback => PortRole::Playback,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::CaptureToNetwork => f.write_str("capture->network"),
            Direction::NetworkToPlayback => f.write_str("network->playback"),
        }
    }
}

/// One unidirectional path between a hardware port and a UDP endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stream {
    pub direction: Direction,
    pub endpoint: NetworkEndpoint,
    pub hardware_port: HardwarePort,
}

impl Stream {
    pub fn capture(hardware_port: HardwarePort, endpoint: NetworkEndpoint) -> Self {
        Self {
            direction: Direction::CaptureToNetwork,
            endpoint,
            hardware_port,
        }
    }

    pub fn playback(endpoint: NetworkEndpoint, hardware_port: HardwarePort) -> Self {
        Self {
            direction: Direction::NetworkToPlayback,
            endpoint,
            hardware_port,
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            Direction::CaptureToNetwork => write!(f, "{} -> {}", self.hardware_port, self.endpoint),
            Direction::NetworkToPlayback => write!(f, "{} -> {}", self.endpoint, self.hardware_port),
        }
    }
}

/// Point-in-time view of an active stream.
///
/// Only the counter matching the direction ever moves; the other stays zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRecord {
    pub id: Uuid,
    pub stream: Stream,
    pub created_at: DateTime<Utc>,
    pub total_bytes_captured: u64,
    pub total_bytes_played: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::port::SampleFormat;

    #[test]
    fn test_direction_role() {
        assert_eq!(Direction::CaptureToNetwork.role(), PortRole::Capture);
        assert_eq!(Direction::NetworkToPlayback.role(), PortRole::Playback);
    }

    #[test]
    fn test_display() {
        let port = HardwarePort::new(0, 48000, SampleFormat::I16);
        let capture = Stream::capture(port, NetworkEndpoint::new("10.0.0.5", 5004));
        assert_eq!(capture.to_string(), "ch0@48000Hz/I16 -> 10.0.0.5:5004");

        let playback = Stream::playback(NetworkEndpoint::new("0.0.0.0", 6000), port);
        assert_eq!(playback.to_string(), "0.0.0.0:6000 -> ch0@48000Hz/I16");
    }
}
