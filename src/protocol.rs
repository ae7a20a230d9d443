//! Wire types for the AudioInterface RPC surface
//!
//! JSON field names follow the published interface (`isOutput`, `address`,
//! `hardwarePort`, `totalSent`, ...). Internally a stream's direction is a
//! tagged [`Direction`]; on the wire it is the `isOutput` flag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audio::catalog::DeviceInfo;
use crate::audio::port::HardwarePort;
use crate::error::{Error, Result};
use crate::network::NetworkEndpoint;
use crate::streams::{Direction, Stream, StreamRecord};

/// Unix `date` layout, e.g. `Mon Jan  2 15:04:05 UTC 2006`
pub const TIMESTAMP_FORMAT: &str = "%a %b %e %H:%M:%S UTC %Y";

pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// A stream as it appears on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDescriptor {
    /// If true, audio flows address -> hardware port
    #[serde(default)]
    pub is_output: bool,
    pub address: NetworkEndpoint,
    pub hardware_port: HardwarePort,
}

impl From<Stream> for StreamDescriptor {
    fn from(stream: Stream) -> Self {
        Self {
            is_output: stream.direction == Direction::NetworkToPlayback,
            address: stream.endpoint,
            hardware_port: stream.hardware_port,
        }
    }
}

impl From<StreamDescriptor> for Stream {
    fn from(desc: StreamDescriptor) -> Self {
        if desc.is_output {
            Stream::playback(desc.address, desc.hardware_port)
        } else {
            Stream::capture(desc.hardware_port, desc.address)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamWithMetrics {
    pub stream: StreamDescriptor,
    /// Bytes sent since creation (capture streams only)
    pub total_sent: u64,
    /// Bytes received since creation (playback streams only)
    pub total_received: u64,
    pub created: String,
}

impl From<StreamRecord> for StreamWithMetrics {
    fn from(record: StreamRecord) -> Self {
        Self {
            stream: record.stream.into(),
            total_sent: record.total_bytes_captured,
            total_received: record.total_bytes_played,
            created: format_timestamp(&record.created_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStreamRequest {
    pub stream: StreamDescriptor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateStreamResponse {
    pub created: String,
}

/// Either the full stream or just its address identifies what to delete
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteStreamRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<NetworkEndpoint>,
}

impl DeleteStreamRequest {
    pub fn endpoint(self) -> Result<NetworkEndpoint> {
        match (self.stream, self.address) {
            (Some(stream), _) => Ok(stream.address),
            (None, Some(address)) => Ok(address),
            (None, None) => Err(Error::InvalidConfig(
                "delete needs a stream or an address".into(),
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteStreamResponse {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListStreamsRequest {
    /// Only streams on this hardware channel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListStreamsResponse {
    pub streams: Vec<StreamWithMetrics>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetDeviceInfoRequest {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetDeviceInfoResponse {
    pub info: DeviceInfo,
}

/// Body of every non-2xx response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::port::SampleFormat;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_stream_wire_shape() {
        let desc: StreamDescriptor = serde_json::from_value(json!({
            "address": { "host": "10.0.0.5", "port": 5004 },
            "hardwarePort": { "channel": 0, "sampleRate": 48000, "sampleFormat": "I16" }
        }))
        .unwrap();
        assert!(!desc.is_output);

        let stream = Stream::from(desc.clone());
        assert_eq!(stream.direction, Direction::CaptureToNetwork);
        assert_eq!(stream.hardware_port.sample_format, SampleFormat::I16);
        assert_eq!(StreamDescriptor::from(stream), desc);

        let value = serde_json::to_value(&desc).unwrap();
        assert_eq!(value["isOutput"], json!(false));
        assert_eq!(value["hardwarePort"]["sampleRate"], json!(48000));
    }

    #[test]
    fn test_is_output_means_playback() {
        let desc = StreamDescriptor {
            is_output: true,
            address: NetworkEndpoint::new("0.0.0.0", 6000),
            hardware_port: HardwarePort::new(3, 96000, SampleFormat::F32),
        };
        assert_eq!(Stream::from(desc).direction, Direction::NetworkToPlayback);
    }

    #[test]
    fn test_unknown_format_rejected() {
        let result: std::result::Result<StreamDescriptor, _> = serde_json::from_value(json!({
            "address": { "host": "10.0.0.5", "port": 5004 },
            "hardwarePort": { "channel": 0, "sampleRate": 48000, "sampleFormat": "S24" }
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_timestamp_layout() {
        let at = Utc.with_ymd_and_hms(2006, 1, 2, 15, 4, 5).unwrap();
        assert_eq!(format_timestamp(&at), "Mon Jan  2 15:04:05 UTC 2006");
    }

    #[test]
    fn test_metrics_from_record() {
        let record = StreamRecord {
            id: uuid::Uuid::new_v4(),
            stream: Stream::capture(
                HardwarePort::new(0, 48000, SampleFormat::I16),
                NetworkEndpoint::new("10.0.0.5", 5004),
            ),
            created_at: Utc.with_ymd_and_hms(2024, 3, 15, 9, 30, 0).unwrap(),
            total_bytes_captured: 960,
            total_bytes_played: 0,
        };
        let value = serde_json::to_value(StreamWithMetrics::from(record)).unwrap();
        assert_eq!(value["totalSent"], json!(960));
        assert_eq!(value["totalReceived"], json!(0));
        assert_eq!(value["created"], json!("Fri Mar 15 09:30:00 UTC 2024"));
        assert_eq!(value["stream"]["address"]["port"], json!(5004));
    }

    #[test]
    fn test_delete_request_endpoint() {
        let by_address: DeleteStreamRequest =
            serde_json::from_value(json!({ "address": { "host": "10.0.0.5", "port": 5004 } }))
                .unwrap();
        assert_eq!(
            by_address.endpoint().unwrap(),
            NetworkEndpoint::new("10.0.0.5", 5004)
        );

        assert!(matches!(
            DeleteStreamRequest::default().endpoint(),
            Err(Error::InvalidConfig(_))
        ));
    }
}
