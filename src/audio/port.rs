//! Hardware port description

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sample encodings the bridge moves without conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    I16,
    U16,
    F32,
}

impl SampleFormat {
    /// Size of one sample in bytes
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::I16 | SampleFormat::U16 => 2,
            SampleFormat::F32 => 4,
        }
    }

    pub fn to_cpal(self) -> cpal::SampleFormat {
        match self {
            SampleFormat::I16 => cpal::SampleFormat::I16,
            SampleFormat::U16 => cpal::SampleFormat::U16,
            SampleFormat::F32 => cpal::SampleFormat::F32,
        }
    }

    pub fn from_cpal(format: cpal::SampleFormat) -> Option<Self> {
        match format {
            cpal::SampleFormat::I16 => Some(SampleFormat::I16),
            cpal::SampleFormat::U16 => Some(SampleFormat::U16),
            cpal::SampleFormat::F32 => Some(SampleFormat::F32),
            _ => None,
        }
    }

    /// Little-endian encoding of a sample in `[-1.0, 1.0]`
    pub fn encode(self, value: f32, out: &mut Vec<u8>) {
        let value = value.clamp(-1.0, 1.0);
        match self {
            SampleFormat::I16 => out.extend_from_slice(&((value * i16::MAX as f32) as i16).to_le_bytes()),
            SampleFormat::U16 => {
                let v = ((value + 1.0) * 0.5 * u16::MAX as f32) as u16;
                out.extend_from_slice(&v.to_le_bytes())
            }
            SampleFormat::F32 => out.extend_from_slice(&value.to_le_bytes()),
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SampleFormat::I16 => "I16",
            SampleFormat::U16 => "U16",
            SampleFormat::F32 => "F32",
        };
        f.write_str(s)
    }
}

/// A physical channel on the interface. Carries no direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwarePort {
    pub channel: u32,
    pub sample_rate: u32,
    pub sample_format: SampleFormat,
}

impl HardwarePort {
    pub fn new(channel: u32, sample_rate: u32, sample_format: SampleFormat) -> Self {
        Self {
            channel,
            sample_rate,
            sample_format,
        }
    }

    /// Bytes in a mono frame of `samples` samples
    pub fn frame_bytes(&self, samples: usize) -> usize {
        samples * self.sample_format.bytes_per_sample()
    }
}

impl fmt::Display for HardwarePort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ch{}@{}Hz/{}",
            self.channel, self.sample_rate, self.sample_format
        )
    }
}

/// Which way a channel is used once opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortRole {
    Capture,
    Playback,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_names() {
        let port = HardwarePort::new(0, 48000, SampleFormat::I16);
        let json = serde_json::to_value(port).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"channel": 0, "sampleRate": 48000, "sampleFormat": "I16"})
        );

        let bad = serde_json::from_str::<HardwarePort>(
            r#"{"channel":0,"sampleRate":48000,"sampleFormat":"I24"}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_encode_sizes() {
        let mut out = Vec::new();
        SampleFormat::I16.encode(1.0, &mut out);
        assert_eq!(out, i16::MAX.to_le_bytes());

        out.clear();
        SampleFormat::U16.encode(-1.0, &mut out);
        assert_eq!(out, 0u16.to_le_bytes());

        out.clear();
        SampleFormat::F32.encode(0.5, &mut out);
        assert_eq!(out, 0.5f32.to_le_bytes());
    }

    #[test]
    fn test_frame_bytes() {
        assert_eq!(HardwarePort::new(1, 48000, SampleFormat::F32).frame_bytes(240), 960);
        assert_eq!(HardwarePort::new(1, 48000, SampleFormat::U16).frame_bytes(240), 480);
    }
}
