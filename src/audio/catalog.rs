//! Capability catalog
//!
//! The device-advertised set of valid channel / sample-rate combinations.
//! Read-only once built; every create request is checked against it before
//! any resource is acquired.

use serde::{Deserialize, Serialize};

use crate::audio::port::HardwarePort;
use crate::error::{Error, Result};

/// Valid configurations for one channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelInfo {
    pub sample_rates: Vec<u32>,
    #[serde(rename = "desc", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ChannelInfo {
    pub fn new(sample_rates: impl IntoIterator<Item = u32>) -> Self {
        let mut sample_rates: Vec<u32> = sample_rates.into_iter().collect();
        sample_rates.sort_unstable();
        sample_rates.dedup();
        Self {
            sample_rates,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Valid configurations for the whole device, indexed by channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub channels: Vec<ChannelInfo>,
}

#[derive(Debug, Clone)]
pub struct CapabilityCatalog {
    info: DeviceInfo,
}

impl CapabilityCatalog {
    pub fn new(info: DeviceInfo) -> Self {
        Self { info }
    }

    pub fn describe(&self) -> DeviceInfo {
        self.info.clone()
    }

    pub fn validate(&self, port: &HardwarePort) -> bool {
        self.check(port).is_ok()
    }

    /// Like [`validate`](Self::validate) but says what is wrong
    pub fn check(&self, port: &HardwarePort) -> Result<()> {
        // The format is closed over by `SampleFormat`, only channel and rate need checking.
        let channel = self
            .info
            .channels
            .get(port.channel as usize)
            .ok_or_else(|| {
                Error::InvalidConfig(format!(
                    "channel {} out of range (device has {})",
                    port.channel,
                    self.info.channels.len()
                ))
            })?;

        if !channel.sample_rates.contains(&port.sample_rate) {
            return Err(Error::InvalidConfig(format!(
                "sample rate {} not supported on channel {} (supported: {:?})",
                port.sample_rate, port.channel, channel.sample_rates
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::port::SampleFormat;
    use proptest::prelude::*;

    fn catalog() -> CapabilityCatalog {
        CapabilityCatalog::new(DeviceInfo {
            channels: vec![
                ChannelInfo::new([96000, 48000]).with_description("front left"),
                ChannelInfo::new([48000]),
            ],
        })
    }

    #[test]
    fn test_validate() {
        let catalog = catalog();
        assert!(catalog.validate(&HardwarePort::new(0, 48000, SampleFormat::I16)));
        assert!(catalog.validate(&HardwarePort::new(0, 96000, SampleFormat::F32)));
        assert!(catalog.validate(&HardwarePort::new(1, 48000, SampleFormat::U16)));
        assert!(!catalog.validate(&HardwarePort::new(1, 96000, SampleFormat::I16)));
        assert!(!catalog.validate(&HardwarePort::new(2, 48000, SampleFormat::I16)));
    }

    #[test]
    fn test_check_message() {
        let err = catalog()
            .check(&HardwarePort::new(1, 44100, SampleFormat::I16))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(ref msg) if msg.contains("44100")));
    }

    #[test]
    fn test_describe_serializes_desc() {
        let json = serde_json::to_value(catalog().describe()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"channels": [
                {"sampleRates": [48000, 96000], "desc": "front left"},
                {"sampleRates": [48000]}
            ]})
        );
    }

    proptest! {
        #[test]
        fn prop_validate_matches_membership(channel in 0u32..4, rate in 8000u32..200_000) {
            let catalog = catalog();
            let port = HardwarePort::new(channel, rate, SampleFormat::I16);
            let expected = match channel {
                0 => rate == 48000 || rate == 96000,
                1 => rate == 48000,
                _ => false,
            };
            prop_assert_eq!(catalog.validate(&port), expected);
        }
    }
}
