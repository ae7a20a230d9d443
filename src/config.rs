//! Application configuration
//!
//! Loaded from a TOML file; every field has a default so an empty (or
//! missing) file yields a working daemon.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::catalog::{ChannelInfo, DeviceInfo};
use crate::constants::*;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub rpc: RpcConfig,
    pub device: DeviceConfig,
    pub pump: PumpConfig,
}

impl AppConfig {
    /// Load from `path`, or from the per-user config file if it exists,
    /// falling back to defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => {
                    tracing::info!("No config file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let text = std::fs::read_to_string(&path)?;
        let config = Self::from_toml(&text)?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "xlr-bridge").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.device.frame_samples == 0 {
            return Err(Error::Config("device.frame_samples must be positive".into()));
        }
        if self.pump.io_timeout_ms == 0
            || self.pump.startup_timeout_ms == 0
            || self.pump.stop_grace_ms == 0
        {
            return Err(Error::Config("pump timeouts must be positive".into()));
        }
        if self.pump.max_datagram_size == 0 || self.pump.max_datagram_size > MAX_UDP_PAYLOAD {
            return Err(Error::Config(format!(
                "pump.max_datagram_size must be in 1..={}",
                MAX_UDP_PAYLOAD
            )));
        }
        if let Some(channels) = &self.device.channels {
            if let Some(i) = channels.iter().position(|c| c.sample_rates.is_empty()) {
                return Err(Error::Config(format!("device.channels[{}] lists no sample rates", i)));
            }
        }
        Ok(())
    }
}

/// HTTP control surface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: DEFAULT_RPC_PORT,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    #[default]
    Cpal,
    Simulated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub driver: DriverKind,
    /// cpal host name (e.g. "ALSA", "JACK"); default host when unset
    pub host: Option<String>,
    /// Device name; default device when unset
    pub name: Option<String>,
    /// Samples per captured frame
    pub frame_samples: usize,
    /// Overrides what the driver reports
    pub channels: Option<Vec<ChannelInfo>>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            driver: DriverKind::default(),
            host: None,
            name: None,
            frame_samples: DEFAULT_FRAME_SAMPLES,
            channels: None,
        }
    }
}

impl DeviceConfig {
    /// Catalog the simulated driver advertises
    pub fn simulated_info(&self) -> DeviceInfo {
        let channels = self.channels.clone().unwrap_or_else(|| {
            (0..DEFAULT_SIMULATED_CHANNELS)
                .map(|i| ChannelInfo::new([44100, 48000, 96000]).with_description(format!("sim {}", i)))
                .collect()
        });
        DeviceInfo { channels }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PumpConfig {
    pub io_timeout_ms: u64,
    pub startup_timeout_ms: u64,
    pub stop_grace_ms: u64,
    pub max_datagram_size: usize,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            io_timeout_ms: DEFAULT_IO_TIMEOUT_MS,
            startup_timeout_ms: DEFAULT_STARTUP_TIMEOUT_MS,
            stop_grace_ms: DEFAULT_STOP_GRACE_MS,
            max_datagram_size: MAX_PACKET_SIZE,
        }
    }
}

impl PumpConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_default() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.rpc.port, DEFAULT_RPC_PORT);
        assert_eq!(config.device.driver, DriverKind::Cpal);
        assert_eq!(config.pump.max_datagram_size, MAX_PACKET_SIZE);
    }

    #[test]
    fn test_full_file() {
        let config = AppConfig::from_toml(
            r#"
            [rpc]
            bind_address = "0.0.0.0"
            port = 9000

            [device]
            driver = "simulated"
            frame_samples = 120
            channels = [
                { sampleRates = [48000, 96000], desc = "front left" },
                { sampleRates = [48000] },
            ]

            [pump]
            io_timeout_ms = 20
            stop_grace_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.rpc.bind_address, "0.0.0.0");
        assert_eq!(config.device.driver, DriverKind::Simulated);
        assert_eq!(config.device.frame_samples, 120);
        assert_eq!(config.pump.io_timeout(), Duration::from_millis(20));
        assert_eq!(config.pump.startup_timeout_ms, DEFAULT_STARTUP_TIMEOUT_MS);

        let info = config.device.simulated_info();
        assert_eq!(info.channels.len(), 2);
        assert_eq!(info.channels[0].description.as_deref(), Some("front left"));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            AppConfig::from_toml("[pump]\nio_timeout_ms = 0"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            AppConfig::from_toml("[pump]\nstop_grace_ms = 0"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            AppConfig::from_toml("[pump]\nmax_datagram_size = 70000"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            AppConfig::from_toml("[device]\nchannels = [{ sampleRates = [] }]"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            AppConfig::from_toml("[device]\ndriver = \"asio\""),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_default_simulated_catalog() {
        let info = DeviceConfig::default().simulated_info();
        assert_eq!(info.channels.len(), DEFAULT_SIMULATED_CHANNELS);
        assert!(info.channels.iter().all(|c| c.sample_rates.contains(&48000)));
    }
}
