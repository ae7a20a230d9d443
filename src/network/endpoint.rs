//! Network endpoint addressing

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};

use crate::error::{Error, NetworkError};

/// A UDP host/port pair. Identity is the exact `(host, port)` value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NetworkEndpoint {
    pub host: String,
    pub port: u16,
}

impl NetworkEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Reject values that can never name a usable endpoint
    pub fn validate(&self) -> Result<(), Error> {
        if self.host.trim().is_empty() {
            return Err(Error::InvalidConfig("endpoint host is empty".to_string()));
        }
        if self.port == 0 {
            return Err(Error::InvalidConfig(format!(
                "endpoint port must be in 1..=65535 (got 0 for {})",
                self.host
            )));
        }
        Ok(())
    }

    /// Resolve to a socket address, preferring IPv4
    pub fn resolve(&self) -> Result<SocketAddr, NetworkError> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| NetworkError::InvalidEndpoint(format!("{}: {}", self, e)))?
            .collect();

        addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| NetworkError::InvalidEndpoint(format!("{}: no addresses", self)))
    }
}

impl fmt::Display for NetworkEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
