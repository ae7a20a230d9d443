//! Error types for the audio bridge

use thiserror::Error;

use crate::network::NetworkEndpoint;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Endpoint already in use: {0}")]
    EndpointInUse(NetworkEndpoint),

    #[error("Stream not found: {0}")]
    NotFound(NetworkEndpoint),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(#[from] BackendError),

    #[error("Pump failure on {endpoint}: {reason}")]
    PumpFailure {
        endpoint: NetworkEndpoint,
        reason: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of [`Error`], used by transports to pick a status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidConfig,
    EndpointInUse,
    NotFound,
    BackendUnavailable,
    PumpFailure,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Error::EndpointInUse(_) => ErrorKind::EndpointInUse,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            Error::PumpFailure { .. } => ErrorKind::PumpFailure,
            Error::Config(_) | Error::Io(_) => ErrorKind::Internal,
        }
    }
}

/// Failures while acquiring or running the resources behind a stream
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Failed to spawn pump thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Pump did not start within {0} ms")]
    StartupTimeout(u64),

    #[error("Pump thread exited before reporting")]
    PumpVanished,
}

impl BackendError {
    /// Whether a running pump can shrug this off
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Audio(e) => e.is_transient(),
            BackendError::Network(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Hardware driver errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Channel {0} does not exist on this device")]
    ChannelOutOfRange(u32),

    #[error("Channel {0} is busy")]
    ChannelBusy(u32),

    #[error("Channel closed by driver")]
    ChannelClosed,

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Buffer overflow")]
    BufferOverflow,

    #[error("Buffer underrun")]
    BufferUnderrun,

    #[error("cpal error: {0}")]
    CpalError(String),
}

impl AudioError {
    /// Whether the pump should keep going after this error
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AudioError::BufferOverflow | AudioError::BufferUnderrun | AudioError::StreamError(_)
        )
    }
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),

    #[error("Socket unusable: {0}")]
    SocketUnusable(String),
}

impl NetworkError {
    /// Whether the pump should keep going after this error
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            NetworkError::SendFailed(_)
                | NetworkError::ReceiveFailed(_)
                | NetworkError::PacketTooLarge(_)
        )
    }
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let endpoint = NetworkEndpoint::new("10.0.0.5", 5004);

        assert_eq!(
            Error::InvalidConfig("rate".into()).kind(),
            ErrorKind::InvalidConfig
        );
        assert_eq!(
            Error::EndpointInUse(endpoint.clone()).kind(),
            ErrorKind::EndpointInUse
        );
        assert_eq!(Error::NotFound(endpoint).kind(), ErrorKind::NotFound);
        assert_eq!(
            Error::from(BackendError::from(AudioError::ChannelBusy(3))).kind(),
            ErrorKind::BackendUnavailable
        );
        assert_eq!(Error::Config("x".into()).kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_transient_classification() {
        assert!(AudioError::BufferUnderrun.is_transient());
        assert!(!AudioError::ChannelClosed.is_transient());
        assert!(NetworkError::SendFailed("refused".into()).is_transient());
        assert!(!NetworkError::SocketUnusable("closed".into()).is_transient());
    }

    #[test]
    fn test_backend_message_mentions_cause() {
        let err = Error::from(BackendError::from(AudioError::ChannelBusy(2)));
        assert!(err.to_string().contains("Channel 2 is busy"));
    }
}
