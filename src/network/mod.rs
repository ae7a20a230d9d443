//! Network subsystem for UDP audio transport

pub mod endpoint;
pub mod udp;

pub use endpoint::NetworkEndpoint;
pub use udp::{DatagramSocket, NetworkTransport, UdpTransport};
