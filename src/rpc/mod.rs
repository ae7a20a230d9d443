//! HTTP transport for the AudioInterface service

pub mod handlers;
pub mod server;

pub use handlers::{router, ApiError};
pub use server::RpcServer;
