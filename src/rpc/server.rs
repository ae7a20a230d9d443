//! RPC server

use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::config::RpcConfig;
use crate::error::Result;
use crate::rpc::handlers::router;
use crate::service::AudioInterfaceService;

pub struct RpcServer {
    config: RpcConfig,
    service: AudioInterfaceService,
}

impl RpcServer {
    pub fn new(config: RpcConfig, service: AudioInterfaceService) -> Self {
        Self { config, service }
    }

    pub async fn bind(self) -> Result<BoundServer> {
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!("RPC server listening on {}", listener.local_addr()?);
        Ok(BoundServer {
            listener,
            service: self.service,
        })
    }

    /// Bind and serve until `shutdown` resolves
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.bind().await?.serve(shutdown).await
    }
}

/// A server whose listener is open but not yet accepting
pub struct BoundServer {
    listener: TcpListener,
    service: AudioInterfaceService,
}

impl BoundServer {
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(self.listener, router(self.service))
            .with_graceful_shutdown(shutdown)
            .await?;
        tracing::info!("RPC server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::catalog::{CapabilityCatalog, ChannelInfo, DeviceInfo};
    use crate::audio::simulated::SimulatedDriver;
    use crate::config::PumpConfig;
    use crate::network::UdpTransport;
    use crate::streams::StreamRegistry;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_serves_over_tcp_until_shutdown() {
        let info = DeviceInfo {
            channels: vec![ChannelInfo::new([48000])],
        };
        let config = PumpConfig::default();
        let registry = StreamRegistry::new(
            CapabilityCatalog::new(info.clone()),
            Arc::new(SimulatedDriver::new(info, 48)),
            Arc::new(UdpTransport::new(config.io_timeout(), config.max_datagram_size)),
            config,
        );
        let service = AudioInterfaceService::new(Arc::new(registry));

        let server = RpcServer::new(
            RpcConfig {
                bind_address: "127.0.0.1".into(),
                port: 0,
            },
            service,
        )
        .bind()
        .await
        .unwrap();
        let addr = server.local_addr().unwrap();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(server.serve(async {
            let _ = stop_rx.await;
        }));

        let mut conn = tokio::net::TcpStream::connect(addr).await.unwrap();
        conn.write_all(
            b"POST /oto/AudioInterface.GetDeviceInfo HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await
        .unwrap();
        let mut response = String::new();
        conn.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
        assert!(response.contains(r#""sampleRates":[48000]"#), "{}", response);

        stop_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }
}
