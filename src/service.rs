//! AudioInterface service facade
//!
//! Maps the four RPC operations onto the registry and catalog. Holds no state
//! of its own beyond the shared registry.

use std::sync::Arc;

use crate::error::Result;
use crate::protocol::{
    format_timestamp, CreateStreamRequest, CreateStreamResponse, DeleteStreamRequest,
    DeleteStreamResponse, GetDeviceInfoRequest, GetDeviceInfoResponse, ListStreamsRequest,
    ListStreamsResponse, StreamWithMetrics,
};
use crate::streams::{Stream, StreamRegistry};

#[derive(Clone)]
pub struct AudioInterfaceService {
    registry: Arc<StreamRegistry>,
}

impl AudioInterfaceService {
    pub fn new(registry: Arc<StreamRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    /// Returns once the stream's pump is running
    pub async fn create_stream(&self, req: CreateStreamRequest) -> Result<CreateStreamResponse> {
        let record = self.registry.create(Stream::from(req.stream)).await?;
        Ok(CreateStreamResponse {
            created: format_timestamp(&record.created_at),
        })
    }

    /// Returns once the stream's pump has released its channel and socket
    pub async fn delete_stream(&self, req: DeleteStreamRequest) -> Result<DeleteStreamResponse> {
        let endpoint = req.endpoint()?;
        self.registry.delete(&endpoint).await?;
        Ok(DeleteStreamResponse {})
    }

    pub fn list_streams(&self, req: ListStreamsRequest) -> ListStreamsResponse {
        ListStreamsResponse {
            streams: self
                .registry
                .list(req.channel)
                .into_iter()
                .map(StreamWithMetrics::from)
                .collect(),
        }
    }

    pub fn get_device_info(&self, _req: GetDeviceInfoRequest) -> GetDeviceInfoResponse {
        GetDeviceInfoResponse {
            info: self.registry.catalog().describe(),
        }
    }
}
