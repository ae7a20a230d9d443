//! HTTP API handlers

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::de::DeserializeOwned;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::{Error, ErrorKind};
use crate::protocol::{
    CreateStreamRequest, CreateStreamResponse, DeleteStreamRequest, DeleteStreamResponse,
    ErrorResponse, GetDeviceInfoRequest, GetDeviceInfoResponse, ListStreamsRequest,
    ListStreamsResponse,
};
use crate::service::AudioInterfaceService;

pub fn router(service: AudioInterfaceService) -> Router {
    Router::new()
        .route("/oto/AudioInterface.CreateStream", post(create_stream))
        .route("/oto/AudioInterface.DeleteStream", post(delete_stream))
        .route("/oto/AudioInterface.ListStreams", post(list_streams))
        .route("/oto/AudioInterface.GetDeviceInfo", post(get_device_info))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(service)
}

/// Service error rendered as `{"error": "..."}` with a matching status
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::InvalidConfig => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::EndpointInUse => StatusCode::CONFLICT,
            ErrorKind::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::PumpFailure | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!("Request failed: {}", self.0);
        } else {
            tracing::debug!("Request rejected: {}", self.0);
        }
        let body = ErrorResponse {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError(Error::InvalidConfig(format!("malformed request: {}", e))))
}

/// Empty bodies are accepted for requests that carry no required fields
fn parse_or_default<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    parse(body)
}

pub async fn create_stream(
    State(svc): State<AudioInterfaceService>,
    body: Bytes,
) -> Result<Json<CreateStreamResponse>, ApiError> {
    let req: CreateStreamRequest = parse(&body)?;
    Ok(Json(svc.create_stream(req).await?))
}

pub async fn delete_stream(
    State(svc): State<AudioInterfaceService>,
    body: Bytes,
) -> Result<Json<DeleteStreamResponse>, ApiError> {
    let req: DeleteStreamRequest = parse(&body)?;
    Ok(Json(svc.delete_stream(req).await?))
}

pub async fn list_streams(
    State(svc): State<AudioInterfaceService>,
    body: Bytes,
) -> Result<Json<ListStreamsResponse>, ApiError> {
    let req: ListStreamsRequest = parse_or_default(&body)?;
    Ok(Json(svc.list_streams(req)))
}

pub async fn get_device_info(
    State(svc): State<AudioInterfaceService>,
    body: Bytes,
) -> Result<Json<GetDeviceInfoResponse>, ApiError> {
    let req: GetDeviceInfoRequest = parse_or_default(&body)?;
    Ok(Json(svc.get_device_info(req)))
}
