//! HTTP rendering of per-call statuses.
//!
//! These conversions involve transport types and belong in the adapters layer.

use crate::domain::error::CallStatus;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

impl CallStatus {
    /// HTTP status used when this call status reaches the client
    pub fn http_status(&self) -> StatusCode {
        match self {
            CallStatus::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            CallStatus::ResourceExhausted => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
            CallStatus::MessageTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            CallStatus::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            CallStatus::DataLoss | CallStatus::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CallStatus {
    fn into_response(self) -> Response {
        (self.http_status(), Json(self.to_body())).into_response()
    }
}
