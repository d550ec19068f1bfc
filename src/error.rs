use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Request-level failures of the HTTP surface, each with a fixed status.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid JSON")]
    InvalidJson,
    #[error("Missing event type")]
    MissingEventType,
    #[error("Missing signature")]
    MissingSignature,
    #[error("Missing timestamp")]
    MissingTimestamp,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Server misconfigured")]
    Misconfigured,
    #[error("Queue not configured")]
    QueueDisabled,
    #[error("Webhook processing failed")]
    Processing(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidJson
            | Self::MissingEventType
            | Self::MissingSignature
            | Self::MissingTimestamp => StatusCode::BAD_REQUEST,
            Self::InvalidSignature | Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::QueueDisabled => StatusCode::PRECONDITION_FAILED,
            Self::Misconfigured | Self::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::QueueDisabled => json!({ "error": self.to_string(), "processed": 0 }),
            Self::Processing(_) => json!({ "success": false, "error": self.to_string() }),
            _ => json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
