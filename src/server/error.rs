use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::warn;

use crate::error::{Error, SessionError, StreamError};

/// Error body returned by every API route: `{"error": "..."}`
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Session(SessionError::NotFound(_)) => StatusCode::NOT_FOUND,
            Error::Session(SessionError::InvalidSpec(_)) => StatusCode::BAD_REQUEST,
            Error::Session(SessionError::IllegalTransition { .. })
            | Error::Session(SessionError::NotTerminated(_)) => StatusCode::CONFLICT,
            Error::Stream(StreamError::NotRunning(_))
            | Error::Stream(StreamError::NotAttachable { .. }) => StatusCode::CONFLICT,
            // Unreadable directories are bad input from the browser's point of view
            Error::Io(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            warn!("Request failed: {}", err);
        }

        // Validation and provisioning messages are shown to the user as-is
        let message = match err {
            Error::Validation(e) => e.to_string(),
            other => other.to_string(),
        };

        Self::new(status, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message
        }));
        (self.status, body).into_response()
    }
}
