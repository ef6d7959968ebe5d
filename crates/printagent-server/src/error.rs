// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// HTTP error responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use printagent_core::error::AgentError;
use printagent_core::types::truncate_message;

/// Longest `message` returned to a client.
pub const MAX_MESSAGE_LEN: usize = 200;

pub type ApiResult<T> = Result<T, ApiError>;

/// An error on its way out as `{"error": code, "message": ...}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "conflict", message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "queue_full", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.code,
            "message": truncate_message(&self.message, MAX_MESSAGE_LEN),
        }));
        (self.status, body).into_response()
    }
}

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Validation(_) | AgentError::InvalidPayload(_) => {
                Self::bad_request(err.to_string())
            }
            AgentError::NotFound(_) | AgentError::PrinterNotFound(_) => {
                Self::not_found(err.to_string())
            }
            AgentError::AlreadyExists(_) => Self::conflict(err.to_string()),
            AgentError::QueueFull(_) => Self::unavailable(err.to_string()),
            other => {
                // Storage internals stay in the log.
                error!("request failed: {other}");
                Self::internal("internal error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_errors_map_to_statuses() {
        let cases = [
            (AgentError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (AgentError::NotFound("j".into()), StatusCode::NOT_FOUND),
            (AgentError::PrinterNotFound("p".into()), StatusCode::NOT_FOUND),
            (AgentError::AlreadyExists("j".into()), StatusCode::CONFLICT),
            (AgentError::QueueFull(200), StatusCode::SERVICE_UNAVAILABLE),
            (
                AgentError::Database("disk I/O error".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn internal_details_are_not_exposed() {
        let api = ApiError::from(AgentError::Database("/var/lib/agent.db locked".into()));
        assert_eq!(api.message, "internal error");
    }
}
