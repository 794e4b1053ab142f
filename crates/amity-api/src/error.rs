use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use amity_types::error::ChatError;

/// HTTP-facing error: a status code plus the machine-readable code and
/// message serialized into the JSON body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "unauthenticated",
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            code: "conflict",
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        let message = message.into();
        error!("Internal error: {}", message);
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            message: "internal server error".to_string(),
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        let status = match &e {
            ChatError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ChatError::Forbidden => StatusCode::FORBIDDEN,
            ChatError::InvalidMessage | ChatError::SelfRequest => StatusCode::BAD_REQUEST,
            ChatError::DuplicateRequest | ChatError::AlreadyResolved => StatusCode::CONFLICT,
            ChatError::NotFound => StatusCode::NOT_FOUND,
            ChatError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Storage detail stays in the logs, not the response body
        let message = if let ChatError::Storage(inner) = &e {
            error!("Storage error: {:#}", inner);
            "internal storage error".to_string()
        } else {
            e.to_string()
        };

        Self {
            status,
            code: e.code(),
            message,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self::from(ChatError::Storage(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "code": self.code, "error": self.message })),
        )
            .into_response()
    }
}
