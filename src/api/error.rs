//! Unified API error handling.
//!
//! All errors leave the server as `{"error": {"code", "message"}}` with an
//! appropriate HTTP status, so clients can branch on the machine-readable
//! code. Store failures collapse into an opaque internal error; the detail
//! goes to the log, not the wire.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::chat::ChatError;
use crate::db::StoreError;
use crate::session::SessionError;
use crate::verify::VerifyError;

/// Error codes for API responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidInput,
    NotFound,
    InvalidOrExpiredCode,
    ProfileRequired,
    InvalidSession,
    ExpiredSession,
    DispatchFailure,
    InternalError,
}

impl ErrorCode {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::InvalidOrExpiredCode => StatusCode::BAD_REQUEST,
            ErrorCode::ProfileRequired => StatusCode::BAD_REQUEST,
            ErrorCode::InvalidSession => StatusCode::UNAUTHORIZED,
            ErrorCode::ExpiredSession => StatusCode::UNAUTHORIZED,
            ErrorCode::DispatchFailure => StatusCode::BAD_GATEWAY,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "invalid_input",
            ErrorCode::NotFound => "not_found",
            ErrorCode::InvalidOrExpiredCode => "invalid_or_expired_code",
            ErrorCode::ProfileRequired => "profile_required",
            ErrorCode::InvalidSession => "invalid_session",
            ErrorCode::ExpiredSession => "expired_session",
            ErrorCode::DispatchFailure => "dispatch_failure",
            ErrorCode::InternalError => "internal_error",
        }
    }
}

/// The inner error object in the response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

/// The full error response envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug)]
pub struct ApiError {
    code: ErrorCode,
    message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn invalid_session(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidSession, message)
    }

    pub fn internal() -> Self {
        Self::new(ErrorCode::InternalError, "An internal error occurred")
    }

    #[cfg(test)]
    pub fn code(&self) -> ErrorCode {
        self.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let response = ErrorResponse {
            error: ErrorBody {
                code: self.code.as_str().to_string(),
                message: self.message,
            },
        };
        (self.code.status_code(), Json(response)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        tracing::error!("Store error: {}", err);
        ApiError::internal()
    }
}

impl From<VerifyError> for ApiError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::MissingContact => ApiError::invalid_input(err.to_string()),
            VerifyError::InvalidOrExpiredCode => {
                ApiError::new(ErrorCode::InvalidOrExpiredCode, err.to_string())
            }
            VerifyError::ProfileRequired { .. } => {
                ApiError::new(ErrorCode::ProfileRequired, err.to_string())
            }
            VerifyError::Dispatch(source) => {
                tracing::warn!("Dispatch failure surfaced to caller: {}", source);
                ApiError::new(
                    ErrorCode::DispatchFailure,
                    "Could not deliver the verification code",
                )
            }
            VerifyError::Hash => {
                tracing::error!("Password hashing failed");
                ApiError::internal()
            }
            VerifyError::Store(source) => ApiError::from(source),
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::NotFound => ApiError::not_found("Conversation not found"),
            ChatError::EmptyMessage => ApiError::invalid_input(err.to_string()),
            ChatError::Store(source) => ApiError::from(source),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Expired => ApiError::new(ErrorCode::ExpiredSession, err.to_string()),
            SessionError::Invalid => ApiError::new(ErrorCode::InvalidSession, err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_status_codes() {
        assert_eq!(ErrorCode::InvalidInput.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorCode::InvalidOrExpiredCode.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ErrorCode::ExpiredSession.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ErrorCode::InvalidSession.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ErrorCode::DispatchFailure.status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_session_errors_map_distinctly() {
        assert_eq!(
            ApiError::from(SessionError::Expired).code(),
            ErrorCode::ExpiredSession
        );
        assert_eq!(
            ApiError::from(SessionError::Invalid).code(),
            ErrorCode::InvalidSession
        );
    }

    #[test]
    fn test_verify_errors_map_to_domain_codes() {
        assert_eq!(
            ApiError::from(VerifyError::InvalidOrExpiredCode).code(),
            ErrorCode::InvalidOrExpiredCode
        );
        assert_eq!(
            ApiError::from(VerifyError::ProfileRequired {
                min_password_len: 8
            })
            .code(),
            ErrorCode::ProfileRequired
        );
        assert_eq!(
            ApiError::from(VerifyError::MissingContact).code(),
            ErrorCode::InvalidInput
        );
    }

    #[test]
    fn test_chat_errors_map_to_domain_codes() {
        assert_eq!(
            ApiError::from(ChatError::NotFound).code(),
            ErrorCode::NotFound
        );
        assert_eq!(
            ApiError::from(ChatError::EmptyMessage).code(),
            ErrorCode::InvalidInput
        );
    }
}
