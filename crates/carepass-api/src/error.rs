use axum::{Json, http::StatusCode, response::IntoResponse, response::Response};
use thiserror::Error;
use tracing::error;

use carepass_types::api::StatusResponse;

/// Request-scoped failures. None of these are fatal to the process.
///
/// Messages stay generic: the caller learns which step to retry, never which
/// credential check failed.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("verification code expired")]
    CodeExpired,
    #[error("verification code mismatch")]
    CodeMismatch,
    #[error("no login pending for this session")]
    NotPending,
    #[error("account not found")]
    AccountNotFound,
    #[error("session expired")]
    SessionExpired,
    #[error("not authenticated")]
    Unauthenticated,
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::CodeExpired | ApiError::CodeMismatch | ApiError::NotPending => {
                StatusCode::BAD_REQUEST
            }
            ApiError::AccountNotFound => StatusCode::NOT_FOUND,
            ApiError::SessionExpired | ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn user_message(&self) -> &'static str {
        match self {
            ApiError::InvalidCredentials => "Invalid username or password",
            ApiError::CodeExpired => "The verification code has expired",
            ApiError::CodeMismatch => "The verification code is incorrect",
            ApiError::NotPending => "Please log in first",
            ApiError::AccountNotFound => "Account not found",
            ApiError::SessionExpired => "Session expired, please log in again",
            ApiError::Unauthenticated => "Authentication required",
            ApiError::Internal(_) => "Internal server error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(e) = &self {
            error!("Request failed: {:#}", e);
        }
        (self.status(), Json(StatusResponse::failure(self.user_message()))).into_response()
    }
}
