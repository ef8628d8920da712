//! Unified application error model shared by the auth service, the mailbox
//! poller and the HTTP layer, with a single mapping to HTTP status codes.

use axum::http::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Crate-wide error taxonomy.
///
/// Token-state errors (`TokenNotFound`, `TokenAlreadyConsumed`, `TokenExpired`)
/// are terminal for that token and must never be collapsed into a generic
/// failure: a retried verification has to observe the distinct state.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("authentication required")]
    Unauthenticated,
    #[error("token not found")]
    TokenNotFound,
    #[error("token already consumed")]
    TokenAlreadyConsumed,
    #[error("token expired")]
    TokenExpired,
    #[error("mailbox wait exceeded {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("mail transport error: {0}")]
    Mail(String),
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn forbidden<S: Into<String>>(msg: S) -> Self {
        AppError::Forbidden(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        AppError::Internal(msg.into())
    }

    /// Map to the HTTP status surfaced by route handlers.
    ///
    /// Token-state failures map to 400: the verify/accept endpoints answer
    /// with a non-redirect status and no cookie, which is all a caller may
    /// learn about someone else's token.
    pub fn http_status(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::TokenNotFound
            | AppError::TokenAlreadyConsumed
            | AppError::TokenExpired
            | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Mail(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}
