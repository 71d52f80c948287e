//! HTTP-facing error type
//!
//! Every handler failure becomes `{"error":{"type":"...","message":"..."}}`
//! with a status derived from the lifecycle error.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use token_lifecycle::AuthExchangeError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Lifecycle(#[from] token_lifecycle::Error),

    #[error("credential {0} already exists")]
    Conflict(String),

    #[error("admin token required")]
    Unauthorized,

    #[error("access denied for credential {0}")]
    Forbidden(String),

    #[error("invalid request body: {0}")]
    BadRequest(String),
}

impl From<google_auth::Error> for ApiError {
    fn from(e: google_auth::Error) -> Self {
        ApiError::Lifecycle(e.into())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        use token_lifecycle::Error as E;
        match self {
            ApiError::Lifecycle(E::Validation(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Lifecycle(E::StateMismatch(_)) => StatusCode::FORBIDDEN,
            ApiError::Lifecycle(E::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Lifecycle(E::AuthExchange(AuthExchangeError::UserDenied)) => {
                StatusCode::FORBIDDEN
            }
            ApiError::Lifecycle(E::AuthExchange(_) | E::Refresh(_) | E::Revoke(_)) => {
                StatusCode::BAD_GATEWAY
            }
            ApiError::Lifecycle(E::Store(_) | E::Service(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Machine-readable `error.type`.
    pub fn kind(&self) -> &'static str {
        use token_lifecycle::Error as E;
        match self {
            ApiError::Lifecycle(E::Validation(_)) => "validation_error",
            ApiError::Lifecycle(E::StateMismatch(_)) => "state_mismatch",
            ApiError::Lifecycle(E::NotFound(_)) => "not_found",
            ApiError::Lifecycle(E::AuthExchange(AuthExchangeError::UserDenied)) => "access_denied",
            ApiError::Lifecycle(E::AuthExchange(_)) => "auth_exchange_error",
            ApiError::Lifecycle(E::Refresh(_)) => "refresh_error",
            ApiError::Lifecycle(E::Revoke(_)) => "revoke_error",
            ApiError::Lifecycle(E::Store(_) | E::Service(_)) => "internal_error",
            ApiError::Conflict(_) => "conflict",
            ApiError::Unauthorized => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::BadRequest(_) => "bad_request",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, "request failed");
        }
        let body = serde_json::json!({
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
            }
        });
        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
