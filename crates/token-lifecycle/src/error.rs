//! Error types for token lifecycle operations

/// Why an authorization-code exchange did not produce a token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthExchangeError {
    #[error("user denied access")]
    UserDenied,

    #[error("exchange failed: {0}")]
    ExchangeFailed(String),
}

/// Errors from lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("authorization failed: {0}")]
    AuthExchange(#[from] AuthExchangeError),

    #[error("state check failed: {0}")]
    StateMismatch(String),

    #[error("token refresh failed: {0}")]
    Refresh(String),

    #[error("token revocation failed: {0}")]
    Revoke(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("credential store error: {0}")]
    Store(String),

    #[error("service client error: {0}")]
    Service(String),
}

/// Result alias for lifecycle operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<google_auth::Error> for Error {
    fn from(e: google_auth::Error) -> Self {
        match e {
            google_auth::Error::NotFound(msg) => Error::NotFound(msg),
            google_auth::Error::Validation(msg) => Error::Validation(msg),
            other => Error::Store(other.to_string()),
        }
    }
}

impl From<service_client::ServiceError> for Error {
    fn from(e: service_client::ServiceError) -> Self {
        Error::Service(e.to_string())
    }
}
