//! Error types for credential and OAuth operations

/// Errors from credential storage and Google OAuth calls.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("assertion signing failed: {0}")]
    Assertion(String),

    #[error("token revocation failed: {0}")]
    Revoke(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
