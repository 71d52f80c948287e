//! Configuration-level error types

use thiserror::Error;

/// Errors raised while loading gateway configuration or secret material.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Secret not provided: {0}")]
    MissingSecret(String),
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_context() {
        let config_err = Error::Config("missing listen_addr".into());
        assert_eq!(
            config_err.to_string(),
            "Configuration error: missing listen_addr"
        );

        let secret_err = Error::MissingSecret("GATEWAY_ADMIN_TOKEN".into());
        assert_eq!(
            secret_err.to_string(),
            "Secret not provided: GATEWAY_ADMIN_TOKEN"
        );
    }

    #[test]
    fn io_errors_convert() {
        let err: Error =
            std::io::Error::new(std::io::ErrorKind::NotFound, "credentials.json").into();
        assert!(err.to_string().starts_with("I/O error:"), "got: {err}");
    }
}
