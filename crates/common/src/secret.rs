//! Secret wrapper for sensitive values
//!
//! Client secrets, admin tokens and OAuth tokens pass through this wrapper
//! whenever they leave the persistence layer, so a stray `{:?}` in a log
//! line prints `[REDACTED]` instead of the value.

use std::fmt;
use std::path::Path;

use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::{Error, Result};

/// Sensitive value - redacted in Debug/Display/logs
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    /// Create a new secret value
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl Secret<String> {
    /// Constant-time comparison against a presented candidate.
    pub fn matches(&self, candidate: &str) -> bool {
        self.0.as_bytes().ct_eq(candidate.as_bytes()).into()
    }

    /// Resolve a secret from an environment variable, falling back to a file.
    ///
    /// File contents are trimmed; an empty value counts as missing.
    pub fn from_env_or_file(env_var: &str, file: Option<&Path>) -> Result<Self> {
        if let Ok(value) = std::env::var(env_var)
            && !value.trim().is_empty()
        {
            return Ok(Self::new(value.trim().to_owned()));
        }
        if let Some(path) = file {
            let value = std::fs::read_to_string(path).map_err(|e| {
                Error::Config(format!("failed to read secret file {}: {e}", path.display()))
            })?;
            let value = value.trim().to_owned();
            if !value.is_empty() {
                return Ok(Self::new(value));
            }
        }
        Err(Error::MissingSecret(env_var.to_string()))
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}
