//! Shared types for the Google OAuth gateway workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
