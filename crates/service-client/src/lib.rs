//! Authorized Google service clients
//!
//! Defines the `ServiceClient` trait that decouples callers from how a
//! credential's token reaches each Google API. A `ServiceRegistry` maps
//! service ids (`calendar`, `drive`, ...) to factories; the lifecycle
//! manager asks it for one client per service a credential requests, after
//! making sure the token is fresh.

pub mod registry;
pub mod rest;

pub use registry::ServiceRegistry;
pub use rest::{RestFactory, RestServiceClient};

use common::Secret;
use reqwest::header::HeaderMap;

/// Errors from building or using a service client.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("token cannot be used as a header value: {0}")]
    InvalidToken(String),

    #[error("failed to build client for {service}: {reason}")]
    Build { service: String, reason: String },
}

/// Result alias for service-client operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// A client bound to one Google API and one credential's token.
pub trait ServiceClient: Send + Sync {
    /// Service id this client was built for (e.g. "calendar")
    fn service_id(&self) -> &str;

    /// API root, without a trailing slash
    fn base_url(&self) -> &str;

    /// Inject the credential's authorization into outgoing headers.
    fn prepare_request(&self, headers: &mut HeaderMap) -> Result<()>;

    /// Start a request to `path` under the API root with authorization applied.
    fn request(&self, method: reqwest::Method, path: &str) -> Result<reqwest::RequestBuilder>;
}

/// Everything a factory needs to build a client.
#[derive(Clone)]
pub struct ServiceContext {
    pub service_id: String,
    pub credential_id: String,
    pub access_token: Secret<String>,
    pub developer_key: Option<Secret<String>>,
    pub http: reqwest::Client,
}

/// Builds a `ServiceClient` for one service.
pub trait ServiceFactory: Send + Sync {
    fn build(&self, context: &ServiceContext) -> Result<Box<dyn ServiceClient>>;
}

impl<F> ServiceFactory for F
where
    F: Fn(&ServiceContext) -> Result<Box<dyn ServiceClient>> + Send + Sync,
{
    fn build(&self, context: &ServiceContext) -> Result<Box<dyn ServiceClient>> {
        self(context)
    }
}
