//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The admin token is loaded from GATEWAY_ADMIN_TOKEN or `admin.token_file`,
//! never stored in the TOML directly.

use common::Secret;
use google_auth::Endpoints;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Environment variable holding the admin bearer token.
pub const ADMIN_TOKEN_ENV: &str = "GATEWAY_ADMIN_TOKEN";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub google: GoogleConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub access: AccessConfig,
}

/// Listener and session settings
#[derive(Debug, Deserialize)]
pub struct GatewayConfig {
    pub listen_addr: SocketAddr,
    pub admin_listen_addr: SocketAddr,
    /// Externally visible origin, e.g. `https://gateway.example.com`
    pub public_base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    pub credentials_path: PathBuf,
    /// Scope catalog TOML; the built-in Google catalog is used when unset
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
}

/// Provider endpoint overrides
#[derive(Debug, Deserialize)]
pub struct GoogleConfig {
    #[serde(default = "default_authorize_endpoint")]
    pub authorize_endpoint: String,
    #[serde(default = "default_token_endpoint")]
    pub token_endpoint: String,
    #[serde(default = "default_revoke_endpoint")]
    pub revoke_endpoint: String,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            authorize_endpoint: default_authorize_endpoint(),
            token_endpoint: default_token_endpoint(),
            revoke_endpoint: default_revoke_endpoint(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AdminConfig {
    #[serde(skip)]
    pub token: Option<Secret<String>>,
    /// Path to a file containing the admin token (alternative to GATEWAY_ADMIN_TOKEN)
    #[serde(default)]
    pub token_file: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AccessConfig {
    #[serde(default)]
    pub rules: Vec<AccessRule>,
}

/// Which principals may run the flow for a credential.
///
/// `credential = "*"` applies to every credential; `"*"` in `allow` admits
/// any named principal.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessRule {
    pub credential: String,
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

fn default_timeout() -> u64 {
    30
}

fn default_session_ttl() -> u64 {
    google_auth::STATE_TTL_SECS
}

fn default_max_connections() -> usize {
    1000
}

fn default_authorize_endpoint() -> String {
    google_auth::AUTHORIZE_ENDPOINT.to_string()
}

fn default_token_endpoint() -> String {
    google_auth::TOKEN_ENDPOINT.to_string()
}

fn default_revoke_endpoint() -> String {
    google_auth::REVOKE_ENDPOINT.to_string()
}

fn require_http_url(field: &str, value: &str) -> common::Result<()> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(common::Error::Config(format!(
            "{field} must start with http:// or https://, got: {value}"
        )))
    }
}

impl Config {
    /// Load configuration from a TOML file, then resolve the admin token.
    ///
    /// Admin token resolution order:
    /// 1. GATEWAY_ADMIN_TOKEN env var
    /// 2. admin.token_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        require_http_url("public_base_url", &config.gateway.public_base_url)?;
        require_http_url("authorize_endpoint", &config.google.authorize_endpoint)?;
        require_http_url("token_endpoint", &config.google.token_endpoint)?;
        require_http_url("revoke_endpoint", &config.google.revoke_endpoint)?;

        if config.gateway.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }
        if config.gateway.session_ttl_secs == 0 {
            return Err(common::Error::Config(
                "session_ttl_secs must be greater than 0".into(),
            ));
        }
        if config.gateway.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }
        if config.gateway.listen_addr == config.gateway.admin_listen_addr {
            return Err(common::Error::Config(
                "admin_listen_addr must differ from listen_addr".into(),
            ));
        }
        if let Some(rule) = config.access.rules.iter().find(|r| r.credential.is_empty()) {
            return Err(common::Error::Config(format!(
                "access rule with empty credential (allow = {:?})",
                rule.allow
            )));
        }

        config.admin.token = Some(Secret::from_env_or_file(
            ADMIN_TOKEN_ENV,
            config.admin.token_file.as_deref(),
        )?);

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("oauth-gateway.toml")
    }

    /// Callback URL registered with every OAuth client the gateway serves.
    pub fn redirect_uri(&self) -> String {
        format!(
            "{}/oauth/callback",
            self.gateway.public_base_url.trim_end_matches('/')
        )
    }

    pub fn endpoints(&self) -> Endpoints {
        Endpoints {
            authorize: self.google.authorize_endpoint.clone(),
            token: self.google.token_endpoint.clone(),
            revoke: self.google.revoke_endpoint.clone(),
        }
    }

    /// Session cookies carry `Secure` when the public origin is https.
    pub fn secure_cookies(&self) -> bool {
        self.gateway.public_base_url.starts_with("https://")
    }
}
