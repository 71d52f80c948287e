//! Google OAuth constants
//!
//! Default endpoints for Google's OAuth 2.0 service. Every endpoint can be
//! overridden through `client::Endpoints` (the gateway exposes them in its
//! config file), which is how tests point the client at a local server.

/// Consent screen users are redirected to
pub const AUTHORIZE_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Token endpoint for code exchange, refresh and JWT-bearer assertions
pub const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// Revocation endpoint; accepts either an access or a refresh token
pub const REVOKE_ENDPOINT: &str = "https://oauth2.googleapis.com/revoke";

/// Grant type for service-account assertions (RFC 7523)
pub const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Source tag this system writes into the `state` parameter. Callbacks whose
/// state carries a source list without this tag belong to another consumer.
pub const PRIMARY_SOURCE: &str = "oauth-gateway";

/// Tokens are treated as expired this long before their real expiry.
pub const EXPIRY_LEEWAY_MILLIS: u64 = 30_000;

/// Lifetime requested for self-signed service-account assertions.
pub const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Default lifetime of a session's authorization state.
pub const STATE_TTL_SECS: u64 = 600;
