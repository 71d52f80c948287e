//! Google OAuth credential library
//!
//! Holds everything the gateway needs to talk to Google's OAuth endpoints
//! and to keep per-account credentials consistent. No dependency on the
//! lifecycle manager or the gateway binary, so every piece here can be
//! tested in isolation.
//!
//! Credential flow:
//! 1. Operator registers a credential via `credentials::CredentialStore::save()`
//! 2. `scope::ScopeResolver` turns the credential's services into scope URLs
//! 3. `state::StateTokenGuard::issue()` tags the consent redirect for the session
//! 4. `authorize::build_authorization_url()` produces the consent URL
//! 5. `token::exchange_code()` turns the callback code into a token
//! 6. `token::refresh_token()` / `token::fetch_with_assertion()` keep it fresh
//! 7. `token::revoke_token()` invalidates it at Google

pub mod assertion;
pub mod authorize;
pub mod client;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod scope;
pub mod state;
pub mod token;

pub use assertion::{ServiceAccountKey, sign_assertion};
pub use authorize::{AuthorizationRequest, build_authorization_url};
pub use client::{BoxFuture, Endpoints, GoogleOAuthClient, OAuthClient};
pub use constants::*;
pub use credentials::{
    Credential, CredentialInput, CredentialKind, CredentialStore, TokenEnvelope,
    apply_save_policy, now_millis, requires_reauthentication,
};
pub use error::{Error, Result};
pub use scope::{ScopeCatalog, ScopeId, ScopeResolver, ServiceEntry, ServiceId};
pub use state::{AuthorizationState, SessionId, StatePayload, StateTokenGuard, Verdict};
pub use token::{
    ClientCredentials, TokenResponse, exchange_code, fetch_with_assertion, refresh_token,
    revoke_token,
};
