//! Token lifecycle for registered Google credentials
//!
//! Drives each credential through consent, code exchange, refresh (or
//! service-account assertion) and revocation, persisting every transition
//! through `google_auth::CredentialStore`.
//!
//! Flow:
//! 1. `TokenLifecycleManager::begin_authorization()` issues session state and a consent URL
//! 2. Google redirects back; `dispatch_callback()` checks access and the state hash
//! 3. `complete_authorization()` exchanges the code and stores the token
//! 4. `ensure_fresh_token()` refreshes or re-asserts before each use
//! 5. `revoke()` invalidates the grant at Google and drops the token
//!
//! Extension points live in `hooks::Hooks`; access votes in `access`.

pub mod access;
pub mod callback;
pub mod error;
pub mod hooks;
pub mod manager;

#[cfg(test)]
pub(crate) mod testing;

pub use access::{AccessDecision, AccessRequest, AccessVote, Principal, aggregate};
pub use callback::{CallbackOutcome, CallbackParams};
pub use error::{AuthExchangeError, Error, Result};
pub use hooks::Hooks;
pub use manager::{
    AuthorizationResponse, Freshness, RedirectTarget, RevokedReason, TokenLifecycleManager,
    TokenState, is_local_destination,
};
