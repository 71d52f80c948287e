//! Per-credential token state machine
//!
//! Sequences consent, code exchange, refresh, assertion minting and
//! revocation for every registered credential. The credential store is the
//! single source of truth for token data; the manager keeps only a
//! transition label per credential and derives it from the store when it
//! has none.
//!
//! Transitions:
//! - Unauthenticated → AuthorizationRequested (consent redirect issued;
//!   a credential holding a live token stays Authenticated)
//! - AuthorizationRequested → Authenticated (code exchanged)
//! - AuthorizationRequested → Unauthenticated (denied or exchange failed)
//! - Authenticated → Expired (token past its expiry)
//! - Expired → Authenticated (refreshed or re-asserted)
//! - Expired → Unauthenticated (refresh failed, token dropped)
//! - any → Revoked (explicit revoke)
//!
//! Operations that touch a credential's token hold that credential's lock
//! and re-read the credential under it, so concurrent refreshes of the same
//! credential cannot lose an update.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use google_auth::{
    AuthorizationState, ClientCredentials, Credential, CredentialKind, CredentialStore,
    OAuthClient, PRIMARY_SOURCE, ScopeResolver, ServiceAccountKey, StateTokenGuard, TokenEnvelope,
    TokenResponse, now_millis,
};
use service_client::{ServiceClient, ServiceRegistry};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{AuthExchangeError, Error, Result};
use crate::hooks::Hooks;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Unauthenticated,
    AuthorizationRequested,
    Authenticated,
    Expired,
    Revoked,
}

impl TokenState {
    /// Status label for health/logging.
    pub fn label(&self) -> &'static str {
        match self {
            TokenState::Unauthenticated => "unauthenticated",
            TokenState::AuthorizationRequested => "authorization_requested",
            TokenState::Authenticated => "authenticated",
            TokenState::Expired => "expired",
            TokenState::Revoked => "revoked",
        }
    }
}

/// Why a credential ended up without a usable token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokedReason {
    NoToken,
    NoRefreshToken,
    RefreshFailed,
    AssertionFailed,
}

impl fmt::Display for RevokedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RevokedReason::NoToken => "no token",
            RevokedReason::NoRefreshToken => "token expired and no refresh token is held",
            RevokedReason::RefreshFailed => "refresh failed",
            RevokedReason::AssertionFailed => "service account assertion failed",
        };
        f.write_str(text)
    }
}

/// Result of `ensure_fresh_token`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Valid,
    Refreshed,
    Revoked { reason: RevokedReason },
}

impl Freshness {
    /// Metric/log label.
    pub fn label(&self) -> &'static str {
        match self {
            Freshness::Valid => "valid",
            Freshness::Refreshed => "refreshed",
            Freshness::Revoked { .. } => "revoked",
        }
    }
}

/// What the provider sent back on the callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationResponse {
    Code(String),
    Error(String),
}

/// Whether `destination` is a path on this host.
///
/// Post-consent redirects only ever go to local paths. Browsers treat
/// `//host` and `/\host` as protocol-relative, so both count as foreign.
pub fn is_local_destination(destination: &str) -> bool {
    destination.starts_with('/')
        && !destination.starts_with("//")
        && !destination.starts_with("/\\")
}

/// Where to send the user to grant consent.
#[derive(Debug, Clone)]
pub struct RedirectTarget {
    pub url: String,
    pub state: AuthorizationState,
}

pub struct TokenLifecycleManager {
    store: Arc<CredentialStore>,
    scopes: Arc<ScopeResolver>,
    guard: Arc<StateTokenGuard>,
    client: Arc<dyn OAuthClient>,
    services: ServiceRegistry,
    hooks: Hooks,
    states: RwLock<HashMap<String, TokenState>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TokenLifecycleManager {
    pub fn new(
        store: Arc<CredentialStore>,
        scopes: Arc<ScopeResolver>,
        guard: Arc<StateTokenGuard>,
        client: Arc<dyn OAuthClient>,
        services: ServiceRegistry,
        hooks: Hooks,
    ) -> Self {
        info!(hooks = ?hooks, "token lifecycle manager initialized");
        Self {
            store,
            scopes,
            guard,
            client,
            services,
            hooks,
            states: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn scopes(&self) -> &Arc<ScopeResolver> {
        &self.scopes
    }

    pub fn guard(&self) -> &Arc<StateTokenGuard> {
        &self.guard
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Start the consent flow for a user-delegated credential.
    ///
    /// Issues (or extends) the session's authorization state and returns
    /// the provider URL. Nothing is persisted to the credential store.
    pub async fn begin_authorization(
        &self,
        session: &str,
        credential_id: &str,
        destination: Option<String>,
    ) -> Result<RedirectTarget> {
        if let Some(destination) = &destination
            && !is_local_destination(destination)
        {
            return Err(Error::Validation(format!(
                "destination {destination:?} is not a local path"
            )));
        }

        let credential = self.store.get(credential_id).await?;
        let CredentialKind::UserDelegated { client_id, .. } = &credential.kind else {
            return Err(Error::Validation(format!(
                "credential {credential_id} is a service account and does not use consent"
            )));
        };

        let scopes = self.requested_scopes(&credential).await;
        if scopes.is_empty() {
            return Err(Error::Validation(format!(
                "credential {credential_id} requests no known scopes"
            )));
        }

        let state = self
            .guard
            .issue(
                session,
                PRIMARY_SOURCE,
                Some(credential_id),
                destination,
                |state| self.hooks.alter_state(&credential, state),
            )
            .await;
        let url = self.client.authorization_url(
            client_id,
            &scopes,
            credential.offline_access,
            &state.encode(),
        )?;

        // A credential with a live token stays usable until the callback lands
        let holds_live_token = credential.authenticated
            && credential
                .access_token
                .as_ref()
                .is_some_and(|token| !token.is_expired(now_millis()));
        if !holds_live_token {
            self.set_state(credential_id, TokenState::AuthorizationRequested)
                .await;
        }
        info!(
            credential_id,
            scopes = scopes.len(),
            offline = credential.offline_access,
            "authorization requested"
        );
        Ok(RedirectTarget { url, state })
    }

    /// Finish the consent flow with the provider's response.
    ///
    /// Success stores the token and marks the credential authenticated. Any
    /// failure leaves it unauthenticated with no token.
    pub async fn complete_authorization(
        &self,
        credential_id: &str,
        response: AuthorizationResponse,
    ) -> Result<Credential> {
        let lock = self.lock_for(credential_id).await;
        let _held = lock.lock().await;

        let credential = self.store.get(credential_id).await?;
        let CredentialKind::UserDelegated {
            client_id,
            client_secret,
            ..
        } = &credential.kind
        else {
            return Err(Error::Validation(format!(
                "credential {credential_id} is a service account and does not use consent"
            )));
        };

        let outcome: std::result::Result<TokenResponse, AuthExchangeError> = match response {
            AuthorizationResponse::Error(error) if error == "access_denied" => {
                Err(AuthExchangeError::UserDenied)
            }
            AuthorizationResponse::Error(error) => Err(AuthExchangeError::ExchangeFailed(
                format!("provider returned error {error}"),
            )),
            AuthorizationResponse::Code(code) => self
                .client
                .exchange_code(
                    ClientCredentials {
                        client_id,
                        client_secret,
                    },
                    &code,
                )
                .await
                .map_err(|e| AuthExchangeError::ExchangeFailed(e.to_string())),
        };

        match outcome {
            Ok(response) => {
                let envelope = TokenEnvelope::from_response(response, now_millis(), None);
                let stored = self.store.set_token(credential_id, Some(envelope)).await?;
                self.set_state(credential_id, TokenState::Authenticated).await;
                info!(credential_id, "authorization completed");
                Ok(stored)
            }
            Err(error) => {
                warn!(credential_id, error = %error, "authorization failed");
                self.store.set_token(credential_id, None).await?;
                self.set_state(credential_id, TokenState::Unauthenticated)
                    .await;
                Err(error.into())
            }
        }
    }

    /// Make sure the credential holds a usable token.
    ///
    /// User-delegated credentials refresh an expired token; if that is not
    /// possible the dead token is revoked at the provider (best effort) and
    /// dropped. Service accounts mint a new token by assertion whenever none
    /// is cached or the cached one expired.
    pub async fn ensure_fresh_token(&self, credential_id: &str) -> Result<Freshness> {
        let lock = self.lock_for(credential_id).await;
        let _held = lock.lock().await;
        let (freshness, _) = self.ensure_fresh_locked(credential_id).await?;
        Ok(freshness)
    }

    /// Live access token, refreshing first if needed.
    pub async fn access_token(&self, credential_id: &str) -> Result<String> {
        let lock = self.lock_for(credential_id).await;
        let _held = lock.lock().await;
        let (_, credential) = self.usable_credential(credential_id).await?;
        credential
            .access_token
            .map(|token| token.access_token)
            .ok_or_else(|| Error::Refresh(format!("credential {credential_id} holds no token")))
    }

    /// One authorized client per service the credential requests.
    pub async fn service_clients(
        &self,
        credential_id: &str,
    ) -> Result<BTreeMap<String, Box<dyn ServiceClient>>> {
        let lock = self.lock_for(credential_id).await;
        let _held = lock.lock().await;
        let (_, credential) = self.usable_credential(credential_id).await?;
        let token = credential
            .access_token
            .as_ref()
            .ok_or_else(|| Error::Refresh(format!("credential {credential_id} holds no token")))?;
        let developer_key = match &credential.kind {
            CredentialKind::UserDelegated { developer_key, .. } => developer_key.as_deref(),
            CredentialKind::ServiceAccount { .. } => None,
        };
        Ok(self.services.build_all(
            credential_id,
            &credential.services,
            &token.access_token,
            developer_key,
        )?)
    }

    /// Revoke the credential's grant at the provider and drop its token.
    ///
    /// User-delegated credentials refresh once first so the revocation hits
    /// a live grant; the refreshed token is persisted and stays persisted if
    /// the revocation itself fails.
    pub async fn revoke(&self, credential_id: &str) -> Result<Credential> {
        let lock = self.lock_for(credential_id).await;
        let _held = lock.lock().await;

        let credential = self.store.get(credential_id).await?;
        match &credential.kind {
            CredentialKind::UserDelegated {
                client_id,
                client_secret,
                ..
            } => {
                let refresh = credential.refresh_token().ok_or_else(|| {
                    Error::Revoke(format!("credential {credential_id} holds no refresh token"))
                })?;
                let creds = ClientCredentials {
                    client_id,
                    client_secret,
                };
                let live = match self.client.refresh(creds, refresh).await {
                    Ok(response) => {
                        let envelope =
                            TokenEnvelope::from_response(response, now_millis(), Some(refresh));
                        self.store
                            .set_token(credential_id, Some(envelope.clone()))
                            .await?;
                        envelope
                    }
                    Err(e) => {
                        warn!(credential_id, error = %e, "refresh before revoke failed, dropping token");
                        self.store.set_token(credential_id, None).await?;
                        self.set_state(credential_id, TokenState::Unauthenticated)
                            .await;
                        return Err(Error::Revoke(format!("refresh before revoke failed: {e}")));
                    }
                };
                let target = live.refresh_token.as_deref().unwrap_or(&live.access_token);
                self.client.revoke(target).await.map_err(|e| {
                    warn!(credential_id, error = %e, "provider rejected revocation");
                    Error::Revoke(e.to_string())
                })?;
            }
            CredentialKind::ServiceAccount { .. } => {
                let token = credential.access_token.as_ref().ok_or_else(|| {
                    Error::Revoke(format!("credential {credential_id} holds no token"))
                })?;
                self.client
                    .revoke(&token.access_token)
                    .await
                    .map_err(|e| Error::Revoke(e.to_string()))?;
            }
        }

        let cleared = self.store.set_token(credential_id, None).await?;
        self.set_state(credential_id, TokenState::Revoked).await;
        info!(credential_id, "credential revoked");
        Ok(cleared)
    }

    /// Validate and persist an operator edit.
    pub async fn save_credential(&self, credential: Credential) -> Result<Credential> {
        let id = credential.id.clone();
        let lock = self.lock_for(&id).await;
        let _held = lock.lock().await;

        let catalog = self.scopes.snapshot().await;
        let stored = self.store.save(credential, &catalog).await?;
        if !stored.authenticated {
            self.set_state(&id, TokenState::Unauthenticated).await;
        }
        Ok(stored)
    }

    /// Delete a credential permanently.
    pub async fn remove_credential(&self, credential_id: &str) -> Result<Credential> {
        let lock = self.lock_for(credential_id).await;
        let removed = {
            let _held = lock.lock().await;
            self.store.delete(credential_id).await?
        };
        self.states.write().await.remove(credential_id);
        self.locks.lock().await.remove(credential_id);
        Ok(removed)
    }

    /// Current state, derived from the stored credential when untracked.
    pub async fn state(&self, credential_id: &str) -> Result<TokenState> {
        let credential = self.store.get(credential_id).await?;
        Ok(self.state_of(&credential, now_millis()).await)
    }

    /// Health summary: per-credential state and overall status.
    ///
    /// All credentials authenticated → healthy, some → degraded, none →
    /// unhealthy.
    pub async fn health(&self) -> serde_json::Value {
        let credentials = self.store.list().await;
        let now = now_millis();

        let mut entries = Vec::with_capacity(credentials.len());
        let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
        for credential in &credentials {
            let state = self.state_of(credential, now).await;
            *counts.entry(state.label()).or_default() += 1;
            entries.push(serde_json::json!({
                "id": credential.id,
                "kind": credential.kind.label(),
                "state": state.label(),
                "expires_at": credential.access_token.as_ref().map(|t| t.expires_at),
            }));
        }

        let total = credentials.len();
        let authenticated = counts.get("authenticated").copied().unwrap_or(0);
        let status = if total > 0 && authenticated == total {
            "healthy"
        } else if authenticated > 0 {
            "degraded"
        } else {
            "unhealthy"
        };

        serde_json::json!({
            "status": status,
            "credentials_total": total,
            "states": counts,
            "credentials": entries,
        })
    }

    /// Scope URLs a flow for `credential` asks for, after the alteration hooks.
    async fn requested_scopes(&self, credential: &Credential) -> Vec<String> {
        let mut scopes = if credential.scopes.is_empty() {
            let mut urls: Vec<String> = Vec::new();
            for url in self.scopes.resolve(&credential.services).await.into_values() {
                if !urls.contains(&url) {
                    urls.push(url);
                }
            }
            urls
        } else {
            self.scopes
                .scopes_to_urls(&credential.scopes, &credential.services)
                .await
        };
        self.hooks.alter_scopes(credential, &mut scopes);
        scopes
    }

    /// Like `ensure_fresh_locked`, but a revoked outcome is an error.
    async fn usable_credential(&self, credential_id: &str) -> Result<(Freshness, Credential)> {
        let (freshness, credential) = self.ensure_fresh_locked(credential_id).await?;
        if let Freshness::Revoked { reason } = freshness {
            return Err(Error::Refresh(format!(
                "credential {credential_id} has no usable token: {reason}"
            )));
        }
        Ok((freshness, credential))
    }

    /// Caller must hold the credential's lock.
    async fn ensure_fresh_locked(&self, credential_id: &str) -> Result<(Freshness, Credential)> {
        let credential = self.store.get(credential_id).await?;
        let now = now_millis();

        if let Some(token) = &credential.access_token
            && !token.is_expired(now)
        {
            debug!(credential_id, "token valid");
            return Ok((Freshness::Valid, credential));
        }

        match &credential.kind {
            CredentialKind::ServiceAccount { key } => {
                let key = ServiceAccountKey::parse(key)?;
                let scopes = self.requested_scopes(&credential).await;
                match self.client.mint_with_assertion(&key, &scopes).await {
                    Ok(response) => {
                        let envelope = TokenEnvelope::from_response(response, now, None);
                        let stored = self.store.set_token(credential_id, Some(envelope)).await?;
                        self.set_state(credential_id, TokenState::Authenticated)
                            .await;
                        info!(credential_id, "service account token minted");
                        Ok((Freshness::Refreshed, stored))
                    }
                    Err(e) => {
                        warn!(credential_id, error = %e, "service account assertion failed");
                        let cleared = self.drop_token(&credential).await?;
                        Ok((
                            Freshness::Revoked {
                                reason: RevokedReason::AssertionFailed,
                            },
                            cleared,
                        ))
                    }
                }
            }
            CredentialKind::UserDelegated {
                client_id,
                client_secret,
                ..
            } => {
                let Some(token) = &credential.access_token else {
                    self.set_state(credential_id, TokenState::Unauthenticated)
                        .await;
                    return Ok((
                        Freshness::Revoked {
                            reason: RevokedReason::NoToken,
                        },
                        credential,
                    ));
                };
                self.set_state(credential_id, TokenState::Expired).await;

                let Some(refresh) = token.refresh_token.as_deref() else {
                    self.revoke_best_effort(credential_id, &token.access_token)
                        .await;
                    let cleared = self.drop_token(&credential).await?;
                    return Ok((
                        Freshness::Revoked {
                            reason: RevokedReason::NoRefreshToken,
                        },
                        cleared,
                    ));
                };

                let creds = ClientCredentials {
                    client_id,
                    client_secret,
                };
                match self.client.refresh(creds, refresh).await {
                    Ok(response) => {
                        let envelope = TokenEnvelope::from_response(response, now, Some(refresh));
                        let stored = self.store.set_token(credential_id, Some(envelope)).await?;
                        self.set_state(credential_id, TokenState::Authenticated)
                            .await;
                        info!(credential_id, "token refreshed");
                        Ok((Freshness::Refreshed, stored))
                    }
                    Err(e) => {
                        warn!(credential_id, error = %e, "token refresh failed, revoking");
                        self.revoke_best_effort(credential_id, refresh).await;
                        let cleared = self.drop_token(&credential).await?;
                        Ok((
                            Freshness::Revoked {
                                reason: RevokedReason::RefreshFailed,
                            },
                            cleared,
                        ))
                    }
                }
            }
        }
    }

    async fn revoke_best_effort(&self, credential_id: &str, token: &str) {
        if let Err(e) = self.client.revoke(token).await {
            debug!(credential_id, error = %e, "best-effort revocation failed");
        }
    }

    /// Clear the token and mark the credential unauthenticated.
    async fn drop_token(&self, credential: &Credential) -> Result<Credential> {
        let cleared = if credential.access_token.is_some() || credential.authenticated {
            self.store.set_token(&credential.id, None).await?
        } else {
            credential.clone()
        };
        self.set_state(&credential.id, TokenState::Unauthenticated)
            .await;
        Ok(cleared)
    }

    async fn state_of(&self, credential: &Credential, now: u64) -> TokenState {
        if let Some(state) = self.states.read().await.get(&credential.id).copied() {
            // A tracked Authenticated label goes stale once the token expires
            if state == TokenState::Authenticated
                && credential.access_token.as_ref().is_some_and(|t| t.is_expired(now))
            {
                return TokenState::Expired;
            }
            return state;
        }
        match &credential.access_token {
            Some(token) if token.is_expired(now) => TokenState::Expired,
            Some(_) if credential.authenticated => TokenState::Authenticated,
            _ => TokenState::Unauthenticated,
        }
    }

    async fn set_state(&self, credential_id: &str, state: TokenState) {
        let previous = self
            .states
            .write()
            .await
            .insert(credential_id.to_string(), state);
        if previous != Some(state) {
            debug!(
                credential_id,
                from = previous.map(|s| s.label()),
                to = state.label(),
                "state transition"
            );
        }
    }

    async fn lock_for(&self, credential_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(credential_id.to_string()).or_default().clone()
    }
}
