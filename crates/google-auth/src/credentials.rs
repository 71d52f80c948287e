//! Credential storage
//!
//! Manages a JSON file mapping credential ids to registered Google
//! credentials and their current tokens. All writes use atomic temp-file +
//! rename to prevent corruption on crash. A tokio Mutex serializes writes
//! from the admin API and the lifecycle manager.
//!
//! Writes are clone-then-commit: the in-memory map only changes once the
//! file has been replaced, so a failed write leaves both views unchanged.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::assertion::ServiceAccountKey;
use crate::constants::EXPIRY_LEEWAY_MILLIS;
use crate::error::{Error, Result};
use crate::scope::{ScopeCatalog, ScopeId, ServiceId};
use crate::token::TokenResponse;

/// Current wall-clock time as unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// The token a credential currently holds.
///
/// `expires_at` is a unix timestamp in milliseconds (absolute, not a delta),
/// computed at storage time from `TokenResponse.expires_in`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEnvelope {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_at: u64,
    /// Space-separated scopes as granted
    #[serde(default)]
    pub scope: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl fmt::Debug for TokenEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenEnvelope")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .field("token_type", &self.token_type)
            .finish()
    }
}

impl TokenEnvelope {
    /// Build an envelope from a token endpoint response.
    ///
    /// Refresh grants usually omit the refresh token; `previous_refresh`
    /// carries the one already held forward.
    pub fn from_response(
        response: TokenResponse,
        now_millis: u64,
        previous_refresh: Option<&str>,
    ) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response
                .refresh_token
                .or_else(|| previous_refresh.map(str::to_string)),
            expires_at: now_millis.saturating_add(response.expires_in.saturating_mul(1000)),
            scope: response.scope.unwrap_or_default(),
            token_type: response.token_type.unwrap_or_else(default_token_type),
        }
    }

    /// True once `now` is within the expiry leeway of `expires_at`.
    pub fn is_expired(&self, now_millis: u64) -> bool {
        now_millis.saturating_add(EXPIRY_LEEWAY_MILLIS) >= self.expires_at
    }
}

/// How a credential authenticates to Google.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialKind {
    /// OAuth client acting for an end user who grants consent.
    UserDelegated {
        client_id: String,
        client_secret: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        developer_key: Option<String>,
    },
    /// Service account that signs its own assertions.
    ServiceAccount {
        /// The JSON key file, verbatim
        key: String,
    },
}

impl CredentialKind {
    pub fn label(&self) -> &'static str {
        match self {
            CredentialKind::UserDelegated { .. } => "user_delegated",
            CredentialKind::ServiceAccount { .. } => "service_account",
        }
    }
}

impl fmt::Debug for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialKind::UserDelegated {
                client_id,
                developer_key,
                ..
            } => f
                .debug_struct("UserDelegated")
                .field("client_id", client_id)
                .field("client_secret", &"[REDACTED]")
                .field("developer_key", &developer_key.as_ref().map(|_| "[REDACTED]"))
                .finish(),
            CredentialKind::ServiceAccount { .. } => f
                .debug_struct("ServiceAccount")
                .field("key", &"[REDACTED]")
                .finish(),
        }
    }
}

fn default_offline() -> bool {
    true
}

/// A registered Google credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    pub display_name: String,
    pub kind: CredentialKind,
    #[serde(default)]
    pub services: BTreeSet<ServiceId>,
    #[serde(default)]
    pub scopes: BTreeSet<ScopeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<TokenEnvelope>,
    #[serde(default)]
    pub authenticated: bool,
    /// Request a refresh token during consent
    #[serde(default = "default_offline")]
    pub offline_access: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

impl Credential {
    pub fn is_service_account(&self) -> bool {
        matches!(self.kind, CredentialKind::ServiceAccount { .. })
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.access_token
            .as_ref()
            .and_then(|t| t.refresh_token.as_deref())
    }

    /// Check the credential against the invariants a save must hold.
    pub fn validate(&self, catalog: &ScopeCatalog) -> Result<()> {
        if self.id.is_empty()
            || !self
                .id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::Validation(format!(
                "credential id {:?} must be non-empty and use only [A-Za-z0-9_-]",
                self.id
            )));
        }
        if self.display_name.trim().is_empty() {
            return Err(Error::Validation(format!(
                "credential {} has an empty display name",
                self.id
            )));
        }
        match &self.kind {
            CredentialKind::UserDelegated {
                client_id,
                client_secret,
                ..
            } => {
                if client_id.trim().is_empty() || client_secret.trim().is_empty() {
                    return Err(Error::Validation(
                        "client_id and client_secret must both be non-empty".into(),
                    ));
                }
            }
            CredentialKind::ServiceAccount { key } => {
                ServiceAccountKey::parse(key)?;
            }
        }
        for scope in &self.scopes {
            let declaring = catalog.services_declaring(scope);
            // Unknown scopes are tolerated; the catalog may have been rescanned
            if !declaring.is_empty() && !declaring.iter().any(|s| self.services.contains(*s)) {
                return Err(Error::Validation(format!(
                    "scope {scope} belongs to {} which this credential does not request",
                    declaring.join(", ")
                )));
            }
        }
        Ok(())
    }
}

/// Operator-supplied credential fields, as accepted by the admin API.
///
/// Carries both credential kinds' fields; exactly one kind must be present.
/// `service_account_key` accepts the key either as a JSON object or as a
/// string holding the JSON.
#[derive(Clone, Default, Deserialize)]
pub struct CredentialInput {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub developer_key: Option<String>,
    #[serde(default)]
    pub service_account_key: Option<serde_json::Value>,
    #[serde(default)]
    pub services: Option<BTreeSet<ServiceId>>,
    #[serde(default)]
    pub scopes: Option<BTreeSet<ScopeId>>,
    #[serde(default)]
    pub offline_access: Option<bool>,
    #[serde(default)]
    pub owner_id: Option<String>,
}

impl fmt::Debug for CredentialInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialInput")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("client_id", &self.client_id)
            .field("has_client_secret", &self.client_secret.is_some())
            .field("has_service_account_key", &self.service_account_key.is_some())
            .field("services", &self.services)
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl CredentialInput {
    fn has_kind_fields(&self) -> bool {
        self.client_id.is_some()
            || self.client_secret.is_some()
            || self.developer_key.is_some()
            || self.service_account_key.is_some()
    }

    fn key_text(value: serde_json::Value) -> Result<String> {
        match value {
            serde_json::Value::String(text) => Ok(text),
            object @ serde_json::Value::Object(_) => Ok(object.to_string()),
            _ => Err(Error::Validation(
                "service_account_key must be a JSON object or a string".into(),
            )),
        }
    }

    /// Decide the credential kind from the supplied fields.
    fn kind(&mut self) -> Result<CredentialKind> {
        let has_client = self.client_id.is_some() || self.client_secret.is_some();
        match (has_client, self.service_account_key.take()) {
            (true, Some(_)) => Err(Error::Validation(
                "give either client_id/client_secret or service_account_key, not both".into(),
            )),
            (false, Some(key)) => {
                if self.developer_key.is_some() {
                    return Err(Error::Validation(
                        "developer_key only applies to user-delegated credentials".into(),
                    ));
                }
                Ok(CredentialKind::ServiceAccount {
                    key: Self::key_text(key)?,
                })
            }
            (true, None) => match (self.client_id.take(), self.client_secret.take()) {
                (Some(client_id), Some(client_secret)) => Ok(CredentialKind::UserDelegated {
                    client_id,
                    client_secret,
                    developer_key: self.developer_key.take().filter(|k| !k.is_empty()),
                }),
                _ => Err(Error::Validation(
                    "client_id and client_secret must be given together".into(),
                )),
            },
            (false, None) => Err(Error::Validation(
                "one of client_id/client_secret or service_account_key is required".into(),
            )),
        }
    }

    /// Convert input for a new credential.
    pub fn into_credential(mut self) -> Result<Credential> {
        let kind = self.kind()?;
        let id = self
            .id
            .ok_or_else(|| Error::Validation("credential id is required".into()))?;
        Ok(Credential {
            display_name: self.display_name.unwrap_or_else(|| id.clone()),
            id,
            kind,
            services: self.services.unwrap_or_default(),
            scopes: self.scopes.unwrap_or_default(),
            access_token: None,
            authenticated: false,
            offline_access: self.offline_access.unwrap_or(true),
            owner_id: self.owner_id,
        })
    }

    /// Apply an update to `existing`; absent fields keep their value.
    ///
    /// A user-delegated credential may change its client fields one at a
    /// time; an empty `developer_key` clears it. Switching kinds requires
    /// the full field set of the new kind.
    pub fn apply_to(mut self, existing: &Credential) -> Result<Credential> {
        if let Some(id) = &self.id
            && id != &existing.id
        {
            return Err(Error::Validation(format!(
                "credential id cannot change ({} -> {id})",
                existing.id
            )));
        }

        let kind = if !self.has_kind_fields() {
            existing.kind.clone()
        } else {
            match &existing.kind {
                CredentialKind::UserDelegated {
                    client_id,
                    client_secret,
                    developer_key,
                } if self.service_account_key.is_none() => CredentialKind::UserDelegated {
                    client_id: self.client_id.take().unwrap_or_else(|| client_id.clone()),
                    client_secret: self
                        .client_secret
                        .take()
                        .unwrap_or_else(|| client_secret.clone()),
                    developer_key: match self.developer_key.take() {
                        Some(key) if key.is_empty() => None,
                        Some(key) => Some(key),
                        None => developer_key.clone(),
                    },
                },
                _ => self.kind()?,
            }
        };

        Ok(Credential {
            id: existing.id.clone(),
            display_name: self
                .display_name
                .unwrap_or_else(|| existing.display_name.clone()),
            kind,
            services: self.services.unwrap_or_else(|| existing.services.clone()),
            scopes: self.scopes.unwrap_or_else(|| existing.scopes.clone()),
            access_token: existing.access_token.clone(),
            authenticated: existing.authenticated,
            offline_access: self.offline_access.unwrap_or(existing.offline_access),
            owner_id: self.owner_id.or_else(|| existing.owner_id.clone()),
        })
    }
}

/// Whether an edit changes what the stored token was granted for.
///
/// Any change to the client fields, developer key, key material, services or
/// scopes means the consent no longer matches the credential.
pub fn requires_reauthentication(original: &Credential, updated: &Credential) -> bool {
    original.kind != updated.kind
        || original.services != updated.services
        || original.scopes != updated.scopes
}

/// Pre-save policy. Returns true when the token was invalidated.
///
/// - an edit that requires reauthentication drops the token
/// - any other edit keeps the stored token, whatever the caller's copy holds
/// - `authenticated` without a token is forced false
pub fn apply_save_policy(original: Option<&Credential>, updated: &mut Credential) -> bool {
    let invalidated = match original {
        Some(original) if requires_reauthentication(original, updated) => {
            let had_token = updated.access_token.take().is_some();
            updated.authenticated = false;
            had_token || original.authenticated
        }
        Some(original) => {
            updated.access_token = original.access_token.clone();
            updated.authenticated = original.authenticated;
            false
        }
        None => false,
    };
    if updated.access_token.is_none() {
        updated.authenticated = false;
    }
    invalidated
}

/// Thread-safe credential file manager.
pub struct CredentialStore {
    path: PathBuf,
    state: Mutex<BTreeMap<String, Credential>>,
}

impl CredentialStore {
    /// Load credentials from the given file path.
    ///
    /// If the file doesn't exist, creates it as `{}` (cold start with zero
    /// credentials).
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let credentials: BTreeMap<String, Credential> = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            info!(path = %path.display(), credentials = credentials.len(), "loaded credentials");
            credentials
        } else {
            info!(path = %path.display(), "credential file not found, starting with empty store");
            let store = BTreeMap::new();
            write_atomic(&path, &store).await?;
            store
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub async fn get(&self, id: &str) -> Result<Credential> {
        let state = self.state.lock().await;
        state
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("credential {id}")))
    }

    /// All credentials, ordered by id.
    pub async fn list(&self) -> Vec<Credential> {
        let state = self.state.lock().await;
        state.values().cloned().collect()
    }

    /// Validate, apply the save policy against the stored copy, and persist.
    ///
    /// Returns the credential as stored.
    pub async fn save(&self, credential: Credential, catalog: &ScopeCatalog) -> Result<Credential> {
        credential.validate(catalog)?;

        let mut state = self.state.lock().await;
        let mut updated = credential;
        if apply_save_policy(state.get(&updated.id), &mut updated) {
            info!(credential_id = %updated.id, "credential changed, token invalidated");
        }

        let mut next = state.clone();
        next.insert(updated.id.clone(), updated.clone());
        write_atomic(&self.path, &next).await?;
        *state = next;
        debug!(credential_id = %updated.id, "saved credential");
        Ok(updated)
    }

    /// Replace the token of an existing credential.
    ///
    /// `authenticated` follows the presence of the token. Does not run the
    /// save policy.
    pub async fn set_token(&self, id: &str, token: Option<TokenEnvelope>) -> Result<Credential> {
        let mut state = self.state.lock().await;
        let mut credential = state
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("credential {id}")))?;
        credential.authenticated = token.is_some();
        credential.access_token = token;

        let mut next = state.clone();
        next.insert(id.to_string(), credential.clone());
        write_atomic(&self.path, &next).await?;
        *state = next;
        debug!(credential_id = id, authenticated = credential.authenticated, "updated token");
        Ok(credential)
    }

    /// Remove a credential permanently.
    pub async fn delete(&self, id: &str) -> Result<Credential> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let removed = next
            .remove(id)
            .ok_or_else(|| Error::NotFound(format!("credential {id}")))?;
        write_atomic(&self.path, &next).await?;
        *state = next;
        info!(credential_id = id, "deleted credential");
        Ok(removed)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Write credentials to a file atomically with 0600 permissions.
async fn write_atomic(path: &Path, data: &BTreeMap<String, Credential>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}
