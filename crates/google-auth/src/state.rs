//! Anti-forgery `state` parameter for the consent redirect
//!
//! When a session starts a consent flow, a random hash is stored server-side
//! under the session id and echoed to Google inside the `state` parameter.
//! The callback is only trusted if the hash it carries matches the stored
//! one. The stored entry is consumed when the flow finishes (success or
//! error), so a captured callback URL cannot be replayed.
//!
//! Several consumers may share one callback endpoint. Each consumer tags the
//! state with its source name; issuing again for a session that already has
//! a live state appends the tag instead of replacing the hash.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use tracing::debug;

/// Opaque session identifier (the gateway uses its session cookie value).
pub type SessionId = String;

/// Session-scoped state of an in-progress consent flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationState {
    /// Subsystems that requested this flow, in request order.
    pub source_tags: Vec<String>,
    pub hash: String,
    /// Where to send the user once the flow finishes.
    pub destination: Option<String>,
    /// Credential the flow authorizes.
    pub credential_id: Option<String>,
}

impl AuthorizationState {
    pub fn has_source(&self, tag: &str) -> bool {
        self.source_tags.iter().any(|t| t == tag)
    }

    /// The wire form sent to Google.
    pub fn payload(&self) -> StatePayload {
        StatePayload {
            src: Some(self.source_tags.clone()),
            hash: Some(self.hash.clone()),
            destination: self.destination.clone(),
        }
    }

    /// JSON-encoded `state` parameter value.
    pub fn encode(&self) -> String {
        self.payload().encode()
    }
}

/// `state` as it travels through the provider: `{"src": [...], "hash": "...", "destination": "..."}`.
///
/// Every field is optional on decode; a callback produced by another
/// consumer may carry any subset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

impl StatePayload {
    pub fn encode(&self) -> String {
        // Serializing a struct of strings cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Decode a raw `state` value; `None` if it is not a JSON object.
    pub fn decode(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    /// True when the payload names its sources and `tag` is not among them.
    pub fn belongs_elsewhere(&self, tag: &str) -> bool {
        match &self.src {
            Some(sources) => !sources.iter().any(|s| s == tag),
            None => false,
        }
    }
}

/// Outcome of checking a presented hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Forbidden,
}

struct Entry {
    state: AuthorizationState,
    issued_at: Instant,
}

/// Session table of authorization states with TTL and consume-once semantics.
pub struct StateTokenGuard {
    ttl: Duration,
    sessions: Mutex<HashMap<SessionId, Entry>>,
}

impl StateTokenGuard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Issue (or extend) the authorization state for `session`.
    ///
    /// A live state gains `source_tag` (once) and keeps its hash; a
    /// destination is only filled in if none was recorded. Otherwise a new
    /// state is created with a fresh hash. `alter` runs exactly once, after
    /// the merge and before the state is stored, and may rewrite the tags or
    /// the destination.
    pub async fn issue<F>(
        &self,
        session: &str,
        source_tag: &str,
        credential_id: Option<&str>,
        destination: Option<String>,
        alter: F,
    ) -> AuthorizationState
    where
        F: FnOnce(&mut AuthorizationState),
    {
        let mut sessions = self.sessions.lock().await;
        let ttl = self.ttl;
        sessions.retain(|_, entry| entry.issued_at.elapsed() < ttl);

        let (mut state, issued_at) = match sessions.remove(session) {
            Some(Entry {
                mut state,
                issued_at,
            }) => {
                if !state.has_source(source_tag) {
                    state.source_tags.push(source_tag.to_string());
                }
                if state.destination.is_none() {
                    state.destination = destination;
                }
                debug!(sources = state.source_tags.len(), "merged into existing authorization state");
                (state, issued_at)
            }
            None => (
                AuthorizationState {
                    source_tags: vec![source_tag.to_string()],
                    hash: generate_hash(),
                    destination,
                    credential_id: None,
                },
                Instant::now(),
            ),
        };
        if let Some(id) = credential_id {
            state.credential_id = Some(id.to_string());
        }

        alter(&mut state);

        sessions.insert(
            session.to_string(),
            Entry {
                state: state.clone(),
                issued_at,
            },
        );
        state
    }

    /// Check a presented hash against the one stored for `session`.
    pub async fn verify(&self, candidate: &str, session: &str) -> Verdict {
        let sessions = self.sessions.lock().await;
        let Some(entry) = sessions.get(session) else {
            return Verdict::Forbidden;
        };
        if entry.issued_at.elapsed() >= self.ttl {
            return Verdict::Forbidden;
        }
        // Compare fixed-length digests so timing does not leak the hash length
        let expected = Sha256::digest(entry.state.hash.as_bytes());
        let presented = Sha256::digest(candidate.as_bytes());
        if bool::from(expected.as_slice().ct_eq(presented.as_slice())) {
            Verdict::Allowed
        } else {
            Verdict::Forbidden
        }
    }

    /// Read the live state for `session` without consuming it.
    pub async fn peek(&self, session: &str) -> Option<AuthorizationState> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(session)
            .filter(|entry| entry.issued_at.elapsed() < self.ttl)
            .map(|entry| entry.state.clone())
    }

    /// Remove every field stored for `session`, returning the state if it was live.
    pub async fn consume(&self, session: &str) -> Option<AuthorizationState> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .remove(session)
            .filter(|entry| entry.issued_at.elapsed() < self.ttl)
            .map(|entry| entry.state)
    }

    /// Number of sessions holding a state, live or not yet purged.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// 32 random bytes from the thread CSPRNG, URL-safe base64 without padding.
fn generate_hash() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
