//! Provider callback dispatch and access checks
//!
//! One callback endpoint can serve several OAuth consumers. A callback whose
//! state names its sources without ours is handed to the foreign-callback
//! hooks and otherwise ignored. Everything else must pass the access check
//! before any token exchange happens.

use google_auth::{Credential, PRIMARY_SOURCE, StatePayload, Verdict};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::access::{AccessDecision, AccessRequest, Principal, aggregate};
use crate::error::{Error, Result};
use crate::manager::{AuthorizationResponse, TokenLifecycleManager, is_local_destination};

/// Query parameters of `GET /oauth/callback`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// How a callback was handled.
#[derive(Debug)]
pub enum CallbackOutcome {
    /// State belongs to another consumer; hooks were notified.
    Foreign,
    /// Code exchanged and stored.
    Completed {
        credential: Credential,
        destination: Option<String>,
    },
    /// Consent was denied or the exchange failed; the credential is
    /// unauthenticated and the session state is consumed.
    Failed {
        credential_id: String,
        error: Error,
        destination: Option<String>,
    },
}

impl CallbackOutcome {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            CallbackOutcome::Foreign => "foreign",
            CallbackOutcome::Completed { .. } => "completed",
            CallbackOutcome::Failed {
                error: Error::AuthExchange(crate::AuthExchangeError::UserDenied),
                ..
            } => "denied",
            CallbackOutcome::Failed { .. } => "failed",
        }
    }
}

impl TokenLifecycleManager {
    /// May `principal` complete the callback carried by `params`?
    ///
    /// The administrator always may. A callback carrying state must present
    /// the hash stored for the session. Without state, the access voters
    /// decide.
    pub async fn authenticate_access(
        &self,
        principal: &Principal,
        session: &str,
        params: &CallbackParams,
    ) -> AccessDecision {
        if principal.is_admin() {
            return AccessDecision::Allowed;
        }
        if let Some(raw) = &params.state {
            let hash = StatePayload::decode(raw).and_then(|payload| payload.hash);
            return match hash {
                Some(hash) if self.guard().verify(&hash, session).await == Verdict::Allowed => {
                    AccessDecision::Allowed
                }
                _ => AccessDecision::Forbidden,
            };
        }
        self.vote(principal, params.id.as_deref(), params.kind.as_deref())
    }

    /// May `principal` start the consent flow for `credential_id`?
    pub fn authorize_initiation(&self, principal: &Principal, credential_id: &str) -> AccessDecision {
        if principal.is_admin() {
            return AccessDecision::Allowed;
        }
        self.vote(principal, Some(credential_id), None)
    }

    fn vote(
        &self,
        principal: &Principal,
        credential_id: Option<&str>,
        kind: Option<&str>,
    ) -> AccessDecision {
        aggregate(self.hooks().votes(&AccessRequest {
            principal,
            credential_id,
            kind,
        }))
    }

    /// Handle a provider callback for `session`.
    pub async fn dispatch_callback(
        &self,
        session: &str,
        params: &CallbackParams,
        principal: &Principal,
    ) -> Result<CallbackOutcome> {
        if let Some(payload) = params.state.as_deref().and_then(StatePayload::decode)
            && payload.belongs_elsewhere(PRIMARY_SOURCE)
        {
            debug!("callback state belongs to another consumer");
            self.hooks().notify_foreign(params);
            return Ok(CallbackOutcome::Foreign);
        }

        let decision = self.authenticate_access(principal, session, params).await;
        if !decision.is_allowed() {
            warn!(decision = ?decision, "callback rejected by access check");
            return Err(Error::StateMismatch(
                "callback state does not match this session".into(),
            ));
        }

        // The credential bound at initiation wins; a different `id` cannot
        // redirect the grant to another credential.
        let bound = self
            .guard()
            .peek(session)
            .await
            .and_then(|state| state.credential_id);
        let credential_id = match (bound, &params.id) {
            (Some(bound), Some(id)) if *id != bound => {
                warn!(bound = %bound, requested = %id, "callback names another credential");
                return Err(Error::StateMismatch(
                    "callback credential does not match the session state".into(),
                ));
            }
            (Some(bound), _) => bound,
            (None, Some(id)) => id.clone(),
            (None, None) => return Err(Error::NotFound("no credential for this callback".into())),
        };

        if let Some(error) = &params.error {
            let destination = self.consume_destination(session).await;
            let response = AuthorizationResponse::Error(error.clone());
            return match self.complete_authorization(&credential_id, response).await {
                Ok(credential) => Ok(CallbackOutcome::Completed {
                    credential,
                    destination,
                }),
                Err(error) => Ok(CallbackOutcome::Failed {
                    credential_id,
                    error,
                    destination,
                }),
            };
        }

        let Some(code) = &params.code else {
            return Err(Error::Validation(
                "callback carries neither code nor error".into(),
            ));
        };

        let result = self
            .complete_authorization(&credential_id, AuthorizationResponse::Code(code.clone()))
            .await;
        let destination = self.consume_destination(session).await;

        match result {
            Ok(credential) => {
                self.hooks().notify_response(&credential, params);
                info!(credential_id = %credential.id, "callback completed");
                Ok(CallbackOutcome::Completed {
                    credential,
                    destination,
                })
            }
            Err(error @ Error::AuthExchange(_)) => Ok(CallbackOutcome::Failed {
                credential_id,
                error,
                destination,
            }),
            Err(error) => Err(error),
        }
    }

    /// Consume the session state and return its destination if it is local.
    async fn consume_destination(&self, session: &str) -> Option<String> {
        let destination = self.guard().consume(session).await?.destination?;
        if is_local_destination(&destination) {
            Some(destination)
        } else {
            warn!(destination = %destination, "dropping non-local destination");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessVote;
    use crate::error::AuthExchangeError;
    use crate::hooks::Hooks;
    use crate::testing::{Harness, user_credential};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn state_from(url: &str) -> String {
        let query = url.split_once('?').unwrap().1;
        let params: HashMap<String, String> = serde_urlencoded::from_str(query).unwrap();
        params["state"].clone()
    }

    fn user() -> Principal {
        Principal::User("ana".into())
    }

    #[tokio::test]
    async fn consent_round_trip_authenticates() {
        let h = Harness::new().await;
        h.add(user_credential("acct")).await;

        let target = h
            .manager
            .begin_authorization("session-1", "acct", Some("/after".into()))
            .await
            .unwrap();
        assert!(target.url.contains("access_type=offline&approval_prompt=force"));
        let state = state_from(&target.url);
        let payload = StatePayload::decode(&state).unwrap();
        assert_eq!(payload.hash.as_deref(), Some(target.state.hash.as_str()));

        let params = CallbackParams {
            state: Some(state.clone()),
            code: Some("abc".into()),
            ..Default::default()
        };
        let outcome = h
            .manager
            .dispatch_callback("session-1", &params, &user())
            .await
            .unwrap();

        match outcome {
            CallbackOutcome::Completed {
                credential,
                destination,
            } => {
                assert!(credential.authenticated);
                assert!(credential.access_token.is_some());
                assert_eq!(destination.as_deref(), Some("/after"));
            }
            other => panic!("expected completion, got {other:?}"),
        }

        // Replaying the same callback is rejected
        let replay = h
            .manager
            .dispatch_callback("session-1", &params, &user())
            .await;
        assert!(matches!(replay, Err(Error::StateMismatch(_))));
        assert_eq!(h.client.calls(), vec!["exchange:X:abc"]);
    }

    #[tokio::test]
    async fn mismatched_hash_never_reaches_provider() {
        let h = Harness::new().await;
        h.add(user_credential("acct")).await;
        h.manager
            .begin_authorization("session-1", "acct", None)
            .await
            .unwrap();

        let forged = StatePayload {
            src: Some(vec![PRIMARY_SOURCE.into()]),
            hash: Some("forged".into()),
            destination: None,
        };
        let params = CallbackParams {
            state: Some(forged.encode()),
            code: Some("abc".into()),
            id: Some("acct".into()),
            ..Default::default()
        };

        assert_eq!(
            h.manager
                .authenticate_access(&user(), "session-1", &params)
                .await,
            AccessDecision::Forbidden
        );
        let result = h
            .manager
            .dispatch_callback("session-1", &params, &user())
            .await;
        assert!(matches!(result, Err(Error::StateMismatch(_))));
        assert!(h.client.calls().is_empty());
        assert!(!h.manager.store().get("acct").await.unwrap().authenticated);
    }

    #[tokio::test]
    async fn foreign_state_goes_to_hooks() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let hooks = Hooks::new().on_foreign_callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let h = Harness::with_hooks(hooks).await;
        h.add(user_credential("acct")).await;
        h.manager
            .begin_authorization("session-1", "acct", None)
            .await
            .unwrap();

        let params = CallbackParams {
            state: Some(r#"{"src":["sign-in"],"hash":"whatever"}"#.into()),
            code: Some("abc".into()),
            ..Default::default()
        };
        let outcome = h
            .manager
            .dispatch_callback("session-1", &params, &user())
            .await
            .unwrap();

        assert!(matches!(outcome, CallbackOutcome::Foreign));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(h.client.calls().is_empty());
        // Our own state is untouched
        assert!(h.manager.guard().peek("session-1").await.is_some());
    }

    #[tokio::test]
    async fn denial_consumes_state_and_reports_destination() {
        let h = Harness::new().await;
        h.add(user_credential("acct")).await;
        let target = h
            .manager
            .begin_authorization("session-1", "acct", Some("/back".into()))
            .await
            .unwrap();

        let params = CallbackParams {
            state: Some(target.state.encode()),
            error: Some("access_denied".into()),
            ..Default::default()
        };
        let outcome = h
            .manager
            .dispatch_callback("session-1", &params, &user())
            .await
            .unwrap();

        match &outcome {
            CallbackOutcome::Failed {
                credential_id,
                error,
                destination,
            } => {
                assert_eq!(credential_id, "acct");
                assert!(matches!(
                    error,
                    Error::AuthExchange(AuthExchangeError::UserDenied)
                ));
                assert_eq!(destination.as_deref(), Some("/back"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(outcome.label(), "denied");
        assert!(h.manager.guard().is_empty().await);
    }

    #[tokio::test]
    async fn callback_without_state_uses_voters() {
        let hooks = Hooks::new().with_voter(|request| match request.principal.name() {
            Some("ana") => AccessVote::Allow,
            Some("mallory") => AccessVote::Forbid,
            _ => AccessVote::Abstain,
        });
        let h = Harness::with_hooks(hooks).await;
        h.add(user_credential("acct")).await;

        let params = CallbackParams {
            code: Some("abc".into()),
            id: Some("acct".into()),
            ..Default::default()
        };
        let manager = &h.manager;

        assert_eq!(
            manager.authenticate_access(&user(), "s", &params).await,
            AccessDecision::Allowed
        );
        assert_eq!(
            manager
                .authenticate_access(&Principal::User("mallory".into()), "s", &params)
                .await,
            AccessDecision::Forbidden
        );
        assert_eq!(
            manager
                .authenticate_access(&Principal::Anonymous, "s", &params)
                .await,
            AccessDecision::Neutral
        );
        assert_eq!(
            manager
                .authenticate_access(&Principal::Admin, "s", &params)
                .await,
            AccessDecision::Allowed
        );

        let outcome = manager.dispatch_callback("s", &params, &user()).await.unwrap();
        assert!(matches!(outcome, CallbackOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn admin_bypasses_hash_check() {
        let h = Harness::new().await;
        h.add(user_credential("acct")).await;
        let params = CallbackParams {
            state: Some(r#"{"src":["oauth-gateway"],"hash":"stale"}"#.into()),
            code: Some("abc".into()),
            id: Some("acct".into()),
            ..Default::default()
        };
        let outcome = h
            .manager
            .dispatch_callback("fresh-session", &params, &Principal::Admin)
            .await
            .unwrap();
        assert!(matches!(outcome, CallbackOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn callback_needs_a_credential_and_a_code() {
        let h = Harness::new().await;
        h.add(user_credential("acct")).await;

        let no_id = CallbackParams {
            code: Some("abc".into()),
            ..Default::default()
        };
        assert!(matches!(
            h.manager
                .dispatch_callback("s", &no_id, &Principal::Admin)
                .await,
            Err(Error::NotFound(_))
        ));

        let empty = CallbackParams {
            id: Some("acct".into()),
            ..Default::default()
        };
        assert!(matches!(
            h.manager
                .dispatch_callback("s", &empty, &Principal::Admin)
                .await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn response_listeners_see_completed_credential() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let log = seen.clone();
        let hooks = Hooks::new().on_response(move |credential, _| {
            log.lock().unwrap().push(credential.id.clone());
        });
        let h = Harness::with_hooks(hooks).await;
        h.add(user_credential("acct")).await;
        let target = h
            .manager
            .begin_authorization("s", "acct", None)
            .await
            .unwrap();

        let params = CallbackParams {
            state: Some(target.state.encode()),
            code: Some("abc".into()),
            ..Default::default()
        };
        h.manager.dispatch_callback("s", &params, &user()).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["acct"]);
    }

    #[tokio::test]
    async fn callback_cannot_switch_credential() {
        let hooks = Hooks::new().with_voter(|request| match request.credential_id {
            Some("acct") => AccessVote::Allow,
            _ => AccessVote::Abstain,
        });
        let h = Harness::with_hooks(hooks).await;
        h.add(user_credential("acct")).await;
        h.add(user_credential("other")).await;
        assert!(h.manager.authorize_initiation(&user(), "acct").is_allowed());
        assert!(!h.manager.authorize_initiation(&user(), "other").is_allowed());

        let target = h
            .manager
            .begin_authorization("s", "acct", None)
            .await
            .unwrap();
        let switched = CallbackParams {
            state: Some(target.state.encode()),
            code: Some("abc".into()),
            id: Some("other".into()),
            ..Default::default()
        };
        let result = h.manager.dispatch_callback("s", &switched, &user()).await;
        assert!(matches!(result, Err(Error::StateMismatch(_))));
        assert!(h.client.calls().is_empty());
        assert!(!h.manager.store().get("other").await.unwrap().authenticated);

        // The matching id still completes, bound to the initiated credential
        let matching = CallbackParams {
            id: Some("acct".into()),
            ..switched
        };
        match h.manager.dispatch_callback("s", &matching, &user()).await {
            Ok(CallbackOutcome::Completed { credential, .. }) => assert_eq!(credential.id, "acct"),
            other => panic!("expected completion, got {other:?}"),
        }
        assert!(!h.manager.store().get("other").await.unwrap().authenticated);
    }

    #[tokio::test]
    async fn non_local_destination_from_hook_is_dropped() {
        let hooks = Hooks::new().on_state(|_, state| {
            state.destination = Some("https://evil.example/phish".into());
        });
        let h = Harness::with_hooks(hooks).await;
        h.add(user_credential("acct")).await;
        let target = h
            .manager
            .begin_authorization("s", "acct", Some("/back".into()))
            .await
            .unwrap();

        let params = CallbackParams {
            state: Some(target.state.encode()),
            code: Some("abc".into()),
            ..Default::default()
        };
        match h.manager.dispatch_callback("s", &params, &user()).await {
            Ok(CallbackOutcome::Completed { destination, .. }) => assert!(destination.is_none()),
            other => panic!("expected completion, got {other:?}"),
        }
        assert!(h.manager.guard().is_empty().await);
    }

    #[tokio::test]
    async fn initiation_defaults_to_deny() {
        let h = Harness::new().await;
        assert_eq!(
            h.manager.authorize_initiation(&user(), "acct"),
            AccessDecision::Neutral
        );
        assert_eq!(
            h.manager.authorize_initiation(&Principal::Admin, "acct"),
            AccessDecision::Allowed
        );
    }
}
