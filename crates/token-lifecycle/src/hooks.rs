//! Extension points
//!
//! Typed callback registries invoked at fixed points of the flow. Every
//! registry may hold any number of callbacks; they run in registration order.

use std::fmt;
use std::sync::Arc;

use google_auth::{AuthorizationState, Credential};

use crate::access::{AccessRequest, AccessVote};
use crate::callback::CallbackParams;

type ScopeAlter = dyn Fn(&Credential, &mut Vec<String>) + Send + Sync;
type StateAlter = dyn Fn(&Credential, &mut AuthorizationState) + Send + Sync;
type ForeignCallback = dyn Fn(&CallbackParams) + Send + Sync;
type ResponseListener = dyn Fn(&Credential, &CallbackParams) + Send + Sync;
type Voter = dyn Fn(&AccessRequest<'_>) -> AccessVote + Send + Sync;

#[derive(Clone, Default)]
pub struct Hooks {
    scope_alters: Vec<Arc<ScopeAlter>>,
    state_alters: Vec<Arc<StateAlter>>,
    foreign_callbacks: Vec<Arc<ForeignCallback>>,
    response_listeners: Vec<Arc<ResponseListener>>,
    voters: Vec<Arc<Voter>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrite the scope URLs requested for a credential.
    pub fn on_scopes(
        mut self,
        f: impl Fn(&Credential, &mut Vec<String>) + Send + Sync + 'static,
    ) -> Self {
        self.scope_alters.push(Arc::new(f));
        self
    }

    /// Rewrite a newly issued authorization state before it is stored.
    pub fn on_state(
        mut self,
        f: impl Fn(&Credential, &mut AuthorizationState) + Send + Sync + 'static,
    ) -> Self {
        self.state_alters.push(Arc::new(f));
        self
    }

    /// Receive callbacks whose state belongs to another consumer.
    pub fn on_foreign_callback(mut self, f: impl Fn(&CallbackParams) + Send + Sync + 'static) -> Self {
        self.foreign_callbacks.push(Arc::new(f));
        self
    }

    /// Observe successful code exchanges.
    pub fn on_response(
        mut self,
        f: impl Fn(&Credential, &CallbackParams) + Send + Sync + 'static,
    ) -> Self {
        self.response_listeners.push(Arc::new(f));
        self
    }

    /// Vote on whether a principal may run a credential's flow.
    pub fn with_voter(
        mut self,
        f: impl Fn(&AccessRequest<'_>) -> AccessVote + Send + Sync + 'static,
    ) -> Self {
        self.voters.push(Arc::new(f));
        self
    }

    pub(crate) fn alter_scopes(&self, credential: &Credential, scopes: &mut Vec<String>) {
        for alter in &self.scope_alters {
            alter(credential, scopes);
        }
    }

    pub(crate) fn alter_state(&self, credential: &Credential, state: &mut AuthorizationState) {
        for alter in &self.state_alters {
            alter(credential, state);
        }
    }

    pub(crate) fn notify_foreign(&self, params: &CallbackParams) {
        for hook in &self.foreign_callbacks {
            hook(params);
        }
    }

    pub(crate) fn notify_response(&self, credential: &Credential, params: &CallbackParams) {
        for listener in &self.response_listeners {
            listener(credential, params);
        }
    }

    pub(crate) fn votes(&self, request: &AccessRequest<'_>) -> Vec<AccessVote> {
        self.voters.iter().map(|voter| voter(request)).collect()
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("scope_alters", &self.scope_alters.len())
            .field("state_alters", &self.state_alters.len())
            .field("foreign_callbacks", &self.foreign_callbacks.len())
            .field("response_listeners", &self.response_listeners.len())
            .field("voters", &self.voters.len())
            .finish()
    }
}
