//! Router test fixtures: a local stand-in for Google's token and revoke
//! endpoints and a fully wired gateway on a temporary credential store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::Form;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use common::Secret;
use google_auth::{
    AUTHORIZE_ENDPOINT, CredentialStore, Endpoints, GoogleOAuthClient, ScopeResolver,
    StateTokenGuard,
};
use service_client::ServiceRegistry;
use token_lifecycle::{Hooks, TokenLifecycleManager};

use crate::AppState;
use crate::access;
use crate::admin::{AdminState, build_admin_router};
use crate::config::AccessRule;
use crate::oauth::FlowState;

pub const ADMIN_TOKEN: &str = "test-admin-token";
pub const PUBLIC_BASE: &str = "https://gw.example";

type CallLog = Arc<Mutex<Vec<String>>>;

async fn token_endpoint(
    State(calls): State<CallLog>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let grant = form.get("grant_type").cloned().unwrap_or_default();
    match grant.as_str() {
        "authorization_code" => {
            let code = form.get("code").cloned().unwrap_or_default();
            calls.lock().unwrap().push(format!("exchange:{code}"));
            if code != "abc" {
                return (
                    StatusCode::BAD_REQUEST,
                    axum::Json(serde_json::json!({ "error": "invalid_grant" })),
                )
                    .into_response();
            }
            axum::Json(serde_json::json!({
                "access_token": "at_abc",
                "refresh_token": "rt_abc",
                "expires_in": 3600,
                "token_type": "Bearer",
            }))
            .into_response()
        }
        "refresh_token" => {
            let token = form.get("refresh_token").cloned().unwrap_or_default();
            calls.lock().unwrap().push(format!("refresh:{token}"));
            axum::Json(serde_json::json!({
                "access_token": "at_refreshed",
                "expires_in": 3600,
                "token_type": "Bearer",
            }))
            .into_response()
        }
        other => {
            calls.lock().unwrap().push(format!("grant:{other}"));
            (StatusCode::BAD_REQUEST, "unsupported_grant_type").into_response()
        }
    }
}

async fn revoke_endpoint(
    State(calls): State<CallLog>,
    Form(form): Form<HashMap<String, String>>,
) -> StatusCode {
    let token = form.get("token").cloned().unwrap_or_default();
    calls.lock().unwrap().push(format!("revoke:{token}"));
    StatusCode::OK
}

/// Start the provider stand-in; returns its base URL.
async fn start_google(calls: CallLog) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new()
        .route("/token", post(token_endpoint))
        .route("/revoke", post(revoke_endpoint))
        .with_state(calls);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

pub struct TestGateway {
    _dir: tempfile::TempDir,
    pub manager: Arc<TokenLifecycleManager>,
    admin_token: Arc<Secret<String>>,
    calls: CallLog,
}

impl TestGateway {
    /// Gateway where `ana` may run every flow and `mallory` none.
    pub async fn new() -> Self {
        Self::with_rules(vec![AccessRule {
            credential: "*".into(),
            allow: vec!["ana".into()],
            deny: vec!["mallory".into()],
        }])
        .await
    }

    pub async fn with_rules(rules: Vec<AccessRule>) -> Self {
        let calls: CallLog = Arc::default();
        let google = start_google(calls.clone()).await;

        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::load(dir.path().join("credentials.json"))
            .await
            .unwrap();
        let http = reqwest::Client::new();
        let client = GoogleOAuthClient::new(
            http.clone(),
            Endpoints {
                authorize: AUTHORIZE_ENDPOINT.to_string(),
                token: format!("{google}/token"),
                revoke: format!("{google}/revoke"),
            },
            format!("{PUBLIC_BASE}/oauth/callback"),
        );
        let manager = TokenLifecycleManager::new(
            Arc::new(store),
            Arc::new(ScopeResolver::load(None).await.unwrap()),
            Arc::new(StateTokenGuard::new(Duration::from_secs(600))),
            Arc::new(client),
            ServiceRegistry::google_defaults(http),
            Hooks::new().with_voter(access::voter(rules)),
        );

        Self {
            _dir: dir,
            manager: Arc::new(manager),
            admin_token: Arc::new(Secret::new(ADMIN_TOKEN.to_string())),
            calls,
        }
    }

    pub fn provider_calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn admin_router(&self) -> Router {
        build_admin_router(AdminState::new(
            self.manager.clone(),
            self.admin_token.clone(),
        ))
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            flow: FlowState {
                manager: self.manager.clone(),
                admin_token: self.admin_token.clone(),
                session_ttl_secs: 600,
                secure_cookies: true,
            },
            prometheus: crate::metrics::test_handle(),
            started_at: Instant::now(),
        }
    }

    pub fn public_router(&self) -> Router {
        crate::build_router(self.app_state(), 100)
    }
}

pub async fn read_json(response: Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}
