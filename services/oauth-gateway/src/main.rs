//! Google OAuth credential gateway
//!
//! Single-binary Rust service that:
//! 1. Loads registered Google credentials from a JSON store
//! 2. Walks browsers through the consent flow (`/oauth/authorize`, `/oauth/callback`)
//! 3. Keeps tokens fresh and revokes them on request
//! 4. Exposes an admin API on a separate listener

mod access;
mod admin;
mod config;
mod error;
mod metrics;
mod oauth;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{FromRef, MatchedPath, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use google_auth::{CredentialStore, GoogleOAuthClient, ScopeResolver, StateTokenGuard};
use metrics_exporter_prometheus::PrometheusHandle;
use service_client::ServiceRegistry;
use token_lifecycle::{Hooks, TokenLifecycleManager};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::admin::{AdminState, build_admin_router};
use crate::config::Config;
use crate::oauth::FlowState;

/// How long in-flight requests get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state for the public listener
#[derive(Clone)]
struct AppState {
    flow: FlowState,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

impl FromRef<AppState> for FlowState {
    fn from_ref(state: &AppState) -> Self {
        state.flow.clone()
    }
}

/// Build the public router: consent endpoints, health and metrics.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/oauth/authorize/{id}", get(oauth::authorize))
        .route("/oauth/callback", get(oauth::callback))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(middleware::from_fn(track_requests))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Count and time every request by its route template.
async fn track_requests(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let started = Instant::now();
    let response = next.run(request).await;
    metrics::record_request(
        &route,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs; LOG_LEVEL wins over RUST_LOG
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting oauth-gateway");

    // Install before anything records a metric
    let prometheus = metrics::install_recorder().context("failed to install Prometheus recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.gateway.listen_addr,
        admin_listen_addr = %config.gateway.admin_listen_addr,
        public_base_url = %config.gateway.public_base_url,
        access_rules = config.access.rules.len(),
        "configuration loaded"
    );

    let admin_token = Arc::new(
        config
            .admin
            .token
            .clone()
            .context("admin token missing after config load")?,
    );
    let manager = Arc::new(build_manager(&config).await?);

    let app_state = AppState {
        flow: FlowState {
            manager: manager.clone(),
            admin_token: admin_token.clone(),
            session_ttl_secs: config.gateway.session_ttl_secs,
            secure_cookies: config.secure_cookies(),
        },
        prometheus,
        started_at: Instant::now(),
    };
    let public_app = build_router(app_state, config.gateway.max_connections);
    let admin_app = build_admin_router(AdminState::new(manager, admin_token))
        .layer(middleware::from_fn(track_requests));

    let public_listener = TcpListener::bind(config.gateway.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.gateway.listen_addr))?;
    let admin_listener = TcpListener::bind(config.gateway.admin_listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.gateway.admin_listen_addr))?;
    info!(
        addr = %config.gateway.listen_addr,
        admin_addr = %config.gateway.admin_listen_addr,
        "accepting requests"
    );

    // Both listeners drain on the same signal; the drain timeout starts at
    // signal receipt, not at startup.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let public = tokio::spawn(serve(public_listener, public_app, shutdown_rx.clone()));
    let admin = tokio::spawn(serve(admin_listener, admin_app, shutdown_rx));

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(DRAIN_TIMEOUT, async { (public.await, admin.await) }).await {
        Ok((public, admin)) => {
            for (name, result) in [("public", public), ("admin", admin)] {
                match result {
                    Ok(Ok(())) => info!(listener = name, "drained"),
                    Ok(Err(e)) => error!(listener = name, error = %e, "server error during shutdown"),
                    Err(e) => error!(listener = name, error = %e, "server task panicked"),
                }
            }
        }
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    info!("shutdown complete");
    Ok(())
}

/// Wire the credential store, scope catalog, provider client and hooks.
async fn build_manager(config: &Config) -> Result<TokenLifecycleManager> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.gateway.timeout_secs))
        .build()
        .context("failed to build HTTP client")?;

    let store = CredentialStore::load(config.storage.credentials_path.clone())
        .await
        .with_context(|| {
            format!(
                "failed to load credential store {}",
                config.storage.credentials_path.display()
            )
        })?;
    let scopes = ScopeResolver::load(config.storage.catalog_path.clone())
        .await
        .context("failed to load scope catalog")?;
    let guard = StateTokenGuard::new(Duration::from_secs(config.gateway.session_ttl_secs));
    let client = GoogleOAuthClient::new(http.clone(), config.endpoints(), config.redirect_uri());
    let hooks = Hooks::new().with_voter(access::voter(config.access.rules.clone()));

    info!(
        credentials = store.len().await,
        redirect_uri = %client.redirect_uri(),
        "credential store loaded"
    );

    Ok(TokenLifecycleManager::new(
        Arc::new(store),
        Arc::new(scopes),
        Arc::new(guard),
        Arc::new(client),
        ServiceRegistry::google_defaults(http),
        hooks,
    ))
}

async fn serve(
    listener: TcpListener,
    app: Router,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
}

/// Health: per-credential token state plus uptime.
///
/// 503 only when credentials exist and none of them is authenticated.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut body = state.flow.manager.health().await;
    body["uptime_seconds"] = serde_json::json!(state.started_at.elapsed().as_secs());

    let unusable = body["status"] == "unhealthy" && body["credentials_total"].as_u64() > Some(0);
    let status = if unusable {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
