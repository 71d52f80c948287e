//! Admin API for credential management
//!
//! Runs on a separate listener and requires `Authorization: Bearer <admin
//! token>` on every request. Responses never carry client secrets, keys or
//! tokens.
//!
//! Endpoints:
//! - GET    /admin/credentials                 list credentials with state
//! - POST   /admin/credentials                 register a credential
//! - GET    /admin/credentials/{id}            one credential
//! - PUT    /admin/credentials/{id}            edit; may invalidate the token
//! - DELETE /admin/credentials/{id}            delete permanently
//! - POST   /admin/credentials/{id}/refresh    ensure a fresh token
//! - POST   /admin/credentials/{id}/revoke     revoke at Google, drop token
//! - GET    /admin/credentials/{id}/services   authorized service clients
//! - GET    /admin/catalog                     current scope catalog
//! - POST   /admin/catalog/rescan              reload the catalog

use std::sync::Arc;

use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use common::Secret;
use google_auth::{Credential, CredentialInput, requires_reauthentication};
use serde_json::{Value, json};
use token_lifecycle::{Freshness, Principal, TokenLifecycleManager};
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::oauth::principal;

/// Shared state for admin API handlers.
#[derive(Clone)]
pub struct AdminState {
    manager: Arc<TokenLifecycleManager>,
    admin_token: Arc<Secret<String>>,
}

impl AdminState {
    pub fn new(manager: Arc<TokenLifecycleManager>, admin_token: Arc<Secret<String>>) -> Self {
        Self {
            manager,
            admin_token,
        }
    }
}

/// Build the admin router; every route sits behind the admin token check.
pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/credentials", get(list_credentials).post(create_credential))
        .route(
            "/admin/credentials/{id}",
            get(get_credential)
                .put(update_credential)
                .delete(delete_credential),
        )
        .route("/admin/credentials/{id}/refresh", post(refresh_credential))
        .route("/admin/credentials/{id}/revoke", post(revoke_credential))
        .route("/admin/credentials/{id}/services", get(credential_services))
        .route("/admin/catalog", get(catalog))
        .route("/admin/catalog/rescan", post(rescan_catalog))
        .layer(middleware::from_fn_with_state(state.clone(), require_admin))
        .with_state(state)
}

async fn require_admin(State(state): State<AdminState>, request: Request, next: Next) -> Response {
    if principal(request.headers(), &state.admin_token) != Principal::Admin {
        return ApiError::Unauthorized.into_response();
    }
    next.run(request).await
}

/// Operator-facing view of a credential: no secrets, no token values.
async fn view(manager: &TokenLifecycleManager, credential: &Credential) -> Value {
    let state = manager
        .state(&credential.id)
        .await
        .map(|s| s.label())
        .unwrap_or("unknown");
    let token = credential.access_token.as_ref();
    json!({
        "id": credential.id,
        "display_name": credential.display_name,
        "kind": credential.kind.label(),
        "services": credential.services,
        "scopes": credential.scopes,
        "authenticated": credential.authenticated,
        "offline_access": credential.offline_access,
        "owner_id": credential.owner_id,
        "state": state,
        "expires_at": token.map(|t| t.expires_at),
        "has_refresh_token": credential.refresh_token().is_some(),
    })
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

/// GET /admin/credentials
async fn list_credentials(State(state): State<AdminState>) -> Json<Value> {
    let mut credentials = Vec::new();
    for credential in state.manager.store().list().await {
        credentials.push(view(&state.manager, &credential).await);
    }
    Json(json!({ "credentials": credentials }))
}

/// POST /admin/credentials
async fn create_credential(
    State(state): State<AdminState>,
    payload: Result<Json<CredentialInput>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let credential = body(payload)?.into_credential()?;
    if state.manager.store().get(&credential.id).await.is_ok() {
        return Err(ApiError::Conflict(credential.id));
    }
    let saved = state.manager.save_credential(credential).await?;
    info!(credential_id = %saved.id, kind = saved.kind.label(), "credential registered");
    Ok((StatusCode::CREATED, Json(view(&state.manager, &saved).await)))
}

/// GET /admin/credentials/{id}
async fn get_credential(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let credential = state.manager.store().get(&id).await?;
    Ok(Json(view(&state.manager, &credential).await))
}

/// PUT /admin/credentials/{id}
///
/// Fields left out of the body keep their stored values.
async fn update_credential(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    payload: Result<Json<CredentialInput>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let input = body(payload)?;
    let existing = state.manager.store().get(&id).await?;
    let updated = input.apply_to(&existing)?;
    let reauthenticate = requires_reauthentication(&existing, &updated);
    let saved = state.manager.save_credential(updated).await?;
    info!(credential_id = %id, reauthenticate, "credential updated");

    let mut response = view(&state.manager, &saved).await;
    response["reauthentication_required"] = json!(reauthenticate);
    Ok(Json(response))
}

/// DELETE /admin/credentials/{id}
async fn delete_credential(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let removed = state.manager.remove_credential(&id).await?;
    info!(credential_id = %removed.id, "credential deleted");
    Ok(Json(json!({ "id": removed.id, "status": "deleted" })))
}

/// POST /admin/credentials/{id}/refresh
async fn refresh_credential(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let freshness = match state.manager.ensure_fresh_token(&id).await {
        Ok(freshness) => freshness,
        Err(e) => {
            metrics::record_token_check("error");
            return Err(e.into());
        }
    };
    metrics::record_token_check(freshness.label());

    let reason = match freshness {
        Freshness::Revoked { reason } => Some(reason.to_string()),
        Freshness::Valid | Freshness::Refreshed => None,
    };
    let state_label = state.manager.state(&id).await?.label();
    Ok(Json(json!({
        "id": id,
        "freshness": freshness.label(),
        "reason": reason,
        "state": state_label,
    })))
}

/// POST /admin/credentials/{id}/revoke
async fn revoke_credential(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let cleared = state.manager.revoke(&id).await?;
    Ok(Json(json!({
        "id": cleared.id,
        "status": "revoked",
        "authenticated": cleared.authenticated,
    })))
}

/// GET /admin/credentials/{id}/services
async fn credential_services(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let clients = state.manager.service_clients(&id).await?;
    let services: Vec<Value> = clients
        .values()
        .map(|client| json!({ "service": client.service_id(), "base_url": client.base_url() }))
        .collect();
    Ok(Json(json!({ "id": id, "services": services })))
}

/// GET /admin/catalog
async fn catalog(State(state): State<AdminState>) -> Json<Value> {
    let snapshot = state.manager.scopes().snapshot().await;
    Json(json!({
        "services": snapshot.service_names(),
        "catalog": snapshot.services,
    }))
}

/// POST /admin/catalog/rescan
async fn rescan_catalog(State(state): State<AdminState>) -> ApiResult<Json<Value>> {
    let services = state.manager.scopes().rescan().await?;
    info!(services, "scope catalog rescanned");
    Ok(Json(json!({ "status": "rescanned", "services": services })))
}
