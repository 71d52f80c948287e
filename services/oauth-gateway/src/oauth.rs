//! Public consent-flow endpoints
//!
//! - GET /oauth/authorize/{id}?destination=  start the flow, 303 to Google
//! - GET /oauth/callback?state&code|error&id&type  finish it
//!
//! Browsers are tracked by the `gateway_session` cookie, minted on first
//! contact. The principal comes from the admin bearer token or the
//! `x-principal` header set by the fronting system.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use common::Secret;
use serde::Deserialize;
use token_lifecycle::{
    AuthExchangeError, CallbackOutcome, CallbackParams, Error, Principal, TokenLifecycleManager,
};
use tracing::{info, warn};

use crate::error::{ApiError, ApiResult};
use crate::metrics;

pub const SESSION_COOKIE: &str = "gateway_session";
pub const PRINCIPAL_HEADER: &str = "x-principal";

/// State shared by the public handlers.
#[derive(Clone)]
pub struct FlowState {
    pub manager: Arc<TokenLifecycleManager>,
    pub admin_token: Arc<Secret<String>>,
    pub session_ttl_secs: u64,
    pub secure_cookies: bool,
}

/// Session id from the request cookie, or a new one to be set on the response.
pub struct Session {
    pub id: String,
    minted: bool,
}

impl Session {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let existing = headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
            .map(|(_, value)| value.to_string());
        match existing {
            Some(id) => Self { id, minted: false },
            None => Self {
                id: uuid::Uuid::new_v4().to_string(),
                minted: true,
            },
        }
    }

    fn cookie(&self, ttl_secs: u64, secure: bool) -> Option<HeaderValue> {
        if !self.minted {
            return None;
        }
        let secure = if secure { "; Secure" } else { "" };
        HeaderValue::from_str(&format!(
            "{SESSION_COOKIE}={}; Path=/; Max-Age={ttl_secs}; HttpOnly; SameSite=Lax{secure}",
            self.id
        ))
        .ok()
    }

    /// Attach `Set-Cookie` when this session was minted by the request.
    fn attach(&self, state: &FlowState, mut response: Response) -> Response {
        if let Some(cookie) = self.cookie(state.session_ttl_secs, state.secure_cookies) {
            response.headers_mut().insert(header::SET_COOKIE, cookie);
        }
        response
    }
}

/// Who is calling: admin by bearer token, else the `x-principal` header.
pub fn principal(headers: &HeaderMap, admin_token: &Secret<String>) -> Principal {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if bearer.is_some_and(|token| admin_token.matches(token)) {
        return Principal::Admin;
    }
    match headers
        .get(PRINCIPAL_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
    {
        Some(name) if !name.is_empty() => Principal::User(name.to_string()),
        _ => Principal::Anonymous,
    }
}

fn see_other(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::SEE_OTHER, [(header::LOCATION, value)]).into_response(),
        Err(_) => ApiError::BadRequest(format!("unusable redirect target {location:?}"))
            .into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AuthorizeQuery {
    #[serde(default)]
    destination: Option<String>,
}

/// GET /oauth/authorize/{id}: issue session state and redirect to consent.
pub async fn authorize(
    State(state): State<FlowState>,
    Path(id): Path<String>,
    Query(query): Query<AuthorizeQuery>,
    headers: HeaderMap,
) -> Response {
    let session = Session::from_headers(&headers);
    let who = principal(&headers, &state.admin_token);

    let response = match begin(&state, &session, &who, &id, query.destination).await {
        Ok(url) => {
            metrics::record_authorization("requested");
            see_other(&url)
        }
        Err(error) => {
            metrics::record_authorization("rejected");
            error.into_response()
        }
    };
    session.attach(&state, response)
}

async fn begin(
    state: &FlowState,
    session: &Session,
    who: &Principal,
    id: &str,
    destination: Option<String>,
) -> ApiResult<String> {
    if !state.manager.authorize_initiation(who, id).is_allowed() {
        warn!(credential_id = id, principal = ?who.name(), "authorization start denied");
        return Err(ApiError::Forbidden(id.to_string()));
    }
    let target = state
        .manager
        .begin_authorization(&session.id, id, destination)
        .await?;
    Ok(target.url)
}

/// GET /oauth/callback: verify state, exchange the code, redirect onward.
pub async fn callback(
    State(state): State<FlowState>,
    Query(params): Query<CallbackParams>,
    headers: HeaderMap,
) -> Response {
    let session = Session::from_headers(&headers);
    let who = principal(&headers, &state.admin_token);

    let outcome = state
        .manager
        .dispatch_callback(&session.id, &params, &who)
        .await;

    let response = match outcome {
        Ok(outcome) => {
            metrics::record_authorization(outcome.label());
            respond(outcome)
        }
        Err(error) => {
            metrics::record_authorization(match &error {
                Error::StateMismatch(_) => "rejected",
                _ => "failed",
            });
            ApiError::from(error).into_response()
        }
    };
    session.attach(&state, response)
}

fn respond(outcome: CallbackOutcome) -> Response {
    match outcome {
        CallbackOutcome::Foreign => StatusCode::NO_CONTENT.into_response(),
        CallbackOutcome::Completed {
            credential,
            destination,
        } => {
            info!(credential_id = %credential.id, "consent flow finished");
            match destination {
                Some(destination) => see_other(&destination),
                None => (
                    StatusCode::OK,
                    axum::Json(serde_json::json!({
                        "credential_id": credential.id,
                        "status": "authenticated",
                    })),
                )
                    .into_response(),
            }
        }
        CallbackOutcome::Failed {
            credential_id,
            error,
            destination,
        } => {
            let reason = match &error {
                Error::AuthExchange(AuthExchangeError::UserDenied) => "access_denied",
                _ => "exchange_failed",
            };
            warn!(credential_id, reason, error = %error, "consent flow failed");
            match destination {
                Some(destination) => see_other(&destination),
                None => ApiError::from(error).into_response(),
            }
        }
    }
}
