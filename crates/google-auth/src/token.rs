//! Token endpoint interactions
//!
//! Four calls against Google's OAuth endpoints:
//! 1. Authorization code exchange (consent flow completion)
//! 2. Refresh-token grant
//! 3. JWT-bearer grant (service-account assertions)
//! 4. Revocation
//!
//! The first three POST a form to the token endpoint and share response
//! handling. None of them retries: failures surface to the caller.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::JWT_BEARER_GRANT;
use crate::error::{Error, Result};

/// Response from the token endpoint for every grant type.
///
/// `expires_in` is a delta in seconds from the response time. Refresh and
/// assertion grants usually omit `refresh_token`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires (delta, not absolute)
    pub expires_in: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

/// OAuth client id/secret pair of a user-delegated credential.
#[derive(Debug, Clone, Copy)]
pub struct ClientCredentials<'a> {
    pub client_id: &'a str,
    pub client_secret: &'a str,
}

/// Error body Google returns on failed grants.
#[derive(Debug, Deserialize)]
struct GrantError {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Exchange an authorization code for tokens.
pub async fn exchange_code(
    client: &reqwest::Client,
    endpoint: &str,
    credentials: ClientCredentials<'_>,
    redirect_uri: &str,
    code: &str,
) -> Result<TokenResponse> {
    post_grant(
        client,
        endpoint,
        &[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", credentials.client_id),
            ("client_secret", credentials.client_secret),
            ("redirect_uri", redirect_uri),
        ],
        "code exchange",
    )
    .await
}

/// Obtain a new access token with a refresh token.
///
/// A rejected refresh token (`invalid_grant`, 401, 403) maps to
/// `InvalidCredentials`; anything else is `TokenExchange` or `Http`.
pub async fn refresh_token(
    client: &reqwest::Client,
    endpoint: &str,
    credentials: ClientCredentials<'_>,
    refresh: &str,
) -> Result<TokenResponse> {
    post_grant(
        client,
        endpoint,
        &[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh),
            ("client_id", credentials.client_id),
            ("client_secret", credentials.client_secret),
        ],
        "token refresh",
    )
    .await
}

/// Trade a signed service-account assertion for an access token.
pub async fn fetch_with_assertion(
    client: &reqwest::Client,
    endpoint: &str,
    assertion: &str,
) -> Result<TokenResponse> {
    post_grant(
        client,
        endpoint,
        &[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion)],
        "assertion grant",
    )
    .await
}

/// Revoke an access or refresh token.
pub async fn revoke_token(client: &reqwest::Client, endpoint: &str, token: &str) -> Result<()> {
    let response = client
        .post(endpoint)
        .form(&[("token", token)])
        .send()
        .await
        .map_err(|e| Error::Http(format!("revocation request failed: {e}")))?;

    let status = response.status();
    if status.is_success() {
        debug!("token revoked");
        return Ok(());
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<no body>"));
    Err(Error::Revoke(format!("revoke endpoint returned {status}: {body}")))
}

async fn post_grant(
    client: &reqwest::Client,
    endpoint: &str,
    form: &[(&str, &str)],
    operation: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(endpoint)
        .form(form)
        .send()
        .await
        .map_err(|e| Error::Http(format!("{operation} request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        let grant_error = serde_json::from_str::<GrantError>(&body).ok();

        let rejected = status.as_u16() == 401
            || status.as_u16() == 403
            || grant_error
                .as_ref()
                .is_some_and(|e| e.error == "invalid_grant" || e.error == "unauthorized_client");
        let detail = match &grant_error {
            Some(GrantError {
                error,
                error_description: Some(description),
            }) => format!("{error}: {description}"),
            Some(GrantError { error, .. }) => error.clone(),
            None => body,
        };

        if rejected {
            return Err(Error::InvalidCredentials(format!(
                "{operation} rejected ({status}): {detail}"
            )));
        }
        return Err(Error::TokenExchange(format!(
            "{operation} returned {status}: {detail}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid {operation} response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Form;
    use axum::Json;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use std::collections::HashMap;

    const CREDS: ClientCredentials<'static> = ClientCredentials {
        client_id: "client-x",
        client_secret: "secret-y",
    };

    /// Start a stand-in for Google's token and revoke endpoints.
    ///
    /// - `code=good` / `refresh_token=rt_good` / any assertion → 200 with tokens
    /// - `refresh_token=rt_revoked` → 400 invalid_grant
    /// - `code=boom` → 500
    /// - revoke: `token=live` → 200, anything else → 400
    async fn start_token_server() -> String {
        async fn token(Form(form): Form<HashMap<String, String>>) -> impl IntoResponse {
            let grant = form.get("grant_type").map(String::as_str).unwrap_or("");
            match grant {
                "authorization_code" => {
                    assert_eq!(form["client_id"], "client-x");
                    assert_eq!(form["client_secret"], "secret-y");
                    assert_eq!(form["redirect_uri"], "https://gw.example/oauth/callback");
                    match form["code"].as_str() {
                        "good" => (
                            StatusCode::OK,
                            Json(serde_json::json!({
                                "access_token": "at_1",
                                "refresh_token": "rt_1",
                                "expires_in": 3599,
                                "scope": "https://www.googleapis.com/auth/calendar",
                                "token_type": "Bearer"
                            })),
                        ),
                        _ => (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            Json(serde_json::json!({"error": "backend_error"})),
                        ),
                    }
                }
                "refresh_token" => match form["refresh_token"].as_str() {
                    "rt_good" => (
                        StatusCode::OK,
                        Json(serde_json::json!({"access_token": "at_2", "expires_in": 3599})),
                    ),
                    _ => (
                        StatusCode::BAD_REQUEST,
                        Json(serde_json::json!({
                            "error": "invalid_grant",
                            "error_description": "Token has been expired or revoked."
                        })),
                    ),
                },
                JWT_BEARER_GRANT => {
                    assert!(!form["assertion"].is_empty());
                    (
                        StatusCode::OK,
                        Json(serde_json::json!({"access_token": "at_sa", "expires_in": 3600})),
                    )
                }
                _ => (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({"error": "unsupported_grant_type"})),
                ),
            }
        }

        async fn revoke(Form(form): Form<HashMap<String, String>>) -> StatusCode {
            if form.get("token").map(String::as_str) == Some("live") {
                StatusCode::OK
            } else {
                StatusCode::BAD_REQUEST
            }
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = axum::Router::new()
            .route("/token", post(token))
            .route("/revoke", post(revoke));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn token_response_deserializes_without_refresh_token() {
        let json = r#"{"access_token":"at_abc","expires_in":3600,"token_type":"Bearer"}"#;
        let token: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(token.access_token, "at_abc");
        assert!(token.refresh_token.is_none());
        assert_eq!(token.expires_in, 3600);
        assert_eq!(token.token_type.as_deref(), Some("Bearer"));
    }

    #[tokio::test]
    async fn exchange_code_returns_tokens() {
        let base = start_token_server().await;
        let client = reqwest::Client::new();
        let token = exchange_code(
            &client,
            &format!("{base}/token"),
            CREDS,
            "https://gw.example/oauth/callback",
            "good",
        )
        .await
        .unwrap();

        assert_eq!(token.access_token, "at_1");
        assert_eq!(token.refresh_token.as_deref(), Some("rt_1"));
        assert_eq!(token.expires_in, 3599);
    }

    #[tokio::test]
    async fn exchange_server_error_is_token_exchange_error() {
        let base = start_token_server().await;
        let client = reqwest::Client::new();
        let result = exchange_code(
            &client,
            &format!("{base}/token"),
            CREDS,
            "https://gw.example/oauth/callback",
            "boom",
        )
        .await;
        assert!(matches!(result, Err(Error::TokenExchange(_))), "{result:?}");
    }

    #[tokio::test]
    async fn refresh_returns_new_access_token() {
        let base = start_token_server().await;
        let client = reqwest::Client::new();
        let token = refresh_token(&client, &format!("{base}/token"), CREDS, "rt_good")
            .await
            .unwrap();
        assert_eq!(token.access_token, "at_2");
        assert!(token.refresh_token.is_none());
    }

    #[tokio::test]
    async fn revoked_refresh_token_is_invalid_credentials() {
        let base = start_token_server().await;
        let client = reqwest::Client::new();
        let err = refresh_token(&client, &format!("{base}/token"), CREDS, "rt_revoked")
            .await
            .unwrap_err();
        match err {
            Error::InvalidCredentials(msg) => {
                assert!(msg.contains("invalid_grant"), "{msg}");
                assert!(msg.contains("expired or revoked"), "{msg}");
            }
            other => panic!("expected InvalidCredentials, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn assertion_grant_returns_token() {
        let base = start_token_server().await;
        let client = reqwest::Client::new();
        let token = fetch_with_assertion(&client, &format!("{base}/token"), "header.claims.sig")
            .await
            .unwrap();
        assert_eq!(token.access_token, "at_sa");
    }

    #[tokio::test]
    async fn revoke_reports_provider_failure() {
        let base = start_token_server().await;
        let client = reqwest::Client::new();
        let endpoint = format!("{base}/revoke");

        revoke_token(&client, &endpoint, "live").await.unwrap();
        let err = revoke_token(&client, &endpoint, "dead").await.unwrap_err();
        assert!(matches!(err, Error::Revoke(_)), "{err:?}");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_http_error() {
        let client = reqwest::Client::new();
        // Port 9 (discard) on localhost is closed in test environments
        let result = refresh_token(&client, "http://127.0.0.1:9/token", CREDS, "rt").await;
        assert!(matches!(result, Err(Error::Http(_))), "{result:?}");
    }
}
