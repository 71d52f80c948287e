//! Provider abstraction over Google's OAuth endpoints
//!
//! The lifecycle manager talks to the provider only through `OAuthClient`,
//! so its sequencing and failure policy can be exercised against a scripted
//! client in tests. `GoogleOAuthClient` is the production implementation.
//!
//! Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
//! (`Arc<dyn OAuthClient>`).

use std::future::Future;
use std::pin::Pin;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::assertion::{ServiceAccountKey, sign_assertion};
use crate::authorize::{AuthorizationRequest, build_authorization_url};
use crate::constants::{AUTHORIZE_ENDPOINT, REVOKE_ENDPOINT, TOKEN_ENDPOINT};
use crate::error::Result;
use crate::token::{self, ClientCredentials, TokenResponse};

/// Boxed, sendable future returned by `OAuthClient` methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The provider operations the token lifecycle depends on.
pub trait OAuthClient: Send + Sync {
    /// Consent-screen URL for a user-delegated credential.
    fn authorization_url(
        &self,
        client_id: &str,
        scopes: &[String],
        offline: bool,
        state: &str,
    ) -> Result<String>;

    /// Authorization-code grant.
    fn exchange_code<'a>(
        &'a self,
        credentials: ClientCredentials<'a>,
        code: &'a str,
    ) -> BoxFuture<'a, Result<TokenResponse>>;

    /// Refresh-token grant.
    fn refresh<'a>(
        &'a self,
        credentials: ClientCredentials<'a>,
        refresh_token: &'a str,
    ) -> BoxFuture<'a, Result<TokenResponse>>;

    /// Sign an assertion for `key` and trade it for a token.
    fn mint_with_assertion<'a>(
        &'a self,
        key: &'a ServiceAccountKey,
        scopes: &'a [String],
    ) -> BoxFuture<'a, Result<TokenResponse>>;

    /// Revoke an access or refresh token.
    fn revoke<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// Endpoint set; defaults to Google's production endpoints.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub authorize: String,
    pub token: String,
    pub revoke: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            authorize: AUTHORIZE_ENDPOINT.to_string(),
            token: TOKEN_ENDPOINT.to_string(),
            revoke: REVOKE_ENDPOINT.to_string(),
        }
    }
}

/// `OAuthClient` backed by reqwest and Google's endpoints.
pub struct GoogleOAuthClient {
    http: reqwest::Client,
    endpoints: Endpoints,
    redirect_uri: String,
}

impl GoogleOAuthClient {
    /// `redirect_uri` is the gateway's public callback URL; it must match
    /// one registered on every OAuth client id the gateway serves.
    pub fn new(http: reqwest::Client, endpoints: Endpoints, redirect_uri: String) -> Self {
        Self {
            http,
            endpoints,
            redirect_uri,
        }
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }
}

impl OAuthClient for GoogleOAuthClient {
    fn authorization_url(
        &self,
        client_id: &str,
        scopes: &[String],
        offline: bool,
        state: &str,
    ) -> Result<String> {
        build_authorization_url(&AuthorizationRequest {
            endpoint: &self.endpoints.authorize,
            client_id,
            redirect_uri: &self.redirect_uri,
            scopes,
            offline,
            state,
        })
    }

    fn exchange_code<'a>(
        &'a self,
        credentials: ClientCredentials<'a>,
        code: &'a str,
    ) -> BoxFuture<'a, Result<TokenResponse>> {
        Box::pin(token::exchange_code(
            &self.http,
            &self.endpoints.token,
            credentials,
            &self.redirect_uri,
            code,
        ))
    }

    fn refresh<'a>(
        &'a self,
        credentials: ClientCredentials<'a>,
        refresh_token: &'a str,
    ) -> BoxFuture<'a, Result<TokenResponse>> {
        Box::pin(token::refresh_token(
            &self.http,
            &self.endpoints.token,
            credentials,
            refresh_token,
        ))
    }

    fn mint_with_assertion<'a>(
        &'a self,
        key: &'a ServiceAccountKey,
        scopes: &'a [String],
    ) -> BoxFuture<'a, Result<TokenResponse>> {
        Box::pin(async move {
            let issued_at = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs() as i64;
            let assertion = sign_assertion(key, scopes, &self.endpoints.token, issued_at)?;
            token::fetch_with_assertion(&self.http, &self.endpoints.token, &assertion).await
        })
    }

    fn revoke<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(token::revoke_token(&self.http, &self.endpoints.revoke, token))
    }
}
