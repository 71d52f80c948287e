//! Service-account identity assertions
//!
//! Service accounts never go through the consent screen. Instead the
//! gateway signs a short-lived JWT with the account's private key and trades
//! it for an access token at the token endpoint (JWT-bearer grant). There is
//! no refresh token: a new assertion is minted whenever the cached token is
//! missing or expired.

use std::fmt;

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};

use crate::constants::ASSERTION_LIFETIME_SECS;
use crate::error::{Error, Result};

/// The fields of a Google service-account JSON key the gateway uses.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type", default)]
    pub key_type: Option<String>,
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

impl ServiceAccountKey {
    /// Parse and sanity-check a JSON key blob.
    pub fn parse(json: &str) -> Result<Self> {
        let key: ServiceAccountKey = serde_json::from_str(json)
            .map_err(|e| Error::Validation(format!("service account key is not valid JSON: {e}")))?;
        if let Some(kind) = &key.key_type
            && kind != "service_account"
        {
            return Err(Error::Validation(format!(
                "expected a service_account key, got type {kind:?}"
            )));
        }
        if key.client_email.trim().is_empty() {
            return Err(Error::Validation(
                "service account key has no client_email".into(),
            ));
        }
        if !key.private_key.contains("PRIVATE KEY") {
            return Err(Error::Validation(
                "service account key has no PEM private_key".into(),
            ));
        }
        Ok(key)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

/// Sign an RS256 assertion for `scopes`, addressed to `audience` (the token endpoint).
///
/// `issued_at` is a unix timestamp in seconds; the assertion expires
/// `ASSERTION_LIFETIME_SECS` later.
pub fn sign_assertion(
    key: &ServiceAccountKey,
    scopes: &[String],
    audience: &str,
    issued_at: i64,
) -> Result<String> {
    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| Error::Assertion(format!("unreadable private key: {e}")))?;

    let mut header = Header::new(Algorithm::RS256);
    header.kid = key.private_key_id.clone();

    let claims = AssertionClaims {
        iss: key.client_email.clone(),
        scope: scopes.join(" "),
        aud: audience.to_string(),
        iat: issued_at,
        exp: issued_at + ASSERTION_LIFETIME_SECS,
    };

    encode(&header, &claims, &encoding_key).map_err(|e| Error::Assertion(e.to_string()))
}
