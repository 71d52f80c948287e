//! Consent-screen URL construction

use crate::error::{Error, Result};

/// Everything that goes into the consent redirect.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest<'a> {
    pub endpoint: &'a str,
    pub client_id: &'a str,
    pub redirect_uri: &'a str,
    pub scopes: &'a [String],
    /// Request a refresh token (`access_type=offline`) and force the
    /// consent prompt so Google issues one even on re-authorization.
    pub offline: bool,
    /// JSON-encoded state payload, echoed back on the callback.
    pub state: &'a str,
}

/// Build the full authorization URL.
///
/// Parameter order is fixed: `client_id, redirect_uri, response_type,
/// scope, access_type, approval_prompt, state`. Values are form-encoded.
pub fn build_authorization_url(request: &AuthorizationRequest<'_>) -> Result<String> {
    let scope = request.scopes.join(" ");
    let (access_type, approval_prompt) = if request.offline {
        ("offline", "force")
    } else {
        ("online", "auto")
    };
    let query = serde_urlencoded::to_string([
        ("client_id", request.client_id),
        ("redirect_uri", request.redirect_uri),
        ("response_type", "code"),
        ("scope", scope.as_str()),
        ("access_type", access_type),
        ("approval_prompt", approval_prompt),
        ("state", request.state),
    ])
    .map_err(|e| Error::Validation(format!("encoding authorization url: {e}")))?;

    let separator = if request.endpoint.contains('?') { '&' } else { '?' };
    Ok(format!("{}{separator}{query}", request.endpoint))
}
