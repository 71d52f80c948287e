//! Bearer-token REST client, the default for every Google API.

use common::Secret;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};

use crate::{Result, ServiceClient, ServiceContext, ServiceError, ServiceFactory};

/// API key header Google accepts alongside OAuth tokens for quota attribution.
const API_KEY_HEADER: HeaderName = HeaderName::from_static("x-goog-api-key");

/// Client for a Google REST API rooted at `base_url`.
pub struct RestServiceClient {
    service_id: String,
    base_url: String,
    access_token: Secret<String>,
    developer_key: Option<Secret<String>>,
    http: reqwest::Client,
}

impl RestServiceClient {
    pub fn new(base_url: &str, context: &ServiceContext) -> Self {
        Self {
            service_id: context.service_id.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: context.access_token.clone(),
            developer_key: context.developer_key.clone(),
            http: context.http.clone(),
        }
    }
}

impl ServiceClient for RestServiceClient {
    fn service_id(&self) -> &str {
        &self.service_id
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn prepare_request(&self, headers: &mut HeaderMap) -> Result<()> {
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", self.access_token.expose()))
            .map_err(|e| ServiceError::InvalidToken(e.to_string()))?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);

        if let Some(key) = &self.developer_key {
            let mut value = HeaderValue::from_str(key.expose())
                .map_err(|e| ServiceError::InvalidToken(format!("developer key: {e}")))?;
            value.set_sensitive(true);
            headers.insert(API_KEY_HEADER, value);
        }
        Ok(())
    }

    fn request(&self, method: reqwest::Method, path: &str) -> Result<reqwest::RequestBuilder> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut headers = HeaderMap::new();
        self.prepare_request(&mut headers)?;
        Ok(self.http.request(method, url).headers(headers))
    }
}

/// Factory producing `RestServiceClient`s for a fixed API root.
#[derive(Debug, Clone)]
pub struct RestFactory {
    base_url: String,
}

impl RestFactory {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl ServiceFactory for RestFactory {
    fn build(&self, context: &ServiceContext) -> Result<Box<dyn ServiceClient>> {
        Ok(Box::new(RestServiceClient::new(&self.base_url, context)))
    }
}
