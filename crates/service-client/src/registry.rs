//! Service id → factory registry

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use common::Secret;
use tracing::warn;

use crate::rest::RestFactory;
use crate::{Result, ServiceClient, ServiceContext, ServiceFactory};

/// API roots of the services in the built-in scope catalog.
const GOOGLE_APIS: &[(&str, &str)] = &[
    ("books", "https://www.googleapis.com/books/v1"),
    ("calendar", "https://www.googleapis.com/calendar/v3"),
    ("drive", "https://www.googleapis.com/drive/v3"),
    ("gmail", "https://gmail.googleapis.com/gmail/v1"),
    ("sheets", "https://sheets.googleapis.com/v4"),
    ("youtube", "https://www.googleapis.com/youtube/v3"),
];

/// Maps service ids to the factories that build their clients.
pub struct ServiceRegistry {
    http: reqwest::Client,
    factories: HashMap<String, Arc<dyn ServiceFactory>>,
}

impl ServiceRegistry {
    /// Empty registry; clients share `http`.
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            factories: HashMap::new(),
        }
    }

    /// Registry with a REST factory for every built-in Google service.
    pub fn google_defaults(http: reqwest::Client) -> Self {
        let mut registry = Self::new(http);
        for (service, base_url) in GOOGLE_APIS {
            registry.register(*service, RestFactory::new(*base_url));
        }
        registry
    }

    /// Add or replace the factory for `service`.
    pub fn register(&mut self, service: impl Into<String>, factory: impl ServiceFactory + 'static) {
        self.factories.insert(service.into(), Arc::new(factory));
    }

    pub fn contains(&self, service: &str) -> bool {
        self.factories.contains_key(service)
    }

    /// Build one client per service for a credential.
    ///
    /// Services without a registered factory are skipped with a warning; a
    /// factory failure aborts the whole set.
    pub fn build_all(
        &self,
        credential_id: &str,
        services: &BTreeSet<String>,
        access_token: &str,
        developer_key: Option<&str>,
    ) -> Result<BTreeMap<String, Box<dyn ServiceClient>>> {
        let mut clients = BTreeMap::new();
        for service in services {
            let Some(factory) = self.factories.get(service) else {
                warn!(credential_id, service = %service, "no client factory registered, skipping service");
                continue;
            };
            let context = ServiceContext {
                service_id: service.clone(),
                credential_id: credential_id.to_string(),
                access_token: Secret::new(access_token.to_string()),
                developer_key: developer_key.map(|k| Secret::new(k.to_string())),
                http: self.http.clone(),
            };
            clients.insert(service.clone(), factory.build(&context)?);
        }
        Ok(clients)
    }
}
