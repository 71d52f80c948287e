//! Service and scope catalog
//!
//! Maps each Google service a credential can request to a human label and
//! to its named scopes (`CALENDAR_READONLY` → scope URL). The catalog is
//! reference data: it is swapped wholesale by `ScopeResolver::rescan()` and
//! never edited in place while requests are being served.
//!
//! Lookups walk services in `BTreeMap` order, so when two services declare
//! the same scope id the alphabetically first service wins. That keeps
//! `scopes_to_urls` deterministic across restarts.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Service identifier, e.g. `calendar`
pub type ServiceId = String;

/// Scope identifier within a service, e.g. `CALENDAR_READONLY`
pub type ScopeId = String;

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub label: String,
    #[serde(default)]
    pub scopes: BTreeMap<ScopeId, String>,
}

/// Read-mostly mapping of services to their scopes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeCatalog {
    #[serde(default)]
    pub services: BTreeMap<ServiceId, ServiceEntry>,
}

/// (service, label, [(scope id, scope url)])
type BuiltinEntry = (
    &'static str,
    &'static str,
    &'static [(&'static str, &'static str)],
);

const BUILTIN: &[BuiltinEntry] = &[
    (
        "books",
        "Books API",
        &[("BOOKS", "https://www.googleapis.com/auth/books")],
    ),
    (
        "calendar",
        "Calendar API",
        &[
            ("CALENDAR", "https://www.googleapis.com/auth/calendar"),
            (
                "CALENDAR_EVENTS",
                "https://www.googleapis.com/auth/calendar.events",
            ),
            (
                "CALENDAR_READONLY",
                "https://www.googleapis.com/auth/calendar.readonly",
            ),
        ],
    ),
    (
        "drive",
        "Drive API",
        &[
            ("DRIVE", "https://www.googleapis.com/auth/drive"),
            ("DRIVE_FILE", "https://www.googleapis.com/auth/drive.file"),
            (
                "DRIVE_READONLY",
                "https://www.googleapis.com/auth/drive.readonly",
            ),
        ],
    ),
    (
        "gmail",
        "Gmail API",
        &[
            (
                "GMAIL_METADATA",
                "https://www.googleapis.com/auth/gmail.metadata",
            ),
            (
                "GMAIL_READONLY",
                "https://www.googleapis.com/auth/gmail.readonly",
            ),
            ("GMAIL_SEND", "https://www.googleapis.com/auth/gmail.send"),
        ],
    ),
    (
        "sheets",
        "Google Sheets API",
        &[
            (
                "DRIVE_READONLY",
                "https://www.googleapis.com/auth/drive.readonly",
            ),
            (
                "SPREADSHEETS",
                "https://www.googleapis.com/auth/spreadsheets",
            ),
            (
                "SPREADSHEETS_READONLY",
                "https://www.googleapis.com/auth/spreadsheets.readonly",
            ),
        ],
    ),
    (
        "youtube",
        "YouTube Data API",
        &[
            ("YOUTUBE", "https://www.googleapis.com/auth/youtube"),
            (
                "YOUTUBE_READONLY",
                "https://www.googleapis.com/auth/youtube.readonly",
            ),
        ],
    ),
];

impl ScopeCatalog {
    /// The catalog compiled into the binary, used when no catalog file is configured.
    pub fn builtin() -> Self {
        let services = BUILTIN
            .iter()
            .map(|(id, label, scopes)| {
                let entry = ServiceEntry {
                    label: (*label).to_string(),
                    scopes: scopes
                        .iter()
                        .map(|(scope, url)| ((*scope).to_string(), (*url).to_string()))
                        .collect(),
                };
                ((*id).to_string(), entry)
            })
            .collect();
        Self { services }
    }

    /// Parse a catalog from TOML:
    ///
    /// ```toml
    /// [services.calendar]
    /// label = "Calendar API"
    /// [services.calendar.scopes]
    /// CALENDAR = "https://www.googleapis.com/auth/calendar"
    /// ```
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| Error::CredentialParse(format!("parsing scope catalog: {e}")))
    }

    /// Read and parse a catalog file.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Io(format!("reading scope catalog {}: {e}", path.display())))?;
        Self::from_toml_str(&contents)
    }

    /// Every scope declared by the requested services, keyed by scope id.
    ///
    /// Services missing from the catalog are skipped; configuration may
    /// reference a service that a rescan has since dropped.
    pub fn resolve(&self, services: &BTreeSet<ServiceId>) -> BTreeMap<ScopeId, String> {
        let mut resolved = BTreeMap::new();
        for service in services {
            let Some(entry) = self.services.get(service) else {
                continue;
            };
            for (scope, url) in &entry.scopes {
                resolved.entry(scope.clone()).or_insert_with(|| url.clone());
            }
        }
        resolved
    }

    /// Translate scope ids into URLs using only the given services' entries.
    ///
    /// Lossy: ids that no requested service declares are dropped, and a URL
    /// reached through two ids is returned once.
    pub fn scopes_to_urls(
        &self,
        scope_ids: &BTreeSet<ScopeId>,
        services: &BTreeSet<ServiceId>,
    ) -> Vec<String> {
        let mut urls: Vec<String> = Vec::new();
        for scope in scope_ids {
            let found = services
                .iter()
                .filter_map(|service| self.services.get(service))
                .find_map(|entry| entry.scopes.get(scope));
            if let Some(url) = found
                && !urls.contains(url)
            {
                urls.push(url.clone());
            }
        }
        urls
    }

    /// Services whose entry declares `scope_id`.
    pub fn services_declaring(&self, scope_id: &str) -> Vec<&str> {
        self.services
            .iter()
            .filter(|(_, entry)| entry.scopes.contains_key(scope_id))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn contains_service(&self, service: &str) -> bool {
        self.services.contains_key(service)
    }

    /// Service id → label, for admin listings.
    pub fn service_names(&self) -> BTreeMap<ServiceId, String> {
        self.services
            .iter()
            .map(|(id, entry)| (id.clone(), entry.label.clone()))
            .collect()
    }

    /// Service id → scope ids, restricted to `services` when non-empty.
    pub fn scope_names(&self, services: &BTreeSet<ServiceId>) -> BTreeMap<ServiceId, Vec<ScopeId>> {
        self.services
            .iter()
            .filter(|(id, _)| services.is_empty() || services.contains(*id))
            .map(|(id, entry)| (id.clone(), entry.scopes.keys().cloned().collect()))
            .collect()
    }
}

/// Shared handle to the current catalog.
///
/// Readers take an `Arc` snapshot and release the lock immediately, so a
/// rescan never blocks behind an in-flight authorization.
pub struct ScopeResolver {
    catalog: RwLock<Arc<ScopeCatalog>>,
    source: Option<PathBuf>,
}

impl ScopeResolver {
    pub fn new(catalog: ScopeCatalog, source: Option<PathBuf>) -> Self {
        Self {
            catalog: RwLock::new(Arc::new(catalog)),
            source,
        }
    }

    /// Build a resolver from the catalog file, or the built-in catalog when
    /// no file is configured.
    pub async fn load(source: Option<PathBuf>) -> Result<Self> {
        let catalog = match &source {
            Some(path) => ScopeCatalog::from_file(path).await?,
            None => ScopeCatalog::builtin(),
        };
        info!(services = catalog.services.len(), "scope catalog loaded");
        Ok(Self::new(catalog, source))
    }

    pub async fn snapshot(&self) -> Arc<ScopeCatalog> {
        self.catalog.read().await.clone()
    }

    pub async fn resolve(&self, services: &BTreeSet<ServiceId>) -> BTreeMap<ScopeId, String> {
        self.snapshot().await.resolve(services)
    }

    pub async fn scopes_to_urls(
        &self,
        scope_ids: &BTreeSet<ScopeId>,
        services: &BTreeSet<ServiceId>,
    ) -> Vec<String> {
        self.snapshot().await.scopes_to_urls(scope_ids, services)
    }

    /// Rebuild the catalog from its source and swap it in.
    ///
    /// On a read or parse error the previous catalog stays active. Returns
    /// the number of services in the new catalog.
    pub async fn rescan(&self) -> Result<usize> {
        let fresh = match &self.source {
            Some(path) => match ScopeCatalog::from_file(path).await {
                Ok(catalog) => catalog,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "scope catalog rescan failed, keeping previous catalog");
                    return Err(e);
                }
            },
            None => ScopeCatalog::builtin(),
        };
        let count = fresh.services.len();
        *self.catalog.write().await = Arc::new(fresh);
        info!(services = count, "scope catalog rescanned");
        Ok(count)
    }
}
