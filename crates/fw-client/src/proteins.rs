//! Project metadata catalog.
//!
//! Maps project numbers to [`Protein`] records (credit, frames, bonus
//! factor, deadlines) consumed by the metrics calculator. The catalog is
//! seeded from cached JSON and refreshable from a summary endpoint.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use thiserror::Error;

use fw_core::metrics::Protein;

/// Default request timeout for catalog refreshes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Catalog errors.
#[derive(Debug, Error)]
pub enum ProteinError {
    /// Failed to build the HTTP client.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    /// HTTP request failed.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Failed to parse catalog JSON.
    #[error("invalid catalog data: {0}")]
    InvalidData(#[from] serde_json::Error),
}

/// In-memory project metadata, shared across retrieval tasks.
#[derive(Debug, Default)]
pub struct ProteinCatalog {
    proteins: RwLock<HashMap<u32, Protein>>,
}

impl ProteinCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads proteins from a JSON array, replacing existing entries with
    /// the same project number. Returns how many were loaded.
    pub fn load_json(&self, json: &str) -> Result<usize, ProteinError> {
        let proteins: Vec<Protein> = serde_json::from_str(json)?;
        let count = proteins.len();
        let mut map = write(&self.proteins);
        for protein in proteins {
            map.insert(protein.project, protein);
        }
        Ok(count)
    }

    /// Inserts or replaces one protein.
    pub fn insert(&self, protein: Protein) {
        write(&self.proteins).insert(protein.project, protein);
    }

    /// The protein for a project.
    ///
    /// Unknown projects resolve to a defined default (100 frames, zero
    /// credit, no bonus) so metrics stay total.
    #[must_use]
    pub fn get(&self, project: u32) -> Protein {
        read(&self.proteins).get(&project).cloned().unwrap_or(Protein {
            project,
            ..Protein::default()
        })
    }

    /// Whether a project is actually known, as opposed to defaulted.
    #[must_use]
    pub fn contains(&self, project: u32) -> bool {
        read(&self.proteins).contains_key(&project)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        read(&self.proteins).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        read(&self.proteins).is_empty()
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Fetches project summaries over HTTP.
///
/// # Thread Safety
///
/// Safe to clone and share; clones reuse the underlying connection pool.
#[derive(Debug, Clone)]
pub struct ProteinService {
    http: reqwest::Client,
    url: String,
}

impl ProteinService {
    /// Creates a service against a summary endpoint.
    pub fn new(url: impl Into<String>) -> Result<Self, ProteinError> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(ProteinError::ClientBuild)?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    /// Downloads the summary and merges it into the catalog.
    ///
    /// Returns how many proteins were loaded. Failures leave the catalog
    /// unchanged.
    pub async fn refresh(&self, catalog: &ProteinCatalog) -> Result<usize, ProteinError> {
        let body = self
            .http
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let count = catalog.load_json(&body)?;
        tracing::debug!(count, url = %self.url, "protein catalog refreshed");
        Ok(count)
    }
}
