//! ---
//! rp_section: "02-persistence"
//! rp_subsection: "module"
//! rp_type: "source"
//! rp_scope: "code"
//! rp_description: "In-process document store used for local runs and tests."
//! rp_version: "v0.0.0-prealpha"
//! rp_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::document::{normalize_key, ClusterDocument};
use crate::error::{StoreError, StoreResult};
use crate::store::DocumentStore;

/// Map-backed [`DocumentStore`]. Each call takes the lock once, so the token
/// check and the write are atomic.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: Mutex<HashMap<String, ClusterDocument>>,
}

fn next_token() -> String {
    Uuid::new_v4().to_string()
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store holding `documents`, as if each had been created.
    pub fn with_documents(documents: Vec<ClusterDocument>) -> StoreResult<Self> {
        let store = Self::new();
        for document in documents {
            store.insert(document)?;
        }
        Ok(store)
    }

    /// Build a store from a JSON array of documents on disk.
    pub fn from_seed_file(path: &Path) -> StoreResult<Self> {
        let documents = load_seed_file(path)?;
        let count = documents.len();
        let store = Self::with_documents(documents)?;
        info!(seed = %path.display(), documents = count, "seeded in-memory store");
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.documents.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.lock().is_empty()
    }

    fn insert(&self, mut document: ClusterDocument) -> StoreResult<ClusterDocument> {
        document.key = normalize_key(&document.key);
        if document.key.is_empty() {
            return Err(StoreError::Backend("document key must not be empty".into()));
        }
        let mut documents = self.documents.lock();
        if documents.contains_key(&document.key) {
            return Err(StoreError::AlreadyExists(document.key));
        }
        if document.id.is_empty() {
            document.id = Uuid::new_v4().to_string();
        }
        document.concurrency_token = next_token();
        documents.insert(document.key.clone(), document.clone());
        Ok(document)
    }
}

/// Parse a seed file: a JSON array of [`ClusterDocument`]s.
pub fn load_seed_file(path: &Path) -> StoreResult<Vec<ClusterDocument>> {
    let contents = fs::read_to_string(path)?;
    let documents: Vec<ClusterDocument> = serde_json::from_str(&contents)?;
    Ok(documents)
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn create(&self, document: ClusterDocument) -> StoreResult<ClusterDocument> {
        let created = self.insert(document)?;
        debug!(key = %created.key, "document created");
        Ok(created)
    }

    async fn get(&self, key: &str) -> StoreResult<ClusterDocument> {
        let key = normalize_key(key);
        self.documents
            .lock()
            .get(&key)
            .cloned()
            .ok_or(StoreError::NotFound(key))
    }

    async fn replace(&self, mut document: ClusterDocument) -> StoreResult<ClusterDocument> {
        document.key = normalize_key(&document.key);
        let mut documents = self.documents.lock();
        let current = documents
            .get(&document.key)
            .ok_or_else(|| StoreError::NotFound(document.key.clone()))?;
        if current.concurrency_token != document.concurrency_token {
            return Err(StoreError::VersionConflict { key: document.key });
        }
        document.id = current.id.clone();
        document.concurrency_token = next_token();
        documents.insert(document.key.clone(), document.clone());
        Ok(document)
    }

    async fn delete(&self, document: &ClusterDocument) -> StoreResult<()> {
        let key = normalize_key(&document.key);
        let mut documents = self.documents.lock();
        let current = documents
            .get(&key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        if current.concurrency_token != document.concurrency_token {
            return Err(StoreError::VersionConflict { key });
        }
        documents.remove(&key);
        Ok(())
    }

    async fn query_eligible(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<ClusterDocument>> {
        let documents = self.documents.lock();
        let mut eligible: Vec<ClusterDocument> = documents
            .values()
            .filter(|document| document.is_eligible_at(now))
            .cloned()
            .collect();
        eligible.sort_by(|a, b| a.key.cmp(&b.key));
        eligible.truncate(limit);
        Ok(eligible)
    }

    async fn list(&self) -> StoreResult<Vec<ClusterDocument>> {
        let mut all: Vec<ClusterDocument> = self.documents.lock().values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(all)
    }
}
