//! Record store contract and the in-memory implementation.
//!
//! The document store is an external collaborator. Everything the core needs
//! from it is expressed by [`RecordStore`]; each call is assumed atomic on its
//! own and the core does no locking across calls.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;
use crate::record::ImageRecord;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Record store unavailable: {0}")]
    Unavailable(String),
}

/// Model name → labels that must appear in that model's output.
///
/// An empty label list only requires the model to have produced a result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchFilter(pub BTreeMap<String, Vec<String>>);

impl SearchFilter {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, record: &ImageRecord) -> bool {
        self.0.iter().all(|(model, labels)| match record.models.get(model) {
            Some(output) => labels.is_empty() || labels.iter().any(|l| mentions(output, l)),
            None => false,
        })
    }
}

fn mentions(value: &serde_json::Value, label: &str) -> bool {
    match value {
        serde_json::Value::String(s) => s == label,
        serde_json::Value::Array(items) => items.iter().any(|v| mentions(v, label)),
        serde_json::Value::Object(map) => {
            map.contains_key(label) || map.values().any(|v| mentions(v, label))
        }
        _ => false,
    }
}

/// Records visible to one user, narrowed by filter and free text.
#[derive(Debug, Clone)]
pub struct RecordQuery<'a> {
    pub user: &'a str,
    pub filter: &'a SearchFilter,
    pub text: &'a str,
}

impl RecordQuery<'_> {
    pub fn matches(&self, record: &ImageRecord) -> bool {
        if !record.users.contains(self.user) || !self.filter.matches(record) {
            return false;
        }
        if self.text.is_empty() {
            return true;
        }
        let needle = self.text.to_lowercase();
        record.hash_md5.as_str().contains(&needle)
            || record
                .file_names
                .iter()
                .any(|name| name.to_lowercase().contains(&needle))
    }
}

/// Which slice of the matching hashes a query should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Paging {
    /// Only the total count.
    CountOnly,
    /// One page, numbered from 1.
    Page { number: u32, size: u32 },
    /// Every matching hash.
    All,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    pub num_images: usize,
    pub hashes: Vec<Fingerprint>,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_record(&self, fingerprint: &Fingerprint)
    -> Result<Option<ImageRecord>, StoreError>;

    /// Insert `record` unless one already exists for its fingerprint.
    /// Returns true if this call created it.
    async fn put_record(&self, record: ImageRecord) -> Result<bool, StoreError>;

    /// Idempotent set insertion. No-op if the record does not exist.
    async fn add_user(&self, fingerprint: &Fingerprint, user: &str) -> Result<(), StoreError>;

    /// Idempotent set insertion. No-op if the record does not exist.
    async fn add_filename(
        &self,
        fingerprint: &Fingerprint,
        filename: &str,
    ) -> Result<(), StoreError>;

    /// Overwrite one model's output. Returns false if there is no record.
    async fn merge_model_result(
        &self,
        fingerprint: &Fingerprint,
        model: &str,
        value: serde_json::Value,
    ) -> Result<bool, StoreError>;

    async fn query(
        &self,
        query: &RecordQuery<'_>,
        paging: Paging,
    ) -> Result<QueryResult, StoreError>;

    /// Union `labels` into the catalog entry for `model`.
    async fn add_model_labels(&self, model: &str, labels: &[String]) -> Result<(), StoreError>;

    async fn list_all_models(&self) -> Result<BTreeMap<String, BTreeSet<String>>, StoreError>;
}

/// Process-local record store. Used for development and tests.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: DashMap<Fingerprint, ImageRecord>,
    catalog: DashMap<String, BTreeSet<String>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get_record(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<ImageRecord>, StoreError> {
        Ok(self.records.get(fingerprint).map(|r| r.clone()))
    }

    async fn put_record(&self, record: ImageRecord) -> Result<bool, StoreError> {
        let mut created = false;
        self.records
            .entry(record.hash_md5.clone())
            .or_insert_with(|| {
                created = true;
                record
            });
        Ok(created)
    }

    async fn add_user(&self, fingerprint: &Fingerprint, user: &str) -> Result<(), StoreError> {
        if let Some(mut record) = self.records.get_mut(fingerprint) {
            record.users.insert(user.to_string());
        }
        Ok(())
    }

    async fn add_filename(
        &self,
        fingerprint: &Fingerprint,
        filename: &str,
    ) -> Result<(), StoreError> {
        if let Some(mut record) = self.records.get_mut(fingerprint) {
            record.file_names.insert(filename.to_string());
        }
        Ok(())
    }

    async fn merge_model_result(
        &self,
        fingerprint: &Fingerprint,
        model: &str,
        value: serde_json::Value,
    ) -> Result<bool, StoreError> {
        match self.records.get_mut(fingerprint) {
            Some(mut record) => {
                record.models.insert(model.to_string(), value);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn query(
        &self,
        query: &RecordQuery<'_>,
        paging: Paging,
    ) -> Result<QueryResult, StoreError> {
        let mut hashes: Vec<Fingerprint> = self
            .records
            .iter()
            .filter(|entry| query.matches(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();
        hashes.sort();

        let num_images = hashes.len();
        let hashes = match paging {
            Paging::CountOnly => Vec::new(),
            Paging::All => hashes,
            Paging::Page { number, size } => {
                let start = (number.saturating_sub(1) as usize).saturating_mul(size as usize);
                hashes.into_iter().skip(start).take(size as usize).collect()
            }
        };

        Ok(QueryResult { num_images, hashes })
    }

    async fn add_model_labels(&self, model: &str, labels: &[String]) -> Result<(), StoreError> {
        self.catalog
            .entry(model.to_string())
            .or_default()
            .extend(labels.iter().cloned());
        Ok(())
    }

    async fn list_all_models(&self) -> Result<BTreeMap<String, BTreeSet<String>>, StoreError> {
        Ok(self
            .catalog
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }
}
