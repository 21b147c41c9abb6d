//! Persisted per-image state.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;

/// Everything known about one distinct image content.
///
/// Created on first observation of a fingerprint. Afterwards only the
/// filename/user sets grow and model entries are overwritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub hash_md5: Fingerprint,
    #[serde(default)]
    pub file_names: BTreeSet<String>,
    #[serde(default)]
    pub users: BTreeSet<String>,
    /// Latest output per model name.
    #[serde(default)]
    pub models: BTreeMap<String, serde_json::Value>,
}

impl ImageRecord {
    /// A fresh record seeded with the upload that first produced it.
    pub fn seeded(hash_md5: Fingerprint, file_name: &str, user: &str) -> Self {
        Self {
            hash_md5,
            file_names: BTreeSet::from([file_name.to_string()]),
            users: BTreeSet::from([user.to_string()]),
            models: BTreeMap::new(),
        }
    }

    pub fn has_result_for(&self, model: &str) -> bool {
        self.models.contains_key(model)
    }
}
