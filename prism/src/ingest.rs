//! Result ingest: callbacks from model services.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;
use crate::store::{RecordStore, StoreError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResults {
    pub result: serde_json::Value,
    /// Every label the model can emit.
    #[serde(default)]
    pub classes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionCallback {
    pub image_hash: Fingerprint,
    pub model_name: String,
    pub results: ModelResults,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Merged,
    /// No record for the fingerprint; the callback was ignored.
    Dropped,
}

pub struct ResultIngest {
    store: Arc<dyn RecordStore>,
}

impl ResultIngest {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Overwrite the model's entry on the image record (last writer wins) and
    /// extend the model's label catalog.
    ///
    /// Callbacks for unknown fingerprints are dropped without error: the
    /// sender is a background worker with no way to act on one.
    pub async fn ingest(&self, callback: PredictionCallback) -> Result<IngestOutcome, StoreError> {
        let PredictionCallback {
            image_hash,
            model_name,
            results,
        } = callback;

        let merged = self
            .store
            .merge_model_result(&image_hash, &model_name, results.result)
            .await?;

        if !merged {
            tracing::warn!(
                fingerprint = %image_hash,
                model = %model_name,
                "Dropping prediction result for unknown image"
            );
            return Ok(IngestOutcome::Dropped);
        }

        self.store
            .add_model_labels(&model_name, &results.classes)
            .await?;

        tracing::debug!(fingerprint = %image_hash, model = %model_name, "Stored prediction result");
        Ok(IngestOutcome::Merged)
    }
}
