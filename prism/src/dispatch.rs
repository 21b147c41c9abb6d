//! Dispatch engine: fan one upload out to every requested model.
//!
//! Flow per upload:
//! 1. Validate the model set against the registry (before any side effect)
//! 2. Identify or create the image record
//! 3. Commit the received payload under its fingerprint-derived name
//! 4. Submit one prediction per model, concurrently
//!
//! Uploads arrive already fingerprinted and parked under a temporary name
//! (see [`crate::staging`]). A rejected batch drops them, which removes
//! the temporary files.
//!
//! Per-model submission failures are logged and never abort the siblings.
//! Callers learn completion through the status aggregator, not here.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;

use crate::client::{ModelClientError, PredictRequest};
use crate::content::ContentStore;
use crate::fingerprint::Fingerprint;
use crate::registry::ModelRegistry;
use crate::staging::{Staging, StagingError, Upload};
use crate::store::{RecordStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("You must specify models to process images with")]
    NoModels,
    #[error("Invalid Models Specified: {}", .0.join(", "))]
    UnknownModels(Vec<String>),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Staging(#[from] StagingError),
}

impl DispatchError {
    /// Rejected input, as opposed to an unavailable dependency.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::NoModels | Self::UnknownModels(_))
    }
}

/// Result of submitting one (image, model) pair.
#[derive(Debug)]
pub struct Submission {
    pub model: String,
    pub result: Result<(), SubmissionError>,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("model is no longer registered")]
    Deregistered,
    #[error(transparent)]
    Model(#[from] ModelClientError),
}

pub struct Dispatcher {
    registry: Arc<ModelRegistry>,
    content: ContentStore,
    staging: Staging,
}

impl Dispatcher {
    pub fn new(registry: Arc<ModelRegistry>, store: Arc<dyn RecordStore>, staging: Staging) -> Self {
        Self {
            registry,
            content: ContentStore::new(store),
            staging,
        }
    }

    pub fn staging(&self) -> &Staging {
        &self.staging
    }

    /// Dispatch a single upload. Returns its fingerprint.
    pub async fn dispatch(
        &self,
        upload: Upload,
        models: &BTreeSet<String>,
        uploader: &str,
    ) -> Result<Fingerprint, DispatchError> {
        self.validate(models)?;
        let (fingerprint, _) = self.dispatch_one(upload, models, uploader).await?;
        Ok(fingerprint)
    }

    /// Dispatch several uploads against one model set, validated once up
    /// front. Fingerprints are returned in upload order.
    pub async fn dispatch_batch(
        &self,
        uploads: Vec<Upload>,
        models: &BTreeSet<String>,
        uploader: &str,
    ) -> Result<Vec<Fingerprint>, DispatchError> {
        self.validate(models)?;

        let mut fingerprints = Vec::with_capacity(uploads.len());
        for upload in uploads {
            let (fingerprint, _) = self.dispatch_one(upload, models, uploader).await?;
            fingerprints.push(fingerprint);
        }
        Ok(fingerprints)
    }

    fn validate(&self, models: &BTreeSet<String>) -> Result<(), DispatchError> {
        if models.is_empty() {
            return Err(DispatchError::NoModels);
        }
        self.registry
            .resolve(models)
            .map(|_| ())
            .map_err(DispatchError::UnknownModels)
    }

    async fn dispatch_one(
        &self,
        upload: Upload,
        models: &BTreeSet<String>,
        uploader: &str,
    ) -> Result<(Fingerprint, Vec<Submission>), DispatchError> {
        let identified = self
            .content
            .identify_or_create(upload.fingerprint(), upload.filename(), uploader)
            .await?;
        let fingerprint = identified.fingerprint;

        let staged_name = self.staging.commit(upload).await?;

        let request = PredictRequest {
            image_md5_hash: fingerprint.clone(),
            image_file_name: staged_name,
        };
        let submissions = self.fan_out(&request, models).await;

        Ok((fingerprint, submissions))
    }

    async fn fan_out(&self, request: &PredictRequest, models: &BTreeSet<String>) -> Vec<Submission> {
        let client = self.registry.client();

        let submissions = models.iter().map(|model| async move {
            // Resolved again here: the registry may have changed since
            // validation, and requests go to the current endpoint.
            let result = match self.registry.lookup(model) {
                Some(endpoint) => {
                    tracing::debug!(
                        fingerprint = %request.image_md5_hash,
                        model = %model,
                        "Creating prediction request"
                    );
                    client
                        .predict(&endpoint, request)
                        .await
                        .map_err(SubmissionError::from)
                }
                None => Err(SubmissionError::Deregistered),
            };

            if let Err(ref e) = result {
                tracing::error!(
                    fingerprint = %request.image_md5_hash,
                    model = %model,
                    error = %e,
                    "Failed to create prediction request"
                );
            }

            Submission {
                model: model.clone(),
                result,
            }
        });

        join_all(submissions).await
    }
}
