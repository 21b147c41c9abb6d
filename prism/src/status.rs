//! Status aggregation across the job queue and the record store.
//!
//! The queue is always read before any record. A job that finishes between
//! the two reads is therefore reported as pending, never as a success that
//! is missing its result.

use std::collections::HashSet;
use std::sync::Arc;

use crate::fingerprint::Fingerprint;
use crate::queue::{JobQueue, JobState, QueueError};
use crate::record::ImageRecord;
use crate::store::{RecordStore, StoreError};

pub const PENDING_DETAIL: &str =
    "Image has pending predictions. Check back later for all model results.";
pub const UNKNOWN_DETAIL: &str = "Unknown md5 hash specified.";

#[derive(Debug, Clone, PartialEq)]
pub enum ImageStatus {
    /// At least one job for the image is queued or running. Carries whatever
    /// results are already recorded.
    Pending {
        fingerprint: Fingerprint,
        record: Option<ImageRecord>,
    },
    Success(ImageRecord),
    /// No job and no record: never seen, or not a valid fingerprint.
    Unknown(Fingerprint),
}

impl ImageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending { .. } => "pending",
            Self::Success(_) => "success",
            Self::Unknown(_) => "failure",
        }
    }

    pub fn to_response(&self) -> serde_json::Value {
        let mut response = match self {
            Self::Pending {
                record: Some(record),
                ..
            }
            | Self::Success(record) => serde_json::to_value(record).unwrap_or_default(),
            Self::Pending {
                fingerprint,
                record: None,
            }
            | Self::Unknown(fingerprint) => serde_json::json!({ "hash_md5": fingerprint }),
        };

        response["status"] = serde_json::Value::from(self.as_str());
        match self {
            Self::Pending { .. } => response["detail"] = PENDING_DETAIL.into(),
            Self::Unknown(_) => response["detail"] = UNKNOWN_DETAIL.into(),
            Self::Success(_) => {}
        }
        response
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct StatusAggregator {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn RecordStore>,
}

impl StatusAggregator {
    pub fn new(queue: Arc<dyn JobQueue>, store: Arc<dyn RecordStore>) -> Self {
        Self { queue, store }
    }

    /// One status per input, in input order. Duplicates are answered twice.
    pub async fn status(
        &self,
        fingerprints: &[Fingerprint],
    ) -> Result<Vec<ImageStatus>, StatusError> {
        if fingerprints.is_empty() {
            return Ok(Vec::new());
        }

        let active = self.active_fingerprints().await?;

        let mut results = Vec::with_capacity(fingerprints.len());
        for fingerprint in fingerprints {
            let record = self.store.get_record(fingerprint).await?;
            // Pending wins even when other models already reported results.
            let status = if active.contains(fingerprint) {
                ImageStatus::Pending {
                    fingerprint: fingerprint.clone(),
                    record,
                }
            } else {
                match record {
                    Some(record) => ImageStatus::Success(record),
                    None => ImageStatus::Unknown(fingerprint.clone()),
                }
            };
            results.push(status);
        }
        Ok(results)
    }

    /// Fingerprints owning at least one queued or running job, whichever
    /// model the job belongs to.
    async fn active_fingerprints(&self) -> Result<HashSet<Fingerprint>, QueueError> {
        let mut active = HashSet::new();
        for state in JobState::active() {
            active.extend(
                self.queue
                    .list_jobs(state)
                    .await?
                    .into_iter()
                    .map(|key| key.fingerprint),
            );
        }
        Ok(active)
    }
}
