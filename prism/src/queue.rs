//! Job queue contract.
//!
//! Model services enqueue their own jobs; this crate only asks which jobs are
//! still queued or running. Job identity is the pair (fingerprint, model), so
//! it can be recomputed anywhere without an allocator.

use std::fmt;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::fingerprint::{FINGERPRINT_HEX_LEN, Fingerprint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
        }
    }

    /// States in which a job counts as pending.
    pub fn active() -> [JobState; 2] {
        [Self::Queued, Self::Running]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub fingerprint: Fingerprint,
    pub model: String,
}

impl JobKey {
    pub fn new(fingerprint: Fingerprint, model: impl Into<String>) -> Self {
        Self {
            fingerprint,
            model: model.into(),
        }
    }

    /// Queue-side job id: the fingerprint immediately followed by the model.
    pub fn job_id(&self) -> String {
        format!("{}{}", self.fingerprint, self.model)
    }

    /// Split a queue-side job id at the fixed fingerprint width.
    ///
    /// Returns None for ids that were not produced by [`JobKey::job_id`].
    pub fn from_job_id(id: &str) -> Option<Self> {
        if id.len() <= FINGERPRINT_HEX_LEN || !id.is_char_boundary(FINGERPRINT_HEX_LEN) {
            return None;
        }
        let (hash, model) = id.split_at(FINGERPRINT_HEX_LEN);
        let fingerprint = Fingerprint::new(hash);
        fingerprint
            .is_well_formed()
            .then(|| Self::new(fingerprint, model))
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.fingerprint, self.model)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Job queue request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Job queue {url} responded with status {status}")]
    Status { url: String, status: u16 },
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn list_jobs(&self, state: JobState) -> Result<Vec<JobKey>, QueueError>;
}

/// Process-local queue. Model-side transitions are driven explicitly.
#[derive(Debug, Default)]
pub struct MemoryJobQueue {
    jobs: DashMap<JobKey, JobState>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, key: JobKey) {
        self.jobs.insert(key, JobState::Queued);
    }

    pub fn start(&self, key: &JobKey) {
        if let Some(mut state) = self.jobs.get_mut(key) {
            *state = JobState::Running;
        }
    }

    pub fn finish(&self, key: &JobKey) {
        self.jobs.remove(key);
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn list_jobs(&self, state: JobState) -> Result<Vec<JobKey>, QueueError> {
        Ok(self
            .jobs
            .iter()
            .filter(|e| *e.value() == state)
            .map(|e| e.key().clone())
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct JobListResponse {
    job_ids: Vec<String>,
}

/// Queue backend reached over HTTP: `GET {base}/jobs?state=<state>` returning
/// `{"job_ids": [...]}`.
pub struct HttpJobQueue {
    base_url: String,
    client: reqwest::Client,
}

impl HttpJobQueue {
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[async_trait]
impl JobQueue for HttpJobQueue {
    async fn list_jobs(&self, state: JobState) -> Result<Vec<JobKey>, QueueError> {
        let url = format!("{}/jobs", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("state", state.as_str())])
            .send()
            .await
            .map_err(|source| QueueError::Request {
                url: url.clone(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(QueueError::Status {
                url,
                status: response.status().as_u16(),
            });
        }

        let body: JobListResponse = response
            .json()
            .await
            .map_err(|source| QueueError::Request { url, source })?;

        Ok(body
            .job_ids
            .iter()
            .filter_map(|id| {
                let key = JobKey::from_job_id(id);
                if key.is_none() {
                    tracing::debug!(job_id = %id, "Ignoring foreign job id");
                }
                key
            })
            .collect())
    }
}
