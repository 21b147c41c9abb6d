//! Outbound calls to model services.
//!
//! Implements the model service protocol:
//! - `GET {endpoint}/status` liveness probe
//! - `POST {endpoint}/predict?image_md5_hash=..&image_file_name=..` submission
//! - Any non-2xx response is a failure; there are no retries at this layer

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::fingerprint::Fingerprint;
use crate::version::PRISM_VERSION;

#[derive(Debug, thiserror::Error)]
pub enum ModelClientError {
    #[error("Failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),
    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} responded with status {status}")]
    Status { url: String, status: u16 },
}

/// Query parameters of a prediction submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PredictRequest {
    pub image_md5_hash: Fingerprint,
    /// Name of the staged payload, derivable from the fingerprint.
    pub image_file_name: String,
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Liveness probe. Connection errors, timeouts and non-2xx all fail.
    async fn probe(&self, endpoint: &str) -> Result<(), ModelClientError>;

    /// Ask the model to enqueue a prediction for a staged image.
    async fn predict(&self, endpoint: &str, request: &PredictRequest)
    -> Result<(), ModelClientError>;
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub probe_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub struct HttpModelClient {
    config: ClientConfig,
    client: reqwest::Client,
}

impl HttpModelClient {
    pub fn new(config: ClientConfig) -> Result<Self, ModelClientError> {
        let mut headers = reqwest::header::HeaderMap::new();

        let user_agent = format!("prism/{}", PRISM_VERSION);
        if let Ok(value) = reqwest::header::HeaderValue::from_str(&user_agent) {
            headers.insert(reqwest::header::USER_AGENT, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()
            .map_err(ModelClientError::Build)?;

        Ok(Self { config, client })
    }
}

fn join(endpoint: &str, path: &str) -> String {
    format!("{}/{}", endpoint.trim_end_matches('/'), path)
}

fn check(
    url: String,
    result: Result<reqwest::Response, reqwest::Error>,
) -> Result<(), ModelClientError> {
    let response = result.map_err(|source| ModelClientError::Request {
        url: url.clone(),
        source,
    })?;
    if response.status().is_success() {
        Ok(())
    } else {
        Err(ModelClientError::Status {
            url,
            status: response.status().as_u16(),
        })
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn probe(&self, endpoint: &str) -> Result<(), ModelClientError> {
        let url = join(endpoint, "status");
        let result = self
            .client
            .get(&url)
            .timeout(self.config.probe_timeout)
            .send()
            .await;
        check(url, result)
    }

    async fn predict(
        &self,
        endpoint: &str,
        request: &PredictRequest,
    ) -> Result<(), ModelClientError> {
        let url = join(endpoint, "predict");
        let result = self.client.post(&url).query(request).send().await;
        check(url, result)
    }
}
