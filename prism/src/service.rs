//! PredictionService: transport-agnostic front of the orchestration core.
//!
//! This service owns:
//! - The model registry and its health monitors
//! - Dispatch, status, ingest and search over one shared record store
//! - Caller credentials
//! - Shutdown coordination (bidirectional)
//!
//! Transports authenticate callers through [`PredictionService::credentials`]
//! and delegate everything else here.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::watch;

use crate::auth::Credentials;
use crate::client::ModelClient;
use crate::config::HubConfig;
use crate::dispatch::{DispatchError, Dispatcher};
use crate::fingerprint::Fingerprint;
use crate::health::MonitorConfig;
use crate::ingest::{IngestOutcome, PredictionCallback, ResultIngest};
use crate::queue::JobQueue;
use crate::registry::{ModelRegistry, RegisterOutcome, RegistryError};
use crate::search::{Search, SearchError, SearchRequest, SearchResponse};
use crate::staging::{Staging, Upload};
use crate::status::{ImageStatus, StatusAggregator, StatusError};
use crate::store::{RecordStore, SearchFilter, StoreError};
use crate::version::VersionInfo;

/// Snapshot of service health for transports to query.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub registered_models: usize,
    pub active_monitors: usize,
    pub draining: bool,
    pub version: VersionInfo,
}

pub struct PredictionService {
    registry: Arc<ModelRegistry>,
    store: Arc<dyn RecordStore>,
    dispatcher: Dispatcher,
    status: StatusAggregator,
    ingest: ResultIngest,
    search: Search,
    credentials: Credentials,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    version: VersionInfo,
}

impl PredictionService {
    pub fn new(
        client: Arc<dyn ModelClient>,
        store: Arc<dyn RecordStore>,
        queue: Arc<dyn JobQueue>,
        monitor: MonitorConfig,
        hub: &HubConfig,
    ) -> Self {
        let registry = ModelRegistry::new(client, monitor);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            dispatcher: Dispatcher::new(
                Arc::clone(&registry),
                Arc::clone(&store),
                Staging::new(hub.staging_dir.clone()),
            ),
            status: StatusAggregator::new(queue, Arc::clone(&store)),
            ingest: ResultIngest::new(Arc::clone(&store)),
            search: Search::new(Arc::clone(&store), hub.page_size),
            credentials: Credentials::new(
                hub.service_keys.iter().cloned(),
                hub.user_tokens.iter().cloned(),
            ),
            registry,
            store,
            shutdown_tx,
            shutdown_rx,
            version: VersionInfo::new(),
        }
    }

    pub fn with_version(mut self, version: VersionInfo) -> Self {
        self.version = version;
        self
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            registered_models: self.registry.len(),
            active_monitors: self.registry.active_monitors(),
            draining: self.registry.is_draining(),
            version: self.version.clone(),
        }
    }

    pub async fn register_model(
        &self,
        name: &str,
        endpoint: &str,
    ) -> Result<RegisterOutcome, RegistryError> {
        self.registry.register(name, endpoint).await
    }

    pub fn list_models(&self) -> BTreeSet<String> {
        self.registry.list_names()
    }

    /// Every model ever reported by a callback, with its label catalog.
    pub async fn all_models(&self) -> Result<BTreeMap<String, BTreeSet<String>>, StoreError> {
        self.store.list_all_models().await
    }

    /// Where transports receive upload bodies before calling [`Self::predict`].
    pub fn staging(&self) -> &Staging {
        self.dispatcher.staging()
    }

    pub async fn predict(
        &self,
        uploads: Vec<Upload>,
        models: &BTreeSet<String>,
        uploader: &str,
    ) -> Result<Vec<Fingerprint>, DispatchError> {
        self.dispatcher.dispatch_batch(uploads, models, uploader).await
    }

    pub async fn results(&self, fingerprints: &[Fingerprint]) -> Result<Vec<ImageStatus>, StatusError> {
        self.status.status(fingerprints).await
    }

    pub async fn ingest(&self, callback: PredictionCallback) -> Result<IngestOutcome, StoreError> {
        self.ingest.ingest(callback).await
    }

    pub async fn search(
        &self,
        uploader: &str,
        request: &SearchRequest,
    ) -> Result<SearchResponse, SearchError> {
        self.search.search(uploader, request).await
    }

    pub async fn search_download(
        &self,
        uploader: &str,
        search_string: &str,
        filter: &SearchFilter,
    ) -> Result<Vec<Fingerprint>, SearchError> {
        self.search.search_all(uploader, search_string, filter).await
    }

    /// Stop accepting registrations and wait for every health monitor to
    /// exit.
    pub async fn shutdown(&self) {
        self.registry.drain().await;
    }

    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }
}
