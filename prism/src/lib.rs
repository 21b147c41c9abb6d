//! prism: fan-out orchestration of image predictions across registered
//! model services.

mod version;

pub mod auth;
pub mod client;
pub mod config;
pub mod content;
pub mod dispatch;
pub mod fingerprint;
pub mod health;
pub mod ingest;
pub mod queue;
pub mod record;
pub mod registry;
pub mod search;
pub mod service;
pub mod staging;
pub mod status;
pub mod store;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{ClientConfig, HttpModelClient, ModelClient, ModelClientError};
pub use config::{Config, HubConfig};
pub use dispatch::{DispatchError, Dispatcher};
pub use fingerprint::Fingerprint;
pub use health::MonitorConfig;
pub use ingest::{IngestOutcome, PredictionCallback, ResultIngest};
pub use queue::{HttpJobQueue, JobKey, JobQueue, JobState, MemoryJobQueue};
pub use record::ImageRecord;
pub use registry::{ModelRegistry, RegisterOutcome, RegistryError};
pub use service::{HealthSnapshot, PredictionService};
pub use staging::{IncomingUpload, Staging, Upload};
pub use status::{ImageStatus, StatusAggregator};
pub use store::{MemoryRecordStore, RecordStore, SearchFilter, StoreError};
pub use version::{PRISM_VERSION, VersionInfo};
