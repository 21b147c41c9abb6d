//! Model registry: the live mapping from model name to endpoint.
//!
//! The registry owns one health monitor task per registration and the drain
//! signal that stops them. Mutations are serialized per name by the DashMap
//! shard lock; names on different shards never contend.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::client::{ModelClient, ModelClientError};
use crate::health::{MonitorConfig, run_monitor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered,
    AlreadyPresent,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Server is shutting down. Unable to complete new model registration.")]
    Draining,
    #[error("Unable to establish successful connection to model {name}: {source}")]
    Unreachable {
        name: String,
        #[source]
        source: ModelClientError,
    },
}

struct Registration {
    endpoint: String,
    /// Distinguishes this registration from earlier ones under the same name.
    generation: u64,
    /// Child of the drain token; cancelled on explicit deregistration.
    cancel: CancellationToken,
}

pub struct ModelRegistry {
    models: DashMap<String, Registration>,
    client: Arc<dyn ModelClient>,
    monitor: MonitorConfig,
    drain: CancellationToken,
    monitors: TaskTracker,
    generations: AtomicU64,
}

impl ModelRegistry {
    pub fn new(client: Arc<dyn ModelClient>, monitor: MonitorConfig) -> Arc<Self> {
        Arc::new(Self {
            models: DashMap::new(),
            client,
            monitor,
            drain: CancellationToken::new(),
            monitors: TaskTracker::new(),
            generations: AtomicU64::new(0),
        })
    }

    pub(crate) fn client(&self) -> &Arc<dyn ModelClient> {
        &self.client
    }

    pub(crate) fn monitor_config(&self) -> &MonitorConfig {
        &self.monitor
    }

    /// Register `name` at `endpoint` and start its health monitor.
    ///
    /// The endpoint must answer a liveness probe first. Registering a name
    /// that is already live is a successful no-op and keeps the old endpoint.
    pub async fn register(
        self: &Arc<Self>,
        name: &str,
        endpoint: &str,
    ) -> Result<RegisterOutcome, RegistryError> {
        if self.is_draining() {
            return Err(RegistryError::Draining);
        }
        if self.models.contains_key(name) {
            return Ok(RegisterOutcome::AlreadyPresent);
        }

        self.client
            .probe(endpoint)
            .await
            .map_err(|source| RegistryError::Unreachable {
                name: name.to_string(),
                source,
            })?;

        let (generation, cancel) = match self.models.entry(name.to_string()) {
            Entry::Occupied(_) => return Ok(RegisterOutcome::AlreadyPresent),
            Entry::Vacant(slot) => {
                // Checked under the shard lock so a concurrent drain either
                // sees this entry or this call sees the drain.
                if self.is_draining() {
                    return Err(RegistryError::Draining);
                }
                let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
                let cancel = self.drain.child_token();
                slot.insert(Registration {
                    endpoint: endpoint.to_string(),
                    generation,
                    cancel: cancel.clone(),
                });
                (generation, cancel)
            }
        };

        self.monitors.spawn(run_monitor(
            Arc::clone(self),
            name.to_string(),
            endpoint.to_string(),
            generation,
            cancel,
        ));

        tracing::info!(model = %name, endpoint = %endpoint, generation, "Model registered");
        Ok(RegisterOutcome::Registered)
    }

    pub fn lookup(&self, name: &str) -> Option<String> {
        self.models.get(name).map(|r| r.endpoint.clone())
    }

    /// Resolve every name to its endpoint, or return the names that are not
    /// registered.
    pub fn resolve<'a, I>(&self, names: I) -> Result<Vec<(String, String)>, Vec<String>>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut resolved = Vec::new();
        let mut missing = Vec::new();
        for name in names {
            match self.lookup(name) {
                Some(endpoint) => resolved.push((name.clone(), endpoint)),
                None => missing.push(name.clone()),
            }
        }
        if missing.is_empty() {
            Ok(resolved)
        } else {
            Err(missing)
        }
    }

    /// Remove `name` and stop its monitor.
    pub fn deregister(&self, name: &str) -> bool {
        match self.models.remove(name) {
            Some((_, registration)) => {
                registration.cancel.cancel();
                tracing::info!(model = %name, "Model deregistered");
                true
            }
            None => false,
        }
    }

    /// Remove `name` only if it is still the registration with `generation`.
    ///
    /// A monitor from an earlier lifetime must never evict a newer one.
    pub(crate) fn evict(&self, name: &str, generation: u64) -> bool {
        self.models
            .remove_if(name, |_, r| r.generation == generation)
            .is_some()
    }

    pub fn list_names(&self) -> BTreeSet<String> {
        self.models.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn generation(&self, name: &str) -> Option<u64> {
        self.models.get(name).map(|r| r.generation)
    }

    /// Number of monitor tasks that have not yet exited.
    pub fn active_monitors(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_draining(&self) -> bool {
        self.drain.is_cancelled()
    }

    /// Refuse new registrations, wake every monitor and wait for all of them
    /// to exit. Registrations are left in place.
    pub async fn drain(&self) {
        self.drain.cancel();
        self.monitors.close();
        self.monitors.wait().await;
        tracing::info!("Model health monitors stopped");
    }
}
