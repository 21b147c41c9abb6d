//! Per-model liveness monitoring.
//!
//! Each registration gets one monitor task. The task probes the model, sleeps
//! for the probe interval and probes again. The first failed probe evicts the
//! model and ends the task; a model that recovers has to register again,
//! which starts a new monitor.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::registry::ModelRegistry;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub probe_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(10),
        }
    }
}

/// Why a monitor task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    /// Probe failed and the registration was removed.
    Evicted,
    /// Probe failed but the registration had already been replaced or
    /// removed; nothing was evicted.
    Superseded,
    /// Drain or explicit deregistration.
    Cancelled,
}

pub(crate) async fn run_monitor(
    registry: Arc<ModelRegistry>,
    name: String,
    endpoint: String,
    generation: u64,
    cancel: CancellationToken,
) -> MonitorExit {
    let client = Arc::clone(registry.client());
    let interval = registry.monitor_config().probe_interval;

    loop {
        let probe = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = client.probe(&endpoint) => result,
        };

        if let Err(e) = probe {
            // Removal happens before the task returns so no caller can see
            // a finished monitor with its model still routable.
            if registry.evict(&name, generation) {
                tracing::info!(
                    model = %name,
                    error = %e,
                    "Model is not responsive. Removing the model from available services"
                );
                return MonitorExit::Evicted;
            }
            tracing::debug!(
                model = %name,
                generation,
                error = %e,
                "Probe failed for a registration that was already replaced"
            );
            return MonitorExit::Superseded;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    tracing::debug!(model = %name, "Model health monitor terminated");
    MonitorExit::Cancelled
}
