//! prism-server: wires configuration, collaborators and the HTTP transport.

use std::sync::Arc;

use anyhow::Context;
use prism::{
    Config, HttpJobQueue, HttpModelClient, JobQueue, MemoryJobQueue, MemoryRecordStore,
    PredictionService, transport::serve,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// `RUST_LOG` wins when set; otherwise `PRISM_LOG` picks the level for the
/// prism targets. `LOG_FORMAT=json` switches to JSON lines on stderr.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let base_level = match std::env::var("PRISM_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };

        EnvFilter::new(format!(
            "prism={level},prism_server={level}",
            level = base_level
        ))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env();

    let client = Arc::new(
        HttpModelClient::new(config.client.clone()).context("failed to build model client")?,
    );

    let queue: Arc<dyn JobQueue> = match &config.hub.queue_url {
        Some(url) => {
            info!(url = %url, "Using HTTP job queue");
            let http = reqwest::Client::builder()
                .timeout(config.client.request_timeout)
                .build()
                .context("failed to build job queue client")?;
            Arc::new(HttpJobQueue::new(url.clone(), http))
        }
        None => {
            warn!(
                "No PRISM_QUEUE_URL set; using an in-process job queue that model services \
                 cannot reach, so result polling will never report pending work"
            );
            Arc::new(MemoryJobQueue::new())
        }
    };

    let service = PredictionService::new(
        client,
        Arc::new(MemoryRecordStore::new()),
        queue,
        config.monitor.clone(),
        &config.hub,
    );
    if !service.credentials().has_users() {
        warn!("No PRISM_USER_TOKENS configured; user routes will reject every request");
    }

    info!(
        staging_dir = %config.hub.staging_dir.display(),
        page_size = config.hub.page_size,
        probe_interval_secs = config.monitor.probe_interval.as_secs(),
        "Configuration loaded"
    );

    serve(config.server, Arc::new(service)).await
}
