//! Environment-driven configuration, read once at startup.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::client::ClientConfig;
use crate::health::MonitorConfig;
use crate::search::DEFAULT_PAGE_SIZE;
use crate::transport::ServerConfig;

pub const DEFAULT_STAGING_DIR: &str = "/app/prediction_images";

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Where uploads are written for model services to read.
    pub staging_dir: PathBuf,
    pub page_size: u32,
    /// Job queue base URL. Without one an in-process queue is used.
    pub queue_url: Option<String>,
    pub service_keys: Vec<String>,
    /// (token, username) pairs.
    pub user_tokens: Vec<(String, String)>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            staging_dir: PathBuf::from(DEFAULT_STAGING_DIR),
            page_size: DEFAULT_PAGE_SIZE,
            queue_url: None,
            service_keys: Vec::new(),
            user_tokens: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub monitor: MonitorConfig,
    pub client: ClientConfig,
    pub hub: HubConfig,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let server = ServerConfig {
            host: get("PRISM_HOST").unwrap_or(defaults.server.host),
            port: parse_or(get("PRISM_PORT"), "PRISM_PORT", defaults.server.port),
            await_explicit_shutdown: get("PRISM_AWAIT_EXPLICIT_SHUTDOWN")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.server.await_explicit_shutdown),
        };

        let monitor = MonitorConfig {
            probe_interval: seconds_or(
                get("PRISM_PROBE_INTERVAL_SECS"),
                "PRISM_PROBE_INTERVAL_SECS",
                defaults.monitor.probe_interval,
            ),
        };

        let client = ClientConfig {
            probe_timeout: seconds_or(
                get("PRISM_PROBE_TIMEOUT_SECS"),
                "PRISM_PROBE_TIMEOUT_SECS",
                defaults.client.probe_timeout,
            ),
            ..defaults.client
        };

        let page_size = match parse_or(get("PRISM_PAGE_SIZE"), "PRISM_PAGE_SIZE", defaults.hub.page_size) {
            0 => {
                tracing::warn!("PRISM_PAGE_SIZE must be positive, using default");
                defaults.hub.page_size
            }
            n => n,
        };

        let hub = HubConfig {
            staging_dir: get("PRISM_STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.hub.staging_dir),
            page_size,
            queue_url: get("PRISM_QUEUE_URL"),
            service_keys: get("PRISM_SERVICE_KEYS")
                .map(|v| parse_list(&v))
                .unwrap_or_default(),
            user_tokens: get("PRISM_USER_TOKENS")
                .map(|v| parse_user_tokens(&v))
                .unwrap_or_default(),
        };

        Self {
            server,
            monitor,
            client,
            hub,
        }
    }
}

fn parse_or<T: FromStr + Copy>(value: Option<String>, key: &str, default: T) -> T {
    let Some(raw) = value else {
        return default;
    };
    match raw.trim().parse() {
        Ok(v) => v,
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid configuration value, using default");
            default
        }
    }
}

fn seconds_or(value: Option<String>, key: &str, default: Duration) -> Duration {
    match parse_or::<u64>(value, key, default.as_secs()) {
        0 => {
            tracing::warn!(key, "Duration must be positive, using default");
            default
        }
        secs => Duration::from_secs(secs),
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_user_tokens(value: &str) -> Vec<(String, String)> {
    parse_list(value)
        .into_iter()
        .filter_map(|pair| match pair.split_once('=') {
            Some((token, user)) if !token.trim().is_empty() && !user.trim().is_empty() => {
                Some((token.trim().to_string(), user.trim().to_string()))
            }
            _ => {
                tracing::warn!("Ignoring malformed PRISM_USER_TOKENS entry");
                None
            }
        })
        .collect()
}
