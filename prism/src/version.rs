//! Version information for prism.

/// Prism version from Cargo.toml
pub const PRISM_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version information reported by the health check.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionInfo {
    pub prism: &'static str,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            prism: PRISM_VERSION,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }
}
