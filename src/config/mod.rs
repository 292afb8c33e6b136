// Two-layer configuration: environment variables for deployment-specific
// knobs, an optional TOML file for catalog source declarations.

pub mod env;
pub mod file;

pub use env::EnvConfig;
pub use file::{CatalogSourceConfig, FileConfig};

use std::time::Duration;

use tracing::info;

use crate::scheduler::{DEFAULT_MIN_REFRESH_INTERVAL, DEFAULT_WAKE_INTERVAL};

/// The merged configuration view the rest of the aggregator depends on.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub env: EnvConfig,
    pub file: FileConfig,
}

impl AggregatorConfig {
    /// Load both layers and log the merged, non-sensitive view once.
    pub fn load() -> Self {
        let env = EnvConfig::load();
        let file_path = FileConfig::config_path(&env.state_dir);
        let file = FileConfig::load(&file_path);

        info!(
            state_dir = %env.state_dir.display(),
            container_engine = %env.container_engine,
            catalog_sources = file.catalog.sources.len(),
            log_level = %env.log_level,
            "configuration loaded"
        );

        Self { env, file }
    }

    pub fn refresh_wake_interval(&self) -> Duration {
        self.env.refresh_wake_interval.unwrap_or(DEFAULT_WAKE_INTERVAL)
    }

    pub fn refresh_min_interval(&self) -> Duration {
        self.env.refresh_min_interval.unwrap_or(DEFAULT_MIN_REFRESH_INTERVAL)
    }

    pub fn active_mounts_path(&self) -> std::path::PathBuf {
        self.env.state_dir.join("active_mounts.json")
    }

    pub fn catalog_path(&self) -> std::path::PathBuf {
        crate::catalog::default_catalog_path(&self.env.state_dir)
    }
}
