// File-based configuration: an optional TOML file naming catalog sources
// and per-source interval overrides.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub catalog: CatalogFileConfig,
}

#[derive(Debug, Deserialize, Default)]
pub struct CatalogFileConfig {
    #[serde(default)]
    pub sources: Vec<CatalogSourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogSourceConfig {
    pub name: String,
    pub path: PathBuf,
    /// Overrides the scheduler's default minimum refresh interval for this
    /// source only.
    #[serde(default)]
    pub min_interval_secs: Option<u64>,
}

impl FileConfig {
    /// Load from `path`. A missing file is not an error (defaults apply); a
    /// malformed file is logged and falls back to defaults rather than
    /// failing startup.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    debug!(path = %path.display(), "loaded file configuration");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to parse config file, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                debug!(path = %path.display(), "no config file found, using defaults");
                Self::default()
            }
        }
    }

    pub fn config_path(state_dir: &Path) -> PathBuf {
        state_dir.join("config.toml")
    }
}
