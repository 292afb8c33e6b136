// Catalog data model and in-memory registry store, file-backed.
//
// The scrapers that would populate entries from Docker Hub, mcpservers.org,
// or GitHub are external collaborators. This module provides the
// `CatalogSource` trait plus one concrete, functional implementation: a
// local JSON-file source standing in for "load a pre-fetched snapshot".

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{AggregatorError, Result};
use crate::launcher::LaunchKind;
use crate::store::write_atomically;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Docker,
    Mcpservers,
    McpOfficial,
    Awesome,
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerCommand {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// An immutable catalog descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub slug: String,
    pub display_name: String,
    pub description: String,
    pub origin: Origin,
    #[serde(default)]
    pub source_repository_url: Option<String>,
    #[serde(default)]
    pub container_image: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub official: bool,
    #[serde(default)]
    pub featured: bool,
    #[serde(default)]
    pub requires_api_key: bool,
    pub launch_method: LaunchKind,
    #[serde(default)]
    pub server_command: Option<ServerCommand>,
    pub last_refreshed: DateTime<Utc>,
    #[serde(default)]
    pub raw_metadata: HashMap<String, serde_json::Value>,
}

impl RegistryEntry {
    /// Tags deduplicated, preserving the first occurrence's position.
    pub fn deduplicated_tags(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.tags
            .iter()
            .filter(|tag| seen.insert((*tag).clone()))
            .cloned()
            .collect()
    }
}

/// A source of catalog entries. `JsonFileCatalogSource` is the one shipped
/// implementation; Docker/mcpservers.org/GitHub scrapers would implement
/// this trait the same way.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch(&self) -> Result<Vec<RegistryEntry>>;
}

/// Reads a pre-fetched catalog snapshot from a local JSON file: a bare array
/// of `RegistryEntry`.
pub struct JsonFileCatalogSource {
    name: String,
    path: PathBuf,
}

impl JsonFileCatalogSource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

#[async_trait]
impl CatalogSource for JsonFileCatalogSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<RegistryEntry>> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            AggregatorError::DiscoveryFailed(format!(
                "reading catalog source '{}' at {}: {e}",
                self.name,
                self.path.display()
            ))
        })?;
        let entries: Vec<RegistryEntry> = serde_json::from_slice(&bytes)?;
        Ok(entries)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedCatalog {
    entries: Vec<RegistryEntry>,
}

/// In-memory map keyed by slug, with a file-backed snapshot. Mutated only by
/// `refresh`, which is serialized by the caller (the scheduler runs one
/// refresh at a time).
pub struct Catalog {
    entries: Mutex<HashMap<String, RegistryEntry>>,
    path: PathBuf,
}

impl Catalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            path: path.into(),
        }
    }

    pub async fn load_from_disk(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let bytes = tokio::fs::read(&self.path).await?;
        let persisted: PersistedCatalog = serde_json::from_slice(&bytes)?;
        let mut entries = self.entries.lock().await;
        entries.clear();
        for entry in persisted.entries {
            entries.insert(entry.slug.clone(), entry);
        }
        Ok(())
    }

    pub async fn get(&self, slug: &str) -> Option<RegistryEntry> {
        self.entries.lock().await.get(slug).cloned()
    }

    pub async fn list(&self) -> Vec<RegistryEntry> {
        let entries = self.entries.lock().await;
        let mut all: Vec<_> = entries.values().cloned().collect();
        all.sort_by(|a, b| a.slug.cmp(&b.slug));
        all
    }

    /// Fetch from `source` and merge its entries into the catalog (entries
    /// from other sources, or previously fetched from this one under a slug
    /// no longer present, are left untouched), then persist the whole set.
    pub async fn refresh(&self, source: &dyn CatalogSource) -> Result<usize> {
        let fetched = source.fetch().await?;
        let count = fetched.len();
        let mut entries = self.entries.lock().await;
        for mut entry in fetched {
            entry.tags = entry.deduplicated_tags();
            entries.insert(entry.slug.clone(), entry);
        }
        self.persist_locked(&entries)?;
        Ok(count)
    }

    fn persist_locked(&self, entries: &HashMap<String, RegistryEntry>) -> Result<()> {
        let persisted = PersistedCatalog {
            entries: entries.values().cloned().collect(),
        };
        let json = serde_json::to_vec_pretty(&persisted)?;
        write_atomically(&self.path, &json)
    }
}

pub fn default_catalog_path(state_dir: &Path) -> PathBuf {
    state_dir.join("catalog.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry(slug: &str) -> RegistryEntry {
        RegistryEntry {
            slug: slug.to_string(),
            display_name: slug.to_string(),
            description: "a test server".to_string(),
            origin: Origin::Custom,
            source_repository_url: None,
            container_image: Some("example/image:latest".to_string()),
            categories: vec!["database".to_string()],
            tags: vec!["sql".to_string(), "sql".to_string(), "read-only".to_string()],
            official: false,
            featured: false,
            requires_api_key: false,
            launch_method: LaunchKind::Podman,
            server_command: None,
            last_refreshed: Utc::now(),
            raw_metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn refresh_from_json_file_source_populates_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let source_path = dir.path().join("source.json");
        let entries = vec![sample_entry("sqlite")];
        tokio::fs::write(&source_path, serde_json::to_vec(&entries).unwrap())
            .await
            .unwrap();

        let catalog = Catalog::new(dir.path().join("catalog.json"));
        let source = JsonFileCatalogSource::new("local", &source_path);
        let count = catalog.refresh(&source).await.unwrap();
        assert_eq!(count, 1);

        let reloaded = Catalog::new(dir.path().join("catalog.json"));
        reloaded.load_from_disk().await.unwrap();
        assert_eq!(reloaded.list().await.len(), 1);
        assert_eq!(reloaded.get("sqlite").await.unwrap().display_name, "sqlite");
    }

    #[tokio::test]
    async fn refresh_deduplicates_tags() {
        let dir = tempfile::tempdir().unwrap();
        let source_path = dir.path().join("source.json");
        tokio::fs::write(&source_path, serde_json::to_vec(&vec![sample_entry("sqlite")]).unwrap())
            .await
            .unwrap();

        let catalog = Catalog::new(dir.path().join("catalog.json"));
        let source = JsonFileCatalogSource::new("local", &source_path);
        catalog.refresh(&source).await.unwrap();

        let entry = catalog.get("sqlite").await.unwrap();
        assert_eq!(entry.tags, vec!["sql".to_string(), "read-only".to_string()]);
    }

    #[tokio::test]
    async fn missing_source_file_surfaces_discovery_failed() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::new(dir.path().join("catalog.json"));
        let source = JsonFileCatalogSource::new("local", dir.path().join("missing.json"));
        let result = catalog.refresh(&source).await;
        assert!(matches!(result, Err(AggregatorError::DiscoveryFailed(_))));
    }
}
