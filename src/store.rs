// In-memory + on-disk active-mount store.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{AggregatorError, Result};
use crate::launcher::LaunchKind;

const PERSISTED_VERSION: u32 = 1;

/// The central runtime entity: a currently-running child MCP server plus its
/// bookkeeping on the aggregator side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveMount {
    pub entry_id: String,
    pub name: String,
    pub prefix: String,
    pub container_or_process_handle: String,
    /// How this mount was launched; deactivation needs this to know whether
    /// `prefix` also names a container to stop.
    pub launch_method: LaunchKind,
    pub environment: HashMap<String, String>,
    pub tools: Vec<String>,
    pub resources: Vec<String>,
    pub prompts: Vec<String>,
    pub mounted_at: DateTime<Utc>,
}

impl ActiveMount {
    /// The registered aggregator-facing name for one of this mount's tools.
    pub fn full_tool_name(&self, tool: &str) -> String {
        full_tool_name(&self.prefix, tool)
    }
}

/// The aggregator-facing name for a tool under `prefix`, shared by the
/// orchestrator (which needs it before an `ActiveMount` exists) and
/// `ActiveMount::full_tool_name`.
pub fn full_tool_name(prefix: &str, tool: &str) -> String {
    format!("mcp_{prefix}_{tool}")
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedState {
    version: u32,
    mounts: Vec<ActiveMount>,
}

struct Inner {
    mounts: HashMap<String, ActiveMount>,
    by_prefix: HashMap<String, String>,
}

/// In-memory map from `entry_id` to mount record, with a secondary
/// `prefix` index, persisted atomically to `active_mounts.json`.
pub struct ActiveMountStore {
    inner: Mutex<Inner>,
    path: PathBuf,
    entry_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ActiveMountStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                mounts: HashMap::new(),
                by_prefix: HashMap::new(),
            }),
            path: path.into(),
            entry_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Load the persisted set from disk, if present. A missing file is not
    /// an error (first run); a malformed file is.
    pub async fn load_from_disk(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let bytes = tokio::fs::read(&self.path).await?;
        let state: PersistedState = serde_json::from_slice(&bytes)?;
        let mut inner = self.inner.lock().await;
        inner.mounts.clear();
        inner.by_prefix.clear();
        for mount in state.mounts {
            inner.by_prefix.insert(mount.prefix.clone(), mount.entry_id.clone());
            inner.mounts.insert(mount.entry_id.clone(), mount);
        }
        Ok(())
    }

    /// The per-entry lock that serializes activate/deactivate for one
    /// `entry_id` ("activate and deactivate for the same entry_id
    /// are serialized by a per-entry lock the store grants and releases").
    pub async fn entry_lock(&self, entry_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.entry_locks.lock().await;
        locks
            .entry(entry_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn get(&self, entry_id: &str) -> Option<ActiveMount> {
        self.inner.lock().await.mounts.get(entry_id).cloned()
    }

    pub async fn get_by_prefix(&self, prefix: &str) -> Option<ActiveMount> {
        let inner = self.inner.lock().await;
        let entry_id = inner.by_prefix.get(prefix)?;
        inner.mounts.get(entry_id).cloned()
    }

    pub async fn list(&self) -> Vec<ActiveMount> {
        let inner = self.inner.lock().await;
        let mut mounts: Vec<_> = inner.mounts.values().cloned().collect();
        mounts.sort_by(|a, b| a.entry_id.cmp(&b.entry_id));
        mounts
    }

    /// Insert a mount and persist. Fails if the prefix is already taken by a
    /// different entry (defense in depth; the orchestrator is expected to
    /// have already checked this under the per-entry lock).
    pub async fn add(&self, mount: ActiveMount) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.by_prefix.get(&mount.prefix) {
            if existing != &mount.entry_id {
                return Err(AggregatorError::PrefixConflict(mount.prefix.clone()));
            }
        }
        inner.by_prefix.insert(mount.prefix.clone(), mount.entry_id.clone());
        inner.mounts.insert(mount.entry_id.clone(), mount);
        self.persist_locked(&inner).await
    }

    pub async fn remove(&self, entry_id: &str) -> Result<Option<ActiveMount>> {
        let mut inner = self.inner.lock().await;
        let removed = inner.mounts.remove(entry_id);
        if let Some(mount) = &removed {
            inner.by_prefix.remove(&mount.prefix);
        }
        self.persist_locked(&inner).await?;
        Ok(removed)
    }

    pub async fn snapshot(&self) -> String {
        let inner = self.inner.lock().await;
        let state = PersistedState {
            version: PERSISTED_VERSION,
            mounts: inner.mounts.values().cloned().collect(),
        };
        serde_json::to_string_pretty(&state).expect("ActiveMount is always serializable")
    }

    async fn persist_locked(&self, inner: &Inner) -> Result<()> {
        let state = PersistedState {
            version: PERSISTED_VERSION,
            mounts: inner.mounts.values().cloned().collect(),
        };
        let json = serde_json::to_vec_pretty(&state)?;
        write_atomically(&self.path, &json)?;
        Ok(())
    }
}

/// Write a new file to a temp path, fsync, rename over the canonical path.
pub fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let tmp_path = dir.join(format!(
        ".{}.tmp-{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("state"),
        uuid::Uuid::new_v4()
    ));
    {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_mount(entry_id: &str, prefix: &str) -> ActiveMount {
        ActiveMount {
            entry_id: entry_id.to_string(),
            name: entry_id.to_string(),
            prefix: prefix.to_string(),
            container_or_process_handle: "handle-1".to_string(),
            launch_method: LaunchKind::StdioProxy,
            environment: HashMap::new(),
            tools: vec!["read_query".to_string()],
            resources: vec![],
            prompts: vec![],
            mounted_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn add_then_reload_round_trips_byte_equivalent_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("active_mounts.json");

        let store = ActiveMountStore::new(&path);
        store.add(sample_mount("sqlite", "sq")).await.unwrap();

        let reloaded = ActiveMountStore::new(&path);
        reloaded.load_from_disk().await.unwrap();
        assert_eq!(reloaded.list().await.len(), 1);
        assert_eq!(
            reloaded.get_by_prefix("sq").await.unwrap().entry_id,
            "sqlite"
        );

        assert_eq!(store.snapshot().await, reloaded.snapshot().await);
    }

    #[tokio::test]
    async fn add_with_colliding_prefix_for_different_entry_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = ActiveMountStore::new(dir.path().join("active_mounts.json"));
        store.add(sample_mount("a", "fs")).await.unwrap();
        let result = store.add(sample_mount("b", "fs")).await;
        assert!(matches!(result, Err(AggregatorError::PrefixConflict(_))));
    }

    #[tokio::test]
    async fn remove_then_remove_again_is_a_noop_returning_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ActiveMountStore::new(dir.path().join("active_mounts.json"));
        store.add(sample_mount("a", "fs")).await.unwrap();
        assert!(store.remove("a").await.unwrap().is_some());
        assert!(store.remove("a").await.unwrap().is_none());
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn entry_lock_is_stable_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let store = ActiveMountStore::new(dir.path().join("active_mounts.json"));
        let a = store.entry_lock("x").await;
        let b = store.entry_lock("x").await;
        assert!(Arc::ptr_eq(&a, &b));
    }
}
