// Activation/deactivation orchestrator: the state machine that turns a
// catalog entry into a live, registered mount and back.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::client_manager::{ChildSession, ClientManager};
use crate::error::{AggregatorError, Result};
use crate::launcher::{LaunchKind, LaunchSpec, Launcher};
use crate::registry::ToolRegistry;
use crate::store::{full_tool_name, ActiveMount, ActiveMountStore};
use crate::translator::{make_executor, translate};

/// What the caller of `activate` may override.
#[derive(Debug, Clone, Default)]
pub struct ActivateRequest {
    pub entry_id: String,
    pub prefix: Option<String>,
    pub environment: HashMap<String, String>,
}

pub struct Orchestrator {
    catalog: Arc<Catalog>,
    store: Arc<ActiveMountStore>,
    clients: Arc<ClientManager>,
    registry: Arc<ToolRegistry>,
    launcher: Arc<dyn Launcher>,
    client_name: String,
    client_version: String,
}

impl Orchestrator {
    pub fn new(
        catalog: Arc<Catalog>,
        store: Arc<ActiveMountStore>,
        clients: Arc<ClientManager>,
        registry: Arc<ToolRegistry>,
        launcher: Arc<dyn Launcher>,
    ) -> Self {
        Self {
            catalog,
            store,
            clients,
            registry,
            launcher,
            client_name: "mcp-aggregator".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub async fn activate(&self, request: ActivateRequest) -> Result<ActiveMount> {
        let lock = self.store.entry_lock(&request.entry_id).await;
        let _guard = lock.lock().await;

        if self.store.get(&request.entry_id).await.is_some() {
            return Err(AggregatorError::AlreadyActive(request.entry_id));
        }

        let descriptor = self
            .catalog
            .get(&request.entry_id)
            .await
            .ok_or_else(|| AggregatorError::EntryNotFound(request.entry_id.clone()))?;

        let prefix = request
            .prefix
            .unwrap_or_else(|| derive_prefix(&request.entry_id));
        if let Some(existing) = self.store.get_by_prefix(&prefix).await {
            if existing.entry_id != request.entry_id {
                return Err(AggregatorError::PrefixConflict(prefix));
            }
        }

        let mut env = HashMap::new();
        if let Some(cmd) = &descriptor.server_command {
            env.extend(cmd.env.clone());
        }
        env.extend(request.environment.clone());

        let spec = match descriptor.launch_method {
            LaunchKind::Podman => LaunchSpec {
                kind: LaunchKind::Podman,
                image_or_command: descriptor.container_image.clone().ok_or_else(|| {
                    AggregatorError::LaunchFailed("entry has no container image".to_string())
                })?,
                args: Vec::new(),
                env,
                mount_name: prefix.clone(),
            },
            LaunchKind::StdioProxy => {
                let command = descriptor.server_command.clone().ok_or_else(|| {
                    AggregatorError::LaunchFailed("entry has no server command".to_string())
                })?;
                LaunchSpec {
                    kind: LaunchKind::StdioProxy,
                    image_or_command: command.command,
                    args: command.args,
                    env,
                    mount_name: prefix.clone(),
                }
            }
            LaunchKind::RemoteHttp | LaunchKind::Unknown => {
                return Err(AggregatorError::LaunchFailed(format!(
                    "entry '{}' has no usable launch method",
                    request.entry_id
                )));
            }
        };

        let spawned = self.launcher.spawn(&spec).await?;
        let handle = spawned.handle.clone();
        let child = spawned.child;

        let session = Arc::new(ChildSession::spawn(spawned.stdin, spawned.stdout));
        if let Err(e) = session.initialize(&self.client_name, &self.client_version).await {
            session.close().await;
            drop(session);
            self.launcher
                .teardown(spec.kind, &spec.mount_name, &handle, child)
                .await?;
            return Err(match e {
                AggregatorError::Timeout(m) => AggregatorError::Timeout(m),
                other => AggregatorError::InitFailed(other.to_string()),
            });
        }

        let tools = match session.list_tools().await {
            Ok(result) => result.tools,
            Err(e) => {
                session.close().await;
                drop(session);
                self.launcher
                    .teardown(spec.kind, &spec.mount_name, &handle, child)
                    .await?;
                return Err(AggregatorError::DiscoveryFailed(e.to_string()));
            }
        };
        let resources = session
            .list_resources()
            .await
            .map(|r| r.resources.into_iter().filter_map(|r| r.name).collect())
            .unwrap_or_default();
        let prompts = session
            .list_prompts()
            .await
            .map(|r| r.prompts.into_iter().filter_map(|p| p.name).collect())
            .unwrap_or_default();

        let mut tool_names = Vec::new();
        let mut registered_names = Vec::new();
        for tool in &tools {
            let translated = match translate(tool) {
                Ok(t) => t,
                Err(diagnostic) => {
                    warn!(entry_id = %request.entry_id, tool = %tool.name, %diagnostic, "skipping malformed tool");
                    continue;
                }
            };
            let full_name = full_tool_name(&prefix, &translated.original_tool_name);
            let executor = make_executor(
                self.clients.clone(),
                handle.clone(),
                translated.original_tool_name.clone(),
                translated.parameters.clone(),
            );

            match self
                .registry
                .register(
                    &handle,
                    full_name.clone(),
                    translated.description.clone(),
                    translated.parameters.clone(),
                    executor,
                )
                .await
            {
                Ok(()) => {
                    registered_names.push(full_name);
                    tool_names.push(translated.original_tool_name);
                }
                Err(e) => {
                    for name in &registered_names {
                        self.registry.unregister_one(&handle, name).await;
                    }
                    session.close().await;
                    drop(session);
                    self.launcher
                        .teardown(spec.kind, &spec.mount_name, &handle, child)
                        .await?;
                    return Err(AggregatorError::RegistrationFailed(e.to_string()));
                }
            }
        }

        let mount = ActiveMount {
            entry_id: request.entry_id.clone(),
            name: descriptor.display_name.clone(),
            prefix,
            container_or_process_handle: handle.clone(),
            launch_method: spec.kind,
            environment: request.environment,
            tools: tool_names,
            resources,
            prompts,
            mounted_at: Utc::now(),
        };
        if let Err(e) = self.store.add(mount.clone()).await {
            for name in &registered_names {
                self.registry.unregister_one(&handle, name).await;
            }
            session.close().await;
            drop(session);
            self.launcher
                .teardown(spec.kind, &spec.mount_name, &handle, child)
                .await?;
            return Err(e);
        }
        self.clients.register(handle, session, child).await;
        self.registry.notify_list_changed().await;

        info!(entry_id = %mount.entry_id, prefix = %mount.prefix, tools = mount.tools.len(), "mount activated");
        Ok(mount)
    }

    pub async fn deactivate(&self, entry_id: &str) -> Result<()> {
        let lock = self.store.entry_lock(entry_id).await;
        let _guard = lock.lock().await;

        let mount = self
            .store
            .get(entry_id)
            .await
            .ok_or_else(|| AggregatorError::EntryNotFound(entry_id.to_string()))?;

        self.registry.unregister_all(&mount.container_or_process_handle).await;

        if let Some(registered) = self.clients.take(&mount.container_or_process_handle).await {
            registered.session.close().await;
            drop(registered.session);
            self.launcher
                .teardown(
                    mount.launch_method,
                    &mount.prefix,
                    &mount.container_or_process_handle,
                    registered.child,
                )
                .await?;
        }

        self.store.remove(entry_id).await?;
        self.registry.notify_list_changed().await;

        info!(entry_id, "mount deactivated");
        Ok(())
    }

    /// Re-run the full activate flow for every persisted mount at startup.
    /// Entries that fail to come back up are dropped from the persisted set
    /// rather than kept as dead records.
    pub async fn replay_persisted(&self) {
        let persisted = self.store.list().await;
        for mount in persisted {
            let request = ActivateRequest {
                entry_id: mount.entry_id.clone(),
                prefix: Some(mount.prefix.clone()),
                environment: mount.environment.clone(),
            };
            // The persisted record still occupies the store's slot; clear it
            // first so `activate`'s AlreadyActive check doesn't trip.
            let _ = self.store.remove(&mount.entry_id).await;
            if let Err(e) = self.activate(request).await {
                warn!(entry_id = %mount.entry_id, error = %e, "dropping mount that failed replay");
            }
        }
    }
}

fn derive_prefix(entry_id: &str) -> String {
    entry_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{JsonFileCatalogSource, Origin, RegistryEntry, ServerCommand};
    use crate::registry::ToolSurface;
    use crate::translator::{Executor, ParameterDescriptor};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingSurface {
        names: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl ToolSurface for RecordingSurface {
        async fn add_tool(
            &self,
            full_name: String,
            _description: String,
            _parameters: Vec<ParameterDescriptor>,
            _executor: Executor,
        ) -> Result<()> {
            self.names.lock().unwrap().push(full_name);
            Ok(())
        }

        async fn remove_tool(&self, full_name: &str) -> Result<()> {
            self.names.lock().unwrap().retain(|n| n != full_name);
            Ok(())
        }

        async fn send_tool_list_changed(&self) {}
    }

    fn sample_entry() -> RegistryEntry {
        RegistryEntry {
            slug: "echo".to_string(),
            display_name: "Echo Server".to_string(),
            description: "loops stdin back".to_string(),
            origin: Origin::Custom,
            source_repository_url: None,
            container_image: None,
            categories: vec![],
            tags: vec![],
            official: false,
            featured: false,
            requires_api_key: false,
            launch_method: LaunchKind::StdioProxy,
            server_command: Some(ServerCommand {
                command: "cat".to_string(),
                args: vec![],
                env: HashMap::new(),
            }),
            last_refreshed: Utc::now(),
            raw_metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn activating_unknown_entry_fails_with_entry_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(Catalog::new(dir.path().join("catalog.json")));
        let store = Arc::new(ActiveMountStore::new(dir.path().join("active_mounts.json")));
        let clients = Arc::new(ClientManager::new());
        let registry = Arc::new(ToolRegistry::new(Arc::new(RecordingSurface::default())));
        let launcher: Arc<dyn Launcher> = Arc::new(crate::launcher::ProcessLauncher::default());
        let orchestrator = Orchestrator::new(catalog, store, clients, registry, launcher);

        let result = orchestrator
            .activate(ActivateRequest {
                entry_id: "does-not-exist".to_string(),
                prefix: None,
                environment: HashMap::new(),
            })
            .await;
        assert!(matches!(result, Err(AggregatorError::EntryNotFound(_))));
    }

    #[tokio::test]
    async fn deactivating_unknown_entry_fails_with_entry_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(Catalog::new(dir.path().join("catalog.json")));
        let store = Arc::new(ActiveMountStore::new(dir.path().join("active_mounts.json")));
        let clients = Arc::new(ClientManager::new());
        let registry = Arc::new(ToolRegistry::new(Arc::new(RecordingSurface::default())));
        let launcher: Arc<dyn Launcher> = Arc::new(crate::launcher::ProcessLauncher::default());
        let orchestrator = Orchestrator::new(catalog, store, clients, registry, launcher);

        let result = orchestrator.deactivate("ghost").await;
        assert!(matches!(result, Err(AggregatorError::EntryNotFound(_))));
    }

    #[tokio::test]
    async fn prefix_conflict_with_a_different_entry_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(Catalog::new(dir.path().join("catalog.json")));
        let store = Arc::new(ActiveMountStore::new(dir.path().join("active_mounts.json")));
        store
            .add(ActiveMount {
                entry_id: "other".to_string(),
                name: "Other".to_string(),
                prefix: "echo".to_string(),
                container_or_process_handle: "h".to_string(),
                launch_method: LaunchKind::StdioProxy,
                environment: HashMap::new(),
                tools: vec![],
                resources: vec![],
                prompts: vec![],
                mounted_at: Utc::now(),
            })
            .await
            .unwrap();
        let clients = Arc::new(ClientManager::new());
        let registry = Arc::new(ToolRegistry::new(Arc::new(RecordingSurface::default())));
        let launcher: Arc<dyn Launcher> = Arc::new(crate::launcher::ProcessLauncher::default());
        let orchestrator = Orchestrator::new(catalog.clone(), store, clients, registry, launcher);

        let source_path = dir.path().join("source.json");
        tokio::fs::write(&source_path, serde_json::to_vec(&vec![sample_entry()]).unwrap())
            .await
            .unwrap();
        catalog
            .refresh(&JsonFileCatalogSource::new("x", &source_path))
            .await
            .unwrap();

        let result = orchestrator
            .activate(ActivateRequest {
                entry_id: "echo".to_string(),
                prefix: Some("echo".to_string()),
                environment: HashMap::new(),
            })
            .await;
        assert!(matches!(result, Err(AggregatorError::PrefixConflict(_))));
    }
}
