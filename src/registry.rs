// Dynamic tool registry sitting between the orchestrator and the
// aggregator's own MCP surface.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::Result;
use crate::translator::{Executor, ParameterDescriptor};

/// Collaborator interface consumed from the surrounding MCP server
/// framework. A working `rmcp`-backed adapter is provided in `surface.rs`
/// as ambient wiring; this trait is the seam the registry actually depends
/// on, so orchestrator tests can inject a fake.
#[async_trait]
pub trait ToolSurface: Send + Sync {
    async fn add_tool(
        &self,
        full_name: String,
        description: String,
        parameters: Vec<ParameterDescriptor>,
        executor: Executor,
    ) -> Result<()>;

    async fn remove_tool(&self, full_name: &str) -> Result<()>;

    /// Emit `notifications/tools/list_changed`. Emission outside an active
    /// request context is expected to no-op rather than error.
    async fn send_tool_list_changed(&self);
}

/// Tracks, per mount handle, the set of full tool names it registered, so
/// deactivation (or rollback) can remove exactly what activation added.
pub struct ToolRegistry {
    surface: Arc<dyn ToolSurface>,
    by_handle: Mutex<HashMap<String, Vec<String>>>,
}

impl ToolRegistry {
    pub fn new(surface: Arc<dyn ToolSurface>) -> Self {
        Self {
            surface,
            by_handle: Mutex::new(HashMap::new()),
        }
    }

    /// Register one tool for `handle`. Does not itself notify
    /// `list_changed` — callers registering a batch should call
    /// `notify_list_changed` once after the batch settles.
    pub async fn register(
        &self,
        handle: &str,
        full_name: String,
        description: String,
        parameters: Vec<ParameterDescriptor>,
        executor: Executor,
    ) -> Result<()> {
        self.surface
            .add_tool(full_name.clone(), description, parameters, executor)
            .await?;
        let mut by_handle = self.by_handle.lock().await;
        by_handle.entry(handle.to_string()).or_default().push(full_name);
        Ok(())
    }

    /// Roll back a single registration performed for `handle` (used when a
    /// later tool in the same batch collides and the whole mount aborts).
    pub async fn unregister_one(&self, handle: &str, full_name: &str) {
        if let Err(e) = self.surface.remove_tool(full_name).await {
            warn!(handle, full_name, error = %e, "rollback: failed to remove tool");
        }
        let mut by_handle = self.by_handle.lock().await;
        if let Some(names) = by_handle.get_mut(handle) {
            names.retain(|n| n != full_name);
        }
    }

    /// Remove every tool registered for `handle` (deactivation path).
    /// Individual removal failures are logged, not propagated.
    pub async fn unregister_all(&self, handle: &str) {
        let names = {
            let mut by_handle = self.by_handle.lock().await;
            by_handle.remove(handle).unwrap_or_default()
        };
        for name in names {
            if let Err(e) = self.surface.remove_tool(&name).await {
                warn!(handle, full_name = %name, error = %e, "failed to remove tool during deactivation");
            }
        }
    }

    pub async fn registered_for(&self, handle: &str) -> Vec<String> {
        self.by_handle
            .lock()
            .await
            .get(handle)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn notify_list_changed(&self) {
        self.surface.send_tool_list_changed().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeSurface {
        names: StdMutex<Vec<String>>,
        notify_count: AtomicUsize,
        fail_on: StdMutex<Option<String>>,
    }

    #[async_trait]
    impl ToolSurface for FakeSurface {
        async fn add_tool(
            &self,
            full_name: String,
            _description: String,
            _parameters: Vec<ParameterDescriptor>,
            _executor: Executor,
        ) -> Result<()> {
            if self.fail_on.lock().unwrap().as_deref() == Some(full_name.as_str()) {
                return Err(crate::error::AggregatorError::RegistrationFailed(full_name));
            }
            self.names.lock().unwrap().push(full_name);
            Ok(())
        }

        async fn remove_tool(&self, full_name: &str) -> Result<()> {
            self.names.lock().unwrap().retain(|n| n != full_name);
            Ok(())
        }

        async fn send_tool_list_changed(&self) {
            self.notify_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn noop_executor() -> Executor {
        Arc::new(|_kwargs| Box::pin(async { Ok(String::new()) }))
    }

    #[tokio::test]
    async fn register_tracks_by_handle_and_removal_clears_it() {
        let surface = Arc::new(FakeSurface::default());
        let registry = ToolRegistry::new(surface.clone());

        registry
            .register("h1", "mcp_sq_read".to_string(), "d".to_string(), vec![], noop_executor())
            .await
            .unwrap();
        assert_eq!(registry.registered_for("h1").await, vec!["mcp_sq_read".to_string()]);
        assert_eq!(surface.names.lock().unwrap().len(), 1);

        registry.unregister_all("h1").await;
        assert!(registry.registered_for("h1").await.is_empty());
        assert!(surface.names.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rollback_removes_only_the_one_tool() {
        let surface = Arc::new(FakeSurface::default());
        let registry = ToolRegistry::new(surface.clone());

        registry
            .register("h1", "mcp_sq_a".to_string(), "d".to_string(), vec![], noop_executor())
            .await
            .unwrap();
        registry
            .register("h1", "mcp_sq_b".to_string(), "d".to_string(), vec![], noop_executor())
            .await
            .unwrap();

        registry.unregister_one("h1", "mcp_sq_b").await;
        assert_eq!(registry.registered_for("h1").await, vec!["mcp_sq_a".to_string()]);
    }

    #[tokio::test]
    async fn colliding_name_surfaces_registration_failed() {
        let surface = Arc::new(FakeSurface::default());
        *surface.fail_on.lock().unwrap() = Some("mcp_sq_a".to_string());
        let registry = ToolRegistry::new(surface.clone());

        let result = registry
            .register("h1", "mcp_sq_a".to_string(), "d".to_string(), vec![], noop_executor())
            .await;
        assert!(result.is_err());
        assert!(registry.registered_for("h1").await.is_empty());
    }
}
