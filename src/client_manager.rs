// Map from mount handle to a live session+process pair.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::process::{Child, ChildStdin};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::launcher::teardown_child;
use crate::mcp::session::Session;

/// A session wrapping a command/container child's piped stdio.
pub type ChildSession = Session<ChildStdin>;

pub(crate) struct Registered {
    pub session: Arc<ChildSession>,
    pub child: Child,
}

/// Pure lookup + registration + removal; safe to call `remove` for an
/// unknown handle (no-op).
#[derive(Default)]
pub struct ClientManager {
    clients: Mutex<HashMap<String, Registered>>,
}

impl ClientManager {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub async fn register(&self, handle: String, session: Arc<ChildSession>, child: Child) {
        let mut clients = self.clients.lock().await;
        clients.insert(handle, Registered { session, child });
    }

    pub async fn get(&self, handle: &str) -> Option<Arc<ChildSession>> {
        let clients = self.clients.lock().await;
        clients.get(handle).map(|r| r.session.clone())
    }

    /// Remove and return the registered session+child without tearing
    /// either down. The orchestrator uses this on deactivation so it can
    /// close the session and tear the child down through the launcher,
    /// which knows how to stop a container mount by name; plain process
    /// teardown (`remove`) wouldn't reach the container engine at all.
    pub(crate) async fn take(&self, handle: &str) -> Option<Registered> {
        let mut clients = self.clients.lock().await;
        clients.remove(handle)
    }

    /// Close the session (which closes stdin once the last reference drops)
    /// and wait on the child, force-killing after the grace period. Used
    /// where there is no launcher to consult (this module's own tests).
    pub async fn remove(&self, handle: &str) -> Result<()> {
        let Some(Registered { session, child }) = self.take(handle).await else {
            return Ok(());
        };

        session.close().await;
        drop(session);
        teardown_child(handle, child).await
    }

    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }
}
