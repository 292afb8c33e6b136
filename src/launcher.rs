// Spawns a child MCP server, container or command.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use crate::error::{AggregatorError, Result};

const GRACEFUL_SHUTDOWN: Duration = Duration::from_secs(5);

/// Closed set of launch kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LaunchKind {
    Podman,
    StdioProxy,
    RemoteHttp,
    Unknown,
}

/// What to launch: either a container image (for `Podman`) or a command +
/// args (for `StdioProxy`).
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub kind: LaunchKind,
    pub image_or_command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    /// A stable name to give the container (also used to name the
    /// process-group handle for command mounts).
    pub mount_name: String,
}

/// A live child process with piped stdio, ready for session wrapping. The
/// caller is responsible for calling `teardown` if it fails to complete
/// initialization after a successful spawn.
pub struct SpawnedChild {
    /// Opaque handle identifying the local process: the spawned PID as a
    /// string, falling back to the mount name if the PID couldn't be read.
    /// For container mounts this is the `podman run` wrapper process, not
    /// the container itself — stopping/killing the container by name uses
    /// `LaunchSpec::mount_name` separately, via `Launcher::teardown`.
    pub handle: String,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub child: Child,
}

/// Close stdin, wait up to 5s for graceful exit, then force-kill. Container
/// mounts rely on `--rm` to reclaim the container record once the process
/// underneath (the engine CLI) exits. This is used both for a child that
/// never made it past handshake/discovery, and (via `client_manager`) for
/// one being deactivated after a successful mount.
pub async fn teardown_child(handle: &str, mut child: Child) -> Result<()> {
    match tokio::time::timeout(GRACEFUL_SHUTDOWN, child.wait()).await {
        Ok(Ok(status)) => {
            debug!(handle, ?status, "child exited gracefully");
            Ok(())
        }
        Ok(Err(e)) => Err(AggregatorError::Io(e)),
        Err(_elapsed) => {
            warn!(handle, "child did not exit within grace period, killing");
            child.kill().await.map_err(AggregatorError::Io)?;
            Ok(())
        }
    }
}

/// Collaborator interface so orchestrator tests can inject a fake launcher
/// without a real container engine or executables on PATH.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn spawn(&self, spec: &LaunchSpec) -> Result<SpawnedChild>;

    /// Tear down a previously spawned child. `kind` and `mount_name`
    /// identify whether (and by what name) a container needs stopping
    /// first; `handle` and `child` address the local process wrapping it.
    /// The default just waits/kills the local process, which is correct
    /// for non-container mounts.
    async fn teardown(
        &self,
        kind: LaunchKind,
        mount_name: &str,
        handle: &str,
        child: Child,
    ) -> Result<()> {
        let _ = (kind, mount_name);
        teardown_child(handle, child).await
    }
}

/// Spawns children via `tokio::process::Command`, using a container engine
/// CLI (e.g. `podman`) for container mounts.
pub struct ProcessLauncher {
    container_engine: String,
}

impl ProcessLauncher {
    pub fn new(container_engine: impl Into<String>) -> Self {
        Self {
            container_engine: container_engine.into(),
        }
    }
}

impl Default for ProcessLauncher {
    fn default() -> Self {
        Self::new("podman")
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn spawn(&self, spec: &LaunchSpec) -> Result<SpawnedChild> {
        match spec.kind {
            LaunchKind::Podman => self.spawn_container(spec).await,
            LaunchKind::StdioProxy => self.spawn_command(spec).await,
            LaunchKind::RemoteHttp => Err(AggregatorError::LaunchFailed(
                "remote-http launch method has no transport in this release".to_string(),
            )),
            LaunchKind::Unknown => Err(AggregatorError::LaunchFailed(
                "unknown launch method".to_string(),
            )),
        }
    }

    async fn teardown(
        &self,
        kind: LaunchKind,
        mount_name: &str,
        handle: &str,
        child: Child,
    ) -> Result<()> {
        if kind == LaunchKind::Podman {
            self.stop_or_kill_container(mount_name).await;
        }
        teardown_child(handle, child).await
    }
}

impl ProcessLauncher {
    async fn spawn_container(&self, spec: &LaunchSpec) -> Result<SpawnedChild> {
        self.pull(&spec.image_or_command).await;

        let mut cmd = Command::new(&self.container_engine);
        cmd.arg("run").arg("-i").arg("--rm");
        cmd.arg("--name").arg(&spec.mount_name);
        // No volume mounts, no network remapping, no privileged mode in the
        // default path.
        for (key, value) in &spec.env {
            cmd.arg("-e").arg(format!("{key}={value}"));
        }
        cmd.arg(&spec.image_or_command);
        cmd.args(&spec.args);
        self.run(cmd, spec.mount_name.clone()).await
    }

    /// Idempotent pull before first spawn. Best-effort: a failure here
    /// (image already present, registry hiccup) doesn't block the spawn
    /// attempt — `run` surfaces its own failure if the image is genuinely
    /// unusable.
    async fn pull(&self, image: &str) {
        let status = Command::new(&self.container_engine)
            .arg("pull")
            .arg(image)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match status {
            Ok(s) if s.success() => debug!(image, "image pulled"),
            Ok(s) => warn!(image, code = ?s.code(), "pull exited non-zero, proceeding to run"),
            Err(e) => warn!(image, error = %e, "failed to invoke pull, proceeding to run"),
        }
    }

    /// Best-effort stop, falling back to kill, by container name. Used
    /// during forced teardown; a hung `run` wrapper process must not leave
    /// the container itself running.
    async fn stop_or_kill_container(&self, name: &str) {
        let stop = Command::new(&self.container_engine)
            .arg("stop")
            .arg(name)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if matches!(stop, Ok(s) if s.success()) {
            return;
        }
        warn!(name, "container stop failed, falling back to kill");
        let kill = Command::new(&self.container_engine)
            .arg("kill")
            .arg(name)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if !matches!(kill, Ok(s) if s.success()) {
            warn!(name, "container kill also failed; relying on --rm once the wrapper process exits");
        }
    }

    async fn spawn_command(&self, spec: &LaunchSpec) -> Result<SpawnedChild> {
        let mut cmd = Command::new(&spec.image_or_command);
        cmd.args(&spec.args);
        // Overlay the entry's environment with caller-specified values;
        // `spec.env` is already the merged view by the time it reaches here.
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        self.run(cmd, spec.mount_name.clone()).await
    }

    async fn run(&self, mut cmd: Command, mount_name: String) -> Result<SpawnedChild> {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| AggregatorError::LaunchFailed(format!("{e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AggregatorError::LaunchFailed("no stdin pipe".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AggregatorError::LaunchFailed("no stdout pipe".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            let handle_for_log = mount_name.clone();
            tokio::spawn(async move {
                use tokio::io::{AsyncBufReadExt, BufReader};
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(handle = %handle_for_log, "child stderr: {line}");
                }
            });
        }

        let handle = child
            .id()
            .map(|pid| pid.to_string())
            .unwrap_or(mount_name);

        Ok(SpawnedChild {
            handle,
            stdin,
            stdout,
            child,
        })
    }
}
