// `mount` / `unmount` / `list` subcommands.

use anyhow::Result;

use super::serve::bootstrap;
use crate::orchestrator::ActivateRequest;

pub async fn run_mount(entry_id: String, prefix: Option<String>) -> Result<()> {
    let app = bootstrap().await?;
    let mount = app
        .orchestrator
        .activate(ActivateRequest {
            entry_id,
            prefix,
            environment: Default::default(),
        })
        .await?;
    println!(
        "mounted {} as prefix '{}' ({} tools)",
        mount.entry_id,
        mount.prefix,
        mount.tools.len()
    );
    Ok(())
}

pub async fn run_unmount(entry_id: String) -> Result<()> {
    let app = bootstrap().await?;
    app.orchestrator.deactivate(&entry_id).await?;
    println!("unmounted {entry_id}");
    Ok(())
}

pub async fn run_list() -> Result<()> {
    let app = bootstrap().await?;
    let mounts = app.store.list().await;
    if mounts.is_empty() {
        println!("no active mounts");
        return Ok(());
    }
    for mount in mounts {
        println!(
            "{}  prefix={}  tools={}  handle={}",
            mount.entry_id,
            mount.prefix,
            mount.tools.len(),
            mount.container_or_process_handle
        );
    }
    Ok(())
}
