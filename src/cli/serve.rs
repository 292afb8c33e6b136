// Server bootstrap and the default `serve` subcommand's stdio loop.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::catalog::{Catalog, JsonFileCatalogSource};
use crate::client_manager::ClientManager;
use crate::config::AggregatorConfig;
use crate::launcher::{Launcher, ProcessLauncher};
use crate::orchestrator::Orchestrator;
use crate::registry::ToolRegistry;
use crate::scheduler::RefreshScheduler;
use crate::store::ActiveMountStore;
use crate::surface::AggregatorSurface;

/// Everything a subcommand needs: loaded config plus the wired-up
/// collaborators. Every subcommand builds one of these, whether it then
/// runs the stdio server or just performs a single mount/unmount/refresh.
pub struct AppContext {
    pub config: AggregatorConfig,
    pub catalog: Arc<Catalog>,
    pub store: Arc<ActiveMountStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub scheduler: Arc<RefreshScheduler>,
    pub surface: AggregatorSurface,
}

/// Load configuration, restore persisted state from disk, and replay any
/// previously-active mounts.
pub async fn bootstrap() -> Result<AppContext> {
    let config = AggregatorConfig::load();
    std::fs::create_dir_all(&config.env.state_dir)?;

    let catalog = Arc::new(Catalog::new(config.catalog_path()));
    catalog.load_from_disk().await?;

    let store = Arc::new(ActiveMountStore::new(config.active_mounts_path()));
    store.load_from_disk().await?;

    let clients = Arc::new(ClientManager::new());
    let surface = AggregatorSurface::new();
    let registry = Arc::new(ToolRegistry::new(Arc::new(surface.clone())));
    let launcher: Arc<dyn Launcher> = Arc::new(ProcessLauncher::new(config.env.container_engine.clone()));

    let orchestrator = Arc::new(Orchestrator::new(
        catalog.clone(),
        store.clone(),
        clients,
        registry,
        launcher,
    ));

    info!("replaying persisted mounts");
    orchestrator.replay_persisted().await;

    let sources = config
        .file
        .catalog
        .sources
        .iter()
        .map(|s| {
            let source: Arc<dyn crate::catalog::CatalogSource> =
                Arc::new(JsonFileCatalogSource::new(s.name.clone(), &s.path));
            source
        })
        .collect();
    let scheduler = Arc::new(RefreshScheduler::new(
        catalog.clone(),
        sources,
        config.refresh_wake_interval(),
        config.refresh_min_interval(),
    ));

    Ok(AppContext {
        config,
        catalog,
        store,
        orchestrator,
        scheduler,
        surface,
    })
}

/// Run as an MCP server over stdio. Blocks until the client disconnects.
pub async fn run_serve() -> Result<()> {
    let app = bootstrap().await?;

    if app.config.env.force_refresh_on_start {
        for source in &app.config.file.catalog.sources {
            if let Err(e) = app.scheduler.force_refresh(&source.name, true).await {
                tracing::warn!(source = %source.name, error = %e, "startup catalog refresh failed");
            }
        }
    }

    let _refresh_handle = app.scheduler.clone().spawn();

    let transport = rmcp::transport::io::stdio();
    let service = rmcp::serve_server(app.surface, transport).await?;
    service.waiting().await?;

    Ok(())
}
