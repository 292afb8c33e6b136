// `refresh` subcommand: force a catalog refresh from the CLI rather than
// waiting for the background scheduler's next tick.

use anyhow::{bail, Result};

use super::serve::bootstrap;

pub async fn run_refresh(source: Option<String>, force: bool) -> Result<()> {
    let app = bootstrap().await?;

    let names: Vec<String> = match source {
        Some(name) => vec![name],
        None => app
            .config
            .file
            .catalog
            .sources
            .iter()
            .map(|s| s.name.clone())
            .collect(),
    };

    if names.is_empty() {
        bail!("no catalog sources configured");
    }

    for name in names {
        let count = app.scheduler.force_refresh(&name, force).await?;
        println!("{name}: {count} entries");
    }
    Ok(())
}
