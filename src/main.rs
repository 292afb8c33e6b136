use anyhow::Result;
use clap::Parser;

use mcp_aggregator::cli::{run_list, run_mount, run_refresh, run_serve, run_unmount, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging always goes to stderr: stdout carries the JSON-RPC stream
    // when running as a server.
    let filter = tracing_subscriber::EnvFilter::try_from_env("MCP_AGGREGATOR_LOG")
        .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        None | Some(Commands::Serve) => run_serve().await,
        Some(Commands::Mount { entry_id, prefix }) => run_mount(entry_id, prefix).await,
        Some(Commands::Unmount { entry_id }) => run_unmount(entry_id).await,
        Some(Commands::List) => run_list().await,
        Some(Commands::Refresh { source, force }) => run_refresh(source, force).await,
    }
}
