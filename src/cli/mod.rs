// CLI surface: subcommands for running the aggregator and operating on its
// mounts from a shell.

pub mod mount;
pub mod refresh;
pub mod serve;

use clap::{Parser, Subcommand};

pub use mount::{run_list, run_mount, run_unmount};
pub use refresh::run_refresh;
pub use serve::run_serve;

#[derive(Parser)]
#[command(name = "mcp-aggregator")]
#[command(about = "Mounts other MCP servers at runtime and re-exposes their tools")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the aggregator's MCP server over stdio (default).
    Serve,

    /// Activate a catalog entry as a mount.
    Mount {
        /// Catalog entry slug.
        entry_id: String,

        /// Tool-name prefix to use instead of one derived from the entry id.
        #[arg(short, long)]
        prefix: Option<String>,
    },

    /// Deactivate an active mount.
    Unmount {
        /// Catalog entry slug.
        entry_id: String,
    },

    /// List active mounts.
    List,

    /// Refresh the catalog from one configured source, or all of them.
    Refresh {
        /// Source name; refreshes every configured source if omitted.
        source: Option<String>,

        /// Refresh even if the source was refreshed within its minimum interval.
        #[arg(long)]
        force: bool,
    },
}
