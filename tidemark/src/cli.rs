// tidemark/src/cli.rs
//
// Single source of truth for all CLI definitions (Clap structs).

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tidemark")]
#[command(about = "Warehouse metadata, synced to markdown you can grep", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Project directory (where tidemark.yaml lives)
    #[arg(long, global = true, env = "TIDEMARK_PROJECT_DIR", default_value = ".")]
    pub project_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 🔄 Syncs warehouse metadata to per-table markdown files
    Sync {
        /// `databases` or `databases:<connection>` (default: everything)
        selectors: Vec<String>,

        /// Output base directory (overrides tidemark.yaml and TIDEMARK_OUTPUT_DIR)
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Skip rendering project `*.j2` templates after the sync
        #[arg(long, default_value = "false")]
        no_templates: bool,
    },

    /// ⚡ Executes a raw SQL query against a configured connection
    Query {
        sql: String,

        /// Connection name (default: server.connection, else the first one)
        #[arg(long, short)]
        connection: Option<String>,
    },

    /// 🌐 Serves the Query Service over HTTP (+ Slack endpoints)
    Serve {
        #[arg(long, short)]
        connection: Option<String>,

        #[arg(long, env = "PORT")]
        port: Option<u16>,
    },
}
