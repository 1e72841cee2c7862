use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(
    name = "enrichment-worker",
    version,
    about = "Keeps person records enriched from external providers"
)]
pub struct Cli {
    /// Directory holding the event bus and record store databases.
    #[arg(long, global = true, env = "ENRICH_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Consume enrichment events until interrupted (default if no subcommand given).
    Run,

    /// Publish an `enrichment.new_entity` event (local testing aid).
    Enqueue {
        #[arg(long)]
        email: Option<String>,

        /// LinkedIn handle or profile URL.
        #[arg(long)]
        linkedin: Option<String>,

        #[arg(long)]
        uuid: Option<Uuid>,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        company: Option<String>,

        #[arg(long)]
        position: Option<String>,
    },

    /// Merge records that share an email into the most complete one.
    Reconcile {
        /// Only reconcile this email (else every duplicated email).
        #[arg(long)]
        email: Option<String>,
    },

    /// Print the effective configuration (secrets redacted).
    Config,
}
