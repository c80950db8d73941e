use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "propsync")]
#[command(about = "Manage property records offline and sync them with the portfolio API")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Base URL of the portfolio API (overrides PROPSYNC_API_URL)
    #[arg(long, global = true, value_name = "URL")]
    pub api_url: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List cached records
    #[command(alias = "ls")]
    List {
        /// Show archived records instead of active ones
        #[arg(long)]
        archived: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one record
    Show {
        /// Record ID (number or temp_ id)
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create a record from key=value fields
    #[command(alias = "new")]
    Add {
        /// Fields, e.g. address="1 Oak St" purchasePrice=250000
        #[arg(required = true, value_name = "KEY=VALUE")]
        fields: Vec<String>,
    },
    /// Change fields of an existing record
    Update {
        /// Record ID (number or temp_ id)
        id: String,
        /// Fields to set; `key=null` clears a field
        #[arg(required = true, value_name = "KEY=VALUE")]
        fields: Vec<String>,
    },
    /// Delete a record
    Delete {
        /// Record ID (number or temp_ id)
        id: String,
    },
    /// Archive a record
    Archive {
        /// Record ID (number or temp_ id)
        id: String,
    },
    /// Restore an archived record
    Unarchive {
        /// Record ID (number or temp_ id)
        id: String,
    },
    /// Push queued changes and pull the latest records
    Sync,
    /// Show connectivity and queue status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show operations dropped after repeated failures
    Dropped {
        /// Output as JSON
        #[arg(long)]
        json: bool,
        /// Empty the dropped-operation list after showing it
        #[arg(long)]
        clear: bool,
    },
}
