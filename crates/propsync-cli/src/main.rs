//! propsync CLI - Offline-first property records from the command line
//!
//! Every command works against the local cache first; changes are queued and
//! delivered to the portfolio API whenever it is reachable.

mod cli;
mod commands;
mod error;


use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::archive::run_set_archived;
use crate::commands::common::{open_client, parse_record_id};
use crate::commands::delete::run_delete;
use crate::commands::dropped::run_dropped;
use crate::commands::list::run_list;
use crate::commands::show::run_show;
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::commands::write::{run_add, run_update};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("propsync=info")),
        )
        .init();

    let cli = Cli::parse();
    let client = open_client(cli.db_path, cli.api_url).await?;
    let online = client.probe_connection().await;
    tracing::debug!("API reachable: {}", online);

    match cli.command {
        Commands::List { archived, json } => run_list(&client, archived, json).await?,
        Commands::Show { id, json } => run_show(&client, &parse_record_id(&id)?, json).await?,
        Commands::Add { fields } => {
            run_add(&client, &fields).await?;
        }
        Commands::Update { id, fields } => {
            run_update(&client, &parse_record_id(&id)?, &fields).await?;
        }
        Commands::Delete { id } => run_delete(&client, &parse_record_id(&id)?).await?,
        Commands::Archive { id } => run_set_archived(&client, &parse_record_id(&id)?, true).await?,
        Commands::Unarchive { id } => {
            run_set_archived(&client, &parse_record_id(&id)?, false).await?;
        }
        Commands::Sync => run_sync(&client).await?,
        Commands::Status { json } => run_status(&client, json).await?,
        Commands::Dropped { json, clear } => run_dropped(&client, json, clear).await?,
    }

    // Reads may have started a background sync; let it finish before exiting
    client.wait_idle().await;
    Ok(())
}
