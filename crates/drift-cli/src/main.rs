//! drift CLI - provision tables for sync and inspect change tracking
//!
//! A local harness over drift-core: it sets up tracking objects, registers
//! scopes, and dumps pending changes. Shipping changes between peers is the
//! orchestrator's job, not this tool's.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod error;

use commands::changes::{run_changes, run_timestamp};
use commands::provision::{run_deprovision, run_provision};
use commands::scopes::run_scopes;
use commands::status::run_status;
use error::CliError;

#[derive(Parser)]
#[command(name = "drift")]
#[command(about = "Change tracking and sync provisioning for SQLite databases")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the database file
    #[arg(long, value_name = "PATH", global = true, default_value = "drift.db")]
    db_path: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision a table for sync (tracking table, triggers, scope)
    Provision {
        /// Table to track
        table: String,
        /// Scope to register the table under
        #[arg(long, default_value = "default")]
        scope: String,
    },
    /// Remove tracking objects from a table
    Deprovision {
        /// Table to stop tracking
        table: String,
    },
    /// Show provisioning state of a table
    Status {
        /// Table to inspect
        table: String,
    },
    /// List pending changes of a table
    Changes {
        /// Table to read changes from
        table: String,
        /// Only changes with a logical version above this value
        #[arg(long, default_value = "0")]
        since: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List registered scopes and their clients
    Scopes {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the database's current logical clock value
    Timestamp,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("drift=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let db_path = cli.db_path;

    match cli.command {
        Commands::Provision { table, scope } => run_provision(&table, &scope, &db_path).await?,
        Commands::Deprovision { table } => run_deprovision(&table, &db_path).await?,
        Commands::Status { table } => run_status(&table, &db_path).await?,
        Commands::Changes { table, since, json } => {
            run_changes(&table, since, json, &db_path).await?;
        }
        Commands::Scopes { json } => run_scopes(json, &db_path).await?,
        Commands::Timestamp => run_timestamp(&db_path).await?,
    }

    Ok(())
}
