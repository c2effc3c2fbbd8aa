//! Pagora CLI - migrations and scheduled checkout maintenance.
//!
//! # Usage
//!
//! ```bash
//! # Run checkout database migrations
//! pagora migrate
//!
//! # Reconcile pending orders older than two hours
//! pagora reconcile-stale --older-than-minutes 120
//!
//! # Release expired stock reservations
//! pagora release-reservations
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `reconcile-stale` - Settle stale pending orders against their provider
//! - `release-reservations` - Sweep expired reservations

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

use commands::client::ServiceClient;

#[derive(Parser)]
#[command(name = "pagora")]
#[command(author, version, about = "Pagora checkout operator tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run checkout database migrations
    Migrate,
    /// Reconcile pending orders that never received a payment outcome
    ReconcileStale {
        /// Only orders created at least this many minutes ago
        #[arg(long, default_value_t = 120)]
        older_than_minutes: u32,

        /// Maximum orders per run
        #[arg(long, default_value_t = 100)]
        limit: u32,
    },
    /// Release stock reservations whose TTL has elapsed
    ReleaseReservations,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::checkout().await?,
        Commands::ReconcileStale {
            older_than_minutes,
            limit,
        } => {
            let client = ServiceClient::from_env()?;
            let report = commands::reconcile::stale(&client, older_than_minutes, limit).await?;
            if report.succeeded < report.attempted {
                return Err(format!("some orders failed to reconcile: {report}").into());
            }
        }
        Commands::ReleaseReservations => {
            let client = ServiceClient::from_env()?;
            commands::reservations::release_expired(&client).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_reconcile_defaults() {
        let cli = Cli::try_parse_from(["pagora", "reconcile-stale"]).unwrap_or_else(|e| panic!("{e}"));
        match cli.command {
            Commands::ReconcileStale {
                older_than_minutes,
                limit,
            } => {
                assert_eq!(older_than_minutes, 120);
                assert_eq!(limit, 100);
            }
            _ => panic!("wrong subcommand"),
        }
    }
}
