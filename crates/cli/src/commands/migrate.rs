//! Database migration command.
//!
//! # Usage
//!
//! ```bash
//! pagora migrate
//! ```
//!
//! # Environment Variables
//!
//! - `CHECKOUT_DATABASE_URL` - `PostgreSQL` connection string (falls back to
//!   `DATABASE_URL`)
//!
//! # Migration Files
//!
//! `crates/checkout/migrations/`, named `YYYYMMDDNNNNNN_description.sql`.

use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Run the checkout database migrations.
///
/// # Errors
///
/// Returns `MigrationError` if the URL is missing, the database is unreachable,
/// or a migration fails.
pub async fn checkout() -> Result<(), MigrationError> {
    let database_url = database_url()?;

    tracing::info!("Connecting to checkout database...");
    let pool = PgPool::connect(database_url.expose_secret()).await?;

    tracing::info!("Running checkout migrations...");
    sqlx::migrate!("../checkout/migrations").run(&pool).await?;

    tracing::info!("Checkout migrations complete");
    Ok(())
}

fn database_url() -> Result<SecretString, MigrationError> {
    std::env::var("CHECKOUT_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map(SecretString::from)
        .map_err(|_| MigrationError::MissingEnvVar("CHECKOUT_DATABASE_URL"))
}
