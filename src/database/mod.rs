//! Persistence for the registration core.
//!
//! [`store`] defines the traits the services are written against. The
//! in-process [`memory`] store always builds; Postgres lives behind the
//! `database` feature.

pub mod error;
pub mod memory;
pub mod store;

#[cfg(feature = "database")]
pub mod email_template_repository;
#[cfg(feature = "database")]
pub mod parent_repository;
#[cfg(feature = "database")]
pub mod payment_configuration_repository;
#[cfg(feature = "database")]
pub mod payment_repository;
#[cfg(feature = "database")]
pub mod player_repository;
#[cfg(feature = "database")]
pub mod postgres;
#[cfg(feature = "database")]
pub mod registration_repository;
#[cfg(feature = "database")]
pub mod repository;
#[cfg(feature = "database")]
pub mod team_repository;
#[cfg(feature = "database")]
pub mod transaction;

pub use error::{DatabaseError, DatabaseErrorKind, DbResult};
pub use memory::MemoryStore;
pub use store::{Document, Store, StoreTx};

#[cfg(feature = "database")]
pub use postgres::{PgStore, PgTx};

#[cfg(feature = "database")]
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
#[cfg(feature = "database")]
use tracing::{error as log_error, info, warn};

/// Database pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            min_connections: 2,
            connection_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// Initialize the database connection pool
#[cfg(feature = "database")]
pub async fn init_pool(database_url: &str, config: Option<PoolConfig>) -> DbResult<PgPool> {
    let config = config.unwrap_or_default();

    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        connection_timeout = ?config.connection_timeout,
        "Initializing database pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connection_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .connect(database_url)
        .await
        .map_err(|e| {
            log_error!("Failed to initialize database pool: {}", e);
            DatabaseError::from_sqlx(e)
        })?;

    info!("Database pool initialized successfully");
    Ok(pool)
}

/// Connection pool health check
#[cfg(feature = "database")]
pub async fn health_check(pool: &PgPool) -> DbResult<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(|e| {
            warn!("Health check failed: {}", e);
            DatabaseError::from_sqlx(e)
        })?;

    Ok(())
}
