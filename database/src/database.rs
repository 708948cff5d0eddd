//! # PostgreSQL Database Integration
//!
//! PostgreSQL integration using SQLx with connection pooling and
//! transaction support. Every financial mutation in the ledger runs inside
//! a transaction obtained from this pool.

use anyhow::Result;
use futures_util::future::BoxFuture;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Transaction};
use tracing::{debug, error, info, instrument};

use crate::config::DatabaseConfig;
use crate::error::DatabaseResult;

/// Database manager for PostgreSQL operations
#[derive(Debug)]
pub struct DatabaseManager {
    pool: PgPool,
    config: DatabaseConfig,
}

impl DatabaseManager {
    /// Create a new database manager with the given configuration
    #[instrument(skip(config))]
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        info!("Initializing database connection pool");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(&config.database_url)
            .await?;

        // Test the connection
        let version: String = sqlx::query_scalar("SELECT version()")
            .fetch_one(&pool)
            .await?;

        info!("Connected to PostgreSQL: {}", version);

        Ok(Self { pool, config })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Execute a closure inside a transaction; commits on `Ok`, rolls back
    /// on `Err`.
    pub async fn execute_transaction<F, T>(&self, operation: F) -> DatabaseResult<T>
    where
        F: for<'c> FnOnce(&'c mut Transaction<'static, Postgres>) -> BoxFuture<'c, DatabaseResult<T>>,
    {
        debug!("Starting database transaction");

        let mut tx = self.pool.begin().await?;

        match operation(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                debug!("Transaction committed");
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    error!("Transaction rollback failed: {}", rollback_err);
                }
                Err(err)
            }
        }
    }

    /// Check database health
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<()> {
        debug!("Performing database health check");

        let result: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;

        if result == 1 {
            debug!("Database health check passed");
            Ok(())
        } else {
            error!("Database health check failed");
            Err(anyhow::anyhow!("Health check returned unexpected result"))
        }
    }

    /// Get the current database configuration
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Get connection pool size
    pub fn pool_size(&self) -> u32 {
        self.pool.size()
    }

    /// Get number of idle connections
    pub fn idle_connections(&self) -> u32 {
        self.pool.num_idle() as u32
    }
}
