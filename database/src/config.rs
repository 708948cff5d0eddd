//! # Ledger Configuration
//!
//! Configuration structures for database connections, caching, webhook
//! verification and background workers. Provides environment-based
//! configuration with validation and defaults.

use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Database configuration for PostgreSQL connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    pub min_connections: u32,
    /// Connection acquisition timeout
    pub acquire_timeout: Duration,
    /// Connection idle timeout
    pub idle_timeout: Duration,
    /// Connection max lifetime
    pub max_lifetime: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost:5432/fanledger".to_string()),
            max_connections: 20,
            min_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// Redis cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Redis connection URL
    pub redis_url: String,
    /// Default TTL for cache entries
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            default_ttl: Duration::from_secs(3600),
        }
    }
}

/// Webhook ingestion configuration
#[derive(Clone)]
pub struct WebhookConfig {
    /// Shared secret for HMAC-SHA256 signature verification. When unset,
    /// verification is skipped with a loud warning; production deployments
    /// are expected to set it.
    pub shared_secret: Option<Secret<String>>,
    /// Confirmations required before a deposit is queued for crediting
    pub confirmation_threshold: u32,
    /// TTL for the Redis deposit de-duplication token
    pub dedupe_token_ttl: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            shared_secret: std::env::var("WEBHOOK_SHARED_SECRET")
                .ok()
                .filter(|s| !s.is_empty())
                .map(Secret::new),
            confirmation_threshold: env_or("DEPOSIT_CONFIRMATION_THRESHOLD", 12),
            dedupe_token_ttl: Duration::from_secs(env_or("DEPOSIT_DEDUPE_TTL_SECS", 86_400)),
        }
    }
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field(
                "shared_secret",
                &self.shared_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("confirmation_threshold", &self.confirmation_threshold)
            .field("dedupe_token_ttl", &self.dedupe_token_ttl)
            .finish()
    }
}

impl WebhookConfig {
    /// Exposes the shared secret bytes for signing, if configured
    pub fn secret_bytes(&self) -> Option<&[u8]> {
        self.shared_secret
            .as_ref()
            .map(|s| s.expose_secret().as_bytes())
    }
}

/// Background worker and retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of deposit-crediting workers
    pub deposit_workers: usize,
    /// Number of withdrawal-payout workers
    pub withdrawal_workers: usize,
    /// Bounded capacity of each task queue
    pub queue_capacity: usize,
    /// Maximum verification attempts per deposit task
    pub retry_max_attempts: u32,
    /// First retry delay; doubles per attempt
    pub retry_base_delay: Duration,
    /// Upper bound for the exponential backoff
    pub retry_max_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            deposit_workers: env_or("DEPOSIT_WORKERS", 2),
            withdrawal_workers: env_or("WITHDRAWAL_WORKERS", 2),
            queue_capacity: env_or("TASK_QUEUE_CAPACITY", 256),
            retry_max_attempts: env_or("DEPOSIT_RETRY_MAX_ATTEMPTS", 5),
            retry_base_delay: Duration::from_secs(env_or("DEPOSIT_RETRY_BASE_DELAY_SECS", 2)),
            retry_max_delay: Duration::from_secs(env_or("DEPOSIT_RETRY_MAX_DELAY_SECS", 60)),
        }
    }
}

/// Master configuration structure
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Database configuration
    pub database: DatabaseConfig,
    /// Cache configuration
    pub cache: CacheConfig,
    /// Webhook ingestion configuration
    pub webhook: WebhookConfig,
    /// Worker pool configuration
    pub workers: WorkerConfig,
    /// Environment (development, staging, production)
    pub environment: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            cache: CacheConfig::default(),
            webhook: WebhookConfig::default(),
            workers: WorkerConfig::default(),
            environment: "development".to_string(),
        }
    }
}

impl LedgerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let environment =
            std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        Ok(Self {
            environment,
            ..Default::default()
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.database_url.is_empty() {
            return Err(anyhow::anyhow!("Database URL cannot be empty"));
        }

        if self.database.max_connections < self.database.min_connections {
            return Err(anyhow::anyhow!(
                "Max connections must be >= min connections"
            ));
        }

        if self.cache.redis_url.is_empty() {
            return Err(anyhow::anyhow!("Redis URL cannot be empty"));
        }

        if self.webhook.confirmation_threshold == 0 {
            return Err(anyhow::anyhow!(
                "Deposit confirmation threshold must be at least 1"
            ));
        }

        if self.workers.deposit_workers == 0 || self.workers.withdrawal_workers == 0 {
            return Err(anyhow::anyhow!("Worker pools need at least one worker"));
        }

        if self.workers.queue_capacity == 0 {
            return Err(anyhow::anyhow!("Task queue capacity must be at least 1"));
        }

        if self.workers.retry_max_attempts == 0 {
            return Err(anyhow::anyhow!("Retry attempts must be at least 1"));
        }

        if self.workers.retry_base_delay > self.workers.retry_max_delay {
            return Err(anyhow::anyhow!(
                "Retry base delay cannot exceed the max delay"
            ));
        }

        if self.webhook.shared_secret.is_none() {
            warn!(
                "WEBHOOK_SHARED_SECRET is not set; webhook signature verification is DISABLED"
            );
        }

        Ok(())
    }

    /// Check if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    /// Check if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Parses an environment variable, falling back to `default` when the
/// variable is unset or unparsable.
fn env_or<T: FromStr + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, raw = %raw, "unparsable environment value, using default");
            default
        }),
        Err(_) => default,
    }
}
