//! # Redis Caching Layer
//!
//! Redis integration for cached reads and webhook de-duplication tokens.
//! The tokens are a best-effort fast path only; the database unique
//! constraints stay authoritative when Redis is unavailable.

use anyhow::Result;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument};

use crate::config::CacheConfig;
use crate::error::DatabaseResult;

/// Redis cache manager with a shared multiplexed connection
pub struct CacheManager {
    client: Client,
    manager: Arc<Mutex<ConnectionManager>>,
    config: CacheConfig,
}

impl CacheManager {
    /// Create a new cache manager with the given configuration
    #[instrument(skip(config), fields(redis_url = %config.redis_url))]
    pub async fn new(config: CacheConfig) -> Result<Self> {
        info!("Initializing Redis cache manager");

        let client = Client::open(config.redis_url.clone())?;
        let connection_manager = ConnectionManager::new(client.clone()).await?;

        // Test the connection
        let mut conn = connection_manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        info!("Redis cache manager initialized successfully");
        Ok(Self {
            client,
            manager: Arc::new(Mutex::new(connection_manager)),
            config,
        })
    }

    /// Get a value from cache by key
    #[instrument(skip(self), fields(key = %key))]
    pub async fn get<T>(&self, key: &str) -> DatabaseResult<Option<T>>
    where
        T: serde::de::DeserializeOwned + Send + Sync,
    {
        let mut conn = self.manager.lock().await;
        let data: Option<Vec<u8>> = conn.get(key).await?;

        match data {
            Some(bytes) => {
                let value: T = serde_json::from_slice(&bytes)?;
                debug!("Cache hit for key: {}", key);
                Ok(Some(value))
            }
            None => {
                debug!("Cache miss for key: {}", key);
                Ok(None)
            }
        }
    }

    /// Set a value in cache with optional TTL
    #[instrument(skip(self, value), fields(key = %key))]
    pub async fn set<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> DatabaseResult<()>
    where
        T: Serialize + Send + Sync,
    {
        let mut conn = self.manager.lock().await;
        let data = serde_json::to_vec(value)?;

        match ttl {
            Some(duration) => {
                let _: () = conn.set_ex(key, data, duration.as_secs()).await?;
            }
            None => {
                let _: () = conn.set(key, data).await?;
            }
        }

        Ok(())
    }

    /// Delete a key from cache
    #[instrument(skip(self), fields(key = %key))]
    pub async fn delete(&self, key: &str) -> DatabaseResult<()> {
        let mut conn = self.manager.lock().await;
        let deleted: u32 = conn.del(key).await?;
        debug!("Deleted {} key(s) from cache", deleted);

        Ok(())
    }

    /// Atomically claims a key (`SET key value NX EX ttl`). Returns `true`
    /// when this call created the key, `false` when it already existed.
    #[instrument(skip(self, value), fields(key = %key))]
    pub async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> DatabaseResult<bool> {
        let mut conn = self.manager.lock().await;

        let outcome: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut *conn)
            .await?;

        let claimed = outcome.is_some();
        debug!("set_if_absent on {}: claimed={}", key, claimed);
        Ok(claimed)
    }

    /// Test cache connectivity
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.manager.lock().await;
        let pong: String = redis::cmd("PING").query_async(&mut *conn).await?;

        if pong == "PONG" {
            debug!("Cache health check passed");
            Ok(())
        } else {
            error!("Cache health check failed");
            Err(anyhow::anyhow!(
                "Cache health check returned unexpected result"
            ))
        }
    }

    /// Get cache configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get raw Redis client for advanced operations
    pub fn client(&self) -> &Client {
        &self.client
    }
}
