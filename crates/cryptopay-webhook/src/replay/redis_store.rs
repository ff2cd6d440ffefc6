//! Redis-backed replay store shared by several listener instances.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use cryptopay_core::ReplayKey;
use redis::aio::MultiplexedConnection;

use super::{ReplayStore, ReplayStoreError};

/// Replay store using `SET key 1 NX PX ttl` for atomic registration.
#[derive(Clone)]
pub struct RedisReplayStore {
    connection: MultiplexedConnection,
    prefix: String,
}

impl fmt::Debug for RedisReplayStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisReplayStore").field("prefix", &self.prefix).finish_non_exhaustive()
    }
}

impl RedisReplayStore {
    /// Connects to `url`, namespacing every key under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns `ReplayStoreError::Unavailable` if the URL is invalid or the
    /// server cannot be reached.
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, ReplayStoreError> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let connection = client.get_multiplexed_async_connection().await.map_err(unavailable)?;
        Ok(Self { connection, prefix: prefix.into() })
    }

    fn redis_key(&self, key: &ReplayKey) -> String {
        format!("{}:replay:{}", self.prefix, key)
    }
}

fn unavailable(error: redis::RedisError) -> ReplayStoreError {
    ReplayStoreError::Unavailable(error.to_string())
}

#[async_trait]
impl ReplayStore for RedisReplayStore {
    async fn try_register(&self, key: &ReplayKey, ttl: Duration) -> Result<bool, ReplayStoreError> {
        let mut connection = self.connection.clone();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        let reply: Option<String> = redis::cmd("SET")
            .arg(self.redis_key(key))
            .arg(1)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut connection)
            .await
            .map_err(unavailable)?;

        // SET NX answers OK when written and nil when the key already exists.
        Ok(reply.is_some())
    }

    async fn forget(&self, key: &ReplayKey) -> Result<(), ReplayStoreError> {
        let mut connection = self.connection.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(self.redis_key(key))
            .query_async(&mut connection)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ReplayStoreError> {
        let mut connection = self.connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut connection).await.map_err(unavailable)?;
        Ok(())
    }
}
