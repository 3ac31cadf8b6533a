use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::info;

use crate::error::ProcessError;

use super::{cache_err, CacheBackend};

/// Redis-backed cache. `ConnectionManager` multiplexes and reconnects on
/// its own, so the backend just clones it per call.
#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self, ProcessError> {
        info!("connecting to redis at {url}");
        let client = redis::Client::open(url).map_err(cache_err)?;
        let manager = ConnectionManager::new(client).await.map_err(cache_err)?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ProcessError> {
        let mut conn = self.manager.clone();
        let value: Option<Vec<u8>> = conn.get(key).await.map_err(cache_err)?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), ProcessError> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .set_ex(key, value, ttl.as_secs().max(1))
            .await
            .map_err(cache_err)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ProcessError> {
        let mut conn = self.manager.clone();
        let _: () = conn.del(key).await.map_err(cache_err)?;
        Ok(())
    }
}
