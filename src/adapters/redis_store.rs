use crate::domain::KeyValueStore;
use crate::utils::error::{FlowError, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::collections::BTreeMap;

fn store_error(e: redis::RedisError) -> FlowError {
    FlowError::StoreError {
        message: e.to_string(),
    }
}

/// Key-value store backed by a Redis server.
#[derive(Clone)]
pub struct RedisStore {
    connection: MultiplexedConnection,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(store_error)?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(store_error)?;
        tracing::info!("🔌 Connected to Redis at {}", url);
        Ok(Self { connection })
    }

    fn conn(&self) -> MultiplexedConnection {
        self.connection.clone()
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        self.conn().exists(key).await.map_err(store_error)
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.conn().del::<_, ()>(key).await.map_err(store_error)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.conn().hget(key, field).await.map_err(store_error)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.conn()
            .hset::<_, _, _, ()>(key, field, value)
            .await
            .map_err(store_error)
    }

    async fn hexists(&self, key: &str, field: &str) -> Result<bool> {
        self.conn().hexists(key, field).await.map_err(store_error)
    }

    async fn hgetall(&self, key: &str) -> Result<BTreeMap<String, String>> {
        self.conn().hgetall(key).await.map_err(store_error)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        self.conn()
            .sadd::<_, _, ()>(key, member)
            .await
            .map_err(store_error)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        self.conn()
            .srem::<_, _, ()>(key, member)
            .await
            .map_err(store_error)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.conn().smembers(key).await.map_err(store_error)
    }
}
