//! Thin wrapper around the pooled Redis connection used by `flowq`.
//!
//! This mirrors the role the teacher crate's own Redis wrapper plays: a single place that owns
//! pool configuration and connection checkout, so the queue engine itself never touches
//! `deadpool_redis` or `redis::Client` construction directly.

mod error;

use std::{env, ops::Deref, sync::Arc};

pub use error::Error;
pub use redis;

/// A cloneable handle to a Redis connection pool plus a dedicated client for pub/sub.
///
/// Pooled connections in `deadpool_redis` are multiplexed and unsuitable for `SUBSCRIBE`, which
/// monopolizes a connection for message delivery. `pubsub_connection` hands out a fresh,
/// non-pooled connection from the underlying client for that purpose.
#[derive(Clone)]
pub struct RedisPool(Arc<RedisPoolInner>);

struct RedisPoolInner {
    pool: deadpool_redis::Pool,
    client: redis::Client,
    key_prefix: Option<String>,
}

impl Deref for RedisPool {
    type Target = deadpool_redis::Pool;

    fn deref(&self) -> &Self::Target {
        &self.0.pool
    }
}

impl RedisPool {
    /// Build a pool. `connection` defaults to the `REDIS_URL` environment variable when absent.
    pub fn new(connection: Option<String>, key_prefix: Option<String>) -> Result<RedisPool, Error> {
        let redis_url = connection
            .or_else(|| env::var("REDIS_URL").ok())
            .ok_or_else(|| Error::Config("REDIS_URL is required".to_string()))?;

        let client = redis::Client::open(redis_url.as_str())?;
        let pool = deadpool_redis::Config {
            url: Some(redis_url),
            connection: None,
            pool: None,
        }
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))?;

        Ok(RedisPool(Arc::new(RedisPoolInner {
            pool,
            client,
            key_prefix,
        })))
    }

    pub fn pool(&self) -> &deadpool_redis::Pool {
        &self.0.pool
    }

    pub fn key_prefix(&self) -> Option<&str> {
        self.0.key_prefix.as_deref()
    }

    /// Check out a pooled connection for ordinary commands, scripts and pipelines.
    pub async fn get(&self) -> Result<deadpool_redis::Connection, Error> {
        Ok(self.0.pool.get().await?)
    }

    /// Open a dedicated connection suitable for `SUBSCRIBE`/`UNSUBSCRIBE`.
    pub async fn pubsub(&self) -> Result<redis::aio::PubSub, Error> {
        let conn = self.0.client.get_async_connection().await?;
        Ok(conn.into_pubsub())
    }
}
