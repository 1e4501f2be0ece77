//! Redis-backed [`CacheBackend`].
//!
//! The `redis` client is blocking; every command runs on a dedicated
//! blocking thread so cache calls stay suspension points rather than
//! stalls for the async runtime.

use std::{sync::Arc, time::Duration};

use tracing::warn;

use crate::{CacheBackend, CacheError};

#[derive(Debug, Clone)]
pub struct RedisCacheBackend {
    client: Arc<redis::Client>,
}

impl RedisCacheBackend {
    /// Open a client from a connection URL (`redis://host:port`).
    pub fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client: Arc::new(client),
        })
    }

    /// Execute a synchronous command on a blocking thread.
    async fn with_connection<T, F>(&self, func: F) -> Result<T, CacheError>
    where
        T: Send + 'static,
        F: FnOnce(&mut redis::Connection) -> Result<T, redis::RedisError> + Send + 'static,
    {
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = client.get_connection()?;
            func(&mut conn)
        })
        .await
        .map_err(|err| {
            warn!(error = %err, "cache command task failed");
            CacheError::Task(err.to_string())
        })?
        .map_err(CacheError::from)
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

impl CacheBackend for RedisCacheBackend {
    async fn get(&self, key: String) -> Result<Option<String>, CacheError> {
        self.with_connection(move |conn| redis::cmd("GET").arg(&key).query(conn))
            .await
    }

    async fn set(&self, key: String, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.with_connection(move |conn| {
            redis::cmd("SET")
                .arg(&key)
                .arg(&value)
                .arg("EX")
                .arg(ttl_secs(ttl))
                .query(conn)
        })
        .await
    }

    async fn set_many(
        &self,
        entries: Vec<(String, String)>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.with_connection(move |conn| {
            let mut pipe = redis::pipe();
            for (key, value) in &entries {
                pipe.cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("EX")
                    .arg(ttl_secs(ttl))
                    .ignore();
            }
            pipe.query(conn)
        })
        .await
    }

    async fn set_nx(&self, key: String, value: String, ttl: Duration) -> Result<bool, CacheError> {
        self.with_connection(move |conn| {
            let planted: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(&value)
                .arg("NX")
                .arg("EX")
                .arg(ttl_secs(ttl))
                .query(conn)?;
            Ok(planted.is_some())
        })
        .await
    }

    async fn del(&self, keys: Vec<String>) -> Result<(), CacheError> {
        if keys.is_empty() {
            return Ok(());
        }
        self.with_connection(move |conn| redis::cmd("DEL").arg(&keys).query(conn))
            .await
    }

    async fn zadd(&self, key: String, members: Vec<(u64, String)>) -> Result<(), CacheError> {
        if members.is_empty() {
            return Ok(());
        }
        self.with_connection(move |conn| {
            let mut cmd = redis::cmd("ZADD");
            cmd.arg(&key);
            for (score, member) in &members {
                cmd.arg(*score).arg(member);
            }
            cmd.query(conn)
        })
        .await
    }

    async fn zrevrangebyscore(
        &self,
        key: String,
        min: u64,
        max: u64,
    ) -> Result<Vec<String>, CacheError> {
        self.with_connection(move |conn| {
            redis::cmd("ZREVRANGEBYSCORE")
                .arg(&key)
                .arg(max)
                .arg(min)
                .query(conn)
        })
        .await
    }

    async fn zremrangebyscore(&self, key: String, min: u64, max: u64) -> Result<(), CacheError> {
        self.with_connection(move |conn| {
            redis::cmd("ZREMRANGEBYSCORE")
                .arg(&key)
                .arg(min)
                .arg(max)
                .query(conn)
        })
        .await
    }
}
