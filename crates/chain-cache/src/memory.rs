//! In-memory [`CacheBackend`] with a virtual clock.
//!
//! Backs the gateway and coordinator test suites so they exercise the real
//! key shapes, TTL behavior, and lock semantics without a cache server.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::{CacheBackend, CacheError};

#[derive(Debug, Default)]
struct Inner {
    now: Duration,
    strings: HashMap<String, Entry>,
    // score → member; scores are unique in every keyspace this crate uses
    zsets: HashMap<String, BTreeMap<u64, String>>,
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Duration,
}

impl Inner {
    fn live(&self, key: &str) -> Option<&Entry> {
        self.strings
            .get(key)
            .filter(|entry| entry.expires_at > self.now)
    }
}

/// Shared, clonable in-memory backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBackend {
    /// Move the virtual clock forward, expiring entries whose TTL elapses.
    pub fn advance(&self, by: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.now += by;
    }
}

impl CacheBackend for MemoryBackend {
    async fn get(&self, key: String) -> Result<Option<String>, CacheError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.live(&key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: String, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut inner = self.inner.lock().unwrap();
        let expires_at = inner.now + ttl;
        inner.strings.insert(key, Entry { value, expires_at });
        Ok(())
    }

    async fn set_many(
        &self,
        entries: Vec<(String, String)>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut inner = self.inner.lock().unwrap();
        let expires_at = inner.now + ttl;
        for (key, value) in entries {
            inner.strings.insert(key, Entry { value, expires_at });
        }
        Ok(())
    }

    async fn set_nx(&self, key: String, value: String, ttl: Duration) -> Result<bool, CacheError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.live(&key).is_some() {
            return Ok(false);
        }
        let expires_at = inner.now + ttl;
        inner.strings.insert(key, Entry { value, expires_at });
        Ok(true)
    }

    async fn del(&self, keys: Vec<String>) -> Result<(), CacheError> {
        let mut inner = self.inner.lock().unwrap();
        for key in keys {
            inner.strings.remove(&key);
        }
        Ok(())
    }

    async fn zadd(&self, key: String, members: Vec<(u64, String)>) -> Result<(), CacheError> {
        let mut inner = self.inner.lock().unwrap();
        let zset = inner.zsets.entry(key).or_default();
        for (score, member) in members {
            zset.insert(score, member);
        }
        Ok(())
    }

    async fn zrevrangebyscore(
        &self,
        key: String,
        min: u64,
        max: u64,
    ) -> Result<Vec<String>, CacheError> {
        let inner = self.inner.lock().unwrap();
        let Some(zset) = inner.zsets.get(&key) else {
            return Ok(Vec::new());
        };
        Ok(zset.range(min..=max).rev().map(|(_, member)| member.clone()).collect())
    }

    async fn zremrangebyscore(&self, key: String, min: u64, max: u64) -> Result<(), CacheError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(zset) = inner.zsets.get_mut(&key) {
            let doomed: Vec<u64> = zset.range(min..=max).map(|(score, _)| *score).collect();
            for score in doomed {
                zset.remove(&score);
            }
        }
        Ok(())
    }
}
