// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! In-memory store implementation using moka.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use moka::{Expiry, future::Cache};
use shardcache_store::{CacheStore, Error};

use crate::builder::MemoryStoreBuilder;

#[derive(Debug, Clone)]
struct StoredValue {
    payload: Bytes,
    ttl: Duration,
}

/// Expires every entry after the TTL it was last written with.
struct PerEntryTtl;

impl Expiry<String, StoredValue> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &StoredValue, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// An in-process [`CacheStore`] backed by moka.
///
/// Clones share the same underlying storage.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use shardcache_memory::MemoryStore;
/// use shardcache_store::CacheStore;
/// use std::time::Duration;
///
/// # futures::executor::block_on(async {
/// let store = MemoryStore::new();
///
/// let ttl = Duration::from_secs(60);
/// assert!(store.set_if_absent("key", Bytes::from_static(b"*"), ttl).await.unwrap());
/// assert!(!store.set_if_absent("key", Bytes::from_static(b"1"), ttl).await.unwrap());
/// assert_eq!(store.ttl("key").await, Some(ttl));
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Cache<String, StoredValue>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates a new unbounded in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a new builder for configuring an in-memory store.
    #[must_use]
    pub fn builder() -> MemoryStoreBuilder {
        MemoryStoreBuilder::new()
    }

    pub(crate) fn from_builder(builder: &MemoryStoreBuilder) -> Self {
        let mut moka_builder = Cache::builder().expire_after(PerEntryTtl);

        if let Some(capacity) = builder.max_capacity {
            moka_builder = moka_builder.max_capacity(capacity);
        }

        if let Some(capacity) = builder.initial_capacity {
            moka_builder = moka_builder.initial_capacity(capacity);
        }

        if let Some(name) = builder.name.as_deref() {
            moka_builder = moka_builder.name(name);
        }

        Self {
            inner: Arc::new(moka_builder.build()),
        }
    }

    /// Returns the TTL `key` was last written with, if it is still live.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        self.inner.get(key).await.map(|value| value.ttl)
    }

    /// Returns the approximate number of live entries.
    ///
    /// Pending maintenance is flushed first so recent writes and removals are counted.
    pub async fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks().await;
        self.inner.entry_count()
    }
}

impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, Error> {
        Ok(self.inner.get(key).await.map(|value| value.payload))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), Error> {
        self.inner.insert(key.to_string(), StoredValue { payload: value, ttl }).await;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool, Error> {
        let entry = self
            .inner
            .entry_by_ref(key)
            .or_insert_with(async move { StoredValue { payload: value, ttl } })
            .await;
        Ok(entry.is_fresh())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, Error> {
        let mut removed = 0;
        for key in keys {
            if self.inner.remove(key.as_str()).await.is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
