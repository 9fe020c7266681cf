// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Read-through caching on a single backend node.

use std::{fmt, sync::Arc, time::Duration};

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use shardcache_store::CacheStore;
use uniflight::UniFlight;

use crate::{
    Error, Result,
    cleanup::Cleaner,
    config::CacheOptions,
    jitter::Unstable,
    stat::Stat,
};

/// Payload cached for keys the loader reported as absent. Never valid JSON.
pub(crate) const PLACEHOLDER: &[u8] = b"*";

enum Cached<V> {
    Value(V, Bytes),
    Placeholder,
    Missing,
}

/// A cache in front of one backend store.
///
/// A node serializes values as JSON, jitters every TTL, caches absence placeholders for
/// keys the loader does not know, and coalesces concurrent loads of the same key.
///
/// # Examples
///
/// ```
/// use shardcache::{CacheOptions, Cleaner, Node};
/// use shardcache_memory::MemoryStore;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> shardcache::Result<()> {
/// let cleaner = Arc::new(Cleaner::default());
/// let node = Node::new("users", "local", MemoryStore::new(), &CacheOptions::default(), cleaner);
///
/// let name: String = node
///     .take("user:1", || async { Ok::<_, std::io::Error>(Some("alice".to_string())) })
///     .await?;
/// assert_eq!(name, "alice");
///
/// // Served from the cache, the loader is not called again.
/// let cached: String = node.get("user:1").await?;
/// assert_eq!(cached, "alice");
/// # Ok(())
/// # }
/// ```
pub struct Node<S> {
    address: String,
    store: Arc<S>,
    flight: UniFlight<String, Result<Bytes>>,
    stat: Arc<Stat>,
    cleaner: Arc<Cleaner>,
    unstable: Unstable,
    expiry: Duration,
    not_found_expiry: Duration,
    flight_timeout: Option<Duration>,
    strict_delete: bool,
}

impl<S> fmt::Debug for Node<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("address", &self.address)
            .field("expiry", &self.expiry)
            .field("not_found_expiry", &self.not_found_expiry)
            .field("flight_timeout", &self.flight_timeout)
            .field("strict_delete", &self.strict_delete)
            .finish_non_exhaustive()
    }
}

impl<S> Node<S> {
    /// The address this node was registered with.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Lookup counters of this node.
    #[must_use]
    pub fn stat(&self) -> &Stat {
        &self.stat
    }

    /// The backend store of this node.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S> Node<S>
where
    S: CacheStore + 'static,
{
    /// Creates a node of cache `name` in front of `store`.
    ///
    /// Failed deletes are handed to `cleaner`. When called inside a tokio runtime, hit and
    /// miss counters are logged every [`CacheOptions::stat_interval`].
    pub fn new(name: &str, address: impl Into<String>, store: S, options: &CacheOptions, cleaner: Arc<Cleaner>) -> Self {
        let address = address.into();
        let stat = Arc::new(Stat::new(name, address.clone()));
        Stat::start_reporting(&stat, options.stat_interval);

        Self {
            address,
            store: Arc::new(store),
            flight: UniFlight::new(),
            stat,
            cleaner,
            unstable: Unstable::new(options.deviation),
            expiry: options.expiry,
            not_found_expiry: options.not_found_expiry,
            flight_timeout: options.flight_timeout,
            strict_delete: options.strict_delete,
        }
    }

    /// Reads and deserializes the value cached under `key`.
    ///
    /// Returns [`Error::NotFound`] when the key is absent, holds an absence placeholder,
    /// or holds a payload that no longer deserializes. Corrupted payloads are logged and
    /// deleted so the next [`Node::take`] reloads them.
    pub async fn get<V>(&self, key: &str) -> Result<V>
    where
        V: DeserializeOwned,
    {
        match self.read(key).await? {
            Cached::Value(value, _) => Ok(value),
            Cached::Placeholder | Cached::Missing => Err(Error::NotFound),
        }
    }

    /// Caches `value` under `key` for the default expiry, jittered.
    pub async fn set<V>(&self, key: &str, value: &V) -> Result<()>
    where
        V: Serialize + ?Sized,
    {
        self.set_with_expire(key, value, self.expiry).await
    }

    /// Caches `value` under `key` for `ttl`, jittered.
    pub async fn set_with_expire<V>(&self, key: &str, value: &V, ttl: Duration) -> Result<()>
    where
        V: Serialize + ?Sized,
    {
        let payload = encode(value)?;
        self.write(key, payload, ttl).await
    }

    /// Deletes `keys`.
    ///
    /// A backend failure is logged and the delete is retried in the background. The
    /// failure is only returned when strict deletes are enabled.
    pub async fn del<K>(&self, keys: &[K]) -> Result<()>
    where
        K: AsRef<str>,
    {
        if keys.is_empty() {
            return Ok(());
        }
        self.del_owned(keys.iter().map(|key| key.as_ref().to_string()).collect()).await
    }

    /// Returns the value cached under `key`, loading and caching it on a miss.
    ///
    /// Concurrent calls for the same key share one execution of `load`. The loader
    /// returns `Ok(None)` when the source of truth has no such key; an absence
    /// placeholder is then cached and [`Error::NotFound`] returned. Loader errors are
    /// returned as [`Error::Load`] and nothing is cached.
    ///
    /// A backend read failure is returned without calling the loader.
    pub async fn take<V, F, Fut, E>(&self, key: &str, load: F) -> Result<V>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<V>, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let expiry = self.expiry;
        self.do_take(key, || async move {
            load().await.map(|found| found.map(|value| (value, expiry))).map_err(Error::load)
        })
        .await
    }

    /// Like [`Node::take`], but the loader decides how long the value stays cached.
    ///
    /// The loader receives the default expiry and returns the TTL to cache the value
    /// with; the TTL is jittered like any other.
    pub async fn take_with_expire<V, F, Fut, E>(&self, key: &str, load: F) -> Result<V>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce(Duration) -> Fut,
        Fut: Future<Output = std::result::Result<Option<(V, Duration)>, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let expiry = self.expiry;
        self.do_take(key, || async move { load(expiry).await.map_err(Error::load) }).await
    }

    pub(crate) async fn del_owned(&self, keys: Vec<String>) -> Result<()> {
        let Err(error) = self.store.delete(&keys).await else {
            return Ok(());
        };

        tracing::error!(cache.node = %self.address, cache.keys = ?keys, error = %error, "cache.delete_failed");

        let store = Arc::clone(&self.store);
        let retry_keys = keys.clone();
        self.cleaner.schedule(keys, move || {
            let store = Arc::clone(&store);
            let keys = retry_keys.clone();
            async move { store.delete(&keys).await.map(|_| ()) }
        });

        if self.strict_delete { Err(Error::Backend(error)) } else { Ok(()) }
    }

    async fn do_take<V, F, Fut>(&self, key: &str, load: F) -> Result<V>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<(V, Duration)>>>,
    {
        let mut fresh = None;
        let fresh_slot = &mut fresh;
        let flight = self.flight.work(key.to_string(), move || async move {
            match self.read::<V>(key).await? {
                Cached::Value(value, payload) => {
                    *fresh_slot = Some(value);
                    Ok(payload)
                }
                Cached::Placeholder => Err(Error::NotFound),
                Cached::Missing => {
                    let (value, payload) = self.load_through(key, load).await?;
                    *fresh_slot = Some(value);
                    Ok(payload)
                }
            }
        });

        let shared = match self.flight_timeout {
            Some(timeout) => tokio::time::timeout(timeout, flight)
                .await
                .map_err(|_elapsed| Error::FlightTimeout(timeout))?,
            None => flight.await,
        };

        if let Some(value) = fresh {
            return Ok(value);
        }

        // Only a follower gets here with a payload: the leader always fills `fresh`
        // before sharing one. Shared errors are not counted, the leader already did.
        let payload = shared?;
        self.stat.increment_total();
        self.stat.increment_hit();
        serde_json::from_slice(&payload).map_err(Error::decode)
    }

    async fn load_through<V, F, Fut>(&self, key: &str, load: F) -> Result<(V, Bytes)>
    where
        V: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<(V, Duration)>>>,
    {
        let loaded = match load().await {
            Ok(loaded) => loaded,
            Err(error) => {
                self.stat.increment_db_fails();
                return Err(error);
            }
        };

        let Some((value, ttl)) = loaded else {
            let ttl = self.unstable.around_duration(self.not_found_expiry);
            if let Err(error) = self.store.set_if_absent(key, Bytes::from_static(PLACEHOLDER), ttl).await {
                tracing::error!(cache.node = %self.address, cache.key = key, error = %error, "cache.placeholder_failed");
            }
            return Err(Error::NotFound);
        };

        let payload = encode(&value)?;
        if let Err(error) = self.write(key, payload.clone(), ttl).await {
            tracing::error!(cache.node = %self.address, cache.key = key, error = %error, "cache.set_failed");
        }
        Ok((value, payload))
    }

    async fn read<V>(&self, key: &str) -> Result<Cached<V>>
    where
        V: DeserializeOwned,
    {
        self.stat.increment_total();

        let payload = match self.store.get(key).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                self.stat.increment_miss();
                return Ok(Cached::Missing);
            }
            Err(error) => {
                self.stat.increment_miss();
                return Err(Error::Backend(error));
            }
        };

        self.stat.increment_hit();
        if payload.as_ref() == PLACEHOLDER {
            return Ok(Cached::Placeholder);
        }

        match serde_json::from_slice(&payload) {
            Ok(value) => Ok(Cached::Value(value, payload)),
            Err(error) => {
                self.heal(key, &payload, &error).await;
                Ok(Cached::Missing)
            }
        }
    }

    async fn heal(&self, key: &str, payload: &[u8], error: &serde_json::Error) {
        tracing::error!(
            cache.node = %self.address,
            cache.key = key,
            cache.value = %String::from_utf8_lossy(payload),
            error = %error,
            "cache.corrupted"
        );

        if let Err(error) = self.store.delete(&[key.to_string()]).await {
            tracing::warn!(cache.node = %self.address, cache.key = key, error = %error, "cache.corrupted.delete_failed");
        }
    }

    async fn write(&self, key: &str, payload: Bytes, ttl: Duration) -> Result<()> {
        let ttl = self.unstable.around_duration(ttl);
        self.store.set(key, payload, ttl).await.map_err(Error::Backend)
    }
}

fn encode<V>(value: &V) -> Result<Bytes>
where
    V: Serialize + ?Sized,
{
    serde_json::to_vec(value).map(Bytes::from).map_err(Error::encode)
}
