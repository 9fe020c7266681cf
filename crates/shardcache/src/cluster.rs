// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Routing of cache operations across a sharded cluster.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use serde::{Serialize, de::DeserializeOwned};
use shardcache_store::CacheStore;

use crate::{
    BatchError, Error, Result, ShardFailure,
    builder::CacheBuilder,
    cleanup::Cleaner,
    config::{CacheConfig, NodeConfig},
    node::Node,
    ring::Ring,
};

pub(crate) enum Topology<S> {
    Single(Arc<Node<S>>),
    Sharded {
        ring: Ring<String>,
        nodes: HashMap<String, Arc<Node<S>>>,
    },
}

/// A read-through cache sharded over one or more backend nodes.
///
/// Every single-key operation is routed to the node owning the key on a consistent hash
/// ring; a cache with a single node talks to it directly.
///
/// # Examples
///
/// ```
/// use shardcache::Cache;
/// use shardcache_memory::MemoryStore;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> shardcache::Result<()> {
/// let cache = Cache::builder("users")
///     .node("10.0.0.1:6379", MemoryStore::new(), 100)
///     .node("10.0.0.2:6379", MemoryStore::new(), 100)
///     .build()?;
///
/// cache.set("user:1", "alice").await?;
/// let name: String = cache.get("user:1").await?;
/// assert_eq!(name, "alice");
///
/// cache.del(&["user:1"]).await?;
/// assert!(cache.get::<String>("user:1").await.unwrap_err().is_not_found());
/// # Ok(())
/// # }
/// ```
pub struct Cache<S> {
    name: String,
    topology: Topology<S>,
    cleaner: Arc<Cleaner>,
}

impl<S> fmt::Debug for Cache<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nodes: Vec<&str> = match &self.topology {
            Topology::Single(node) => vec![node.address()],
            Topology::Sharded { nodes, .. } => nodes.keys().map(String::as_str).collect(),
        };
        f.debug_struct("Cache")
            .field("name", &self.name)
            .field("nodes", &nodes)
            .finish_non_exhaustive()
    }
}

impl<S> Cache<S>
where
    S: CacheStore + 'static,
{
    /// Creates a builder for a cache called `name`.
    pub fn builder(name: impl Into<String>) -> CacheBuilder<S> {
        CacheBuilder::new(name)
    }

    /// Builds a cache from deserialized configuration, calling `connect` once per node.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoNodes`] when no node has a positive weight.
    pub fn from_config<F>(config: &CacheConfig, mut connect: F) -> Result<Self>
    where
        F: FnMut(&NodeConfig) -> S,
    {
        let mut builder = Self::builder(config.name.clone()).options(config.options.clone());
        for node in &config.nodes {
            builder = builder.node(node.address.clone(), connect(node), node.weight);
        }
        builder.build()
    }

    pub(crate) fn from_parts(name: String, topology: Topology<S>, cleaner: Arc<Cleaner>) -> Self {
        Self { name, topology, cleaner }
    }

    /// The cache name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The cleaner retrying this cache's failed deletes.
    #[must_use]
    pub fn cleaner(&self) -> &Arc<Cleaner> {
        &self.cleaner
    }

    /// Addresses of every node, in no particular order.
    #[must_use]
    pub fn nodes(&self) -> Vec<&str> {
        match &self.topology {
            Topology::Single(node) => vec![node.address()],
            Topology::Sharded { nodes, .. } => nodes.keys().map(String::as_str).collect(),
        }
    }

    /// Returns the node registered under `address`.
    #[must_use]
    pub fn node(&self, address: &str) -> Option<&Node<S>> {
        match &self.topology {
            Topology::Single(node) => (node.address() == address).then_some(&**node),
            Topology::Sharded { nodes, .. } => nodes.get(address).map(|node| &**node),
        }
    }

    /// Address of the node owning `key`.
    #[must_use]
    pub fn node_for(&self, key: &str) -> Option<&str> {
        self.route(key).ok().map(|node| node.address())
    }

    /// Reads the value cached under `key`. See [`Node::get`].
    pub async fn get<V>(&self, key: &str) -> Result<V>
    where
        V: DeserializeOwned,
    {
        self.route(key)?.get(key).await
    }

    /// Caches `value` under `key` for the default expiry. See [`Node::set`].
    pub async fn set<V>(&self, key: &str, value: &V) -> Result<()>
    where
        V: Serialize + ?Sized,
    {
        self.route(key)?.set(key, value).await
    }

    /// Caches `value` under `key` for `ttl`. See [`Node::set_with_expire`].
    pub async fn set_with_expire<V>(&self, key: &str, value: &V, ttl: Duration) -> Result<()>
    where
        V: Serialize + ?Sized,
    {
        self.route(key)?.set_with_expire(key, value, ttl).await
    }

    /// Deletes `keys` from whichever nodes own them.
    ///
    /// Keys are grouped by owning node and every group is deleted, even when another
    /// group fails. Failures are reported together as [`Error::Batch`]; with strict
    /// deletes disabled, nodes never report failures.
    pub async fn del<K>(&self, keys: &[K]) -> Result<()>
    where
        K: AsRef<str>,
    {
        let (ring, nodes) = match &self.topology {
            Topology::Single(node) => return node.del(keys).await,
            Topology::Sharded { ring, nodes } => (ring, nodes),
        };

        let mut groups: HashMap<String, Vec<String>> = HashMap::new();
        let mut failures = Vec::new();
        for key in keys {
            let key = key.as_ref();
            match ring.get(key) {
                Some(address) => groups.entry(address).or_default().push(key.to_string()),
                None => failures.push(ShardFailure::new(String::new(), vec![key.to_string()], Error::NoNodes)),
            }
        }

        let deletes = groups.into_iter().filter_map(|(address, keys)| {
            let node = nodes.get(&address)?;
            Some(async move {
                let result = node.del_owned(keys.clone()).await;
                (address, keys, result)
            })
        });

        for (address, keys, result) in futures::future::join_all(deletes).await {
            if let Err(error) = result {
                failures.push(ShardFailure::new(address, keys, error));
            }
        }

        match BatchError::from_failures(failures) {
            Some(batch) => Err(Error::Batch(batch)),
            None => Ok(()),
        }
    }

    /// Returns the value cached under `key`, loading it on a miss. See [`Node::take`].
    pub async fn take<V, F, Fut, E>(&self, key: &str, load: F) -> Result<V>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<V>, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.route(key)?.take(key, load).await
    }

    /// Like [`Cache::take`], with the loader choosing the TTL. See [`Node::take_with_expire`].
    pub async fn take_with_expire<V, F, Fut, E>(&self, key: &str, load: F) -> Result<V>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce(Duration) -> Fut,
        Fut: Future<Output = std::result::Result<Option<(V, Duration)>, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.route(key)?.take_with_expire(key, load).await
    }

    fn route(&self, key: &str) -> Result<&Node<S>> {
        match &self.topology {
            Topology::Single(node) => Ok(&**node),
            Topology::Sharded { ring, nodes } => ring
                .get(key)
                .and_then(|address| nodes.get(&address))
                .map(|node| &**node)
                .ok_or(Error::NotFound),
        }
    }
}
