// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Builder for sharded caches.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use shardcache_store::CacheStore;

use crate::{
    Cache, Error, Result,
    cleanup::{Cleaner, CleanerOptions},
    cluster::Topology,
    config::CacheOptions,
    node::Node,
    ring::{Ring, TOP_WEIGHT},
};

/// Builder for a [`Cache`].
///
/// Created by calling [`Cache::builder`].
///
/// # Examples
///
/// ```
/// use shardcache::Cache;
/// use shardcache_memory::MemoryStore;
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let cache = Cache::builder("users")
///     .node("10.0.0.1:6379", MemoryStore::new(), 100)
///     .node("10.0.0.2:6379", MemoryStore::new(), 50)
///     .expiry(Duration::from_secs(3600))
///     .not_found_expiry(Duration::from_secs(30))
///     .build()
///     .unwrap();
///
/// assert_eq!(cache.nodes().len(), 2);
/// # }
/// ```
pub struct CacheBuilder<S> {
    name: String,
    nodes: Vec<(String, S, u32)>,
    options: CacheOptions,
    cleaner: Option<Arc<Cleaner>>,
}

impl<S> fmt::Debug for CacheBuilder<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nodes: Vec<(&str, u32)> = self.nodes.iter().map(|(address, _, weight)| (address.as_str(), *weight)).collect();
        f.debug_struct("CacheBuilder")
            .field("name", &self.name)
            .field("nodes", &nodes)
            .field("options", &self.options)
            .field("cleaner", &self.cleaner.is_some())
            .finish()
    }
}

impl<S> CacheBuilder<S>
where
    S: CacheStore + 'static,
{
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            options: CacheOptions::default(),
            cleaner: None,
        }
    }

    /// Adds a node at `address` backed by `store`.
    ///
    /// `weight` is relative to [`TOP_WEIGHT`]; larger weights are clamped to it. Adding an
    /// address twice keeps the last registration.
    #[must_use]
    pub fn node(mut self, address: impl Into<String>, store: S, weight: u32) -> Self {
        self.nodes.push((address.into(), store, weight.min(TOP_WEIGHT)));
        self
    }

    /// Replaces every caching option at once.
    #[must_use]
    pub fn options(mut self, options: CacheOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the TTL of cached values.
    #[must_use]
    pub fn expiry(mut self, expiry: Duration) -> Self {
        self.options.expiry = expiry;
        self
    }

    /// Sets the TTL of absence placeholders.
    #[must_use]
    pub fn not_found_expiry(mut self, expiry: Duration) -> Self {
        self.options.not_found_expiry = expiry;
        self
    }

    /// Sets the fraction by which TTLs are randomly spread.
    #[must_use]
    pub fn deviation(mut self, deviation: f64) -> Self {
        self.options.deviation = deviation;
        self
    }

    /// Sets how often hit and miss counters are logged.
    #[must_use]
    pub fn stat_interval(mut self, interval: Duration) -> Self {
        self.options.stat_interval = interval;
        self
    }

    /// Bounds how long a caller takes part in a single flight.
    #[must_use]
    pub fn flight_timeout(mut self, timeout: Duration) -> Self {
        self.options.flight_timeout = Some(timeout);
        self
    }

    /// Also returns delete failures to the caller.
    #[must_use]
    pub fn strict_delete(mut self, strict: bool) -> Self {
        self.options.strict_delete = strict;
        self
    }

    /// Uses `cleaner` for failed deletes instead of a cleaner owned by this cache.
    ///
    /// A shared cleaner is not started by [`CacheBuilder::build`].
    #[must_use]
    pub fn cleaner(mut self, cleaner: Arc<Cleaner>) -> Self {
        self.cleaner = Some(cleaner);
        self
    }

    /// Builds the cache.
    ///
    /// A cache with exactly one node routes every operation to it; otherwise nodes are
    /// placed on a consistent hash ring according to their weights.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoNodes`] when no node was added or every weight is zero.
    pub fn build(self) -> Result<Cache<S>> {
        let Self {
            name,
            nodes,
            options,
            cleaner,
        } = self;

        let mut weighted: HashMap<String, (S, u32)> = HashMap::new();
        for (address, store, weight) in nodes {
            weighted.insert(address, (store, weight));
        }
        if weighted.values().all(|(_, weight)| *weight == 0) {
            return Err(Error::NoNodes);
        }

        let cleaner = cleaner.unwrap_or_else(|| {
            let cleaner = Arc::new(Cleaner::new(CleanerOptions::default()));
            cleaner.start();
            cleaner
        });

        let topology = if weighted.len() == 1 {
            let (address, (store, _)) = weighted.into_iter().next().ok_or(Error::NoNodes)?;
            Topology::Single(Arc::new(Node::new(&name, address, store, &options, Arc::clone(&cleaner))))
        } else {
            let ring = Ring::default();
            let mut nodes = HashMap::with_capacity(weighted.len());
            for (address, (store, weight)) in weighted {
                ring.add_with_weight(address.clone(), weight);
                let node = Node::new(&name, address.clone(), store, &options, Arc::clone(&cleaner));
                nodes.insert(address, Arc::new(node));
            }
            Topology::Sharded { ring, nodes }
        };

        Ok(Cache::from_parts(name, topology, cleaner))
    }
}
