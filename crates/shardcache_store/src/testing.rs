// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Mock store implementation for testing.
//!
//! This module provides `MockStore`, an in-memory store that records every operation,
//! remembers the TTL each entry was written with, and supports failure injection for
//! testing error paths.

use std::{collections::HashMap, sync::Arc, time::Duration};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::{CacheStore, Error};

/// Recorded store operation with full context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// A get operation was performed with the given key.
    Get(String),
    /// A set operation was performed.
    Set {
        /// The key that was written.
        key: String,
        /// The payload that was written.
        value: Bytes,
        /// The TTL the payload was written with.
        ttl: Duration,
    },
    /// A conditional set operation was performed.
    SetIfAbsent {
        /// The key that was written.
        key: String,
        /// The payload that was written.
        value: Bytes,
        /// The TTL the payload was written with.
        ttl: Duration,
    },
    /// A delete operation was performed with the given keys.
    Delete(Vec<String>),
}

impl StoreOp {
    /// Returns true if this operation touches `key`.
    #[must_use]
    pub fn touches(&self, key: &str) -> bool {
        match self {
            Self::Get(k) | Self::Set { key: k, .. } | Self::SetIfAbsent { key: k, .. } => k == key,
            Self::Delete(keys) => keys.iter().any(|k| k == key),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredEntry {
    payload: Bytes,
    ttl: Duration,
}

type FailPredicate = Box<dyn Fn(&StoreOp) -> bool + Send + Sync>;

/// A configurable mock store for testing.
///
/// Entries never expire on their own; the TTL they were written with is kept so tests
/// can inspect it through [`MockStore::ttl`]. Clones share the same state, so a test can
/// hand one clone to the code under test and keep another for assertions.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use shardcache_store::{CacheStore, testing::{MockStore, StoreOp}};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = MockStore::new();
///
/// store.set("key", Bytes::from_static(b"42"), Duration::from_secs(60)).await.unwrap();
/// assert_eq!(store.get("key").await.unwrap(), Some(Bytes::from_static(b"42")));
/// assert_eq!(store.ttl("key"), Some(Duration::from_secs(60)));
///
/// // Fail every delete
/// store.fail_when(|op| matches!(op, StoreOp::Delete(_)));
/// assert!(store.delete(&["key".to_string()]).await.is_err());
/// # }
/// ```
pub struct MockStore {
    data: Arc<Mutex<HashMap<String, StoredEntry>>>,
    operations: Arc<Mutex<Vec<StoreOp>>>,
    fail_when: Arc<Mutex<Option<FailPredicate>>>,
}

impl std::fmt::Debug for MockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockStore")
            .field("data", &self.data)
            .field("operations", &self.operations)
            .field("fail_when", &self.fail_when.lock().is_some())
            .finish()
    }
}

impl Clone for MockStore {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            operations: Arc::clone(&self.operations),
            fail_when: Arc::clone(&self.fail_when),
        }
    }
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStore {
    /// Creates a new empty mock store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Arc::new(Mutex::new(HashMap::new())),
            operations: Arc::new(Mutex::new(Vec::new())),
            fail_when: Arc::new(Mutex::new(None)),
        }
    }

    /// Sets a predicate that determines when operations should fail.
    ///
    /// The predicate receives the operation and returns `true` if it should fail.
    /// Failed operations are still recorded.
    pub fn fail_when<F>(&self, predicate: F)
    where
        F: Fn(&StoreOp) -> bool + Send + Sync + 'static,
    {
        *self.fail_when.lock() = Some(Box::new(predicate));
    }

    /// Clears the failure predicate, allowing all operations to succeed.
    pub fn clear_failures(&self) {
        *self.fail_when.lock() = None;
    }

    /// Returns a clone of all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<StoreOp> {
        self.operations.lock().clone()
    }

    /// Returns how many recorded operations match `predicate`.
    #[must_use]
    pub fn count(&self, predicate: impl Fn(&StoreOp) -> bool) -> usize {
        self.operations.lock().iter().filter(|op| predicate(op)).count()
    }

    /// Clears all recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().clear();
    }

    /// Writes a raw payload without recording an operation.
    ///
    /// Useful to plant corrupted payloads behind the cache's back.
    pub fn put_raw(&self, key: impl Into<String>, payload: impl Into<Bytes>, ttl: Duration) {
        self.data.lock().insert(
            key.into(),
            StoredEntry {
                payload: payload.into(),
                ttl,
            },
        );
    }

    /// Returns the raw payload stored under `key` without recording an operation.
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<Bytes> {
        self.data.lock().get(key).map(|entry| entry.payload.clone())
    }

    /// Returns the TTL `key` was last written with.
    #[must_use]
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.data.lock().get(key).map(|entry| entry.ttl)
    }

    /// Returns true if the store contains the given key.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.lock().contains_key(key)
    }

    /// Returns the number of entries in the store.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.data.lock().len()
    }

    fn check(&self, op: StoreOp) -> Result<(), Error> {
        let fail = self.fail_when.lock().as_ref().is_some_and(|predicate| predicate(&op));
        self.operations.lock().push(op);
        if fail {
            Err(Error::from_message("mock: store unavailable"))
        } else {
            Ok(())
        }
    }
}

impl CacheStore for MockStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, Error> {
        self.check(StoreOp::Get(key.to_string()))?;
        Ok(self.raw(key))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), Error> {
        self.check(StoreOp::Set {
            key: key.to_string(),
            value: value.clone(),
            ttl,
        })?;
        self.put_raw(key, value, ttl);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool, Error> {
        self.check(StoreOp::SetIfAbsent {
            key: key.to_string(),
            value: value.clone(),
            ttl,
        })?;
        let mut data = self.data.lock();
        if data.contains_key(key) {
            return Ok(false);
        }
        data.insert(key.to_string(), StoredEntry { payload: value, ttl });
        Ok(true)
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, Error> {
        self.check(StoreOp::Delete(keys.to_vec()))?;
        let mut data = self.data.lock();
        Ok(keys.iter().filter(|key| data.remove(key.as_str()).is_some()).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn records_operations_in_order() {
        let store = MockStore::new();
        store.set("a", Bytes::from_static(b"1"), TTL).await.unwrap();
        let _ = store.get("a").await.unwrap();
        store.delete(&["a".to_string()]).await.unwrap();

        assert_eq!(
            store.operations(),
            vec![
                StoreOp::Set {
                    key: "a".to_string(),
                    value: Bytes::from_static(b"1"),
                    ttl: TTL,
                },
                StoreOp::Get("a".to_string()),
                StoreOp::Delete(vec!["a".to_string()]),
            ]
        );
    }

    #[tokio::test]
    async fn set_if_absent_keeps_existing_value() {
        let store = MockStore::new();
        store.set("a", Bytes::from_static(b"real"), TTL).await.unwrap();

        let written = store.set_if_absent("a", Bytes::from_static(b"*"), TTL).await.unwrap();
        assert!(!written);
        assert_eq!(store.raw("a"), Some(Bytes::from_static(b"real")));

        let written = store.set_if_absent("b", Bytes::from_static(b"*"), TTL).await.unwrap();
        assert!(written);
        assert_eq!(store.raw("b"), Some(Bytes::from_static(b"*")));
    }

    #[tokio::test]
    async fn failed_operations_are_recorded_but_do_not_mutate() {
        let store = MockStore::new();
        store.put_raw("a", Bytes::from_static(b"1"), TTL);
        store.fail_when(|op| matches!(op, StoreOp::Delete(_)));

        let err = store.delete(&["a".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("unavailable"));
        assert!(store.contains_key("a"));
        assert_eq!(store.count(|op| matches!(op, StoreOp::Delete(_))), 1);

        store.clear_failures();
        assert_eq!(store.delete(&["a".to_string()]).await.unwrap(), 1);
        assert!(!store.contains_key("a"));
    }

    #[tokio::test]
    async fn delete_counts_only_existing_keys() {
        let store = MockStore::new();
        store.put_raw("a", Bytes::from_static(b"1"), TTL);
        store.put_raw("b", Bytes::from_static(b"2"), TTL);

        let removed = store
            .delete(&["a".to_string(), "b".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.entry_count(), 0);
    }

    #[test]
    fn put_raw_is_not_recorded() {
        let store = MockStore::new();
        store.put_raw("a", Bytes::from_static(b"{"), TTL);
        assert!(store.operations().is_empty());
        assert_eq!(store.ttl("a"), Some(TTL));
    }

    #[test]
    fn op_touches_matches_keys() {
        assert!(StoreOp::Get("a".to_string()).touches("a"));
        assert!(StoreOp::Delete(vec!["x".to_string(), "a".to_string()]).touches("a"));
        assert!(!StoreOp::Get("b".to_string()).touches("a"));
    }

    #[test]
    fn clones_share_state() {
        let store = MockStore::new();
        let clone = store.clone();
        clone.put_raw("a", Bytes::from_static(b"1"), TTL);
        assert!(store.contains_key("a"));
    }
}
