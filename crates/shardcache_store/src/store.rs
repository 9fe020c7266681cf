// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The core trait for backend store connections.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;

use crate::Error;

/// Trait for backend store connections.
///
/// One implementation wraps one backend node (for example a single Redis server).
/// All methods distinguish "absent" (`Ok(None)`, `Ok(false)`, `Ok(0)`) from transport
/// failures (`Err`).
pub trait CacheStore: Send + Sync {
    /// Reads the raw payload stored under `key`.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Bytes>, Error>> + Send;

    /// Writes `value` under `key`, expiring it after `ttl`.
    fn set(&self, key: &str, value: Bytes, ttl: Duration) -> impl Future<Output = Result<(), Error>> + Send;

    /// Writes `value` under `key` only when no entry exists yet, expiring it after `ttl`.
    ///
    /// Returns `true` when the value was written.
    fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Deletes every key in `keys`, returning how many entries existed.
    fn delete(&self, keys: &[String]) -> impl Future<Output = Result<u64, Error>> + Send;
}

impl<S> CacheStore for Arc<S>
where
    S: CacheStore,
{
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Bytes>, Error>> + Send {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: Bytes, ttl: Duration) -> impl Future<Output = Result<(), Error>> + Send {
        (**self).set(key, value, ttl)
    }

    fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> impl Future<Output = Result<bool, Error>> + Send {
        (**self).set_if_absent(key, value, ttl)
    }

    fn delete(&self, keys: &[String]) -> impl Future<Output = Result<u64, Error>> + Send {
        (**self).delete(keys)
    }
}
