// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Backend store abstraction for the shardcache read-through cache.
//!
//! This crate defines the [`CacheStore`] trait that every backend connection must
//! satisfy, along with the opaque [`Error`] type returned by transport failures.
//!
//! # Overview
//!
//! A store only moves opaque byte payloads: serialization, placeholders, TTL jitter and
//! stampede protection all live in `shardcache`. A store is expected to expire entries on
//! its own once their TTL elapses.
//!
//! # Implementing a Store
//!
//! ```
//! use bytes::Bytes;
//! use shardcache_store::{CacheStore, Error};
//! use std::collections::HashMap;
//! use std::sync::RwLock;
//! use std::time::Duration;
//!
//! struct SimpleStore(RwLock<HashMap<String, Bytes>>);
//!
//! impl CacheStore for SimpleStore {
//!     async fn get(&self, key: &str) -> Result<Option<Bytes>, Error> {
//!         Ok(self.0.read().unwrap().get(key).cloned())
//!     }
//!
//!     async fn set(&self, key: &str, value: Bytes, _ttl: Duration) -> Result<(), Error> {
//!         self.0.write().unwrap().insert(key.to_string(), value);
//!         Ok(())
//!     }
//!
//!     async fn set_if_absent(&self, key: &str, value: Bytes, _ttl: Duration) -> Result<bool, Error> {
//!         let mut map = self.0.write().unwrap();
//!         if map.contains_key(key) {
//!             return Ok(false);
//!         }
//!         map.insert(key.to_string(), value);
//!         Ok(true)
//!     }
//!
//!     async fn delete(&self, keys: &[String]) -> Result<u64, Error> {
//!         let mut map = self.0.write().unwrap();
//!         Ok(keys.iter().filter(|key| map.remove(key.as_str()).is_some()).count() as u64)
//!     }
//! }
//! ```

pub mod error;
pub(crate) mod store;
#[cfg(any(feature = "test-util", test))]
pub mod testing;

#[doc(inline)]
pub use error::{Error, Result};
#[doc(inline)]
pub use store::CacheStore;
