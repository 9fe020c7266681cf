// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! In-process backend store backed by moka.
//!
//! This crate provides [`MemoryStore`], a concurrent [`CacheStore`](shardcache_store::CacheStore)
//! that keeps payloads in memory and expires each one after the TTL it was written with.
//! Use [`MemoryStoreBuilder`] to bound capacity without exposing moka types directly.
//!
//! # Quick Start
//!
//! ```
//! use bytes::Bytes;
//! use shardcache_memory::MemoryStore;
//! use shardcache_store::CacheStore;
//! use std::time::Duration;
//!
//! # futures::executor::block_on(async {
//! let store = MemoryStore::builder().max_capacity(1000).build();
//!
//! store.set("key", Bytes::from_static(b"42"), Duration::from_secs(300)).await.unwrap();
//! let value = store.get("key").await.unwrap();
//! assert_eq!(value, Some(Bytes::from_static(b"42")));
//! # });
//! ```
//!
//! # Features
//!
//! - **Per-entry TTL**: every write carries its own expiry, as a networked store would
//! - **Conditional writes**: `set_if_absent` never overwrites a live entry
//! - **Capacity limits**: set a maximum entry count with automatic eviction

pub mod builder;
pub mod store;

#[doc(inline)]
pub use builder::MemoryStoreBuilder;
#[doc(inline)]
pub use store::MemoryStore;
