// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! A sharded read-through cache in front of a slower source of truth.
//!
//! `shardcache` spreads keys over several backend stores with weighted consistent hashing
//! and protects the source of truth from the classic caching hazards:
//!
//! - **Stampede**: concurrent misses of the same key share a single load.
//! - **Penetration**: keys the source of truth does not know are remembered with a short
//!   lived absence placeholder.
//! - **Avalanche**: every TTL is randomly spread by a small deviation so entries written
//!   together do not expire together.
//!
//! Deletes that fail at the backend never fail the caller; they are retried in the
//! background with escalating backoff by a [`Cleaner`].
//!
//! # Quick Start
//!
//! ```
//! use serde::{Deserialize, Serialize};
//! use shardcache::Cache;
//! use shardcache_memory::MemoryStore;
//!
//! #[derive(Debug, Serialize, Deserialize, PartialEq)]
//! struct User {
//!     name: String,
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> shardcache::Result<()> {
//! let cache = Cache::builder("users")
//!     .node("10.0.0.1:6379", MemoryStore::new(), 100)
//!     .node("10.0.0.2:6379", MemoryStore::new(), 100)
//!     .build()?;
//!
//! let user: User = cache
//!     .take("user:1", || async {
//!         // Query the database here.
//!         Ok::<_, std::io::Error>(Some(User { name: "alice".to_string() }))
//!     })
//!     .await?;
//! assert_eq!(user.name, "alice");
//!
//! // Unknown keys are remembered, the loader is not asked again within the absence TTL.
//! let missing = cache
//!     .take::<User, _, _, std::io::Error>("user:2", || async { Ok(None) })
//!     .await;
//! assert!(missing.unwrap_err().is_not_found());
//! # Ok(())
//! # }
//! ```
//!
//! # Backends
//!
//! Any [`CacheStore`] can serve as a node. `shardcache_memory` provides an in-process
//! store; networked stores implement the same trait.
//!
//! # Logging
//!
//! Diagnostics are emitted through `tracing` as events named `cache.corrupted`,
//! `cache.delete_failed`, `cache.placeholder_failed`, `cache.set_failed`,
//! `cache.cleanup.retry`, `cache.cleanup.abandoned` and `cache.stat`. No subscriber is
//! installed by this crate.

mod builder;
mod cleanup;
mod cluster;
mod config;
mod error;
mod jitter;
mod node;
mod ring;
mod stat;

#[doc(inline)]
pub use builder::CacheBuilder;
#[doc(inline)]
pub use cleanup::{Cleaner, CleanerOptions, PendingTask, RetryTier};
#[doc(inline)]
pub use cluster::Cache;
#[doc(inline)]
pub use config::{CacheConfig, CacheOptions, NodeConfig};
#[doc(inline)]
pub use error::{BatchError, Error, Result, ShardFailure};
#[doc(inline)]
pub use node::Node;
#[doc(inline)]
pub use ring::{Ring, TOP_WEIGHT};
pub use shardcache_store::CacheStore;
#[doc(inline)]
pub use stat::{Stat, StatSnapshot};
