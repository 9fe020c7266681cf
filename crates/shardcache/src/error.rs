// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for cache operations.

use std::{fmt, sync::Arc, time::Duration};

/// An error from a cache operation.
///
/// Errors are cheap to clone: a single failure inside a single flight is handed to every
/// caller that joined it.
///
/// # Examples
///
/// ```
/// use shardcache::Error;
///
/// #[derive(Debug, thiserror::Error)]
/// #[error("database is down")]
/// struct DbError;
///
/// let error = Error::load(DbError);
/// assert!(!error.is_not_found());
/// assert!(error.load_error::<DbError>().is_some());
/// ```
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The key is absent, either for real or because an absence placeholder is cached.
    #[error("not found")]
    NotFound,

    /// The backend store failed; propagated verbatim.
    #[error("backend unavailable: {0}")]
    Backend(#[from] shardcache_store::Error),

    /// A value could not be serialized before writing it to the cache.
    #[error("failed to encode value: {0}")]
    Encode(#[source] Arc<serde_json::Error>),

    /// A payload shared by a single flight could not be deserialized into the caller's type.
    #[error("failed to decode shared value: {0}")]
    Decode(#[source] Arc<serde_json::Error>),

    /// The loader failed; the original error is kept as-is.
    #[error(transparent)]
    Load(Arc<dyn std::error::Error + Send + Sync>),

    /// The caller gave up on a single flight after the configured timeout.
    #[error("single flight timed out after {0:?}")]
    FlightTimeout(Duration),

    /// The cluster has no node able to own keys.
    #[error("no cache nodes configured")]
    NoNodes,

    /// One or more shards of a multi-key operation failed.
    #[error(transparent)]
    Batch(#[from] BatchError),
}

impl Error {
    /// Wraps a loader error.
    pub fn load(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Load(Arc::new(error))
    }

    /// Returns `true` if this is [`Error::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Returns the loader error if it is of type `E`.
    #[must_use]
    pub fn load_error<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self {
            Self::Load(error) => error.downcast_ref::<E>(),
            _ => None,
        }
    }

    pub(crate) fn encode(error: serde_json::Error) -> Self {
        Self::Encode(Arc::new(error))
    }

    pub(crate) fn decode(error: serde_json::Error) -> Self {
        Self::Decode(Arc::new(error))
    }
}

/// A specialized [`Result`] type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The failure of one shard within a multi-key operation.
#[derive(Debug, Clone)]
pub struct ShardFailure {
    node: String,
    keys: Vec<String>,
    error: Error,
}

impl ShardFailure {
    pub(crate) fn new(node: impl Into<String>, keys: Vec<String>, error: Error) -> Self {
        Self {
            node: node.into(),
            keys,
            error,
        }
    }

    /// Address of the node that failed.
    #[must_use]
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Keys routed to the failing node.
    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// The error the node reported.
    #[must_use]
    pub fn error(&self) -> &Error {
        &self.error
    }
}

/// Every shard failure collected while executing a multi-key operation.
#[derive(Debug, Clone)]
pub struct BatchError {
    failures: Vec<ShardFailure>,
}

impl BatchError {
    /// Returns `None` when no shard failed.
    pub(crate) fn from_failures(failures: Vec<ShardFailure>) -> Option<Self> {
        (!failures.is_empty()).then_some(Self { failures })
    }

    /// The failing shards.
    #[must_use]
    pub fn failures(&self) -> &[ShardFailure] {
        &self.failures
    }
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} shard(s) failed", self.failures.len())?;
        for (index, failure) in self.failures.iter().enumerate() {
            let separator = if index == 0 { ": " } else { "; " };
            write!(f, "{separator}node {} {:?}: {}", failure.node, failure.keys, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for BatchError {}
