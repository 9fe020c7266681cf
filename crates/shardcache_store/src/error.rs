// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for backend store operations.

/// An error from a backend store operation.
///
/// This is an opaque error type that wraps whatever the underlying transport reported.
/// It is cheap to clone so that one failure can be handed to every caller waiting on
/// the same operation. Use [`std::error::Error::source()`] to reach the underlying cause.
///
/// # Example
///
/// ```
/// use shardcache_store::Error;
///
/// let error = Error::from_message("connection refused");
/// assert!(error.to_string().contains("connection refused"));
/// ```
#[ohno::error]
#[derive(Clone)]
pub struct Error {}

impl Error {
    /// Creates a new error from a message or any other error.
    ///
    /// This is the entry point for store implementations in other crates.
    ///
    /// # Examples
    ///
    /// ```
    /// use shardcache_store::Error;
    ///
    /// let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out");
    /// let error = Error::from_message(io);
    /// assert!(error.to_string().contains("read timed out"));
    /// ```
    pub fn from_message(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(cause)
    }
}

/// A specialized [`Result`] type for store operations.
pub type Result<T> = std::result::Result<T, Error>;
