// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Escalating retry delays for failed deletes.

use std::{fmt, time::Duration};

/// Backoff tier of a pending cleanup task.
///
/// A failed delete starts at [`RetryTier::OneSecond`] and climbs one tier after every
/// failed retry. A retry that fails at [`RetryTier::OneHour`] is abandoned.
///
/// # Examples
///
/// ```
/// use shardcache::RetryTier;
/// use std::time::Duration;
///
/// let tier = RetryTier::FIRST;
/// assert_eq!(tier.delay(), Duration::from_secs(1));
/// assert_eq!(tier.next(), Some(RetryTier::FiveSeconds));
/// assert_eq!(RetryTier::OneHour.next(), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RetryTier {
    /// Retry after one second.
    OneSecond,
    /// Retry after five seconds.
    FiveSeconds,
    /// Retry after one minute.
    OneMinute,
    /// Retry after five minutes.
    FiveMinutes,
    /// Retry after one hour; the last tier.
    OneHour,
}

impl RetryTier {
    /// The tier every new task starts at.
    pub const FIRST: Self = Self::OneSecond;

    /// How long a task at this tier waits before running.
    #[must_use]
    pub fn delay(self) -> Duration {
        match self {
            Self::OneSecond => Duration::from_secs(1),
            Self::FiveSeconds => Duration::from_secs(5),
            Self::OneMinute => Duration::from_secs(60),
            Self::FiveMinutes => Duration::from_secs(5 * 60),
            Self::OneHour => Duration::from_secs(60 * 60),
        }
    }

    /// The tier after this one, or `None` once the sequence is exhausted.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        match self {
            Self::OneSecond => Some(Self::FiveSeconds),
            Self::FiveSeconds => Some(Self::OneMinute),
            Self::OneMinute => Some(Self::FiveMinutes),
            Self::FiveMinutes => Some(Self::OneHour),
            Self::OneHour => None,
        }
    }
}

impl fmt::Display for RetryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::OneSecond => "1s",
            Self::FiveSeconds => "5s",
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::OneHour => "1h",
        };
        f.write_str(label)
    }
}
