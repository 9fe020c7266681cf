// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Deserializable cache configuration.
//!
//! Durations are written as whole seconds under `*_secs` keys:
//!
//! ```
//! use shardcache::CacheConfig;
//! use std::time::Duration;
//!
//! let config: CacheConfig = serde_json::from_str(r#"{
//!     "name": "users",
//!     "nodes": [
//!         { "address": "10.0.0.1:6379" },
//!         { "address": "10.0.0.2:6379", "weight": 50 }
//!     ],
//!     "options": { "expiry_secs": 3600, "flight_timeout_secs": 2 }
//! }"#).unwrap();
//!
//! assert_eq!(config.nodes[0].weight, 100);
//! assert_eq!(config.options.expiry, Duration::from_secs(3600));
//! assert_eq!(config.options.not_found_expiry, Duration::from_secs(60));
//! assert_eq!(config.options.flight_timeout, Some(Duration::from_secs(2)));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ring::TOP_WEIGHT;

const DEFAULT_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const DEFAULT_NOT_FOUND_EXPIRY: Duration = Duration::from_secs(60);
const DEFAULT_DEVIATION: f64 = 0.05;
const DEFAULT_STAT_INTERVAL: Duration = Duration::from_secs(60);

/// One backend node of a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Address identifying the node; also its position seed on the hash ring.
    pub address: String,
    /// Share of the keyspace relative to [`TOP_WEIGHT`].
    #[serde(default = "default_weight")]
    pub weight: u32,
}

impl NodeConfig {
    /// Creates a node with full weight.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            weight: TOP_WEIGHT,
        }
    }

    /// Sets the node weight.
    #[must_use]
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }
}

fn default_weight() -> u32 {
    TOP_WEIGHT
}

/// Caching policy shared by every node of a cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    /// TTL of cached values. Defaults to 7 days.
    #[serde(rename = "expiry_secs", with = "secs")]
    pub expiry: Duration,
    /// TTL of absence placeholders. Defaults to 1 minute.
    #[serde(rename = "not_found_expiry_secs", with = "secs")]
    pub not_found_expiry: Duration,
    /// Fraction by which every TTL is randomly shortened or extended. Defaults to 0.05.
    pub deviation: f64,
    /// How often hit and miss counters are logged. Defaults to 1 minute.
    #[serde(rename = "stat_interval_secs", with = "secs")]
    pub stat_interval: Duration,
    /// Upper bound on how long a caller takes part in a single flight. Unbounded by default.
    #[serde(rename = "flight_timeout_secs", with = "optional_secs")]
    pub flight_timeout: Option<Duration>,
    /// Also return delete failures to the caller after handing them to the cleaner.
    pub strict_delete: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            expiry: DEFAULT_EXPIRY,
            not_found_expiry: DEFAULT_NOT_FOUND_EXPIRY,
            deviation: DEFAULT_DEVIATION,
            stat_interval: DEFAULT_STAT_INTERVAL,
            flight_timeout: None,
            strict_delete: false,
        }
    }
}

/// A named cache spread over a set of nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Name used in logs.
    pub name: String,
    /// The backend nodes.
    pub nodes: Vec<NodeConfig>,
    /// Caching policy.
    #[serde(default)]
    pub options: CacheOptions,
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

mod optional_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[expect(clippy::ref_option, reason = "signature required by serde's `with` attribute")]
    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&duration.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|secs| secs.map(Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults() {
        let options = CacheOptions::default();
        assert_eq!(options.expiry, Duration::from_secs(604_800));
        assert_eq!(options.not_found_expiry, Duration::from_secs(60));
        assert!((options.deviation - 0.05).abs() < f64::EPSILON);
        assert_eq!(options.stat_interval, Duration::from_secs(60));
        assert_eq!(options.flight_timeout, None);
        assert!(!options.strict_delete);
    }

    #[test]
    fn empty_options_deserialize_to_defaults() {
        let options: CacheOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, CacheOptions::default());
    }

    #[test]
    fn options_round_trip_through_seconds() {
        let options = CacheOptions {
            expiry: Duration::from_secs(10),
            flight_timeout: Some(Duration::from_secs(3)),
            strict_delete: true,
            ..CacheOptions::default()
        };

        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(json["expiry_secs"], 10);
        assert_eq!(json["flight_timeout_secs"], 3);

        let parsed: CacheOptions = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, options);
    }

    #[test]
    fn node_weight_defaults_to_top_weight() {
        let node: NodeConfig = serde_json::from_str(r#"{ "address": "a:1" }"#).unwrap();
        assert_eq!(node, NodeConfig::new("a:1"));
        assert_eq!(NodeConfig::new("a:1").with_weight(30).weight, 30);
    }

    #[test]
    fn cache_config_requires_nodes() {
        let result = serde_json::from_str::<CacheConfig>(r#"{ "name": "users" }"#);
        assert!(result.is_err());
    }
}
