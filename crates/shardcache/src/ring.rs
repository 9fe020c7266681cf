// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Weighted consistent hashing.

use std::{
    collections::{HashMap, HashSet},
    fmt::{self, Display},
    hash::Hash,
};

use parking_lot::Mutex;
use xxhash_rust::xxh3::xxh3_64;

/// The weight that gives a node the full baseline of virtual replicas.
pub const TOP_WEIGHT: u32 = 100;

const MIN_REPLICAS: usize = 100;
const PRIME: u32 = 16_777_619;

/// A consistent hash ring mapping keys to weighted nodes.
///
/// Every node is placed on the ring at several virtual positions (replicas), each derived
/// from the node's display form followed by the replica ordinal. A key belongs to the
/// first position at or after its own hash, wrapping around at the end of the ring.
///
/// All operations take a single exclusive lock; topology changes are rare compared to
/// lookups.
///
/// # Examples
///
/// ```
/// use shardcache::Ring;
///
/// let ring = Ring::new(100);
/// ring.add("10.0.0.1:6379");
/// ring.add_with_weight("10.0.0.2:6379", 50);
///
/// let owner = ring.get("user:42").unwrap();
/// assert!(owner == "10.0.0.1:6379" || owner == "10.0.0.2:6379");
///
/// ring.remove(&"10.0.0.1:6379");
/// assert_eq!(ring.get("user:42"), Some("10.0.0.2:6379"));
/// ```
pub struct Ring<N> {
    replicas: usize,
    state: Mutex<RingState<N>>,
}

struct RingState<N> {
    // Sorted ascending; may hold the same position twice when replicas collide.
    keys: Vec<u64>,
    ring: HashMap<u64, Vec<N>>,
    nodes: HashSet<N>,
}

impl<N> Default for RingState<N> {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            ring: HashMap::new(),
            nodes: HashSet::new(),
        }
    }
}

impl<N> fmt::Debug for Ring<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Ring")
            .field("replicas", &self.replicas)
            .field("nodes", &state.nodes.len())
            .field("positions", &state.keys.len())
            .finish()
    }
}

impl<N> Default for Ring<N> {
    fn default() -> Self {
        Self::new(MIN_REPLICAS)
    }
}

impl<N> Ring<N> {
    /// Creates an empty ring with `replicas` virtual positions per full-weight node.
    ///
    /// Values below 100 are raised to 100.
    #[must_use]
    pub fn new(replicas: usize) -> Self {
        Self {
            replicas: replicas.max(MIN_REPLICAS),
            state: Mutex::new(RingState::default()),
        }
    }

    /// The baseline number of replicas per node.
    #[must_use]
    pub fn replicas(&self) -> usize {
        self.replicas
    }

    /// Number of distinct nodes on the ring.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().nodes.len()
    }

    /// Returns `true` if no node has been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().nodes.is_empty()
    }
}

impl<N> Ring<N>
where
    N: Display + Clone + Eq + Hash,
{
    /// Adds `node` with the full baseline of replicas.
    pub fn add(&self, node: N) {
        self.add_with_replicas(node, self.replicas);
    }

    /// Adds `node` with `replicas` virtual positions, capped at the baseline.
    ///
    /// Any previous registration of `node` is replaced. A node with zero replicas owns no
    /// keys and is not counted by [`Ring::len`].
    pub fn add_with_replicas(&self, node: N, replicas: usize) {
        let replicas = replicas.min(self.replicas);
        let repr = node.to_string();

        let mut state = self.state.lock();
        self.remove_locked(&mut state, &node, &repr);
        if replicas == 0 {
            return;
        }

        state.keys.reserve(replicas);
        for ordinal in 0..replicas {
            let position = position_of(&repr, ordinal);
            state.keys.push(position);
            state.ring.entry(position).or_default().push(node.clone());
        }
        state.keys.sort_unstable();
        state.nodes.insert(node);
    }

    /// Adds `node` with replicas proportional to `weight` out of [`TOP_WEIGHT`].
    ///
    /// Weights above [`TOP_WEIGHT`] get the full baseline.
    pub fn add_with_weight(&self, node: N, weight: u32) {
        let weight = weight.min(TOP_WEIGHT) as usize;
        self.add_with_replicas(node, self.replicas * weight / TOP_WEIGHT as usize);
    }

    /// Removes every virtual position of `node`. Does nothing if the node is unknown.
    pub fn remove(&self, node: &N) {
        let repr = node.to_string();
        let mut state = self.state.lock();
        self.remove_locked(&mut state, node, &repr);
    }

    /// Returns the node owning `key`, or `None` if the ring is empty.
    pub fn get<K>(&self, key: &K) -> Option<N>
    where
        K: Display + ?Sized,
    {
        let repr = key.to_string();
        let hash = xxh3_64(repr.as_bytes());

        let state = self.state.lock();
        if state.keys.is_empty() {
            return None;
        }

        let index = state.keys.partition_point(|&position| position < hash) % state.keys.len();
        let bucket = state.ring.get(&state.keys[index])?;
        match bucket.as_slice() {
            [] => None,
            [node] => Some(node.clone()),
            nodes => {
                let inner = xxh3_64(format!("{PRIME}:{repr}").as_bytes());
                let pick = usize::try_from(inner % nodes.len() as u64).unwrap_or_default();
                nodes.get(pick).cloned()
            }
        }
    }

    fn remove_locked(&self, state: &mut RingState<N>, node: &N, repr: &str) {
        if !state.nodes.remove(node) {
            return;
        }

        for ordinal in 0..self.replicas {
            let position = position_of(repr, ordinal);
            let Some(bucket) = state.ring.get_mut(&position) else {
                continue;
            };
            let Some(slot) = bucket.iter().position(|candidate| candidate == node) else {
                continue;
            };

            bucket.remove(slot);
            if bucket.is_empty() {
                state.ring.remove(&position);
            }
            if let Ok(index) = state.keys.binary_search(&position) {
                state.keys.remove(index);
            }
        }
    }
}

fn position_of(repr: &str, ordinal: usize) -> u64 {
    xxh3_64(format!("{repr}{ordinal}").as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_invariants<N: Eq + Hash>(ring: &Ring<N>) {
        let state = ring.state.lock();
        assert!(state.keys.is_sorted(), "positions must stay sorted");
        for position in &state.keys {
            let bucket = state.ring.get(position).expect("every position has a bucket");
            assert!(!bucket.is_empty());
        }
        let total: usize = state.ring.values().map(Vec::len).sum();
        assert_eq!(total, state.keys.len());
    }

    #[test]
    fn replicas_are_raised_to_minimum() {
        assert_eq!(Ring::<String>::new(10).replicas(), 100);
        assert_eq!(Ring::<String>::new(250).replicas(), 250);
        assert_eq!(Ring::<String>::default().replicas(), 100);
    }

    #[test]
    fn empty_ring_resolves_nothing() {
        let ring = Ring::<String>::default();
        assert!(ring.is_empty());
        assert_eq!(ring.get("key"), None);
    }

    #[test]
    fn weight_scales_replicas() {
        let ring = Ring::new(100);
        ring.add_with_weight("a", 40);
        assert_eq!(ring.state.lock().keys.len(), 40);

        ring.add_with_weight("a", 1000);
        assert_eq!(ring.state.lock().keys.len(), 100);
        check_invariants(&ring);
    }

    #[test]
    fn replicas_are_capped_at_baseline() {
        let ring = Ring::new(100);
        ring.add_with_replicas("a", 500);
        assert_eq!(ring.state.lock().keys.len(), 100);
    }

    #[test]
    fn re_adding_replaces_previous_registration() {
        let ring = Ring::new(100);
        ring.add("a");
        ring.add_with_weight("a", 10);

        assert_eq!(ring.len(), 1);
        assert_eq!(ring.state.lock().keys.len(), 10);
        check_invariants(&ring);
    }

    #[test]
    fn zero_weight_node_owns_nothing() {
        let ring = Ring::new(100);
        ring.add("a");
        ring.add_with_weight("b", 0);

        assert_eq!(ring.len(), 1);
        for i in 0..1000 {
            assert_eq!(ring.get(&i), Some("a"));
        }
    }

    #[test]
    fn ring_of_zero_weight_nodes_is_empty() {
        let ring = Ring::new(100);
        ring.add_with_weight("a", 0);
        ring.add_with_replicas("b", 0);

        assert!(ring.is_empty());
        assert_eq!(ring.len(), 0);
        assert_eq!(ring.get("key"), None);
        check_invariants(&ring);
    }

    #[test]
    fn re_adding_with_zero_weight_takes_node_out() {
        let ring = Ring::new(100);
        ring.add("a");
        ring.add("b");
        ring.add_with_weight("b", 0);

        assert_eq!(ring.len(), 1);
        for i in 0..1000 {
            assert_eq!(ring.get(&i), Some("a"));
        }
        check_invariants(&ring);
    }

    #[test]
    fn removing_unknown_node_is_a_no_op() {
        let ring = Ring::new(100);
        ring.add("a");
        ring.remove(&"b");
        assert_eq!(ring.len(), 1);
        check_invariants(&ring);
    }

    #[test]
    fn lookups_are_deterministic() {
        let ring = Ring::new(100);
        for node in ["a", "b", "c"] {
            ring.add(node);
        }
        for i in 0..100 {
            assert_eq!(ring.get(&i), ring.get(&i));
        }
    }

    #[test]
    fn colliding_positions_break_ties_by_key() {
        let ring = Ring::new(100);
        ring.add("a");
        ring.add("b");
        {
            // Force every position into one shared bucket.
            let mut state = ring.state.lock();
            state.keys = vec![0];
            state.ring.clear();
            state.ring.insert(0, vec!["a", "b"]);
        }

        let owners: HashSet<_> = (0..100).filter_map(|i| ring.get(&i)).collect();
        assert_eq!(owners.len(), 2, "both colliding nodes should own some keys");
        assert_eq!(ring.get("stable"), ring.get("stable"));
    }

    #[test]
    fn debug_reports_sizes() {
        let ring = Ring::new(100);
        ring.add("a");
        let debug = format!("{ring:?}");
        assert!(debug.contains("nodes: 1"), "{debug}");
        assert!(debug.contains("positions: 100"), "{debug}");
    }
}
