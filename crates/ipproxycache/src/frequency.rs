//! Access-frequency index for least-queried-first eviction
//!
//! Keys are grouped into buckets by access count. Each bucket is an
//! intrusive doubly-linked list threaded through a node arena, so moving a
//! key between buckets and popping the oldest key of a bucket are O(1).
//! Selecting the lowest bucket scans the distinct counts currently in use.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use ahash::RandomState;

/// Node in a bucket list
struct Node<K> {
    key: K,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Head and tail of one non-empty bucket
#[derive(Default)]
struct Bucket {
    head: Option<usize>,
    tail: Option<usize>,
}

/// Where a key currently lives
#[derive(Clone, Copy)]
struct Slot {
    count: u64,
    node: usize,
}

/// Tracks per-key access counts bucketed by count
pub struct FrequencyIndex<K> {
    slots: HashMap<K, Slot, RandomState>,
    buckets: HashMap<u64, Bucket, RandomState>,
    nodes: Vec<Option<Node<K>>>,
    free_list: Vec<usize>,
}

impl<K> FrequencyIndex<K>
where
    K: Hash + Eq + Clone,
{
    /// Create an empty index
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an empty index sized for `capacity` keys
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: HashMap::with_capacity_and_hasher(capacity, RandomState::new()),
            buckets: HashMap::with_hasher(RandomState::new()),
            nodes: Vec::with_capacity(capacity),
            free_list: Vec::new(),
        }
    }

    /// Record one access to `key` and return its new count
    ///
    /// An unseen key is first placed at the tail of bucket 1, then moved
    /// up one bucket like any other key, so its count after the first
    /// access is 2.
    pub fn record_access<Q>(&mut self, key: &Q) -> u64
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        let slot = match self.slots.get(key) {
            Some(&slot) => slot,
            None => {
                let owned = key.to_owned();
                let node = self.alloc_node(owned.clone());
                self.push_back(1, node);
                let slot = Slot { count: 1, node };
                self.slots.insert(owned, slot);
                slot
            }
        };

        let count = slot.count + 1;
        self.unlink(slot.count, slot.node);
        self.push_back(count, slot.node);
        if let Some(stored) = self.slots.get_mut(key) {
            stored.count = count;
        }

        count
    }

    /// Remove and return the least-accessed key
    ///
    /// Among keys sharing the lowest count, the one that reached that count
    /// first goes. Returns `None` when nothing is tracked.
    pub fn evict_one(&mut self) -> Option<K> {
        let count = self.min_count()?;
        let node = self.buckets.get(&count)?.head?;

        self.unlink(count, node);
        let evicted = self.nodes[node].take()?;
        self.free_list.push(node);
        self.slots.remove(&evicted.key);

        Some(evicted.key)
    }

    /// Lowest access count currently in use
    pub fn min_count(&self) -> Option<u64> {
        self.buckets.keys().min().copied()
    }

    /// Access count of `key`, if tracked
    pub fn count<Q>(&self, key: &Q) -> Option<u64>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.slots.get(key).map(|slot| slot.count)
    }

    /// Check whether `key` is tracked
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.slots.contains_key(key)
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if no keys are tracked
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn push_back(&mut self, count: u64, idx: usize) {
        let bucket = self.buckets.entry(count).or_default();
        let old_tail = bucket.tail;

        if let Some(node) = &mut self.nodes[idx] {
            node.prev = old_tail;
            node.next = None;
        }

        match old_tail {
            Some(tail_idx) => {
                if let Some(tail) = &mut self.nodes[tail_idx] {
                    tail.next = Some(idx);
                }
            }
            None => bucket.head = Some(idx),
        }
        bucket.tail = Some(idx);
    }

    fn unlink(&mut self, count: u64, idx: usize) {
        let (prev, next) = match &self.nodes[idx] {
            Some(node) => (node.prev, node.next),
            None => return,
        };
        let Some(bucket) = self.buckets.get_mut(&count) else {
            return;
        };

        match prev {
            Some(prev_idx) => {
                if let Some(prev_node) = &mut self.nodes[prev_idx] {
                    prev_node.next = next;
                }
            }
            None => bucket.head = next,
        }

        match next {
            Some(next_idx) => {
                if let Some(next_node) = &mut self.nodes[next_idx] {
                    next_node.prev = prev;
                }
            }
            None => bucket.tail = prev,
        }

        // Empty buckets are dropped
        if bucket.head.is_none() {
            self.buckets.remove(&count);
        }

        if let Some(node) = &mut self.nodes[idx] {
            node.prev = None;
            node.next = None;
        }
    }

    fn alloc_node(&mut self, key: K) -> usize {
        let node = Some(Node {
            key,
            prev: None,
            next: None,
        });

        if let Some(idx) = self.free_list.pop() {
            self.nodes[idx] = node;
            idx
        } else {
            self.nodes.push(node);
            self.nodes.len() - 1
        }
    }
}

impl<K> Default for FrequencyIndex<K>
where
    K: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl<K> FrequencyIndex<K>
where
    K: Hash + Eq + Clone + std::fmt::Debug,
{
    /// Keys of one bucket, head first
    pub(crate) fn bucket_keys(&self, count: u64) -> Vec<K> {
        let mut keys = Vec::new();
        let mut cursor = self.buckets.get(&count).and_then(|b| b.head);
        while let Some(idx) = cursor {
            let node = self.nodes[idx].as_ref().expect("linked node is live");
            keys.push(node.key.clone());
            cursor = node.next;
        }
        keys
    }

    /// Panics if the bucket structure disagrees with the slot map
    pub(crate) fn assert_consistent(&self) {
        let mut seen = 0;
        for &count in self.buckets.keys() {
            let keys = self.bucket_keys(count);
            assert!(!keys.is_empty(), "bucket {} is empty", count);
            for key in keys {
                assert_eq!(self.count(&key), Some(count), "{:?} is in the wrong bucket", key);
                seen += 1;
            }
        }
        assert_eq!(seen, self.slots.len(), "every key sits in exactly one bucket");
    }
}
