//! Bounded in-process LRU tier.
//!
//! Entries live in a slab of nodes threaded onto a doubly linked recency
//! list, with a hash index from key to slot. Lookup, promotion, insertion
//! and eviction are all O(1). The tier is bounded both by entry count and by
//! the approximate byte size of keys plus values.
//!
//! Expired entries are not dropped on read: they stay in place (without
//! being promoted) so a caller that allows stale reads can still use them
//! while the remote tier is unavailable. They leave through normal
//! capacity eviction, overwrite, or invalidation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::cache::glob::GlobPattern;

/// Result of a local lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalLookup {
    /// Present and within its TTL.
    Fresh(String),
    /// Present but past its TTL.
    Stale(String),
    /// Not present.
    Missing,
}

struct Node {
    key: String,
    value: String,
    expires_at: Instant,
    prev: Option<usize>,
    next: Option<usize>,
}

impl Node {
    fn size(&self) -> usize {
        self.key.len() + self.value.len()
    }
}

#[derive(Default)]
struct LruState {
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
    index: HashMap<String, usize>,
    /// Most recently used.
    head: Option<usize>,
    /// Least recently used.
    tail: Option<usize>,
    bytes: usize,
}

impl LruState {
    fn node(&self, slot: usize) -> &Node {
        self.slots[slot]
            .as_ref()
            .unwrap_or_else(|| unreachable!("index points at an empty slot"))
    }

    fn node_mut(&mut self, slot: usize) -> &mut Node {
        self.slots[slot]
            .as_mut()
            .unwrap_or_else(|| unreachable!("index points at an empty slot"))
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = {
            let node = self.node(slot);
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.tail = prev,
        }
        let node = self.node_mut(slot);
        node.prev = None;
        node.next = None;
    }

    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        {
            let node = self.node_mut(slot);
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            self.node_mut(h).prev = Some(slot);
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }

    fn remove_slot(&mut self, slot: usize) -> Node {
        self.unlink(slot);
        let node = self.slots[slot]
            .take()
            .unwrap_or_else(|| unreachable!("index points at an empty slot"));
        self.index.remove(&node.key);
        self.bytes -= node.size();
        self.free.push(slot);
        node
    }

    fn insert_node(&mut self, node: Node) {
        self.bytes += node.size();
        let key = node.key.clone();
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, slot);
        self.push_front(slot);
    }
}

/// The local cache tier.
pub struct LocalTier {
    state: Mutex<LruState>,
    max_entries: usize,
    max_bytes: usize,
    evictions: AtomicU64,
}

impl LocalTier {
    /// Create a tier bounded by `max_entries` and `max_bytes`.
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            state: Mutex::new(LruState::default()),
            max_entries: max_entries.max(1),
            max_bytes: max_bytes.max(1),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up `key`. Fresh hits become the most recently used entry.
    pub fn get(&self, key: &str) -> LocalLookup {
        let mut state = self.state.lock();
        let Some(&slot) = state.index.get(key) else {
            return LocalLookup::Missing;
        };
        if state.node(slot).expires_at <= Instant::now() {
            return LocalLookup::Stale(state.node(slot).value.clone());
        }
        state.unlink(slot);
        state.push_front(slot);
        LocalLookup::Fresh(state.node(slot).value.clone())
    }

    /// Insert or replace `key`, evicting least recently used entries until
    /// both bounds hold. Returns `false` when the entry alone exceeds the
    /// byte bound and was not stored.
    pub fn insert(&self, key: &str, value: String, ttl: Duration) -> bool {
        let node = Node {
            key: key.to_string(),
            value,
            expires_at: Instant::now() + ttl,
            prev: None,
            next: None,
        };

        let mut state = self.state.lock();
        if let Some(&slot) = state.index.get(key) {
            state.remove_slot(slot);
        }
        if node.size() > self.max_bytes {
            return false;
        }

        while state.index.len() >= self.max_entries
            || state.bytes + node.size() > self.max_bytes
        {
            let Some(tail) = state.tail else { break };
            state.remove_slot(tail);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        state.insert_node(node);
        true
    }

    /// Remove `key`. Returns whether it was present.
    pub fn remove(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        match state.index.get(key).copied() {
            Some(slot) => {
                state.remove_slot(slot);
                true
            }
            None => false,
        }
    }

    /// Remove every key matching `pattern` and return the removed keys.
    pub fn remove_matching(&self, pattern: &GlobPattern) -> Vec<String> {
        let mut state = self.state.lock();
        let matching: Vec<(String, usize)> = state
            .index
            .iter()
            .filter(|(key, _)| pattern.matches(key))
            .map(|(key, slot)| (key.clone(), *slot))
            .collect();
        for (_, slot) in &matching {
            state.remove_slot(*slot);
        }
        matching.into_iter().map(|(key, _)| key).collect()
    }

    /// Remove everything. Returns the number of removed entries.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let removed = state.index.len();
        *state = LruState::default();
        removed
    }

    /// Number of entries, fresh or expired.
    pub fn len(&self) -> usize {
        self.state.lock().index.len()
    }

    /// Whether the tier is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Approximate size in bytes.
    pub fn bytes(&self) -> usize {
        self.state.lock().bytes
    }

    /// Number of capacity evictions so far.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut keys = Vec::with_capacity(state.index.len());
        let mut cursor = state.head;
        while let Some(slot) = cursor {
            let node = state.node(slot);
            keys.push(node.key.clone());
            cursor = node.next;
        }
        keys
    }
}
