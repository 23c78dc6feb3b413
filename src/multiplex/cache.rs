//! Node Cache
//!
//! Bounded LRU cache of index-node blocks keyed by block id. Purely a
//! performance layer: every entry mirrors the bytes on disk, eviction is
//! silent, and freeing a block removes its entry so reuse never sees stale
//! children.

use std::collections::{HashMap, VecDeque};

/// Default number of cached index nodes.
pub(crate) const DEFAULT_NODE_CACHE: usize = 128;

pub(crate) struct NodeCache {
    capacity: usize,
    nodes: HashMap<u64, Vec<u8>>,
    /// Least-recently-used ids at the front.
    order: VecDeque<u64>,
}

impl NodeCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            nodes: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// Fetch a node's bytes, marking it most recently used.
    pub fn get(&mut self, id: u64) -> Option<&Vec<u8>> {
        if self.nodes.contains_key(&id) {
            self.touch(id);
            self.nodes.get(&id)
        } else {
            None
        }
    }

    /// Insert (or refresh) a node, evicting the least recently used entry
    /// once over capacity.
    pub fn insert(&mut self, id: u64, bytes: Vec<u8>) {
        if self.nodes.insert(id, bytes).is_some() {
            self.touch(id);
        } else {
            self.order.push_back(id);
            if self.nodes.len() > self.capacity {
                if let Some(evicted) = self.order.pop_front() {
                    self.nodes.remove(&evicted);
                }
            }
        }
    }

    /// Patch a cached node in place after a write-through; a miss is fine.
    pub fn update(&mut self, id: u64, offset: usize, bytes: &[u8]) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node[offset..offset + bytes.len()].copy_from_slice(bytes);
        }
    }

    /// Drop a node (freed or rewritten from scratch).
    pub fn remove(&mut self, id: u64) {
        if self.nodes.remove(&id).is_some() {
            if let Some(at) = self.order.iter().position(|&n| n == id) {
                self.order.remove(at);
            }
        }
    }

    fn touch(&mut self, id: u64) {
        if let Some(at) = self.order.iter().position(|&n| n == id) {
            self.order.remove(at);
        }
        self.order.push_back(id);
    }
}
