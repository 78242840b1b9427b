//! Recency queue for approximate LRU eviction
//!
//! Slab-backed doubly-linked list with a hash index, so touch, evict and
//! remove are O(1). Head = least recently used, tail = most recently used.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ahash::RandomState;
use parking_lot::Mutex;

/// Node in the recency list
struct Node {
    path: PathBuf,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Unsynchronized recency list
#[derive(Default)]
struct RecencyList {
    map: HashMap<PathBuf, usize, RandomState>,
    nodes: Vec<Option<Node>>,
    head: Option<usize>,
    tail: Option<usize>,
    free_list: Vec<usize>,
}

impl RecencyList {
    fn touch(&mut self, path: &Path) {
        if let Some(&idx) = self.map.get(path) {
            self.move_to_tail(idx);
            return;
        }

        let idx = self.alloc_node();
        self.nodes[idx] = Some(Node {
            path: path.to_path_buf(),
            prev: None,
            next: None,
        });
        self.link_tail(idx);
        self.map.insert(path.to_path_buf(), idx);
    }

    fn pop_oldest(&mut self) -> Option<PathBuf> {
        let head_idx = self.head?;
        self.unlink(head_idx);
        let node = self.nodes[head_idx].take()?;
        self.free_node(head_idx);
        self.map.remove(&node.path);
        Some(node.path)
    }

    fn remove(&mut self, path: &Path) -> bool {
        match self.map.remove(path) {
            Some(idx) => {
                self.unlink(idx);
                self.nodes[idx] = None;
                self.free_node(idx);
                true
            }
            None => false,
        }
    }

    fn clear(&mut self) {
        self.map.clear();
        self.nodes.clear();
        self.free_list.clear();
        self.head = None;
        self.tail = None;
    }

    fn move_to_tail(&mut self, idx: usize) {
        if self.tail == Some(idx) {
            return; // Already most recent
        }

        self.unlink(idx);
        self.link_tail(idx);
    }

    fn link_tail(&mut self, idx: usize) {
        if let Some(node) = &mut self.nodes[idx] {
            node.prev = self.tail;
            node.next = None;
        }

        match self.tail {
            Some(tail_idx) => {
                if let Some(tail) = &mut self.nodes[tail_idx] {
                    tail.next = Some(idx);
                }
            }
            None => {
                self.head = Some(idx);
            }
        }

        self.tail = Some(idx);
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = if let Some(node) = &self.nodes[idx] {
            (node.prev, node.next)
        } else {
            return;
        };

        match prev {
            Some(prev_idx) => {
                if let Some(prev_node) = &mut self.nodes[prev_idx] {
                    prev_node.next = next;
                }
            }
            None => {
                self.head = next;
            }
        }

        match next {
            Some(next_idx) => {
                if let Some(next_node) = &mut self.nodes[next_idx] {
                    next_node.prev = prev;
                }
            }
            None => {
                self.tail = prev;
            }
        }

        if let Some(node) = &mut self.nodes[idx] {
            node.prev = None;
            node.next = None;
        }
    }

    fn alloc_node(&mut self) -> usize {
        if let Some(idx) = self.free_list.pop() {
            idx
        } else {
            let idx = self.nodes.len();
            self.nodes.push(None);
            idx
        }
    }

    fn free_node(&mut self, idx: usize) {
        self.free_list.push(idx);
    }
}

/// Touch-ordered set of cache files, safe to share between threads
///
/// Every operation takes a short internal lock, so callers do not need to
/// hold the cache lock to touch or evict.
#[derive(Default)]
pub struct RecencyQueue {
    inner: Mutex<RecencyList>,
}

impl RecencyQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `path` as most recently used, adding it if absent
    pub fn touch(&self, path: &Path) {
        self.inner.lock().touch(path);
    }

    /// Remove and return the least recently used path
    pub fn evict_oldest(&self) -> Option<PathBuf> {
        self.inner.lock().pop_oldest()
    }

    /// Is `path` tracked?
    pub fn contains(&self, path: &Path) -> bool {
        self.inner.lock().map.contains_key(path)
    }

    /// Stop tracking `path`; returns whether it was tracked
    pub fn remove(&self, path: &Path) -> bool {
        self.inner.lock().remove(path)
    }

    /// Number of tracked paths
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// Is the queue empty?
    pub fn is_empty(&self) -> bool {
        self.inner.lock().map.is_empty()
    }

    /// Forget every path
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}
