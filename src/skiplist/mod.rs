//! Probabilistic ordered map backing the memtable.
//!
//! Classic skip list: every node carries a tower of forward links whose
//! height is drawn geometrically (p = 1/2) and capped at a configured
//! maximum. Expected O(log n) lookups and inserts, with an O(n) in-order
//! walk used only at flush time.
//!
//! Nodes live in an index-addressed arena (`Vec<Node>`), which keeps the
//! implementation in safe Rust: links are `usize` slot indices rather
//! than pointers, and removed slots are recycled through a free list.
//!
//! Ordering is by raw key bytes, lexicographic.

#[cfg(test)]
mod tests;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::record::Record;

/// Sentinel link meaning "end of list".
const NIL: usize = usize::MAX;

struct Node {
    /// `None` only for the head sentinel.
    record: Option<Record>,

    /// Forward links, one per level; `next[0]` is the full ordered chain.
    next: Vec<usize>,
}

impl Node {
    fn key(&self) -> &[u8] {
        self.record
            .as_ref()
            .map(|r| r.key.as_slice())
            .unwrap_or(&[])
    }
}

/// An ordered map from key bytes to [`Record`], with probabilistic
/// balancing.
pub struct SkipList {
    nodes: Vec<Node>,
    free: Vec<usize>,
    max_height: usize,
    height: usize,
    len: usize,
    rng: SmallRng,
}

impl SkipList {
    /// Creates an empty list with the given maximum tower height.
    pub fn new(max_height: usize) -> Self {
        Self::with_rng_seed(max_height, rand::rng().random())
    }

    /// Creates an empty list with a fixed RNG seed (deterministic heights).
    pub fn with_rng_seed(max_height: usize, seed: u64) -> Self {
        let max_height = max_height.max(1);
        let head = Node {
            record: None,
            next: vec![NIL; max_height],
        };
        Self {
            nodes: vec![head],
            free: Vec::new(),
            max_height,
            height: 1,
            len: 0,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` when the list holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Draws a tower height geometrically: P(h) = 2^-h, capped.
    fn random_height(&mut self) -> usize {
        let mut height = 1;
        while height < self.max_height && self.rng.random::<bool>() {
            height += 1;
        }
        height
    }

    /// Walks down from the top level collecting, per level, the last node
    /// whose key precedes `key`.
    fn find_predecessors(&self, key: &[u8]) -> Vec<usize> {
        let mut update = vec![0usize; self.max_height];
        let mut current = 0usize;

        for level in (0..self.height).rev() {
            loop {
                let next = self.nodes[current].next[level];
                if next == NIL || self.nodes[next].key() >= key {
                    break;
                }
                current = next;
            }
            update[level] = current;
        }

        update
    }

    /// Inserts `record`, overwriting any existing entry for the same key.
    ///
    /// Returns `true` when the key was new.
    pub fn insert_or_update(&mut self, record: Record) -> bool {
        let update = self.find_predecessors(&record.key);

        let candidate = self.nodes[update[0]].next[0];
        if candidate != NIL && self.nodes[candidate].key() == record.key.as_slice() {
            self.nodes[candidate].record = Some(record);
            return false;
        }

        let height = self.random_height();
        if height > self.height {
            self.height = height;
        }

        let node = Node {
            record: Some(record),
            next: vec![NIL; height],
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        };

        for level in 0..height {
            let prev = update[level];
            let succ = self.nodes[prev].next[level];
            self.nodes[slot].next[level] = succ;
            self.nodes[prev].next[level] = slot;
        }

        self.len += 1;
        true
    }

    /// Looks up the record stored under `key`.
    pub fn find(&self, key: &[u8]) -> Option<&Record> {
        let mut current = 0usize;
        for level in (0..self.height).rev() {
            loop {
                let next = self.nodes[current].next[level];
                if next == NIL || self.nodes[next].key() > key {
                    break;
                }
                if self.nodes[next].key() == key {
                    return self.nodes[next].record.as_ref();
                }
                current = next;
            }
        }
        None
    }

    /// Unlinks and returns the record stored under `key`.
    pub fn remove(&mut self, key: &[u8]) -> Option<Record> {
        let update = self.find_predecessors(key);
        let target = self.nodes[update[0]].next[0];
        if target == NIL || self.nodes[target].key() != key {
            return None;
        }

        let tower = self.nodes[target].next.len();
        for level in 0..tower {
            let prev = update[level];
            if self.nodes[prev].next[level] == target {
                let succ = self.nodes[target].next[level];
                self.nodes[prev].next[level] = succ;
            }
        }

        // Shrink the effective height past now-empty levels.
        while self.height > 1 && self.nodes[0].next[self.height - 1] == NIL {
            self.height -= 1;
        }

        let record = self.nodes[target].record.take();
        self.free.push(target);
        self.len -= 1;
        record
    }

    /// In-order iterator over all records, ascending by key.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            current: self.nodes[0].next[0],
        }
    }

    /// Removes every entry, keeping the allocated head.
    pub fn clear(&mut self) {
        self.nodes.truncate(1);
        self.nodes[0].next = vec![NIL; self.max_height];
        self.free.clear();
        self.height = 1;
        self.len = 0;
    }
}

/// Ascending in-order iterator over a [`SkipList`].
pub struct Iter<'a> {
    list: &'a SkipList,
    current: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Record;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current == NIL {
            return None;
        }
        let node = &self.list.nodes[self.current];
        self.current = node.next[0];
        node.record.as_ref()
    }
}
