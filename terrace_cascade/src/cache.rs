// Copyright 2025 the Terrace Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Snapshot cache: resolved leaf code → immutable `(levels, path)` copy.
//!
//! Entries are values, not references into live state: [`SnapshotCache::put`]
//! deep-copies on write and [`SnapshotCache::get`] clones on read, so mutating
//! live selector state can never corrupt a cached snapshot and vice versa.
//! Writers always replace whole entries (last-writer-wins); there is no merge
//! logic because an entry is one self-consistent snapshot.
//!
//! The cache is bounded by entry count with least-recently-used eviction.
//! Reads take `&mut self` because a hit refreshes recency (the same pattern
//! the virtual-list model uses for internally cache-maintaining queries).

use alloc::string::String;
use alloc::vec::Vec;

use hashbrown::HashMap;

use crate::types::Node;

/// Immutable snapshot of a resolved drill-down.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    /// All sibling lists, level 0 (root) first.
    pub levels: Vec<Vec<Node>>,
    /// The selected chain, `path[i]` belonging to `levels[i]`.
    pub path: Vec<Node>,
}

/// Entry-count-bounded snapshot cache keyed by resolved leaf code.
#[derive(Clone, Debug)]
pub struct SnapshotCache {
    entries: HashMap<String, CacheEntry>,
    /// Recency order, least recent first.
    recency: Vec<String>,
    capacity: usize,
}

impl SnapshotCache {
    /// Create a cache bounded to `capacity` entries. A capacity of zero
    /// disables caching entirely.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            recency: Vec::new(),
            capacity,
        }
    }

    /// Look up the snapshot stored under `code`, cloning it out.
    ///
    /// A hit refreshes the entry's recency.
    pub fn get(&mut self, code: &str) -> Option<CacheEntry> {
        let entry = self.entries.get(code).cloned()?;
        self.touch(code);
        Some(entry)
    }

    /// Store a deep copy of `(levels, path)` under `code`, replacing any
    /// previous entry for that key.
    ///
    /// Snapshots with no levels or no path are not stored: an entry must be
    /// able to restore a browsable state.
    pub fn put(&mut self, code: &str, levels: &[Vec<Node>], path: &[Node]) {
        if self.capacity == 0 || levels.is_empty() || path.is_empty() {
            return;
        }
        self.entries.insert(
            String::from(code),
            CacheEntry {
                levels: levels.to_vec(),
                path: path.to_vec(),
            },
        );
        self.touch(code);
        while self.entries.len() > self.capacity {
            let evicted = self.recency.remove(0);
            self.entries.remove(&evicted);
        }
    }

    /// Drop all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    /// Number of stored snapshots.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no snapshots.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn touch(&mut self, code: &str) {
        if let Some(pos) = self.recency.iter().position(|c| c == code) {
            let key = self.recency.remove(pos);
            self.recency.push(key);
        } else {
            self.recency.push(String::from(code));
        }
    }
}
