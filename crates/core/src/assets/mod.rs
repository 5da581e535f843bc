use std::collections::VecDeque;

use crate::mapping::PoolEntry;

/// Bounded set of visual assets worth warming up before they are drawn.
///
/// Purely advisory: a draw never waits on the cache. When more than
/// `capacity` entries are inserted the oldest insertion is evicted.
#[derive(Debug, Clone)]
pub struct PrefetchCache {
    capacity: usize,
    entries: VecDeque<PoolEntry>,
}

impl PrefetchCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.max(1) + 1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.iter().any(|entry| entry.url == url)
    }

    /// Adds `entry` unless it is already cached. Returns whether it was added.
    pub fn insert(&mut self, entry: PoolEntry) -> bool {
        if self.contains(&entry.url) {
            return false;
        }
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            if let Some(evicted) = self.entries.pop_front() {
                tracing::trace!(url = %evicted.url, "prefetch evicted");
            }
        }
        true
    }

    pub fn remove(&mut self, url: &str) -> Option<PoolEntry> {
        let index = self.entries.iter().position(|entry| entry.url == url)?;
        self.entries.remove(index)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> impl Iterator<Item = &PoolEntry> {
        self.entries.iter()
    }
}
