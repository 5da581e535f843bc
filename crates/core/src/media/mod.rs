//! Per-segment random draws without replacement.
//!
//! Each segment keeps an `available` and a `shown` list that together always
//! hold exactly the segment's combined pool. A draw moves a uniformly random
//! entry from `available` to `shown`; once `available` runs dry the shown
//! entries are reshuffled into a fresh pass.

use std::collections::HashMap;

use rand::{rngs::StdRng, seq::SliceRandom, Rng};

use crate::{
    assets::PrefetchCache,
    mapping::{PoolEntry, RouteMap},
};

#[derive(Debug, Clone, Default)]
pub struct SectionDrawState {
    available: Vec<PoolEntry>,
    shown: Vec<PoolEntry>,
}

impl SectionDrawState {
    pub fn available(&self) -> &[PoolEntry] {
        &self.available
    }

    pub fn shown(&self) -> &[PoolEntry] {
        &self.shown
    }

    pub fn pool_size(&self) -> usize {
        self.available.len() + self.shown.len()
    }
}

#[derive(Debug)]
pub struct MediaSelector<R: Rng = StdRng> {
    rng: R,
    sections: HashMap<String, SectionDrawState>,
    prefetch: PrefetchCache,
    prefetch_segment: Option<String>,
}

impl<R: Rng> MediaSelector<R> {
    pub fn new(rng: R, prefetch_capacity: usize) -> Self {
        Self {
            rng,
            sections: HashMap::new(),
            prefetch: PrefetchCache::new(prefetch_capacity),
            prefetch_segment: None,
        }
    }

    /// Gives every segment an independently shuffled copy of its pool.
    pub fn initialize(&mut self, route: &RouteMap) {
        self.sections.clear();
        self.prefetch.clear();
        self.prefetch_segment = None;
        for segment in route.segments() {
            let mut available = segment.pool.clone();
            available.shuffle(&mut self.rng);
            self.sections.insert(
                segment.id.clone(),
                SectionDrawState {
                    available,
                    shown: Vec::new(),
                },
            );
        }
    }

    pub fn state(&self, segment_id: &str) -> Option<&SectionDrawState> {
        self.sections.get(segment_id)
    }

    pub fn prefetch(&self) -> &PrefetchCache {
        &self.prefetch
    }

    /// Draws the next entry for `segment_id`. `None` when the segment is
    /// unknown or its pool is empty.
    pub fn pick_next(&mut self, segment_id: &str) -> Option<PoolEntry> {
        let state = self.sections.get_mut(segment_id)?;
        if state.available.is_empty() {
            if state.shown.is_empty() {
                return None;
            }
            state.available = std::mem::take(&mut state.shown);
            state.available.shuffle(&mut self.rng);
            tracing::debug!(segment = segment_id, size = state.available.len(), "pool reshuffled");
        }

        let index = self.rng.random_range(0..state.available.len());
        let entry = state.available.swap_remove(index);
        state.shown.push(entry.clone());
        self.prefetch.remove(&entry.url);
        Some(entry)
    }

    /// Tops the prefetch cache up with candidates from `segment_id`. Switching
    /// to another segment drops the previous segment's candidates first.
    /// Returns the newly cached entries.
    pub fn refill_prefetch(&mut self, segment_id: &str) -> Vec<PoolEntry> {
        if self.prefetch_segment.as_deref() != Some(segment_id) {
            self.prefetch.clear();
            self.prefetch_segment = Some(segment_id.to_string());
        }
        let Some(state) = self.sections.get(segment_id) else {
            return Vec::new();
        };

        let mut added = Vec::new();
        for candidate in state.available.iter().rev() {
            if self.prefetch.is_full() {
                break;
            }
            if self.prefetch.insert(candidate.clone()) {
                added.push(candidate.clone());
            }
        }
        added
    }
}
