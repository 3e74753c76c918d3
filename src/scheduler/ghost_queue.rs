/// Ghost queue
///
/// Fixed-capacity FIFO of the most recently selected track ids. Applied on
/// top of the time-based separation rules so short or zero windows still
/// cannot produce back-to-back repeats. Capacity 0 disables it.
use std::collections::VecDeque;

use crate::db::models::TrackId;

#[derive(Debug, Clone, Default)]
pub struct GhostQueue {
    entries: VecDeque<TrackId>,
    capacity: usize,
}

impl GhostQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn contains(&self, track_id: TrackId) -> bool {
        self.entries.contains(&track_id)
    }

    /// Append, evicting the oldest entries once capacity is exceeded.
    pub fn push(&mut self, track_id: TrackId) {
        if self.capacity == 0 {
            return;
        }
        self.entries.push_back(track_id);
        self.evict();
    }

    /// Apply a new capacity from a reloaded config. Shrinking evicts oldest first.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.evict();
    }

    fn evict(&mut self) {
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
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

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &TrackId> {
        self.entries.iter()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
