use std::{collections::VecDeque, num::NonZeroUsize};

use crate::error::MirrorError;

pub const DEFAULT_RING_CAPACITY: usize = 10;

/// Bounded display buffer holding the most recent `capacity` entries in arrival order.
///
/// Append/evict only: entries are never updated in place, and the only removal is the
/// single oldest entry when a push would exceed the capacity.
#[derive(Debug, Clone)]
pub struct RingView<T> {
    capacity: NonZeroUsize,
    entries: VecDeque<T>,
}

impl<T: Clone> RingView<T> {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.get()),
        }
    }

    pub fn with_capacity(capacity: usize) -> Result<Self, MirrorError> {
        NonZeroUsize::new(capacity)
            .map(Self::new)
            .ok_or(MirrorError::InvalidCapacity(capacity))
    }

    /// Appends `entry`, returning the evicted oldest entry if the view was full.
    pub fn push(&mut self, entry: T) -> Option<T> {
        let evicted = if self.entries.len() == self.capacity.get() {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    /// Oldest-to-newest copy of the current contents.
    pub fn snapshot(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }
}

impl<T: Clone> Default for RingView<T> {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(DEFAULT_RING_CAPACITY).unwrap_or(NonZeroUsize::MIN))
    }
}

#[cfg(test)]
#[path = "tests/ring_view_tests.rs"]
mod tests;
