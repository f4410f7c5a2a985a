use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Append-only ring buffer with FIFO eviction.
///
/// The capacity travels with the data so an imported state keeps the bound it
/// was created with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundedLog<T> {
    capacity: usize,
    entries: VecDeque<T>,
}

impl<T> BoundedLog<T> {
    /// Creates an empty log holding at most `capacity` entries (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    /// Maximum number of retained entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity.max(1)
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends an entry, returning the evicted ones (oldest first).
    pub fn push(&mut self, entry: T) -> Vec<T> {
        self.entries.push_back(entry);
        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity() {
            if let Some(oldest) = self.entries.pop_front() {
                evicted.push(oldest);
            }
        }
        evicted
    }

    /// Iterates from oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.entries.iter()
    }

    /// Most recently appended entry.
    #[must_use]
    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    /// First entry matching the predicate, oldest first.
    pub fn find(&self, predicate: impl FnMut(&&T) -> bool) -> Option<&T> {
        self.entries.iter().find(predicate)
    }

    /// Keeps only the entries matching the predicate.
    pub fn retain(&mut self, predicate: impl FnMut(&T) -> bool) {
        self.entries.retain(predicate);
    }

    /// Drops every entry, keeping the capacity.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// An empty log with the same capacity.
    #[must_use]
    pub fn emptied(&self) -> Self {
        Self::new(self.capacity())
    }
}

impl<T: Clone> BoundedLog<T> {
    /// Returns a copy of this log with `entry` appended.
    #[must_use]
    pub fn with(&self, entry: T) -> Self {
        let mut next = self.clone();
        next.push(entry);
        next
    }
}

impl<'a, T> IntoIterator for &'a BoundedLog<T> {
    type Item = &'a T;
    type IntoIter = std::collections::vec_deque::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
