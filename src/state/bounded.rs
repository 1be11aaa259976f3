//! Append-with-cap log shared by the change log, failure log and sent-id set

use std::collections::VecDeque;

use serde::{Serialize, Serializer};

/// Ordered log that keeps only the newest `cap` entries
#[derive(Debug, Clone, PartialEq)]
pub struct BoundedLog<T> {
    items: VecDeque<T>,
    cap: usize,
}

impl<T> BoundedLog<T> {
    pub fn new(cap: usize) -> Self {
        Self {
            items: VecDeque::new(),
            cap,
        }
    }

    /// Build from existing entries, oldest first; excess entries at the front are dropped
    pub fn from_vec(items: Vec<T>, cap: usize) -> Self {
        let mut log = Self {
            items: VecDeque::from(items),
            cap,
        };
        log.trim();
        log
    }

    /// Append an entry, returning how many old entries were evicted
    pub fn push(&mut self, item: T) -> usize {
        self.items.push_back(item);
        self.trim()
    }

    fn trim(&mut self) -> usize {
        let excess = self.items.len().saturating_sub(self.cap);
        self.items.drain(..excess);
        excess
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.items.iter()
    }
}

impl<T: Serialize> Serialize for BoundedLog<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(self.items.iter())
    }
}
