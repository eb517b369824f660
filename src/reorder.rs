//! Ordered reassembly buffer
//!
//! Accepts items keyed by height in any order and releases them strictly in
//! ascending height order, starting from a fixed first height. Holds no
//! locks and does no I/O; [`crate::sink::OrderedSink`] wraps it for use
//! across workers.

use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReorderError {
    /// Height was already released
    #[error("height {height} is below the emit cursor {next}")]
    Stale { height: u64, next: u64 },

    /// Height is already waiting in the buffer
    #[error("height {height} was already submitted")]
    Duplicate { height: u64 },
}

/// Pending items plus the next height allowed out.
///
/// Invariant: every key in `pending` is `>= next`.
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    pending: BTreeMap<u64, T>,
    next: u64,
}

impl<T> ReorderBuffer<T> {
    pub fn new(first_height: u64) -> Self {
        Self {
            pending: BTreeMap::new(),
            next: first_height,
        }
    }

    /// Next height that will be released
    pub fn next_height(&self) -> u64 {
        self.next
    }

    /// Items held back behind a missing height
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn insert(&mut self, height: u64, item: T) -> Result<(), ReorderError> {
        if height < self.next {
            return Err(ReorderError::Stale {
                height,
                next: self.next,
            });
        }
        if self.pending.contains_key(&height) {
            return Err(ReorderError::Duplicate { height });
        }
        self.pending.insert(height, item);
        Ok(())
    }

    /// Remove and return the next item if it is ready
    pub fn pop_ready(&mut self) -> Option<(u64, T)> {
        let item = self.pending.remove(&self.next)?;
        let height = self.next;
        self.next += 1;
        Some((height, item))
    }

    /// Remove every item that is ready, in order
    pub fn drain_ready(&mut self) -> Vec<(u64, T)> {
        let mut ready = Vec::new();
        while let Some(entry) = self.pop_ready() {
            ready.push(entry);
        }
        ready
    }

    /// Drop whatever is still held (items above a gap that will never fill).
    /// Returns the heights that were discarded.
    pub fn discard_pending(&mut self) -> Vec<u64> {
        std::mem::take(&mut self.pending).into_keys().collect()
    }
}
