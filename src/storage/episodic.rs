use crate::memory::location::Location;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Episodic store is full ({capacity} entries)")]
    CapacityExceeded { capacity: usize },
}

/// One recorded step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodicEntry<E> {
    pub step: u64,
    pub event: E,
    /// Where the index map stood when the step was written
    pub location: Option<Location>,
}

/// Append-only, step-indexed event log.
///
/// Entries are immutable once written. Appending beyond `capacity` fails and
/// the store stays full; callers should not retry against it.
#[derive(Debug, Clone)]
pub struct EpisodicStore<E> {
    capacity: usize,
    entries: Vec<EpisodicEntry<E>>,
    by_step: BTreeMap<u64, Vec<usize>>,
}

impl<E> EpisodicStore<E> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Vec::new(),
            by_step: BTreeMap::new(),
        }
    }

    pub fn capacity(&self) -> usize { self.capacity }
    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
    pub fn is_full(&self) -> bool { self.entries.len() >= self.capacity }

    /// Appends an entry and returns its position in the log
    pub fn append(&mut self, step: u64, event: E, location: Option<Location>) -> Result<usize, StoreError> {
        if self.is_full() {
            warn!(capacity = self.capacity, step, "episodic store capacity exceeded");
            return Err(StoreError::CapacityExceeded { capacity: self.capacity });
        }
        let pos = self.entries.len();
        self.entries.push(EpisodicEntry { step, event, location });
        self.by_step.entry(step).or_default().push(pos);
        Ok(pos)
    }

    /// Entries with `start <= step <= end`, in step order
    pub fn get_range(&self, start: u64, end: u64) -> impl Iterator<Item = &EpisodicEntry<E>> + '_ {
        let range = if start <= end {
            self.by_step.range(start..=end)
        } else {
            // empty range; BTreeMap panics on inverted bounds
            self.by_step.range(0..0)
        };
        range.flat_map(move |(_, positions)| positions.iter().map(move |&p| &self.entries[p]))
    }

    /// Entries recorded for exactly `step`
    pub fn get(&self, step: u64) -> Vec<&EpisodicEntry<E>> {
        self.get_range(step, step).collect()
    }

    pub fn first_step(&self) -> Option<u64> {
        self.by_step.keys().next().copied()
    }

    pub fn last_step(&self) -> Option<u64> {
        self.by_step.keys().next_back().copied()
    }

    /// Location snapshot of the latest entry at `step`
    pub fn location_at(&self, step: u64) -> Option<Location> {
        self.by_step
            .get(&step)
            .and_then(|positions| positions.last())
            .and_then(|&p| self.entries[p].location)
    }

    /// Entries in append order
    pub fn iter(&self) -> impl Iterator<Item = &EpisodicEntry<E>> {
        self.entries.iter()
    }
}
