//! Vote tally shared by the aggregator (writers) and the flusher (reader)
//!
//! Exactly one tally is live at a time. The slot is `None` right after a
//! flush and is created lazily by the next vote. All access goes through one
//! `std::sync::Mutex`; no caller holds it across an `.await`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Pending vote counts per option since the last successful flush
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tally {
    counts: HashMap<String, u64>,
}

impl Tally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, option: &str) {
        self.add(option, 1);
    }

    pub fn add(&mut self, option: &str, amount: u64) {
        if amount == 0 {
            return;
        }
        match self.counts.get_mut(option) {
            Some(count) => *count += amount,
            None => {
                self.counts.insert(option.to_string(), amount);
            }
        }
    }

    /// Sum another tally into this one
    pub fn merge(&mut self, other: Tally) {
        for (option, amount) in other.counts {
            *self.counts.entry(option).or_insert(0) += amount;
        }
    }

    pub fn get(&self, option: &str) -> u64 {
        self.counts.get(option).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Distinct options with a pending count
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Total pending votes across all options
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counts.iter().map(|(option, count)| (option.as_str(), *count))
    }
}

impl IntoIterator for Tally {
    type Item = (String, u64);
    type IntoIter = std::collections::hash_map::IntoIter<String, u64>;

    fn into_iter(self) -> Self::IntoIter {
        self.counts.into_iter()
    }
}

impl FromIterator<(String, u64)> for Tally {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        let mut tally = Tally::new();
        for (option, amount) in iter {
            tally.add(&option, amount);
        }
        tally
    }
}

/// The live tally slot
#[derive(Debug, Default)]
pub struct SharedTally {
    slot: Mutex<Option<Tally>>,
}

impl SharedTally {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Tally>> {
        // Tally updates cannot leave the map half-written, so a poisoned
        // guard still holds consistent counts.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count one vote, creating the live tally if absent
    pub fn record(&self, option: &str) {
        self.lock().get_or_insert_with(Tally::new).increment(option);
    }

    /// Hand the live tally to the caller and leave the slot empty
    ///
    /// Returns `None` when nothing was counted since the last take, so an idle
    /// flush tick never sees an empty map.
    pub fn take(&self) -> Option<Tally> {
        let mut slot = self.lock();
        match slot.take() {
            Some(tally) if !tally.is_empty() => Some(tally),
            _ => None,
        }
    }

    /// Merge unflushed counts back into the live tally
    pub fn restore(&self, unflushed: Tally) {
        if unflushed.is_empty() {
            return;
        }
        let mut slot = self.lock();
        match slot.as_mut() {
            Some(live) => live.merge(unflushed),
            None => *slot = Some(unflushed),
        }
    }

    /// Copy of the live tally, for inspection
    pub fn snapshot(&self) -> Tally {
        self.lock().clone().unwrap_or_default()
    }

    /// Total pending votes in the live tally
    pub fn pending(&self) -> u64 {
        self.lock().as_ref().map_or(0, Tally::total)
    }
}
