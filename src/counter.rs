use std::collections::HashMap;

use crate::Flight;

/// How many times each flight has been transmitted.
///
/// Counts start at 1 for the initial transmission and grow by one for every
/// retransmission. Entries are created on first sight and never decremented.
#[derive(Debug, Default)]
pub struct TransmissionCounter {
    counts: HashMap<Flight, u32>,
}

impl TransmissionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one more transmission of `flight` and return its 1-based number.
    ///
    /// Must be called exactly once per physical transmission.
    pub fn observe(&mut self, flight: Flight) -> u32 {
        let count = self.counts.entry(flight).or_insert(0);
        *count = count
            .checked_add(1)
            .expect("transmission count to stay within u32");
        *count
    }

    /// The number of transmissions of `flight` so far.
    pub fn current(&self, flight: Flight) -> Option<u32> {
        self.counts.get(&flight).copied()
    }

    /// Number of distinct flights seen.
    pub fn flights(&self) -> usize {
        self.counts.len()
    }
}
