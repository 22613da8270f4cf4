//! Per-node tick counter

use std::collections::HashMap;
use tracing::{trace, warn};

/// Monotonic tick counter owned by one node.
///
/// Producers call [`tick`](Clock::tick) once per emitted cycle. Processing
/// nodes follow the tick of the data they consume via [`sync`](Clock::sync).
#[derive(Debug)]
pub struct Clock {
    ctr: u64,
    owner: String,
    seen: HashMap<String, u64>,
}

impl Clock {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            ctr: 0,
            owner: owner.into(),
            seen: HashMap::new(),
        }
    }

    /// Current counter value
    pub fn ctr(&self) -> u64 {
        self.ctr
    }

    /// Advance by one and return the new value
    pub fn tick(&mut self) -> u64 {
        self.ctr += 1;
        self.ctr
    }

    /// Move forward to `ctr`; older values leave the clock untouched
    pub fn sync(&mut self, ctr: u64) {
        if ctr > self.ctr {
            self.ctr = ctr;
        }
    }

    /// Record that `name` delivered data for `ctr`.
    ///
    /// Returns false (and warns) if `name` previously delivered a later tick.
    pub fn register(&mut self, name: &str, ctr: u64) -> bool {
        trace!("[{}] {} @ {}", self.owner, name, ctr);
        match self.seen.get_mut(name) {
            Some(last) if *last > ctr => {
                warn!(
                    "[{}] '{}' went back in time: {} after {}",
                    self.owner, name, ctr, last
                );
                false
            }
            Some(last) => {
                *last = ctr;
                true
            }
            None => {
                self.seen.insert(name.to_string(), ctr);
                true
            }
        }
    }

    /// Last tick seen from `name`
    pub fn last_seen(&self, name: &str) -> Option<u64> {
        self.seen.get(name).copied()
    }
}
