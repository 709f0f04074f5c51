// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// `LTime` is a Lamport timestamp: a non-negative logical instant with no
/// relation to wall time. Messages carry the `LTime` at which they were
/// issued and replicas use it (together with per-target floors) to decide
/// whether a message is current, stale, or from their local future.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct LTime(pub u64);

impl fmt::Display for LTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A Lamport clock: a monotonic logical counter shared by every thread of a
/// node. Local events allocate fresh instants with `increment`; every
/// incoming remote timestamp is passed to `witness` before any other
/// processing so the local clock never falls behind an observed peer.
#[derive(Debug, Default)]
pub struct LamportClock {
    counter: AtomicU64,
}

impl LamportClock {
    pub fn new() -> Self {
        LamportClock {
            counter: AtomicU64::new(0),
        }
    }

    /// Read the current logical time without advancing it.
    pub fn time(&self) -> LTime {
        LTime(self.counter.load(Ordering::SeqCst))
    }

    /// Advance the clock by one and return the new instant.
    pub fn increment(&self) -> LTime {
        LTime(self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Absorb a remote timestamp: if `t` is at or ahead of the local clock,
    /// jump to `t + 1`. Otherwise leave the clock alone.
    pub fn witness(&self, t: LTime) {
        loop {
            let cur = self.counter.load(Ordering::SeqCst);
            if t.0 < cur {
                return;
            }
            if self
                .counter
                .compare_exchange(cur, t.0 + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return;
            }
        }
    }
}

// The model checker snapshots whole replicas, and an atomic counter has no
// structural identity of its own. Clone/Eq/Hash go through the counter value.
impl Clone for LamportClock {
    fn clone(&self) -> Self {
        LamportClock {
            counter: AtomicU64::new(self.counter.load(Ordering::SeqCst)),
        }
    }
}

impl PartialEq for LamportClock {
    fn eq(&self, other: &Self) -> bool {
        self.time() == other.time()
    }
}

impl Eq for LamportClock {}

impl std::hash::Hash for LamportClock {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.time().hash(state);
    }
}
