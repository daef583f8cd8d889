//! # Shared Incumbent
//!
//! Holder for the best integer-feasible solution found during a search.
//!
//! The objective key (minimization scale) is mirrored in an `AtomicU64` as raw
//! `f64` bits so pruning checks can read it without locking. The solution
//! itself lives behind a `parking_lot::Mutex`, and [`SharedIncumbent::try_install`]
//! re-checks the key under that lock, so a worker can never replace a better
//! incumbent with a worse one.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// An integer-feasible solution.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Objective in the model's own direction
    pub objective: f64,
    /// Objective on the minimization scale
    pub key: f64,
    pub values: Vec<f64>,
}

#[derive(Debug)]
pub struct SharedIncumbent {
    key: AtomicU64,
    best: Mutex<Option<Candidate>>,
}

impl Default for SharedIncumbent {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedIncumbent {
    /// An empty incumbent; its key is `+inf`.
    pub fn new() -> Self {
        Self {
            key: AtomicU64::new(f64::INFINITY.to_bits()),
            best: Mutex::new(None),
        }
    }

    /// Current incumbent key, `+inf` if none. Lock-free.
    #[inline]
    pub fn key(&self) -> f64 {
        f64::from_bits(self.key.load(Ordering::Acquire))
    }

    /// Installs `candidate` if its key is strictly smaller than the current
    /// one. Returns whether it was installed.
    pub fn try_install(&self, candidate: Candidate) -> bool {
        if candidate.key >= self.key() {
            return false;
        }
        let mut best = self.best.lock();
        let current = best.as_ref().map_or(f64::INFINITY, |c| c.key);
        if candidate.key >= current {
            return false;
        }
        self.key.store(candidate.key.to_bits(), Ordering::Release);
        *best = Some(candidate);
        true
    }

    pub fn into_inner(self) -> Option<Candidate> {
        self.best.into_inner()
    }
}
