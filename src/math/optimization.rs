//! Linear programming relaxations.
//!
//! The only algorithm here is the bounded-variable revised simplex used by
//! the branch-and-bound engine, see [`simplex`].

pub mod simplex;

pub use simplex::{solve_relaxation, Basis, BoundedSimplex, Halt, LpOutcome, LpSolution};

/// Configuration options for the simplex kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct LpConfig {
    /// Optimality and feasibility tolerance
    pub tolerance: f64,
    /// Smallest admissible pivot magnitude in the ratio test and basis inversion
    pub pivot_tolerance: f64,
    /// Maximum number of simplex iterations (both phases) before giving up
    pub max_iterations: usize,
    /// Consecutive degenerate pivots tolerated before switching to Bland's rule
    pub degenerate_pivot_limit: usize,
    /// Basis changes between two rebuilds of the eta file
    pub refactor_interval: usize,
    /// Re-solve child relaxations from the parent's optimal basis
    pub warm_start: bool,
}

impl Default for LpConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            pivot_tolerance: 1e-9,
            max_iterations: 50_000,
            degenerate_pivot_limit: 50,
            refactor_interval: 100,
            warm_start: true,
        }
    }
}

impl LpConfig {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_degenerate_pivot_limit(mut self, limit: usize) -> Self {
        self.degenerate_pivot_limit = limit;
        self
    }

    pub fn with_refactor_interval(mut self, interval: usize) -> Self {
        self.refactor_interval = interval.max(1);
        self
    }

    pub fn with_warm_start(mut self, warm_start: bool) -> Self {
        self.warm_start = warm_start;
        self
    }
}
