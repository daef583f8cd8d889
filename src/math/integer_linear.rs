//! Binary integer programming by LP-based branch-and-bound.
//!
//! - [`model`]: the canonical MILP representation built by problem builders
//! - [`node`], [`frontier`]: the search tree and its best-bound queue
//! - [`incumbent`]: thread-safe holder of the best integer solution
//! - [`branch_and_bound`]: the search driver

use std::fmt;
use std::time::Duration;

use crate::error::Result;

pub mod branch_and_bound;
pub mod frontier;
pub mod incumbent;
pub mod model;
pub mod node;

/// Terminal state of a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SolveStatus {
    /// Frontier exhausted with an incumbent: the incumbent is optimal
    Optimal,
    /// Frontier exhausted without ever finding an integer solution
    Infeasible,
    /// An LP relaxation was unbounded
    Unbounded,
    /// A time, node or interrupt limit stopped the search early
    TimeLimit,
    /// The LP kernel failed; any incumbent found before is still reported
    NumericError,
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SolveStatus::Optimal => "OPTIMAL",
            SolveStatus::Infeasible => "INFEASIBLE",
            SolveStatus::Unbounded => "UNBOUNDED",
            SolveStatus::TimeLimit => "TIME_LIMIT",
            SolveStatus::NumericError => "NUMERIC_ERROR",
        };
        f.write_str(label)
    }
}

/// Counters collected during one search.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct SearchStatistics {
    /// Nodes whose LP relaxation was solved
    pub nodes_explored: u64,
    pub pruned_infeasible: u64,
    pub pruned_by_bound: u64,
    pub incumbent_updates: u64,
    /// Simplex iterations summed over all nodes
    pub lp_iterations: u64,
    pub max_depth: usize,
    pub elapsed: Duration,
    /// Best proven bound on the optimum, in the model's direction
    pub best_bound: Option<f64>,
    /// Relative distance between incumbent and best bound
    pub gap: Option<f64>,
}

/// Outcome of solving a [`model::Model`].
#[derive(Debug, Clone, PartialEq)]
pub struct MilpSolution {
    pub status: SolveStatus,
    /// Objective of the incumbent, if any
    pub objective: Option<f64>,
    /// Incumbent assignment with binaries exactly 0 or 1
    pub values: Option<Vec<f64>>,
    /// Diagnostic for `NumericError`
    pub message: Option<String>,
    pub statistics: SearchStatistics,
}

pub trait MilpSolver {
    fn solve(&self, model: &model::Model) -> Result<MilpSolution>;
}

pub use branch_and_bound::{BranchAndBoundConfig, BranchAndBoundSolver, SearchLimits};
pub use model::{BoundOverrides, Bounds, Constraint, Direction, Model, Sense, VariableDomain};

#[cfg(test)]
mod tests;
