pub mod integer_linear;
pub mod linalg;
pub mod optimization;

pub use integer_linear::{
    BranchAndBoundConfig, BranchAndBoundSolver, MilpSolution, MilpSolver, SearchLimits,
    SearchStatistics, SolveStatus,
};
pub use optimization::{
    solve_relaxation, Basis, BoundedSimplex, Halt, LpConfig, LpOutcome, LpSolution,
};
