pub mod error;
pub mod location;
pub mod math;

pub use error::{Error, Result};
pub use location::{solve, Plan, Problem, ProblemFamily, Report};
