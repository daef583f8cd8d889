//! Facility location and covering problems solved with the built-in MILP engine.
//!
//! Each family goes through the same pipeline:
//!
//! 1. validate the instance ([`problem`])
//! 2. build the canonical model ([`formulation`])
//! 3. search it with [`BranchAndBoundSolver`]
//! 4. read the incumbent back into a plan ([`extract`])
//!
//! # Examples
//!
//! ```
//! use facloc::location::{solve_set_covering, SetCoveringInstance};
//! use facloc::math::{BranchAndBoundConfig, SolveStatus};
//!
//! let instance = SetCoveringInstance {
//!     num_installations: 3,
//!     num_demands: 2,
//!     distances: vec![vec![1.0, 5.0, 9.0], vec![8.0, 2.0, 1.0]],
//!     service_levels: vec![3.0, 3.0],
//! };
//! let report = solve_set_covering(&instance, &BranchAndBoundConfig::default()).unwrap();
//! assert_eq!(report.status, SolveStatus::Optimal);
//! assert_eq!(report.plan.unwrap().installations.len(), 2);
//! ```

use log::info;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::math::integer_linear::{
    BranchAndBoundConfig, BranchAndBoundSolver, MilpSolver, SearchStatistics, SolveStatus,
};

pub mod extract;
pub mod formulation;
pub mod problem;

pub use extract::{
    Assignment, CapacitatedPlan, Coverage, CoveringPlan, FacilityUsage, UncapacitatedPlan,
};
pub use formulation::{CoveringLayout, FacilityLayout, Formulation};
pub use problem::{
    CapacitatedInstance, MaxCoveringInstance, Problem, ProblemFamily, SetCoveringInstance,
    UncapacitatedInstance,
};

/// Result of solving one instance.
///
/// `plan` is present whenever the search produced an incumbent: always for
/// `Optimal`, possibly for `TimeLimit` and `NumericError`, never for
/// `Infeasible` or `Unbounded`.
#[derive(Debug, Clone, PartialEq)]
pub struct Report<P> {
    pub status: SolveStatus,
    pub objective: Option<f64>,
    pub plan: Option<P>,
    pub message: Option<String>,
    pub statistics: SearchStatistics,
}

impl<P> Report<P> {
    pub fn map_plan<Q>(self, f: impl FnOnce(P) -> Q) -> Report<Q> {
        Report {
            status: self.status,
            objective: self.objective,
            plan: self.plan.map(f),
            message: self.message,
            statistics: self.statistics,
        }
    }
}

fn run<L, P>(
    formulation: Formulation<L>,
    config: &BranchAndBoundConfig,
    extract: impl FnOnce(&L, &[f64]) -> P,
) -> Result<Report<P>> {
    let Formulation { model, layout } = formulation;
    let solution = BranchAndBoundSolver::new(config.clone()).solve(&model)?;
    Ok(Report {
        status: solution.status,
        objective: solution.objective,
        plan: solution.values.as_deref().map(|values| extract(&layout, values)),
        message: solution.message,
        statistics: solution.statistics,
    })
}

/// Solves a capacitated facility location instance.
///
/// # Errors
///
/// `Error::InvalidInput` for malformed instances. Search failures are
/// reported through [`Report::status`] instead.
pub fn solve_capacitated(
    instance: &CapacitatedInstance,
    config: &BranchAndBoundConfig,
) -> Result<Report<CapacitatedPlan>> {
    run(formulation::capacitated(instance)?, config, |layout, values| {
        extract::capacitated(instance, layout, values)
    })
}

pub fn solve_uncapacitated(
    instance: &UncapacitatedInstance,
    config: &BranchAndBoundConfig,
) -> Result<Report<UncapacitatedPlan>> {
    run(formulation::uncapacitated(instance)?, config, |layout, values| {
        extract::uncapacitated(instance, layout, values)
    })
}

pub fn solve_set_covering(
    instance: &SetCoveringInstance,
    config: &BranchAndBoundConfig,
) -> Result<Report<CoveringPlan>> {
    run(formulation::set_covering(instance)?, config, |layout, values| {
        extract::covering(layout, values)
    })
}

pub fn solve_max_covering(
    instance: &MaxCoveringInstance,
    config: &BranchAndBoundConfig,
) -> Result<Report<CoveringPlan>> {
    run(formulation::max_covering(instance)?, config, |layout, values| {
        extract::covering(layout, values)
    })
}

/// Plan of any family, as returned by [`solve`].
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    Capacitated(CapacitatedPlan),
    Uncapacitated(UncapacitatedPlan),
    SetCovering(CoveringPlan),
    MaxCovering(CoveringPlan),
}

/// Dispatches `problem` to the solver of its family.
pub fn solve(problem: &Problem, config: &BranchAndBoundConfig) -> Result<Report<Plan>> {
    info!("solving {} instance", problem.family());
    match problem {
        Problem::Capacitated(p) => Ok(solve_capacitated(p, config)?.map_plan(Plan::Capacitated)),
        Problem::Uncapacitated(p) => {
            Ok(solve_uncapacitated(p, config)?.map_plan(Plan::Uncapacitated))
        }
        Problem::SetCovering(p) => Ok(solve_set_covering(p, config)?.map_plan(Plan::SetCovering)),
        Problem::MaxCovering(p) => Ok(solve_max_covering(p, config)?.map_plan(Plan::MaxCovering)),
    }
}

impl Report<Plan> {
    /// Response body in the shape the location service returns.
    ///
    /// Facility location answers with `"solutions": [assignments, second]`
    /// where `second` lists capacity usage (capacitated) or opened facilities
    /// (uncapacitated). Covering answers with `"solution": [indices]`. Both
    /// are `null` without a plan.
    pub fn to_payload(&self, family: ProblemFamily) -> Value {
        let mut body = json!({
            "status": self.status,
            "objective": self.objective,
        });
        let (key, result) = match (family, &self.plan) {
            (ProblemFamily::Capacitated, Some(Plan::Capacitated(plan))) => (
                "solutions",
                json!([plan.plan.assignment_descriptions(), plan.capacity_descriptions()]),
            ),
            (ProblemFamily::Uncapacitated, Some(Plan::Uncapacitated(plan))) => (
                "solutions",
                json!([plan.assignment_descriptions(), plan.opened_descriptions()]),
            ),
            (ProblemFamily::SetCovering, Some(Plan::SetCovering(plan)))
            | (ProblemFamily::MaxCovering, Some(Plan::MaxCovering(plan))) => {
                ("solution", json!(plan.installations))
            }
            (ProblemFamily::Capacitated | ProblemFamily::Uncapacitated, _) => {
                ("solutions", Value::Null)
            }
            (ProblemFamily::SetCovering | ProblemFamily::MaxCovering, _) => {
                ("solution", Value::Null)
            }
        };
        body[key] = result;
        if let Some(message) = &self.message {
            body["error"] = json!(message);
        }
        body
    }
}

/// Response body for a request that failed before or during solving.
pub fn error_payload(err: &Error) -> Value {
    let status = if err.is_client_error() {
        "INVALID_INPUT"
    } else {
        "NUMERIC_ERROR"
    };
    json!({ "status": status, "error": err.to_string() })
}

#[cfg(test)]
mod tests;
