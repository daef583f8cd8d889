//! Canonical MILP model: variables, sparse constraint rows and a linear objective.
//!
//! A [`Model`] is assembled once by a problem builder and is read-only for the
//! rest of its life. Search nodes never mutate it; they carry
//! [`BoundOverrides`] on top of it instead.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Value domain of a decision variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableDomain {
    /// x ∈ {0, 1}; relaxed to [0, 1] inside the LP.
    Binary,
    /// x ∈ [lower, upper]
    Continuous,
}

/// Comparison sense of a constraint row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sense {
    /// Σ a_j x_j ≤ rhs
    LessEqual,
    /// Σ a_j x_j = rhs
    Equal,
    /// Σ a_j x_j ≥ rhs
    GreaterEqual,
}

/// Optimization direction of the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Minimize,
    Maximize,
}

impl Direction {
    /// Maps an objective value onto a scale where smaller is always better.
    pub fn key(self, value: f64) -> f64 {
        match self {
            Direction::Minimize => value,
            Direction::Maximize => -value,
        }
    }

    /// Inverse of [`Direction::key`].
    pub fn from_key(self, key: f64) -> f64 {
        self.key(key)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Minimize => write!(f, "minimize"),
            Direction::Maximize => write!(f, "maximize"),
        }
    }
}

/// Closed interval `[lower, upper]`; `upper` may be `+inf`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub lower: f64,
    pub upper: f64,
}

impl Bounds {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    pub fn binary() -> Self {
        Self::new(0.0, 1.0)
    }

    pub fn fixed(value: f64) -> Self {
        Self::new(value, value)
    }

    /// True if no value satisfies both bounds.
    pub fn is_empty(&self, tolerance: f64) -> bool {
        self.lower > self.upper + tolerance
    }

    pub fn contains(&self, value: f64, tolerance: f64) -> bool {
        value >= self.lower - tolerance && value <= self.upper + tolerance
    }

    /// Intersection of two intervals. May be empty.
    pub fn intersect(&self, other: Bounds) -> Bounds {
        Bounds::new(self.lower.max(other.lower), self.upper.min(other.upper))
    }

    /// True if `self` is contained in `other`.
    pub fn is_within(&self, other: Bounds) -> bool {
        self.lower >= other.lower && self.upper <= other.upper
    }
}

/// A decision variable, addressed by its index in the owning [`Model`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub index: usize,
    pub name: String,
    pub domain: VariableDomain,
    pub bounds: Bounds,
}

impl Variable {
    pub fn is_integer(&self) -> bool {
        matches!(self.domain, VariableDomain::Binary)
    }
}

/// A linear constraint `Σ a_j x_j (sense) rhs` stored as a sparse row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub name: String,
    pub coefficients: BTreeMap<usize, f64>,
    pub sense: Sense,
    pub rhs: f64,
}

impl Constraint {
    pub fn new(sense: Sense, rhs: f64) -> Self {
        Self {
            name: String::new(),
            coefficients: BTreeMap::new(),
            sense,
            rhs,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Adds `coefficient * x[variable]` to the row, summing repeated terms.
    pub fn with_term(mut self, variable: usize, coefficient: f64) -> Self {
        *self.coefficients.entry(variable).or_insert(0.0) += coefficient;
        self
    }

    /// Left-hand side evaluated at `values`.
    pub fn activity(&self, values: &[f64]) -> f64 {
        self.coefficients
            .iter()
            .map(|(&j, &a)| a * values.get(j).copied().unwrap_or(0.0))
            .sum()
    }

    /// How far `values` are from satisfying the row (0 when satisfied).
    pub fn violation(&self, values: &[f64]) -> f64 {
        let lhs = self.activity(values);
        match self.sense {
            Sense::LessEqual => (lhs - self.rhs).max(0.0),
            Sense::GreaterEqual => (self.rhs - lhs).max(0.0),
            Sense::Equal => (lhs - self.rhs).abs(),
        }
    }
}

/// Linear objective over all model variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    pub direction: Direction,
    pub coefficients: Vec<f64>,
}

impl Objective {
    pub fn evaluate(&self, values: &[f64]) -> f64 {
        self.coefficients.iter().zip(values).map(|(c, x)| c * x).sum()
    }
}

/// One MILP instance: the full variable set, constraint set and objective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    name: String,
    variables: Vec<Variable>,
    constraints: Vec<Constraint>,
    objective: Objective,
}

impl Model {
    pub fn new(name: impl Into<String>, direction: Direction) -> Self {
        Self {
            name: name.into(),
            variables: Vec::new(),
            constraints: Vec::new(),
            objective: Objective {
                direction,
                coefficients: Vec::new(),
            },
        }
    }

    /// Adds a variable with a zero objective coefficient and returns its index.
    ///
    /// # Errors
    ///
    /// `Error::InvalidInput` if the lower bound is not finite, the interval is
    /// empty, or a binary variable's bounds leave `[0, 1]`.
    pub fn add_variable(
        &mut self,
        name: impl Into<String>,
        domain: VariableDomain,
        bounds: Bounds,
    ) -> Result<usize> {
        let name = name.into();
        if !bounds.lower.is_finite() || bounds.upper.is_nan() {
            return Err(Error::invalid_input(format!(
                "variable '{name}' needs a finite lower bound"
            )));
        }
        if bounds.is_empty(0.0) {
            return Err(Error::invalid_input(format!(
                "variable '{name}' has lower bound {} above upper bound {}",
                bounds.lower, bounds.upper
            )));
        }
        if domain == VariableDomain::Binary && !bounds.is_within(Bounds::binary()) {
            return Err(Error::invalid_input(format!(
                "binary variable '{name}' has bounds outside [0, 1]"
            )));
        }

        let index = self.variables.len();
        self.variables.push(Variable {
            index,
            name,
            domain,
            bounds,
        });
        self.objective.coefficients.push(0.0);
        Ok(index)
    }

    /// Adds a `{0, 1}` variable.
    pub fn add_binary(&mut self, name: impl Into<String>) -> usize {
        let index = self.variables.len();
        self.variables.push(Variable {
            index,
            name: name.into(),
            domain: VariableDomain::Binary,
            bounds: Bounds::binary(),
        });
        self.objective.coefficients.push(0.0);
        index
    }

    pub fn set_objective_coefficient(&mut self, variable: usize, coefficient: f64) -> Result<()> {
        if !coefficient.is_finite() {
            return Err(Error::invalid_input(format!(
                "objective coefficient of variable {variable} is not finite"
            )));
        }
        let slot = self.objective.coefficients.get_mut(variable).ok_or_else(|| {
            Error::invalid_input(format!("objective references unknown variable {variable}"))
        })?;
        *slot = coefficient;
        Ok(())
    }

    /// Appends a constraint row and returns its index.
    ///
    /// # Errors
    ///
    /// `Error::InvalidInput` if the row references a variable the model does
    /// not own or contains a non-finite number.
    pub fn add_constraint(&mut self, constraint: Constraint) -> Result<usize> {
        if !constraint.rhs.is_finite() {
            return Err(Error::invalid_input(format!(
                "constraint '{}' has a non-finite right-hand side",
                constraint.name
            )));
        }
        for (&j, &a) in &constraint.coefficients {
            if j >= self.variables.len() {
                return Err(Error::invalid_input(format!(
                    "constraint '{}' references unknown variable {j}",
                    constraint.name
                )));
            }
            if !a.is_finite() {
                return Err(Error::invalid_input(format!(
                    "constraint '{}' has a non-finite coefficient on variable {j}",
                    constraint.name
                )));
            }
        }
        self.constraints.push(constraint);
        Ok(self.constraints.len() - 1)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn objective(&self) -> &Objective {
        &self.objective
    }

    pub fn direction(&self) -> Direction {
        self.objective.direction
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    pub fn num_binary(&self) -> usize {
        self.variables.iter().filter(|v| v.is_integer()).count()
    }

    /// Objective value of a full assignment.
    pub fn evaluate(&self, values: &[f64]) -> f64 {
        self.objective.evaluate(values)
    }

    /// Largest constraint or bound violation of `values`.
    pub fn max_violation(&self, values: &[f64]) -> f64 {
        let rows = self
            .constraints
            .iter()
            .map(|c| c.violation(values))
            .fold(0.0, f64::max);
        let bounds = self
            .variables
            .iter()
            .zip(values)
            .map(|(v, &x)| (v.bounds.lower - x).max(x - v.bounds.upper).max(0.0))
            .fold(0.0, f64::max);
        rows.max(bounds)
    }

    /// True when every integer-feasible point has an integral objective value:
    /// all non-zero costs sit on binary variables and are whole numbers.
    pub fn has_integral_objective(&self) -> bool {
        self.variables
            .iter()
            .zip(&self.objective.coefficients)
            .all(|(v, &c)| c == 0.0 || (v.is_integer() && c.fract() == 0.0))
    }
}

/// Per-variable bound tightenings applied on top of a [`Model`].
///
/// Each search node owns one of these. A child's overrides are always the
/// parent's overrides intersected with one more tightening, so they are never
/// looser than the parent's.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundOverrides {
    overrides: BTreeMap<usize, Bounds>,
}

impl BoundOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, variable: usize) -> Option<Bounds> {
        self.overrides.get(&variable).copied()
    }

    /// Intersects the current bounds of `variable` with `bounds`.
    ///
    /// `base` is the variable's bounds in the model, used when no override
    /// exists yet. The result may be empty; the LP reports that as infeasible.
    pub fn tighten(&mut self, variable: usize, bounds: Bounds, base: Bounds) {
        let current = self.get(variable).unwrap_or(base);
        self.overrides.insert(variable, current.intersect(bounds));
    }

    /// Bounds of every model variable with the overrides applied.
    pub fn effective(&self, model: &Model) -> Vec<Bounds> {
        model
            .variables()
            .iter()
            .map(|v| match self.get(v.index) {
                Some(b) => v.bounds.intersect(b),
                None => v.bounds,
            })
            .collect()
    }

    /// True if every effective bound is within the corresponding bound of
    /// `parent`.
    pub fn refines(&self, parent: &BoundOverrides, model: &Model) -> bool {
        self.effective(model)
            .iter()
            .zip(parent.effective(model))
            .all(|(child, parent)| child.is_within(parent))
    }
}
