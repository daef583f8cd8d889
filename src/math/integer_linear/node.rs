//! Search tree nodes.

use std::sync::Arc;

use crate::math::integer_linear::model::{BoundOverrides, Bounds, Model};
use crate::math::optimization::Basis;

/// One node of the branch-and-bound tree.
///
/// A node is created with its parent's LP bound and final basis and is
/// evaluated when it leaves the frontier; evaluation overwrites `bound` with
/// the node's own LP bound, fills `values` with the relaxation solution and
/// replaces `basis` with the node's own optimal basis.
#[derive(Debug, Clone)]
pub struct SearchNode {
    /// Creation order, unique within one search
    pub id: u64,
    pub parent: Option<u64>,
    pub depth: usize,
    /// Bound tightenings relative to the root model
    pub overrides: BoundOverrides,
    /// LP bound on the minimization scale (see [`Direction::key`])
    ///
    /// [`Direction::key`]: crate::math::integer_linear::model::Direction::key
    pub bound: f64,
    /// Relaxation solution, empty until the node is evaluated
    pub values: Vec<f64>,
    /// Starting basis for the relaxation; shared with the sibling
    pub basis: Option<Arc<Basis>>,
}

impl SearchNode {
    /// The root node: no overrides and no bound yet.
    pub fn root() -> Self {
        Self {
            id: 0,
            parent: None,
            depth: 0,
            overrides: BoundOverrides::new(),
            bound: f64::NEG_INFINITY,
            values: Vec::new(),
            basis: None,
        }
    }

    /// Child with `variable` restricted to `bounds` on top of this node's
    /// overrides. The child inherits this node's bound as its estimate.
    pub fn child(&self, id: u64, model: &Model, variable: usize, bounds: Bounds) -> Self {
        let mut overrides = self.overrides.clone();
        overrides.tighten(variable, bounds, model.variables()[variable].bounds);
        debug_assert!(overrides.refines(&self.overrides, model));
        Self {
            id,
            parent: Some(self.id),
            depth: self.depth + 1,
            overrides,
            bound: self.bound,
            values: Vec::new(),
            basis: self.basis.clone(),
        }
    }

    /// True if this node cannot improve on an incumbent with key `cutoff`.
    pub fn can_prune(&self, cutoff: f64, tolerance: f64) -> bool {
        self.bound >= cutoff - tolerance
    }
}
