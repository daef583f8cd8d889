use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use log::trace;
use ndarray::Array1;

use crate::error::{Error, Result};
use crate::math::integer_linear::model::{BoundOverrides, Bounds, Model, Sense};
use crate::math::linalg::{ColumnMatrix, EtaFile, EPSILON};
use crate::math::optimization::LpConfig;

/// Iterations between two looks at the clock and the interrupt flag.
const HALT_CHECK_INTERVAL: usize = 16;

/// Optimal point of an LP relaxation.
#[derive(Debug, Clone, PartialEq)]
pub struct LpSolution {
    /// Objective value in the model's own direction
    pub objective: f64,
    /// Value of every structural variable
    pub values: Vec<f64>,
    /// Simplex iterations spent, warm attempt included
    pub iterations: usize,
    /// Final basis, the starting point for re-solves under tighter bounds
    pub basis: Option<Basis>,
}

/// Result of solving one LP relaxation.
#[derive(Debug, Clone, PartialEq)]
pub enum LpOutcome {
    Optimal(LpSolution),
    Infeasible,
    Unbounded,
    /// The [`Halt`] passed to the solve fired before it finished
    Interrupted,
}

/// Solves the LP relaxation of `model` with `overrides` applied.
///
/// Convenience wrapper that builds a [`BoundedSimplex`] for a single call.
/// The branch-and-bound engine keeps one `BoundedSimplex` per model instead.
///
/// # Examples
///
/// ```
/// use facloc::math::integer_linear::model::{BoundOverrides, Constraint, Direction, Model, Sense};
/// use facloc::math::optimization::{solve_relaxation, LpConfig, LpOutcome};
///
/// // maximize x + y  subject to  x + y <= 1.5,  x, y in [0, 1]
/// let mut model = Model::new("lp", Direction::Maximize);
/// let x = model.add_binary("x");
/// let y = model.add_binary("y");
/// model.set_objective_coefficient(x, 1.0).unwrap();
/// model.set_objective_coefficient(y, 1.0).unwrap();
/// model
///     .add_constraint(Constraint::new(Sense::LessEqual, 1.5).with_term(x, 1.0).with_term(y, 1.0))
///     .unwrap();
///
/// let outcome = solve_relaxation(&model, &BoundOverrides::new(), &LpConfig::default()).unwrap();
/// match outcome {
///     LpOutcome::Optimal(sol) => assert!((sol.objective - 1.5).abs() < 1e-9),
///     other => panic!("unexpected {other:?}"),
/// }
/// ```
pub fn solve_relaxation(
    model: &Model,
    overrides: &BoundOverrides,
    config: &LpConfig,
) -> Result<LpOutcome> {
    BoundedSimplex::new(model, config.clone())?.solve(overrides)
}

/// Stop condition polled while the simplex iterates.
#[derive(Debug, Clone, Copy, Default)]
pub struct Halt<'a> {
    deadline: Option<Instant>,
    interrupt: Option<&'a AtomicBool>,
}

impl<'a> Halt<'a> {
    pub fn new(deadline: Option<Instant>, interrupt: Option<&'a AtomicBool>) -> Self {
        Self {
            deadline,
            interrupt,
        }
    }

    fn fired(&self) -> bool {
        self.deadline.is_some_and(|at| Instant::now() >= at)
            || self
                .interrupt
                .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Basic,
    AtLower,
    AtUpper,
}

/// Column statuses of an optimal basis over structurals and row logicals.
///
/// Only meaningful for the [`BoundedSimplex`] that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Basis {
    status: Vec<Status>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnState {
    Basic(usize),
    AtLower,
    AtUpper,
}

/// Where a column of the working problem comes from.
#[derive(Debug, Clone, Copy)]
enum ColumnKind {
    /// Column `j` of the constraint matrix
    Structural(usize),
    /// `sign * e_row`: a row logical (sign 1) or a phase-one artificial
    Unit { row: usize, sign: f64 },
}

/// Mutable state of one solve. Owned exclusively by the call to
/// [`BoundedSimplex::solve_from`].
struct Workspace {
    lower: Vec<f64>,
    upper: Vec<f64>,
    values: Vec<f64>,
    state: Vec<ColumnState>,
    /// Column occupying each basis position
    basis: Vec<usize>,
    inverse: EtaFile,
    /// `(row, sign)` of each artificial column, in column order
    artificials: Vec<(usize, f64)>,
    iterations: usize,
    pivots_since_refactor: usize,
    degenerate_run: usize,
    bland: bool,
}

enum PhaseEnd {
    Optimal,
    Unbounded,
    Halted,
}

enum DualEnd {
    Feasible,
    Infeasible,
    Halted,
    /// Out of iterations or pivots; the caller starts over cold
    Stalled,
}

enum WarmEnd {
    Solved(LpOutcome),
    Abandoned { iterations: usize },
}

/// Range of the logical `s` in `a x + s = rhs` for a row of `sense`.
fn slack_bounds(sense: Sense) -> Bounds {
    match sense {
        Sense::LessEqual => Bounds::new(0.0, f64::INFINITY),
        Sense::Equal => Bounds::fixed(0.0),
        Sense::GreaterEqual => Bounds::new(f64::NEG_INFINITY, 0.0),
    }
}

/// Revised simplex method with bounded variables.
///
/// Rows with a single variable are folded into that variable's bounds when
/// the kernel is built. Every remaining row `i` gets one logical column
/// `s_i` so that rows read `a_i x + s_i = b_i`, with `s_i ∈ [0, ∞)` for `≤`,
/// `s_i = 0` for `=` and `s_i ∈ (-∞, 0]` for `≥`. Variable bounds (including
/// the `[0, 1]` box of every binary) are handled directly by the ratio test,
/// so the basis dimension equals the number of kept rows. The basis inverse
/// is held in product form, see [`EtaFile`].
///
/// A cold solve starts from the all-logical basis and adds an artificial
/// column only for rows whose logical would start outside its bounds. A warm
/// solve starts from the [`Basis`] of a related optimal solve: when the new
/// bounds leave it primal infeasible but dual feasible, the dual simplex
/// repairs it in a handful of pivots. Any trouble on the warm path falls
/// back to a cold solve.
///
/// Pricing is Dantzig's rule (largest reduced cost). After
/// `degenerate_pivot_limit` consecutive degenerate pivots the kernel falls
/// back to Bland's smallest-index rule until the objective moves again, which
/// rules out cycling on the heavily degenerate covering relaxations.
#[derive(Debug, Clone)]
pub struct BoundedSimplex<'a> {
    model: &'a Model,
    matrix: ColumnMatrix,
    rhs: Vec<f64>,
    logical_bounds: Vec<Bounds>,
    /// Bounds implied by single-variable rows
    implied: Vec<Bounds>,
    /// A row without variables that can never hold
    contradiction: bool,
    /// Structural costs on the minimization scale
    costs: Vec<f64>,
    config: LpConfig,
}

impl<'a> BoundedSimplex<'a> {
    /// Prepares the column-wise form of `model`.
    ///
    /// # Errors
    ///
    /// `Error::InvalidInput` if a constraint references a variable outside
    /// the model.
    pub fn new(model: &'a Model, config: LpConfig) -> Result<Self> {
        let n = model.num_variables();
        let mut implied = vec![Bounds::new(f64::NEG_INFINITY, f64::INFINITY); n];
        let mut contradiction = false;
        let mut kept = Vec::new();

        for (i, constraint) in model.constraints().iter().enumerate() {
            let allowed = slack_bounds(constraint.sense);
            let mut terms = constraint
                .coefficients
                .iter()
                .filter(|(_, a)| a.abs() > EPSILON);
            match (terms.next(), terms.next()) {
                (None, _) => {
                    if !allowed.contains(constraint.rhs, config.tolerance) {
                        contradiction = true;
                    }
                }
                (Some((&j, &a)), None) => {
                    let slot = implied.get_mut(j).ok_or_else(|| {
                        Error::invalid_input(format!(
                            "constraint '{}' references unknown variable {j}",
                            constraint.name
                        ))
                    })?;
                    let low = (constraint.rhs - allowed.upper) / a;
                    let high = (constraint.rhs - allowed.lower) / a;
                    let range = if a > 0.0 {
                        Bounds::new(low, high)
                    } else {
                        Bounds::new(high, low)
                    };
                    *slot = slot.intersect(range);
                }
                _ => kept.push(i),
            }
        }

        let constraints = model.constraints();
        let triplets = kept.iter().enumerate().flat_map(|(r, &i)| {
            constraints[i]
                .coefficients
                .iter()
                .map(move |(&j, &a)| (r, j, a))
        });
        let matrix = ColumnMatrix::from_triplets(kept.len(), n, triplets)?;
        let rhs = kept.iter().map(|&i| constraints[i].rhs).collect();
        let logical_bounds = kept
            .iter()
            .map(|&i| slack_bounds(constraints[i].sense))
            .collect();
        trace!(
            "'{}': {} of {} rows folded into variable bounds",
            model.name(),
            constraints.len() - kept.len(),
            constraints.len()
        );

        let direction = model.direction();
        let costs = model
            .objective()
            .coefficients
            .iter()
            .map(|&c| direction.key(c))
            .collect();

        Ok(Self {
            model,
            matrix,
            rhs,
            logical_bounds,
            implied,
            contradiction,
            costs,
            config,
        })
    }

    /// Solves the relaxation with `overrides` applied, from scratch and
    /// without a stop condition.
    ///
    /// # Errors
    ///
    /// See [`BoundedSimplex::solve_from`].
    pub fn solve(&self, overrides: &BoundOverrides) -> Result<LpOutcome> {
        self.solve_from(overrides, None, Halt::default())
    }

    /// Solves the relaxation with `overrides` applied to the model's bounds,
    /// starting from `start` when given.
    ///
    /// # Returns
    ///
    /// * `Ok(LpOutcome::Optimal(_))` with structural values inside their bounds
    /// * `Ok(LpOutcome::Infeasible)` if the bounds or rows cannot be met
    /// * `Ok(LpOutcome::Unbounded)` if the objective improves without limit
    /// * `Ok(LpOutcome::Interrupted)` once `halt` fires
    ///
    /// # Errors
    ///
    /// `Error::Numeric` if the basis becomes singular, the iteration cap is
    /// reached, or the final point fails its residual check.
    pub fn solve_from(
        &self,
        overrides: &BoundOverrides,
        start: Option<&Basis>,
        halt: Halt<'_>,
    ) -> Result<LpOutcome> {
        let tol = self.config.tolerance;
        if self.contradiction {
            return Ok(LpOutcome::Infeasible);
        }
        let bounds: Vec<Bounds> = overrides
            .effective(self.model)
            .iter()
            .zip(&self.implied)
            .map(|(own, implied)| own.intersect(*implied))
            .collect();
        if bounds.iter().any(|b| b.is_empty(tol)) {
            return Ok(LpOutcome::Infeasible);
        }
        let bounds: Vec<Bounds> = bounds
            .into_iter()
            .map(|b| Bounds::new(b.lower, b.upper.max(b.lower)))
            .collect();

        let mut spent = 0;
        if let Some(start) = start {
            match self.warm_solve(&bounds, start, halt)? {
                WarmEnd::Solved(outcome) => return Ok(outcome),
                WarmEnd::Abandoned { iterations } => {
                    trace!("warm start abandoned after {iterations} iterations");
                    spent = iterations;
                }
            }
        }

        let mut ws = self.initial_workspace(&bounds);
        let outcome = self.cold_solve(&mut ws, &bounds, halt)?;
        Ok(match outcome {
            LpOutcome::Optimal(mut solution) => {
                solution.iterations += spent;
                LpOutcome::Optimal(solution)
            }
            other => other,
        })
    }

    fn feasibility_tolerance(&self) -> f64 {
        let scale = self.rhs.iter().fold(1.0_f64, |acc, b| acc.max(b.abs()));
        self.config.tolerance * scale
    }

    fn width(&self) -> usize {
        self.matrix.n_cols() + self.matrix.n_rows()
    }

    fn kind(&self, column: usize, ws: &Workspace) -> ColumnKind {
        let n = self.matrix.n_cols();
        let m = self.matrix.n_rows();
        if column < n {
            ColumnKind::Structural(column)
        } else if column < n + m {
            ColumnKind::Unit {
                row: column - n,
                sign: 1.0,
            }
        } else {
            let (row, sign) = ws.artificials[column - n - m];
            ColumnKind::Unit { row, sign }
        }
    }

    fn phase_two_costs(&self, len: usize) -> Vec<f64> {
        let mut costs = vec![0.0; len];
        costs[..self.costs.len()].copy_from_slice(&self.costs);
        costs
    }

    /// Phase one from the all-logical basis, then phase two.
    fn cold_solve(
        &self,
        ws: &mut Workspace,
        bounds: &[Bounds],
        halt: Halt<'_>,
    ) -> Result<LpOutcome> {
        let width = self.width();
        self.refactor(ws)?;

        if !ws.artificials.is_empty() {
            let mut phase_one = vec![0.0; ws.values.len()];
            for cost in phase_one.iter_mut().skip(width) {
                *cost = 1.0;
            }
            match self.run_phase(ws, &phase_one, halt)? {
                PhaseEnd::Optimal => {}
                PhaseEnd::Halted => return Ok(LpOutcome::Interrupted),
                PhaseEnd::Unbounded => {
                    return Err(Error::numeric("phase one reported an unbounded direction"));
                }
            }
            let infeasibility: f64 = ws.values[width..].iter().sum();
            trace!(
                "phase one finished after {} iterations, infeasibility {:e}",
                ws.iterations,
                infeasibility
            );
            if infeasibility > self.feasibility_tolerance() {
                return Ok(LpOutcome::Infeasible);
            }
            // Pin artificials to zero; any still basic leave on the next
            // degenerate pivot through their row.
            for j in width..ws.values.len() {
                ws.lower[j] = 0.0;
                ws.upper[j] = 0.0;
                if !matches!(ws.state[j], ColumnState::Basic(_)) {
                    ws.values[j] = 0.0;
                    ws.state[j] = ColumnState::AtLower;
                }
            }
            ws.degenerate_run = 0;
            ws.bland = false;
        }

        self.finish(ws, bounds, halt)
    }

    /// Restarts from `start`. Anything short of a clean answer is reported
    /// as abandoned so the caller can solve cold.
    fn warm_solve(&self, bounds: &[Bounds], start: &Basis, halt: Halt<'_>) -> Result<WarmEnd> {
        let Some(mut ws) = self.basis_workspace(bounds, start) else {
            return Ok(WarmEnd::Abandoned { iterations: 0 });
        };
        if let Err(err) = self.refactor(&mut ws) {
            trace!("warm basis rejected: {err}");
            return Ok(WarmEnd::Abandoned { iterations: 0 });
        }

        let costs = self.phase_two_costs(ws.values.len());
        if !self.is_primal_feasible(&ws) {
            if !self.is_dual_feasible(&ws, &costs) {
                return Ok(WarmEnd::Abandoned { iterations: 0 });
            }
            match self.run_dual(&mut ws, &costs, halt) {
                Ok(DualEnd::Feasible) => {}
                Ok(DualEnd::Infeasible) => {
                    trace!("dual simplex proved infeasibility in {} pivots", ws.iterations);
                    return Ok(WarmEnd::Solved(LpOutcome::Infeasible));
                }
                Ok(DualEnd::Halted) => return Ok(WarmEnd::Solved(LpOutcome::Interrupted)),
                Ok(DualEnd::Stalled) => {
                    return Ok(WarmEnd::Abandoned {
                        iterations: ws.iterations,
                    })
                }
                Err(err) => {
                    trace!("dual simplex failed: {err}");
                    return Ok(WarmEnd::Abandoned {
                        iterations: ws.iterations,
                    });
                }
            }
        }

        match self.finish(&mut ws, bounds, halt) {
            Ok(outcome) => Ok(WarmEnd::Solved(outcome)),
            Err(err) => {
                trace!("warm phase two failed: {err}");
                Ok(WarmEnd::Abandoned {
                    iterations: ws.iterations,
                })
            }
        }
    }

    /// Phase two from a primal feasible basis, then the residual check.
    fn finish(&self, ws: &mut Workspace, bounds: &[Bounds], halt: Halt<'_>) -> Result<LpOutcome> {
        let tol = self.config.tolerance;
        let n = self.matrix.n_cols();
        let costs = self.phase_two_costs(ws.values.len());
        match self.run_phase(ws, &costs, halt)? {
            PhaseEnd::Optimal => {}
            PhaseEnd::Halted => return Ok(LpOutcome::Interrupted),
            PhaseEnd::Unbounded => {
                trace!("phase two unbounded after {} iterations", ws.iterations);
                return Ok(LpOutcome::Unbounded);
            }
        }

        self.refactor(ws)?;
        let values: Vec<f64> = (0..n)
            .map(|j| ws.values[j].clamp(bounds[j].lower, bounds[j].upper))
            .collect();

        for (i, constraint) in self.model.constraints().iter().enumerate() {
            let slack = constraint.rhs - constraint.activity(&values);
            let allowed = slack_bounds(constraint.sense);
            let scale = 1.0 + constraint.rhs.abs();
            if !allowed.contains(slack, 10.0 * tol * scale) {
                return Err(Error::numeric(format!(
                    "row {i} violated by {:e} after simplex termination",
                    (slack - slack.clamp(allowed.lower, allowed.upper)).abs()
                )));
            }
        }

        trace!("phase two finished after {} iterations", ws.iterations);
        Ok(LpOutcome::Optimal(LpSolution {
            objective: self.model.evaluate(&values),
            values,
            iterations: ws.iterations,
            basis: Some(self.snapshot(ws)),
        }))
    }

    /// Statuses of the structural and logical columns. An artificial still
    /// basic at zero hands its position to the logical of its row, which is
    /// nonbasic in any nonsingular basis.
    fn snapshot(&self, ws: &Workspace) -> Basis {
        let width = self.width();
        let mut status: Vec<Status> = ws.state[..width]
            .iter()
            .map(|state| match state {
                ColumnState::Basic(_) => Status::Basic,
                ColumnState::AtLower => Status::AtLower,
                ColumnState::AtUpper => Status::AtUpper,
            })
            .collect();
        for &column in ws.basis.iter().filter(|&&column| column >= width) {
            if let ColumnKind::Unit { row, .. } = self.kind(column, ws) {
                status[self.matrix.n_cols() + row] = Status::Basic;
            }
        }
        Basis { status }
    }

    /// Structurals at their lower bound, logicals absorbing the residual, and
    /// an artificial wherever a logical would start out of bounds.
    fn initial_workspace(&self, bounds: &[Bounds]) -> Workspace {
        let n = self.matrix.n_cols();
        let m = self.matrix.n_rows();
        let tol = self.config.tolerance;

        let mut lower: Vec<f64> = bounds.iter().map(|b| b.lower).collect();
        let mut upper: Vec<f64> = bounds.iter().map(|b| b.upper).collect();
        let mut values = lower.clone();
        let mut state = vec![ColumnState::AtLower; n];

        let activity = self.matrix.mul_vec(&values);
        let mut basis = Vec::with_capacity(m);
        let mut artificials = Vec::new();
        let mut logical_values = vec![0.0; m];
        let mut logical_state = vec![ColumnState::AtLower; m];

        for i in 0..m {
            let residual = self.rhs[i] - activity[i];
            let allowed = self.logical_bounds[i];
            if allowed.contains(residual, tol) {
                logical_values[i] = residual.clamp(allowed.lower, allowed.upper);
                logical_state[i] = ColumnState::Basic(i);
                basis.push(n + i);
            } else {
                // The logical sits at its finite bound, which is always zero.
                logical_state[i] = if allowed.lower.is_finite() {
                    ColumnState::AtLower
                } else {
                    ColumnState::AtUpper
                };
                let sign = if residual >= 0.0 { 1.0 } else { -1.0 };
                artificials.push((i, sign));
                basis.push(usize::MAX);
            }
        }

        for i in 0..m {
            lower.push(self.logical_bounds[i].lower);
            upper.push(self.logical_bounds[i].upper);
            values.push(logical_values[i]);
            state.push(logical_state[i]);
        }

        for (k, &(row, _)) in artificials.iter().enumerate() {
            let column = n + m + k;
            lower.push(0.0);
            upper.push(f64::INFINITY);
            values.push((self.rhs[row] - activity[row]).abs());
            state.push(ColumnState::Basic(row));
            basis[row] = column;
        }

        Workspace {
            lower,
            upper,
            values,
            state,
            basis,
            inverse: EtaFile::identity(m),
            artificials,
            iterations: 0,
            pivots_since_refactor: 0,
            degenerate_run: 0,
            bland: false,
        }
    }

    /// Workspace holding `start` under `bounds`, or `None` if `start` does
    /// not fit this kernel. Basic values are filled in by the next refactor.
    fn basis_workspace(&self, bounds: &[Bounds], start: &Basis) -> Option<Workspace> {
        let m = self.matrix.n_rows();
        let width = self.width();
        if start.status.len() != width {
            return None;
        }

        let lower: Vec<f64> = bounds
            .iter()
            .map(|b| b.lower)
            .chain(self.logical_bounds.iter().map(|b| b.lower))
            .collect();
        let upper: Vec<f64> = bounds
            .iter()
            .map(|b| b.upper)
            .chain(self.logical_bounds.iter().map(|b| b.upper))
            .collect();
        let mut values = vec![0.0; width];
        let mut state = vec![ColumnState::AtLower; width];
        let mut basis = Vec::with_capacity(m);

        for (j, status) in start.status.iter().enumerate() {
            match status {
                Status::Basic => {
                    state[j] = ColumnState::Basic(basis.len());
                    basis.push(j);
                }
                Status::AtUpper if upper[j].is_finite() => {
                    state[j] = ColumnState::AtUpper;
                    values[j] = upper[j];
                }
                _ if lower[j].is_finite() => values[j] = lower[j],
                _ => {
                    state[j] = ColumnState::AtUpper;
                    values[j] = upper[j];
                }
            }
        }
        if basis.len() != m {
            return None;
        }

        Some(Workspace {
            lower,
            upper,
            values,
            state,
            basis,
            inverse: EtaFile::identity(m),
            artificials: Vec::new(),
            iterations: 0,
            pivots_since_refactor: 0,
            degenerate_run: 0,
            bland: false,
        })
    }

    fn is_primal_feasible(&self, ws: &Workspace) -> bool {
        let tol = self.config.tolerance;
        ws.basis.iter().all(|&column| {
            let x = ws.values[column];
            x >= ws.lower[column] - tol && x <= ws.upper[column] + tol
        })
    }

    fn is_dual_feasible(&self, ws: &Workspace, costs: &[f64]) -> bool {
        let tol = self.config.tolerance;
        let y = self.duals(ws, costs);
        ws.state.iter().enumerate().all(|(j, &state)| {
            if ws.upper[j] - ws.lower[j] <= 0.0 {
                return true;
            }
            let reduced = costs[j] - self.column_dot(ws, j, &y);
            match state {
                ColumnState::Basic(_) => true,
                ColumnState::AtLower => reduced >= -tol,
                ColumnState::AtUpper => reduced <= tol,
            }
        })
    }

    /// `c_B^T B^-1`
    fn duals(&self, ws: &Workspace, costs: &[f64]) -> Array1<f64> {
        let mut y: Array1<f64> = ws.basis.iter().map(|&j| costs[j]).collect();
        ws.inverse.btran(&mut y);
        y
    }

    fn column_dot(&self, ws: &Workspace, column: usize, y: &Array1<f64>) -> f64 {
        match self.kind(column, ws) {
            ColumnKind::Structural(j) => self.matrix.column_dot(j, y),
            ColumnKind::Unit { row, sign } => sign * y[row],
        }
    }

    fn column_len(&self, ws: &Workspace, column: usize) -> usize {
        match self.kind(column, ws) {
            ColumnKind::Structural(j) => self.matrix.column(j).0.len(),
            ColumnKind::Unit { .. } => 1,
        }
    }

    /// `B^-1 a_q` for the basis represented by `inverse`.
    fn transform(&self, inverse: &EtaFile, ws: &Workspace, column: usize) -> Array1<f64> {
        match self.kind(column, ws) {
            ColumnKind::Structural(j) => {
                let (rows, vals) = self.matrix.column(j);
                inverse.solve_sparse(rows, vals)
            }
            ColumnKind::Unit { row, sign } => inverse.solve_sparse(&[row], &[sign]),
        }
    }

    /// Picks the entering column, or `None` when the basis is optimal.
    fn price(&self, ws: &Workspace, costs: &[f64], y: &Array1<f64>) -> Option<(usize, f64)> {
        let tol = self.config.tolerance;
        let mut best: Option<(usize, f64)> = None;
        for (j, &state) in ws.state.iter().enumerate() {
            if matches!(state, ColumnState::Basic(_)) || ws.upper[j] - ws.lower[j] <= 0.0 {
                continue;
            }
            let reduced = costs[j] - self.column_dot(ws, j, y);
            let eligible = match state {
                ColumnState::AtLower => reduced < -tol,
                ColumnState::AtUpper => reduced > tol,
                ColumnState::Basic(_) => false,
            };
            if !eligible {
                continue;
            }
            if ws.bland {
                return Some((j, reduced));
            }
            if best.map_or(true, |(_, d)| reduced.abs() > d.abs()) {
                best = Some((j, reduced));
            }
        }
        best
    }

    fn run_phase(&self, ws: &mut Workspace, costs: &[f64], halt: Halt<'_>) -> Result<PhaseEnd> {
        let tol = self.config.tolerance;
        let pivot_tol = self.config.pivot_tolerance;

        loop {
            if ws.pivots_since_refactor >= self.config.refactor_interval {
                self.refactor(ws)?;
            }
            if ws.iterations % HALT_CHECK_INTERVAL == 0 && halt.fired() {
                return Ok(PhaseEnd::Halted);
            }

            let y = self.duals(ws, costs);
            let Some((entering, reduced)) = self.price(ws, costs, &y) else {
                return Ok(PhaseEnd::Optimal);
            };
            if ws.iterations >= self.config.max_iterations {
                return Err(Error::numeric(format!(
                    "simplex did not terminate within {} iterations",
                    self.config.max_iterations
                )));
            }

            // +1 when the entering variable increases from its lower bound.
            let direction = if reduced < 0.0 { 1.0 } else { -1.0 };
            let alpha = self.transform(&ws.inverse, ws, entering);

            let mut step = ws.upper[entering] - ws.lower[entering];
            let mut leaving: Option<(usize, bool)> = None;
            for (r, &a) in alpha.iter().enumerate() {
                if a.abs() <= pivot_tol {
                    continue;
                }
                let rate = -direction * a;
                let basic = ws.basis[r];
                let x = ws.values[basic];
                let (limit, to_upper) = if rate < 0.0 {
                    if !ws.lower[basic].is_finite() {
                        continue;
                    }
                    ((x - ws.lower[basic]).max(0.0) / -rate, false)
                } else {
                    if !ws.upper[basic].is_finite() {
                        continue;
                    }
                    ((ws.upper[basic] - x).max(0.0) / rate, true)
                };

                let replace = if limit < step - 1e-12 {
                    true
                } else if limit <= step + 1e-12 {
                    match leaving {
                        Some((current, _)) if ws.bland => basic < ws.basis[current],
                        Some((current, _)) => a.abs() > alpha[current].abs(),
                        None => false,
                    }
                } else {
                    false
                };
                if replace {
                    step = limit;
                    leaving = Some((r, to_upper));
                }
            }

            if step.is_infinite() {
                return Ok(PhaseEnd::Unbounded);
            }

            if step > 0.0 {
                ws.values[entering] += direction * step;
                for (r, &basic) in ws.basis.iter().enumerate() {
                    ws.values[basic] -= direction * step * alpha[r];
                }
            }

            match leaving {
                None => {
                    // Bound flip: the entering variable crosses its whole range.
                    if direction > 0.0 {
                        ws.values[entering] = ws.upper[entering];
                        ws.state[entering] = ColumnState::AtUpper;
                    } else {
                        ws.values[entering] = ws.lower[entering];
                        ws.state[entering] = ColumnState::AtLower;
                    }
                }
                Some((row, to_upper)) => {
                    let outgoing = ws.basis[row];
                    if to_upper {
                        ws.values[outgoing] = ws.upper[outgoing];
                        ws.state[outgoing] = ColumnState::AtUpper;
                    } else {
                        ws.values[outgoing] = ws.lower[outgoing];
                        ws.state[outgoing] = ColumnState::AtLower;
                    }
                    ws.inverse.push(&alpha, row, pivot_tol)?;
                    ws.basis[row] = entering;
                    ws.state[entering] = ColumnState::Basic(row);
                    ws.pivots_since_refactor += 1;
                }
            }

            ws.iterations += 1;
            if step <= tol {
                ws.degenerate_run += 1;
                if !ws.bland && ws.degenerate_run >= self.config.degenerate_pivot_limit {
                    trace!(
                        "{} degenerate pivots in a row, switching to Bland's rule",
                        ws.degenerate_run
                    );
                    ws.bland = true;
                }
            } else {
                ws.degenerate_run = 0;
                ws.bland = false;
            }
        }
    }

    /// Dual simplex from a dual feasible basis: drives out the basic
    /// variable with the largest bound violation until none is left.
    fn run_dual(&self, ws: &mut Workspace, costs: &[f64], halt: Halt<'_>) -> Result<DualEnd> {
        let tol = self.config.tolerance;
        let pivot_tol = self.config.pivot_tolerance;
        let m = self.matrix.n_rows();

        loop {
            if ws.pivots_since_refactor >= self.config.refactor_interval {
                self.refactor(ws)?;
            }
            if ws.iterations % HALT_CHECK_INTERVAL == 0 && halt.fired() {
                return Ok(DualEnd::Halted);
            }

            let mut leaving: Option<(usize, f64)> = None;
            let mut worst = tol;
            for (r, &column) in ws.basis.iter().enumerate() {
                let x = ws.values[column];
                let (gap, target) = if x < ws.lower[column] - tol {
                    (ws.lower[column] - x, ws.lower[column])
                } else if x > ws.upper[column] + tol {
                    (x - ws.upper[column], ws.upper[column])
                } else {
                    continue;
                };
                if gap > worst {
                    worst = gap;
                    leaving = Some((r, target));
                }
            }
            let Some((row, target)) = leaving else {
                return Ok(DualEnd::Feasible);
            };
            if ws.iterations >= self.config.max_iterations {
                return Ok(DualEnd::Stalled);
            }

            let outgoing = ws.basis[row];
            let increase = target > ws.values[outgoing];
            let mut rho = Array1::<f64>::zeros(m);
            rho[row] = 1.0;
            ws.inverse.btran(&mut rho);
            let y = self.duals(ws, costs);

            // Moving a nonbasic x_j by dx moves the outgoing variable by
            // -alpha_rj dx; only columns pushing it towards `target` qualify.
            let mut entering: Option<(usize, f64, f64)> = None;
            for (j, &state) in ws.state.iter().enumerate() {
                let rises = match state {
                    ColumnState::Basic(_) => continue,
                    ColumnState::AtLower => true,
                    ColumnState::AtUpper => false,
                };
                if ws.upper[j] - ws.lower[j] <= 0.0 {
                    continue;
                }
                let a = self.column_dot(ws, j, &rho);
                if a.abs() <= pivot_tol || (rises == increase) != (a < 0.0) {
                    continue;
                }
                let reduced = costs[j] - self.column_dot(ws, j, &y);
                let signed = if rises { reduced } else { -reduced };
                let ratio = signed.max(0.0) / a.abs();
                let replace = match entering {
                    None => true,
                    Some((_, best, best_a)) => {
                        ratio < best - 1e-12 || (ratio <= best + 1e-12 && a.abs() > best_a)
                    }
                };
                if replace {
                    entering = Some((j, ratio, a.abs()));
                }
            }
            let Some((entering, _, _)) = entering else {
                return Ok(DualEnd::Infeasible);
            };

            let alpha = self.transform(&ws.inverse, ws, entering);
            let pivot = alpha[row];
            if pivot.abs() <= pivot_tol {
                return Ok(DualEnd::Stalled);
            }
            let theta = (ws.values[outgoing] - target) / pivot;
            ws.values[entering] += theta;
            for (r, &basic) in ws.basis.iter().enumerate() {
                ws.values[basic] -= theta * alpha[r];
            }
            ws.values[outgoing] = target;
            ws.state[outgoing] = if increase {
                ColumnState::AtLower
            } else {
                ColumnState::AtUpper
            };
            ws.inverse.push(&alpha, row, pivot_tol)?;
            ws.basis[row] = entering;
            ws.state[entering] = ColumnState::Basic(row);
            ws.pivots_since_refactor += 1;
            ws.iterations += 1;
        }
    }

    /// Rebuilds the eta file from the current basis columns and recomputes
    /// the basic values from the nonbasic ones, discarding accumulated
    /// rounding error.
    ///
    /// Unit columns go straight to their own row; the remaining columns are
    /// pivoted in sparsest first, each on the free row where its transformed
    /// entry is largest. Basis positions are renumbered accordingly.
    fn refactor(&self, ws: &mut Workspace) -> Result<()> {
        let m = self.matrix.n_rows();
        let pivot_tol = self.config.pivot_tolerance;
        let mut inverse = EtaFile::identity(m);
        let mut placed = vec![usize::MAX; m];
        let mut pending = Vec::new();

        for &column in &ws.basis {
            match self.kind(column, ws) {
                ColumnKind::Unit { row, sign } if placed[row] == usize::MAX => {
                    if sign < 0.0 {
                        let mut alpha = Array1::<f64>::zeros(m);
                        alpha[row] = sign;
                        inverse.push(&alpha, row, pivot_tol)?;
                    }
                    placed[row] = column;
                }
                _ => pending.push(column),
            }
        }

        pending.sort_by_key(|&column| self.column_len(ws, column));
        for column in pending {
            let alpha = self.transform(&inverse, ws, column);
            let row = (0..m)
                .filter(|&r| placed[r] == usize::MAX)
                .max_by(|&a, &b| alpha[a].abs().total_cmp(&alpha[b].abs()))
                .ok_or_else(|| Error::numeric("basis holds more columns than rows"))?;
            inverse.push(&alpha, row, pivot_tol).map_err(|_| {
                Error::numeric(format!("basis matrix is singular at column {column}"))
            })?;
            placed[row] = column;
        }

        for (position, &column) in placed.iter().enumerate() {
            ws.state[column] = ColumnState::Basic(position);
        }

        let mut residual = Array1::from(self.rhs.clone());
        for (column, &state) in ws.state.iter().enumerate() {
            let value = ws.values[column];
            if matches!(state, ColumnState::Basic(_)) || value == 0.0 {
                continue;
            }
            match self.kind(column, ws) {
                ColumnKind::Structural(j) => {
                    let (rows, vals) = self.matrix.column(j);
                    for (&r, &v) in rows.iter().zip(vals) {
                        residual[r] -= v * value;
                    }
                }
                ColumnKind::Unit { row, sign } => residual[row] -= sign * value,
            }
        }
        inverse.ftran(&mut residual);
        for (position, &column) in placed.iter().enumerate() {
            ws.values[column] = residual[position];
        }

        trace!(
            "refactored basis of {m} rows into {} etas with {} off-pivot non-zeros",
            inverse.eta_count(),
            inverse.nnz()
        );
        ws.basis = placed;
        ws.inverse = inverse;
        ws.pivots_since_refactor = 0;
        Ok(())
    }
}
