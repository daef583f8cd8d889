use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};
use rayon::prelude::*;

use crate::error::Result;
use crate::math::integer_linear::frontier::Frontier;
use crate::math::integer_linear::incumbent::{Candidate, SharedIncumbent};
use crate::math::integer_linear::model::{Bounds, Model};
use crate::math::integer_linear::node::SearchNode;
use crate::math::integer_linear::{MilpSolution, MilpSolver, SearchStatistics, SolveStatus};
use crate::math::linalg::{fractionality, is_integral};
use crate::math::optimization::{BoundedSimplex, Halt, LpConfig, LpOutcome};

/// External cutoffs for a search. All of them are checked before a node is
/// taken off the frontier; the time limit and the interrupt are also polled
/// inside every LP solve.
#[derive(Debug, Clone, Default)]
pub struct SearchLimits {
    pub time_limit: Option<Duration>,
    pub node_limit: Option<u64>,
    /// Cooperative cancellation flag; the search stops once it reads `true`.
    pub interrupt: Option<Arc<AtomicBool>>,
}

impl SearchLimits {
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }

    pub fn with_node_limit(mut self, limit: u64) -> Self {
        self.node_limit = Some(limit);
        self
    }

    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    /// Stop condition for the LP solves of a search that began at `started`.
    fn halt(&self, started: Instant) -> Halt<'_> {
        Halt::new(
            self.time_limit.and_then(|limit| started.checked_add(limit)),
            self.interrupt.as_deref(),
        )
    }

    fn exceeded(&self, started: Instant, nodes: u64) -> Option<&'static str> {
        if self.time_limit.is_some_and(|limit| started.elapsed() >= limit) {
            return Some("time limit");
        }
        if self.node_limit.is_some_and(|limit| nodes >= limit) {
            return Some("node limit");
        }
        if self
            .interrupt
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
        {
            return Some("interrupt");
        }
        None
    }
}

/// Configuration options for [`BranchAndBoundSolver`].
#[derive(Debug, Clone)]
pub struct BranchAndBoundConfig {
    pub lp: LpConfig,
    /// A binary is integral when within this distance of 0 or 1
    pub integrality_tolerance: f64,
    /// Slack applied when comparing a node bound with the incumbent
    pub bound_tolerance: f64,
    pub limits: SearchLimits,
    /// Nodes evaluated concurrently; 1 keeps the search single-threaded
    pub workers: usize,
}

impl Default for BranchAndBoundConfig {
    fn default() -> Self {
        Self {
            lp: LpConfig::default(),
            integrality_tolerance: 1e-6,
            bound_tolerance: 1e-6,
            limits: SearchLimits::default(),
            workers: 1,
        }
    }
}

impl BranchAndBoundConfig {
    pub fn with_lp(mut self, lp: LpConfig) -> Self {
        self.lp = lp;
        self
    }

    pub fn with_limits(mut self, limits: SearchLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }
}

/// What evaluating one node produced.
enum NodeOutcome {
    /// A limit fired mid-solve; the node goes back to the frontier untouched
    Interrupted,
    Infeasible,
    Unbounded,
    Failed(String),
    /// LP bound cannot beat the incumbent
    Dominated,
    /// Relaxation was integral; `installed` if it became the incumbent
    Integral { installed: bool },
    Branch { variable: usize },
}

/// Per-search state shared by every node evaluation.
struct SearchContext<'m> {
    model: &'m Model,
    simplex: BoundedSimplex<'m>,
    halt: Halt<'m>,
    incumbent: SharedIncumbent,
    integral_objective: bool,
    /// Largest constraint violation tolerated after rounding binaries
    slack: f64,
}

struct Evaluation {
    node: SearchNode,
    outcome: NodeOutcome,
    iterations: usize,
}

/// Best-first branch-and-bound over binary variables.
///
/// Each node solves the LP relaxation of the model under the node's bound
/// overrides with a [`BoundedSimplex`] shared by the whole search, starting
/// from its parent's optimal basis unless `lp.warm_start` is off. Fractional
/// nodes branch on the most fractional binary (ties to the lowest index) into
/// an up child (`x = 1`) and a down child (`x = 0`).
///
/// With `workers > 1`, batches of up to `workers` best-bound nodes are
/// evaluated on a rayon pool. Integral solutions go through
/// [`SharedIncumbent::try_install`]; children are pushed on the calling
/// thread.
pub struct BranchAndBoundSolver {
    config: BranchAndBoundConfig,
}

impl Default for BranchAndBoundSolver {
    fn default() -> Self {
        Self::new(BranchAndBoundConfig::default())
    }
}

impl BranchAndBoundSolver {
    pub fn new(config: BranchAndBoundConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BranchAndBoundConfig {
        &self.config
    }

    /// Index of the binary closest to 0.5, or `None` if all are integral.
    fn select_branching_variable(&self, model: &Model, values: &[f64]) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for variable in model.variables().iter().filter(|v| v.is_integer()) {
            let value = values[variable.index];
            if is_integral(value, self.config.integrality_tolerance) {
                continue;
            }
            let score = fractionality(value);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((variable.index, score));
            }
        }
        best.map(|(index, _)| index)
    }

    /// LP objective mapped to the minimization scale, rounded up when every
    /// integer point has an integral objective.
    fn node_bound(&self, model: &Model, objective: f64, integral_objective: bool) -> f64 {
        let key = model.direction().key(objective);
        if integral_objective {
            (key - self.config.integrality_tolerance).ceil()
        } else {
            key
        }
    }

    /// Largest constraint violation tolerated after rounding binaries.
    fn feasibility_slack(&self, model: &Model) -> f64 {
        let scale = model
            .constraints()
            .iter()
            .map(|c| c.coefficients.values().map(|a| a.abs()).sum::<f64>() + c.rhs.abs())
            .fold(1.0_f64, f64::max);
        self.config.integrality_tolerance * scale
    }

    fn evaluate(&self, ctx: &SearchContext<'_>, mut node: SearchNode) -> Evaluation {
        let SearchContext {
            model,
            simplex,
            halt,
            incumbent,
            integral_objective,
            slack,
        } = ctx;
        let start = node
            .basis
            .as_deref()
            .filter(|_| self.config.lp.warm_start);
        let solution = match simplex.solve_from(&node.overrides, start, *halt) {
            Ok(LpOutcome::Optimal(solution)) => solution,
            Ok(LpOutcome::Interrupted) => {
                return Evaluation {
                    node,
                    outcome: NodeOutcome::Interrupted,
                    iterations: 0,
                }
            }
            Ok(LpOutcome::Infeasible) => {
                return Evaluation {
                    node,
                    outcome: NodeOutcome::Infeasible,
                    iterations: 0,
                }
            }
            Ok(LpOutcome::Unbounded) => {
                return Evaluation {
                    node,
                    outcome: NodeOutcome::Unbounded,
                    iterations: 0,
                }
            }
            Err(err) => {
                return Evaluation {
                    node,
                    outcome: NodeOutcome::Failed(err.to_string()),
                    iterations: 0,
                }
            }
        };

        let iterations = solution.iterations;
        node.bound = self.node_bound(model, solution.objective, *integral_objective);
        node.values = solution.values;
        node.basis = solution.basis.map(Arc::new);
        trace!(
            "node {} depth {} bound {:.6} ({} iterations)",
            node.id,
            node.depth,
            node.bound,
            iterations
        );

        if node.can_prune(incumbent.key(), self.config.bound_tolerance) {
            return Evaluation {
                node,
                outcome: NodeOutcome::Dominated,
                iterations,
            };
        }

        let outcome = match self.select_branching_variable(model, &node.values) {
            Some(variable) => NodeOutcome::Branch { variable },
            None => {
                let values: Vec<f64> = model
                    .variables()
                    .iter()
                    .map(|v| {
                        let x = node.values[v.index];
                        if v.is_integer() {
                            x.round()
                        } else {
                            x
                        }
                    })
                    .collect();
                let violation = model.max_violation(&values);
                if violation > *slack {
                    NodeOutcome::Failed(format!(
                        "rounded relaxation at node {} violates the model by {violation:e}",
                        node.id
                    ))
                } else {
                    let objective = model.evaluate(&values);
                    let installed = incumbent.try_install(Candidate {
                        objective,
                        key: model.direction().key(objective),
                        values,
                    });
                    NodeOutcome::Integral { installed }
                }
            }
        };

        Evaluation {
            node,
            outcome,
            iterations,
        }
    }

    fn evaluate_batch(
        &self,
        pool: Option<&rayon::ThreadPool>,
        ctx: &SearchContext<'_>,
        batch: Vec<SearchNode>,
    ) -> Vec<Evaluation> {
        let run = |node: SearchNode| self.evaluate(ctx, node);
        match pool {
            Some(pool) if batch.len() > 1 => {
                pool.install(|| batch.into_par_iter().map(run).collect())
            }
            _ => batch.into_iter().map(run).collect(),
        }
    }
}

impl MilpSolver for BranchAndBoundSolver {
    fn solve(&self, model: &Model) -> Result<MilpSolution> {
        let started = Instant::now();
        let ctx = SearchContext {
            model,
            simplex: BoundedSimplex::new(model, self.config.lp.clone())?,
            halt: self.config.limits.halt(started),
            incumbent: SharedIncumbent::new(),
            integral_objective: model.has_integral_objective(),
            slack: self.feasibility_slack(model),
        };
        let incumbent = &ctx.incumbent;
        let tolerance = self.config.bound_tolerance;

        info!(
            "solving '{}': {} variables ({} binary), {} constraints, {}",
            model.name(),
            model.num_variables(),
            model.num_binary(),
            model.num_constraints(),
            model.direction()
        );

        let pool = if self.config.workers > 1 {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.workers)
                .build()
            {
                Ok(pool) => Some(pool),
                Err(err) => {
                    warn!("falling back to a single worker: {err}");
                    None
                }
            }
        } else {
            None
        };
        let batch_size = if pool.is_some() { self.config.workers } else { 1 };

        let mut frontier = Frontier::new();
        frontier.push(SearchNode::root());
        let mut next_id = 1u64;
        let mut stats = SearchStatistics::default();
        let mut stop: Option<&'static str> = None;
        let mut unbounded = false;
        let mut failure: Option<String> = None;

        'search: while !frontier.is_empty() {
            if let Some(reason) = self.config.limits.exceeded(started, stats.nodes_explored) {
                debug!(
                    "stopping on {reason} after {} nodes, {} open",
                    stats.nodes_explored,
                    frontier.len()
                );
                stop = Some(reason);
                break;
            }

            let remaining = self
                .config
                .limits
                .node_limit
                .map_or(u64::MAX, |limit| limit.saturating_sub(stats.nodes_explored));
            let take = (batch_size as u64).min(remaining).max(1) as usize;

            let cutoff = incumbent.key();
            let mut batch = Vec::with_capacity(take);
            while batch.len() < take {
                let Some(node) = frontier.pop() else { break };
                if node.can_prune(cutoff, tolerance) {
                    stats.pruned_by_bound += 1;
                    continue;
                }
                batch.push(node);
            }
            if batch.is_empty() {
                continue;
            }

            let evaluations = self.evaluate_batch(pool.as_ref(), &ctx, batch);

            let mut interrupted = false;
            for Evaluation {
                node,
                outcome,
                iterations,
            } in evaluations
            {
                if let NodeOutcome::Interrupted = outcome {
                    frontier.push(node);
                    interrupted = true;
                    continue;
                }
                stats.nodes_explored += 1;
                stats.lp_iterations += iterations as u64;
                stats.max_depth = stats.max_depth.max(node.depth);

                match outcome {
                    NodeOutcome::Interrupted => {}
                    NodeOutcome::Infeasible => stats.pruned_infeasible += 1,
                    NodeOutcome::Dominated => stats.pruned_by_bound += 1,
                    NodeOutcome::Unbounded => {
                        debug!("relaxation at node {} is unbounded", node.id);
                        unbounded = true;
                        break 'search;
                    }
                    NodeOutcome::Failed(message) => {
                        warn!("numeric failure at node {}: {message}", node.id);
                        failure = Some(message);
                        break 'search;
                    }
                    NodeOutcome::Integral { installed } => {
                        if installed {
                            stats.incumbent_updates += 1;
                            let key = incumbent.key();
                            debug!(
                                "new incumbent {:.6} at node {} (depth {})",
                                model.direction().from_key(key),
                                node.id,
                                node.depth
                            );
                            stats.pruned_by_bound += frontier.prune(key, tolerance) as u64;
                        }
                    }
                    NodeOutcome::Branch { variable } => {
                        // Another node of the same batch may have improved
                        // the incumbent since this one was evaluated.
                        if node.can_prune(incumbent.key(), tolerance) {
                            stats.pruned_by_bound += 1;
                            continue;
                        }
                        let up = node.child(next_id, model, variable, Bounds::fixed(1.0));
                        let down = node.child(next_id + 1, model, variable, Bounds::fixed(0.0));
                        next_id += 2;
                        frontier.push(up);
                        frontier.push(down);
                    }
                }
            }

            if interrupted {
                let reason = self
                    .config
                    .limits
                    .exceeded(started, stats.nodes_explored)
                    .unwrap_or("time limit");
                debug!(
                    "stopping on {reason} during an LP solve after {} nodes, {} open",
                    stats.nodes_explored,
                    frontier.len()
                );
                stop = Some(reason);
                break;
            }
        }

        stats.elapsed = started.elapsed();
        let best = ctx.incumbent.into_inner();

        let status = if unbounded {
            SolveStatus::Unbounded
        } else if failure.is_some() {
            SolveStatus::NumericError
        } else if stop.is_some() {
            SolveStatus::TimeLimit
        } else if best.is_some() {
            SolveStatus::Optimal
        } else {
            SolveStatus::Infeasible
        };

        let incumbent_key = best.as_ref().map_or(f64::INFINITY, |c| c.key);
        let bound_key = match status {
            SolveStatus::Optimal => incumbent_key,
            SolveStatus::Infeasible => f64::INFINITY,
            _ => frontier.best_bound().min(incumbent_key),
        };
        stats.best_bound = Some(bound_key)
            .filter(|b| b.is_finite())
            .map(|b| model.direction().from_key(b));
        stats.gap = match best.as_ref() {
            Some(c) if bound_key.is_finite() => {
                Some((c.key - bound_key).max(0.0) / c.objective.abs().max(1e-10))
            }
            _ => None,
        };

        info!(
            "'{}' finished {:?}: objective {:?}, {} nodes, {} LP iterations, {:.3?}",
            model.name(),
            status,
            best.as_ref().map(|c| c.objective),
            stats.nodes_explored,
            stats.lp_iterations,
            stats.elapsed
        );

        let (objective, values) = match best {
            Some(candidate) if status != SolveStatus::Unbounded => {
                (Some(candidate.objective), Some(candidate.values))
            }
            _ => (None, None),
        };

        Ok(MilpSolution {
            status,
            objective,
            values,
            message: failure,
            statistics: stats,
        })
    }
}
