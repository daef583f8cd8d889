use crate::math::integer_linear::{
    BranchAndBoundConfig, BranchAndBoundSolver, Constraint, Direction, MilpSolver, Model, Sense,
    SolveStatus,
};
use approx::assert_abs_diff_eq;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Best objective over all 0/1 points, or `None` if none is feasible.
fn brute_force(model: &Model) -> Option<f64> {
    let n = model.num_variables();
    let mut best: Option<f64> = None;
    for mask in 0u32..(1 << n) {
        let point: Vec<f64> = (0..n).map(|j| f64::from((mask >> j) & 1)).collect();
        if model.max_violation(&point) > 1e-9 {
            continue;
        }
        let value = model.evaluate(&point);
        let better = match best {
            None => true,
            Some(b) => model.direction().key(value) < model.direction().key(b),
        };
        if better {
            best = Some(value);
        }
    }
    best
}

fn random_packing(rng: &mut ChaCha8Rng, n: usize, rows: usize) -> Model {
    let mut model = Model::new("packing", Direction::Maximize);
    let vars: Vec<usize> = (0..n).map(|j| model.add_binary(format!("x{j}"))).collect();
    for &v in &vars {
        model
            .set_objective_coefficient(v, rng.gen_range(1.0..20.0))
            .unwrap();
    }
    for _ in 0..rows {
        let mut row = Constraint::new(Sense::LessEqual, rng.gen_range(5.0..25.0));
        for &v in &vars {
            if rng.gen_bool(0.7) {
                row = row.with_term(v, rng.gen_range(1.0..10.0));
            }
        }
        model.add_constraint(row).unwrap();
    }
    model
}

fn random_cover(rng: &mut ChaCha8Rng, sets: usize, elements: usize) -> Model {
    let mut model = Model::new("cover", Direction::Minimize);
    let vars: Vec<usize> = (0..sets).map(|j| model.add_binary(format!("s{j}"))).collect();
    for &v in &vars {
        model
            .set_objective_coefficient(v, f64::from(rng.gen_range(1u32..5)))
            .unwrap();
    }
    for _ in 0..elements {
        let mut row = Constraint::new(Sense::GreaterEqual, 1.0);
        for &v in &vars {
            if rng.gen_bool(0.35) {
                row = row.with_term(v, 1.0);
            }
        }
        model.add_constraint(row).unwrap();
    }
    model
}

fn check_against_brute_force(model: &Model, config: BranchAndBoundConfig) {
    let solution = BranchAndBoundSolver::new(config).solve(model).unwrap();
    match brute_force(model) {
        Some(best) => {
            assert_eq!(solution.status, SolveStatus::Optimal, "{}", model.name());
            assert_abs_diff_eq!(solution.objective.unwrap(), best, epsilon = 1e-6);
            let values = solution.values.unwrap();
            assert!(model.max_violation(&values) <= 1e-9);
            assert!(values.iter().all(|&v| v == 0.0 || v == 1.0));
            assert_abs_diff_eq!(model.evaluate(&values), best, epsilon = 1e-6);
        }
        None => assert_eq!(solution.status, SolveStatus::Infeasible),
    }
}

#[test]
fn test_random_packing_matches_brute_force() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    for _ in 0..25 {
        let n = rng.gen_range(3..10);
        let rows = rng.gen_range(1..4);
        let model = random_packing(&mut rng, n, rows);
        check_against_brute_force(&model, BranchAndBoundConfig::default());
    }
}

#[test]
fn test_random_cover_matches_brute_force() {
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    for _ in 0..25 {
        let sets = rng.gen_range(3..10);
        let elements = rng.gen_range(2..8);
        let model = random_cover(&mut rng, sets, elements);
        check_against_brute_force(&model, BranchAndBoundConfig::default());
    }
}

#[test]
fn test_parallel_workers_agree_with_serial() {
    let mut rng = ChaCha8Rng::seed_from_u64(23);
    for _ in 0..10 {
        let model = random_packing(&mut rng, 9, 3);
        let serial = BranchAndBoundSolver::default().solve(&model).unwrap();
        let parallel = BranchAndBoundSolver::new(BranchAndBoundConfig::default().with_workers(4))
            .solve(&model)
            .unwrap();
        assert_eq!(serial.status, parallel.status);
        assert_abs_diff_eq!(
            serial.objective.unwrap(),
            parallel.objective.unwrap(),
            epsilon = 1e-6
        );
    }
}

#[test]
fn test_bland_fallback_on_every_degenerate_pivot() {
    let mut rng = ChaCha8Rng::seed_from_u64(31);
    let lp = crate::math::optimization::LpConfig::default()
        .with_degenerate_pivot_limit(0)
        .with_refactor_interval(3);
    for _ in 0..10 {
        let model = random_cover(&mut rng, 8, 6);
        check_against_brute_force(&model, BranchAndBoundConfig::default().with_lp(lp.clone()));
    }
}

#[test]
fn test_solving_twice_gives_same_objective() {
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    let model = random_cover(&mut rng, 9, 7);
    let solver = BranchAndBoundSolver::default();
    let first = solver.solve(&model).unwrap();
    let second = solver.solve(&model).unwrap();
    assert_eq!(first.status, second.status);
    assert_eq!(first.objective, second.objective);
    assert_eq!(first.statistics.nodes_explored, second.statistics.nodes_explored);
}

#[test]
fn test_statistics_are_consistent() {
    let mut rng = ChaCha8Rng::seed_from_u64(41);
    let model = random_packing(&mut rng, 9, 2);
    let solution = BranchAndBoundSolver::default().solve(&model).unwrap();
    let stats = &solution.statistics;
    assert_eq!(solution.status, SolveStatus::Optimal);
    assert!(stats.nodes_explored >= 1);
    assert!(stats.incumbent_updates >= 1);
    assert_eq!(stats.best_bound, solution.objective);
    assert_eq!(stats.gap, Some(0.0));
}

#[test]
fn test_cold_relaxations_match_brute_force() {
    let mut rng = ChaCha8Rng::seed_from_u64(53);
    let lp = crate::math::optimization::LpConfig::default().with_warm_start(false);
    for _ in 0..10 {
        let model = random_packing(&mut rng, 8, 3);
        check_against_brute_force(&model, BranchAndBoundConfig::default().with_lp(lp.clone()));
        let model = random_cover(&mut rng, 8, 6);
        check_against_brute_force(&model, BranchAndBoundConfig::default().with_lp(lp.clone()));
    }
}

#[test]
fn test_warm_start_saves_iterations() {
    let mut rng = ChaCha8Rng::seed_from_u64(59);
    let model = random_cover(&mut rng, 14, 24);
    let warm = BranchAndBoundSolver::default().solve(&model).unwrap();
    let cold = BranchAndBoundSolver::new(BranchAndBoundConfig::default().with_lp(
        crate::math::optimization::LpConfig::default().with_warm_start(false),
    ))
    .solve(&model)
    .unwrap();

    assert_eq!(warm.status, cold.status);
    assert_eq!(warm.objective, cold.objective);
    if warm.statistics.nodes_explored > 1 {
        let per_node = |s: &crate::math::integer_linear::SearchStatistics| {
            s.lp_iterations as f64 / s.nodes_explored as f64
        };
        assert!(per_node(&warm.statistics) <= per_node(&cold.statistics));
    }
}
