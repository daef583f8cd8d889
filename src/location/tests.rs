use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::Error;
use crate::location::{
    error_payload, solve, solve_capacitated, solve_max_covering, solve_set_covering,
    solve_uncapacitated, CapacitatedInstance, CoveringPlan, MaxCoveringInstance, Plan, Problem,
    ProblemFamily, SetCoveringInstance, UncapacitatedInstance, UncapacitatedPlan,
};
use crate::math::integer_linear::{BranchAndBoundConfig, SearchLimits, SolveStatus};
use approx::assert_abs_diff_eq;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::json;

fn config() -> BranchAndBoundConfig {
    BranchAndBoundConfig::default()
}

fn scenario_uflp() -> UncapacitatedInstance {
    UncapacitatedInstance {
        num_facilities: 2,
        num_customers: 3,
        fixed_costs: vec![10.0, 10.0],
        transport_costs: vec![vec![2.0, 4.0, 6.0], vec![5.0, 3.0, 1.0]],
    }
}

fn scenario_cover() -> SetCoveringInstance {
    SetCoveringInstance {
        num_installations: 3,
        num_demands: 2,
        distances: vec![vec![1.0, 5.0, 9.0], vec![8.0, 2.0, 1.0]],
        service_levels: vec![3.0, 3.0],
    }
}

fn random_matrix(rng: &mut ChaCha8Rng, rows: usize, cols: usize, max: f64) -> Vec<Vec<f64>> {
    (0..rows)
        .map(|_| (0..cols).map(|_| f64::from(rng.gen_range(0..=max as u32))).collect())
        .collect()
}

fn random_capacitated(rng: &mut ChaCha8Rng) -> CapacitatedInstance {
    let num_facilities = rng.gen_range(2..=3);
    let num_customers = rng.gen_range(2..=4);
    let demands: Vec<f64> = (0..num_customers)
        .map(|_| f64::from(rng.gen_range(1..=6u32)))
        .collect();
    let total: f64 = demands.iter().sum();
    CapacitatedInstance {
        num_facilities,
        num_customers,
        fixed_costs: (0..num_facilities)
            .map(|_| f64::from(rng.gen_range(5..=30u32)))
            .collect(),
        transport_costs: random_matrix(rng, num_facilities, num_customers, 20.0),
        capacities: (0..num_facilities)
            .map(|_| (total * rng.gen_range(0.3..0.9)).round())
            .collect(),
        demands,
    }
}

fn random_covering(rng: &mut ChaCha8Rng) -> SetCoveringInstance {
    let num_installations = rng.gen_range(2..=5);
    let num_demands = rng.gen_range(1..=4);
    SetCoveringInstance {
        num_installations,
        num_demands,
        distances: random_matrix(rng, num_demands, num_installations, 10.0),
        service_levels: (0..num_demands)
            .map(|_| f64::from(rng.gen_range(2..=7u32)))
            .collect(),
    }
}

/// Cheapest total cost over every assignment of customers to facilities,
/// paying the fixed cost of each facility used.
fn brute_force_facility(
    fixed_costs: &[f64],
    transport_costs: &[Vec<f64>],
    capacity: Option<(&[f64], &[f64])>,
) -> Option<f64> {
    let num_facilities = fixed_costs.len();
    let num_customers = transport_costs[0].len();
    let total = num_facilities.pow(num_customers as u32);
    let mut best: Option<f64> = None;
    for code in 0..total {
        let mut rest = code;
        let mut used = vec![false; num_facilities];
        let mut load = vec![0.0; num_facilities];
        let mut cost = 0.0;
        for j in 0..num_customers {
            let i = rest % num_facilities;
            rest /= num_facilities;
            used[i] = true;
            cost += transport_costs[i][j];
            if let Some((_, demands)) = capacity {
                load[i] += demands[j];
            }
        }
        if let Some((capacities, _)) = capacity {
            if load.iter().zip(capacities).any(|(l, c)| l > c) {
                continue;
            }
        }
        cost += (0..num_facilities)
            .filter(|&i| used[i])
            .map(|i| fixed_costs[i])
            .sum::<f64>();
        if best.map_or(true, |b| cost < b) {
            best = Some(cost);
        }
    }
    best
}

fn covers_all(instance: &SetCoveringInstance, open: &[usize]) -> bool {
    (0..instance.num_demands).all(|i| open.iter().any(|&j| instance.within_service_level(i, j)))
}

fn subsets(n: usize) -> impl Iterator<Item = Vec<usize>> {
    (0u32..(1 << n)).map(move |mask| (0..n).filter(|&j| mask >> j & 1 == 1).collect())
}

fn brute_force_set_cover(instance: &SetCoveringInstance) -> Option<usize> {
    subsets(instance.num_installations)
        .filter(|open| covers_all(instance, open))
        .map(|open| open.len())
        .min()
}

fn brute_force_max_cover(instance: &MaxCoveringInstance) -> Option<usize> {
    let cover = SetCoveringInstance {
        num_installations: instance.num_installations,
        num_demands: instance.num_demands,
        distances: instance.distances.clone(),
        service_levels: instance.service_levels.clone(),
    };
    subsets(instance.num_installations)
        .filter(|open| open.len() == instance.num_to_open && covers_all(&cover, open))
        .map(|open| {
            (0..instance.num_demands)
                .map(|i| {
                    open.iter()
                        .filter(|&&j| instance.within_service_level(i, j))
                        .count()
                })
                .sum::<usize>()
        })
        .max()
}

/// Every customer is served exactly once by an open facility, and the plan's
/// cost matches an independent recomputation.
fn check_facility_plan(plan: &UncapacitatedPlan, fixed: &[f64], transport: &[Vec<f64>]) {
    let num_customers = transport[0].len();
    for customer in 1..=num_customers {
        let serving: Vec<usize> = plan
            .assignments
            .iter()
            .filter(|a| a.customer == customer)
            .map(|a| a.facility)
            .collect();
        assert_eq!(serving.len(), 1, "customer {customer} served {serving:?}");
        assert!(plan.open_facilities.contains(&serving[0]));
    }
    let recomputed: f64 = plan.open_facilities.iter().map(|&f| fixed[f - 1]).sum::<f64>()
        + plan
            .assignments
            .iter()
            .map(|a| transport[a.facility - 1][a.customer - 1])
            .sum::<f64>();
    assert_abs_diff_eq!(plan.fixed_cost + plan.transport_cost, recomputed, epsilon = 1e-9);
}

fn check_covering_plan(plan: &CoveringPlan, distances: &[Vec<f64>], levels: &[f64]) {
    for (i, level) in levels.iter().enumerate() {
        let covering: Vec<usize> = plan
            .coverage
            .iter()
            .filter(|c| c.demand == i + 1)
            .map(|c| c.installation)
            .collect();
        assert!(!covering.is_empty(), "demand {} uncovered", i + 1);
        for j in covering {
            assert!(plan.installations.contains(&j));
            assert!(distances[i][j - 1] <= *level);
        }
    }
}

#[test]
fn test_uncapacitated_scenario() {
    let instance = scenario_uflp();
    let report = solve_uncapacitated(&instance, &config()).unwrap();
    assert_eq!(report.status, SolveStatus::Optimal);

    // Facility 1 alone: 10 + 12, facility 2 alone: 10 + 9, both: 20 + 6.
    let expected =
        brute_force_facility(&instance.fixed_costs, &instance.transport_costs, None).unwrap();
    assert_abs_diff_eq!(expected, 19.0);
    assert_abs_diff_eq!(report.objective.unwrap(), expected, epsilon = 1e-9);

    let plan = report.plan.unwrap();
    check_facility_plan(&plan, &instance.fixed_costs, &instance.transport_costs);
    assert_eq!(plan.opened_descriptions(), vec!["Facility 2 is open."]);
    assert_eq!(
        plan.assignment_descriptions(),
        vec![
            "Customer 1 is served by Facility 2.",
            "Customer 2 is served by Facility 2.",
            "Customer 3 is served by Facility 2."
        ]
    );
}

#[test]
fn test_set_covering_scenario() {
    let instance = scenario_cover();
    let report = solve_set_covering(&instance, &config()).unwrap();
    assert_eq!(report.status, SolveStatus::Optimal);
    assert_abs_diff_eq!(report.objective.unwrap(), 2.0);

    let plan = report.plan.unwrap();
    assert_eq!(plan.installations.len(), 2);
    assert!(plan.installations.contains(&1));
    assert!(plan.installations == vec![1, 2] || plan.installations == vec![1, 3]);
    check_covering_plan(&plan, &instance.distances, &instance.service_levels);
}

#[test]
fn test_capacity_forces_second_facility() {
    // Facility 1 is cheap but can hold only two of the three customers.
    let instance = CapacitatedInstance {
        num_facilities: 2,
        num_customers: 3,
        fixed_costs: vec![5.0, 20.0],
        transport_costs: vec![vec![1.0, 1.0, 1.0], vec![4.0, 4.0, 4.0]],
        capacities: vec![10.0, 10.0],
        demands: vec![5.0, 5.0, 5.0],
    };
    let report = solve_capacitated(&instance, &config()).unwrap();
    assert_eq!(report.status, SolveStatus::Optimal);
    assert_abs_diff_eq!(report.objective.unwrap(), 5.0 + 20.0 + 1.0 + 1.0 + 4.0);

    let plan = report.plan.unwrap();
    assert_eq!(plan.plan.open_facilities, vec![1, 2]);
    assert_eq!(
        plan.capacity_descriptions(),
        vec!["Facility 1: 10/10", "Facility 2: 5/10"]
    );
}

#[test]
fn test_capacitated_infeasible_when_demand_exceeds_capacity() {
    let instance = CapacitatedInstance {
        num_facilities: 2,
        num_customers: 2,
        fixed_costs: vec![1.0, 1.0],
        transport_costs: vec![vec![1.0, 1.0], vec![1.0, 1.0]],
        capacities: vec![3.0, 3.0],
        demands: vec![4.0, 1.0],
    };
    let report = solve_capacitated(&instance, &config()).unwrap();
    assert_eq!(report.status, SolveStatus::Infeasible);
    assert!(report.plan.is_none());
    assert!(report.objective.is_none());
}

#[test]
fn test_random_capacitated_against_brute_force() {
    let mut rng = ChaCha8Rng::seed_from_u64(2024);
    for _ in 0..20 {
        let instance = random_capacitated(&mut rng);
        let expected = brute_force_facility(
            &instance.fixed_costs,
            &instance.transport_costs,
            Some((&instance.capacities, &instance.demands)),
        );
        let report = solve_capacitated(&instance, &config()).unwrap();
        match expected {
            None => assert_eq!(report.status, SolveStatus::Infeasible),
            Some(best) => {
                assert_eq!(report.status, SolveStatus::Optimal);
                assert_abs_diff_eq!(report.objective.unwrap(), best, epsilon = 1e-6);
                let plan = report.plan.unwrap();
                check_facility_plan(&plan.plan, &instance.fixed_costs, &instance.transport_costs);
                assert_abs_diff_eq!(
                    plan.plan.fixed_cost + plan.plan.transport_cost,
                    best,
                    epsilon = 1e-6
                );
                for usage in &plan.usage {
                    assert!(usage.used <= usage.capacity + 1e-9);
                }
            }
        }
    }
}

#[test]
fn test_random_uncapacitated_against_brute_force() {
    let mut rng = ChaCha8Rng::seed_from_u64(99);
    for _ in 0..20 {
        let instance = random_capacitated(&mut rng).uncapacitated();
        let best =
            brute_force_facility(&instance.fixed_costs, &instance.transport_costs, None).unwrap();
        let report = solve_uncapacitated(&instance, &config()).unwrap();
        assert_eq!(report.status, SolveStatus::Optimal);
        assert_abs_diff_eq!(report.objective.unwrap(), best, epsilon = 1e-6);
        check_facility_plan(
            &report.plan.unwrap(),
            &instance.fixed_costs,
            &instance.transport_costs,
        );
    }
}

#[test]
fn test_random_set_covering_against_brute_force() {
    let mut rng = ChaCha8Rng::seed_from_u64(314);
    for _ in 0..30 {
        let instance = random_covering(&mut rng);
        let report = solve_set_covering(&instance, &config()).unwrap();
        match brute_force_set_cover(&instance) {
            None => {
                assert_eq!(report.status, SolveStatus::Infeasible);
                assert!(report.plan.is_none());
            }
            Some(size) => {
                assert_eq!(report.status, SolveStatus::Optimal);
                assert_abs_diff_eq!(report.objective.unwrap(), size as f64);
                let plan = report.plan.unwrap();
                assert_eq!(plan.installations.len(), size);
                check_covering_plan(&plan, &instance.distances, &instance.service_levels);
            }
        }
    }
}

#[test]
fn test_random_max_covering_against_brute_force() {
    let mut rng = ChaCha8Rng::seed_from_u64(2718);
    for _ in 0..30 {
        let base = random_covering(&mut rng);
        let num_to_open = rng.gen_range(1..=base.num_installations);
        let instance = MaxCoveringInstance {
            num_installations: base.num_installations,
            num_demands: base.num_demands,
            distances: base.distances,
            service_levels: base.service_levels,
            num_to_open,
        };
        let report = solve_max_covering(&instance, &config()).unwrap();
        match brute_force_max_cover(&instance) {
            None => assert_eq!(report.status, SolveStatus::Infeasible),
            Some(pairs) => {
                assert_eq!(report.status, SolveStatus::Optimal);
                assert_abs_diff_eq!(report.objective.unwrap(), pairs as f64);
                let plan = report.plan.unwrap();
                assert_eq!(plan.installations.len(), num_to_open);
                assert_eq!(plan.coverage.len(), pairs);
                check_covering_plan(&plan, &instance.distances, &instance.service_levels);
            }
        }
    }
}

#[test]
fn test_max_covering_budget_above_installations_is_infeasible() {
    let base = scenario_cover();
    let instance = MaxCoveringInstance {
        num_installations: base.num_installations,
        num_demands: base.num_demands,
        distances: base.distances,
        service_levels: base.service_levels,
        num_to_open: 4,
    };
    let report = solve_max_covering(&instance, &config()).unwrap();
    assert_eq!(report.status, SolveStatus::Infeasible);
    assert!(report.plan.is_none());
}

#[test]
fn test_solving_twice_gives_same_objective() {
    let mut rng = ChaCha8Rng::seed_from_u64(8);
    let instance = random_capacitated(&mut rng).uncapacitated();
    let first = solve_uncapacitated(&instance, &config()).unwrap();
    let second = solve_uncapacitated(&instance, &config()).unwrap();
    assert_eq!(first.status, second.status);
    assert_eq!(first.objective, second.objective);
}

#[test]
fn test_parallel_workers_match_serial() {
    let mut rng = ChaCha8Rng::seed_from_u64(55);
    for _ in 0..5 {
        let instance = random_capacitated(&mut rng);
        let serial = solve_capacitated(&instance, &config()).unwrap();
        let parallel = solve_capacitated(&instance, &config().with_workers(4)).unwrap();
        assert_eq!(serial.status, parallel.status);
        match (serial.objective, parallel.objective) {
            (Some(a), Some(b)) => assert_abs_diff_eq!(a, b, epsilon = 1e-6),
            (a, b) => assert_eq!(a, b),
        }
    }
}

#[test]
fn test_time_limit_reports_flag() {
    let limits = SearchLimits::default().with_time_limit(Duration::ZERO);
    let report = solve_set_covering(&scenario_cover(), &config().with_limits(limits)).unwrap();
    assert_eq!(report.status, SolveStatus::TimeLimit);
    assert!(report.plan.is_none());
}

#[test]
fn test_interrupted_search_keeps_incumbent_shape() {
    let flag = Arc::new(AtomicBool::new(true));
    let limits = SearchLimits::default().with_interrupt(flag);
    let report = solve_uncapacitated(&scenario_uflp(), &config().with_limits(limits)).unwrap();
    assert_eq!(report.status, SolveStatus::TimeLimit);
    assert_eq!(report.statistics.nodes_explored, 0);
}

/// Linear congruential stream; the recorded optima below were computed by
/// exhaustive enumeration over the same sequence.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: u64) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.0 >> 33) % bound) as f64
    }
}

/// Unit demands with capacities of 4 to 8, so capacity binds at the optimum.
fn lcg_capacitated(seed: u64, num_facilities: usize, num_customers: usize) -> CapacitatedInstance {
    let mut lcg = Lcg(seed);
    let fixed_costs = (0..num_facilities).map(|_| 40.0 + lcg.next(60)).collect();
    let transport_costs = (0..num_facilities)
        .map(|_| (0..num_customers).map(|_| 1.0 + lcg.next(30)).collect())
        .collect();
    let capacities = (0..num_facilities).map(|_| 4.0 + lcg.next(5)).collect();
    CapacitatedInstance {
        num_facilities,
        num_customers,
        fixed_costs,
        transport_costs,
        capacities,
        demands: vec![1.0; num_customers],
    }
}

fn lcg_covering(seed: u64, num_installations: usize, num_demands: usize) -> SetCoveringInstance {
    let mut lcg = Lcg(seed);
    SetCoveringInstance {
        num_installations,
        num_demands,
        distances: (0..num_demands)
            .map(|_| (0..num_installations).map(|_| lcg.next(100)).collect())
            .collect(),
        service_levels: vec![25.0; num_demands],
    }
}

fn limited(seconds: u64) -> BranchAndBoundConfig {
    config().with_limits(SearchLimits::default().with_time_limit(Duration::from_secs(seconds)))
}

#[test]
fn test_capacitated_10x30_reaches_recorded_optimum() {
    let instance = lcg_capacitated(11, 10, 30);
    let started = Instant::now();
    let report = solve_capacitated(&instance, &limited(60)).unwrap();
    assert!(started.elapsed() < Duration::from_secs(65));
    assert_eq!(report.status, SolveStatus::Optimal);
    assert_abs_diff_eq!(report.objective.unwrap(), 442.0, epsilon = 1e-6);
    let plan = report.plan.unwrap();
    assert_eq!(plan.plan.open_facilities.len(), 4);
    check_facility_plan(&plan.plan, &instance.fixed_costs, &instance.transport_costs);
    for usage in &plan.usage {
        assert_abs_diff_eq!(usage.used, usage.capacity, epsilon = 1e-9);
    }
}

#[test]
fn test_set_covering_30x30_reaches_recorded_optimum() {
    let instance = lcg_covering(23, 30, 30);
    let started = Instant::now();
    let report = solve_set_covering(&instance, &limited(60)).unwrap();
    assert!(started.elapsed() < Duration::from_secs(65));
    assert_eq!(report.status, SolveStatus::Optimal);
    assert_abs_diff_eq!(report.objective.unwrap(), 5.0);
    let plan = report.plan.unwrap();
    assert_eq!(plan.installations.len(), 5);
    check_covering_plan(&plan, &instance.distances, &instance.service_levels);
}

#[test]
fn test_short_time_limit_returns_promptly() {
    let instance = lcg_covering(5, 40, 40);
    let limits = SearchLimits::default().with_time_limit(Duration::from_millis(50));
    let started = Instant::now();
    let report = solve_set_covering(&instance, &config().with_limits(limits)).unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    match report.status {
        SolveStatus::Optimal => assert_abs_diff_eq!(report.objective.unwrap(), 5.0),
        SolveStatus::TimeLimit => {}
        status => panic!("unexpected status {status:?}"),
    }
    if let Some(plan) = &report.plan {
        check_covering_plan(plan, &instance.distances, &instance.service_levels);
    }
}

#[test]
fn test_invalid_input_is_an_error() {
    let mut instance = scenario_cover();
    instance.service_levels.push(1.0);
    let err = solve_set_covering(&instance, &config()).unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    let payload = error_payload(&err);
    assert_eq!(payload["status"], "INVALID_INPUT");
    assert!(payload["error"].as_str().unwrap().contains("service_levels"));
}

#[test]
fn test_dispatch_and_payloads() {
    let problem = Problem::Uncapacitated(scenario_uflp());
    let report = solve(&problem, &config()).unwrap();
    assert!(matches!(report.plan, Some(Plan::Uncapacitated(_))));
    let payload = report.to_payload(problem.family());
    assert_eq!(payload["status"], "OPTIMAL");
    assert_eq!(payload["objective"], json!(19.0));
    assert_eq!(payload["solutions"][1], json!(["Facility 2 is open."]));
    assert_eq!(
        payload["solutions"][0][2],
        json!("Customer 3 is served by Facility 2.")
    );

    let body = json!({
        "family": "set_covering",
        "num_installations": 2,
        "num_demands": 1,
        "distances": [[9, 9]],
        "service_levels": [1]
    })
    .to_string();
    let problem = Problem::from_json(&body).unwrap();
    let report = solve(&problem, &config()).unwrap();
    assert_eq!(report.status, SolveStatus::Infeasible);
    let payload = report.to_payload(ProblemFamily::SetCovering);
    assert_eq!(payload["status"], "INFEASIBLE");
    assert!(payload["solution"].is_null());
}
