//! Reading a solved assignment vector back into domain results.
//!
//! All facility and customer numbers in the results are 1-based, matching the
//! location service's responses. A binary counts as set when it exceeds
//! [`THRESHOLD`].

use serde::Serialize;

use crate::location::formulation::{CoveringLayout, FacilityLayout};
use crate::location::problem::{CapacitatedInstance, UncapacitatedInstance};

pub const THRESHOLD: f64 = 0.5;

fn is_set(values: &[f64], index: usize) -> bool {
    values[index] > THRESHOLD
}

/// Customer `customer` is served by facility `facility` (both 1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Assignment {
    pub customer: usize,
    pub facility: usize,
}

impl Assignment {
    pub fn description(&self) -> String {
        format!(
            "Customer {} is served by Facility {}.",
            self.customer, self.facility
        )
    }
}

/// Load placed on an open facility.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FacilityUsage {
    pub facility: usize,
    /// Total demand of the customers assigned to the facility
    pub used: f64,
    pub capacity: f64,
}

impl FacilityUsage {
    pub fn description(&self) -> String {
        format!(
            "Facility {}: {}/{}",
            self.facility,
            self.used.round(),
            format_amount(self.capacity)
        )
    }
}

/// Whole numbers print without a fractional part.
fn format_amount(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

fn opened_description(facility: usize) -> String {
    format!("Facility {facility} is open.")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UncapacitatedPlan {
    /// Open facilities, ascending
    pub open_facilities: Vec<usize>,
    /// Facility-major order: all customers of the lowest facility first
    pub assignments: Vec<Assignment>,
    pub fixed_cost: f64,
    pub transport_cost: f64,
}

impl UncapacitatedPlan {
    pub fn assignment_descriptions(&self) -> Vec<String> {
        self.assignments.iter().map(Assignment::description).collect()
    }

    pub fn opened_descriptions(&self) -> Vec<String> {
        self.open_facilities
            .iter()
            .map(|&f| opened_description(f))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapacitatedPlan {
    #[serde(flatten)]
    pub plan: UncapacitatedPlan,
    /// One entry per open facility, ascending
    pub usage: Vec<FacilityUsage>,
}

impl CapacitatedPlan {
    pub fn capacity_descriptions(&self) -> Vec<String> {
        self.usage.iter().map(FacilityUsage::description).collect()
    }
}

/// Demand `demand` is covered by installation `installation` (both 1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Coverage {
    pub demand: usize,
    pub installation: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoveringPlan {
    /// Selected installations, ascending and 1-based
    pub installations: Vec<usize>,
    /// Every pair whose `covers` variable is set
    pub coverage: Vec<Coverage>,
}

fn facility_plan(
    layout: &FacilityLayout,
    fixed_costs: &[f64],
    transport_costs: &[Vec<f64>],
    values: &[f64],
) -> UncapacitatedPlan {
    let open_facilities: Vec<usize> = (0..layout.num_facilities)
        .filter(|&i| is_set(values, layout.open(i)))
        .collect();
    let fixed_cost = open_facilities.iter().map(|&i| fixed_costs[i]).sum();

    let mut assignments = Vec::with_capacity(layout.num_customers);
    let mut transport_cost = 0.0;
    for i in 0..layout.num_facilities {
        for j in 0..layout.num_customers {
            if is_set(values, layout.assign(i, j)) {
                transport_cost += transport_costs[i][j];
                assignments.push(Assignment {
                    customer: j + 1,
                    facility: i + 1,
                });
            }
        }
    }

    UncapacitatedPlan {
        open_facilities: open_facilities.into_iter().map(|i| i + 1).collect(),
        assignments,
        fixed_cost,
        transport_cost,
    }
}

pub fn uncapacitated(
    instance: &UncapacitatedInstance,
    layout: &FacilityLayout,
    values: &[f64],
) -> UncapacitatedPlan {
    facility_plan(layout, &instance.fixed_costs, &instance.transport_costs, values)
}

pub fn capacitated(
    instance: &CapacitatedInstance,
    layout: &FacilityLayout,
    values: &[f64],
) -> CapacitatedPlan {
    let plan = facility_plan(layout, &instance.fixed_costs, &instance.transport_costs, values);
    let usage = plan
        .open_facilities
        .iter()
        .map(|&facility| {
            let i = facility - 1;
            let used = (0..layout.num_customers)
                .filter(|&j| is_set(values, layout.assign(i, j)))
                .map(|j| instance.demands[j])
                .sum();
            FacilityUsage {
                facility,
                used,
                capacity: instance.capacities[i],
            }
        })
        .collect();
    CapacitatedPlan { plan, usage }
}

/// Shared by set covering and max covering.
pub fn covering(layout: &CoveringLayout, values: &[f64]) -> CoveringPlan {
    let installations = (0..layout.num_installations)
        .filter(|&j| is_set(values, layout.open(j)))
        .map(|j| j + 1)
        .collect();
    let mut coverage = Vec::new();
    for i in 0..layout.num_demands {
        for j in 0..layout.num_installations {
            if is_set(values, layout.covers(i, j)) {
                coverage.push(Coverage {
                    demand: i + 1,
                    installation: j + 1,
                });
            }
        }
    }
    CoveringPlan {
        installations,
        coverage,
    }
}
