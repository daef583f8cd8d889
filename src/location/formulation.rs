//! Translation of each problem family into a canonical binary [`Model`].
//!
//! Variable indices are fixed by a layout so extraction can read the solution
//! back without name lookups. Constraint rows are emitted in a fixed order per
//! family; pairs outside a service level keep their variable and get an
//! explicit `covers[i,j] = 0` row instead of being dropped.

use log::debug;

use crate::error::Result;
use crate::location::problem::{
    CapacitatedInstance, MaxCoveringInstance, SetCoveringInstance, UncapacitatedInstance,
};
use crate::math::integer_linear::model::{Constraint, Direction, Model, Sense};

/// Index map for facility location: `open[i]` then `assign[i,j]` row-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FacilityLayout {
    pub num_facilities: usize,
    pub num_customers: usize,
}

impl FacilityLayout {
    pub fn open(&self, facility: usize) -> usize {
        facility
    }

    pub fn assign(&self, facility: usize, customer: usize) -> usize {
        self.num_facilities + facility * self.num_customers + customer
    }

    pub fn num_variables(&self) -> usize {
        self.num_facilities * (1 + self.num_customers)
    }
}

/// Index map for covering: `open[j]` then `covers[i,j]` row-major by demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoveringLayout {
    pub num_installations: usize,
    pub num_demands: usize,
}

impl CoveringLayout {
    pub fn open(&self, installation: usize) -> usize {
        installation
    }

    pub fn covers(&self, demand: usize, installation: usize) -> usize {
        self.num_installations + demand * self.num_installations + installation
    }

    pub fn num_variables(&self) -> usize {
        self.num_installations * (1 + self.num_demands)
    }
}

/// A built model together with the layout of its variables.
#[derive(Debug, Clone)]
pub struct Formulation<L> {
    pub model: Model,
    pub layout: L,
}

fn facility_model(
    name: &str,
    num_facilities: usize,
    num_customers: usize,
    fixed_costs: &[f64],
    transport_costs: &[Vec<f64>],
) -> Result<Formulation<FacilityLayout>> {
    let layout = FacilityLayout {
        num_facilities,
        num_customers,
    };
    let mut model = Model::new(name, Direction::Minimize);

    for i in 0..num_facilities {
        let open = model.add_binary(format!("open[{i}]"));
        model.set_objective_coefficient(open, fixed_costs[i])?;
    }
    for i in 0..num_facilities {
        for j in 0..num_customers {
            let assign = model.add_binary(format!("assign[{i},{j}]"));
            model.set_objective_coefficient(assign, transport_costs[i][j])?;
        }
    }

    for j in 0..num_customers {
        let row = (0..num_facilities).fold(
            Constraint::new(Sense::Equal, 1.0).with_name(format!("customer_assign[{j}]")),
            |row, i| row.with_term(layout.assign(i, j), 1.0),
        );
        model.add_constraint(row)?;
    }
    for i in 0..num_facilities {
        for j in 0..num_customers {
            model.add_constraint(
                Constraint::new(Sense::LessEqual, 0.0)
                    .with_name(format!("facility_open[{i},{j}]"))
                    .with_term(layout.assign(i, j), 1.0)
                    .with_term(layout.open(i), -1.0),
            )?;
        }
    }

    Ok(Formulation { model, layout })
}

/// Capacitated facility location.
///
/// Minimize `Σ fixed[i]·open[i] + Σ transport[i][j]·assign[i,j]` subject to,
/// in this order:
/// 1. `Σ_i assign[i,j] = 1` for every customer
/// 2. `assign[i,j] ≤ open[i]` for every pair
/// 3. `Σ_j demand[j]·assign[i,j] ≤ capacity[i]` for every facility
pub fn capacitated(instance: &CapacitatedInstance) -> Result<Formulation<FacilityLayout>> {
    instance.validate()?;
    let mut formulation = facility_model(
        "capacitated_facility_location",
        instance.num_facilities,
        instance.num_customers,
        &instance.fixed_costs,
        &instance.transport_costs,
    )?;
    let layout = formulation.layout;
    for i in 0..instance.num_facilities {
        let row = instance.demands.iter().enumerate().fold(
            Constraint::new(Sense::LessEqual, instance.capacities[i])
                .with_name(format!("capacity[{i}]")),
            |row, (j, &demand)| row.with_term(layout.assign(i, j), demand),
        );
        formulation.model.add_constraint(row)?;
    }
    debug!(
        "capacitated model: {} variables, {} constraints",
        formulation.model.num_variables(),
        formulation.model.num_constraints()
    );
    Ok(formulation)
}

/// Uncapacitated facility location: rows 1 and 2 of [`capacitated`].
pub fn uncapacitated(instance: &UncapacitatedInstance) -> Result<Formulation<FacilityLayout>> {
    instance.validate()?;
    let formulation = facility_model(
        "uncapacitated_facility_location",
        instance.num_facilities,
        instance.num_customers,
        &instance.fixed_costs,
        &instance.transport_costs,
    )?;
    debug!(
        "uncapacitated model: {} variables, {} constraints",
        formulation.model.num_variables(),
        formulation.model.num_constraints()
    );
    Ok(formulation)
}

fn covering_variables(
    model: &mut Model,
    num_installations: usize,
    num_demands: usize,
) -> CoveringLayout {
    for j in 0..num_installations {
        model.add_binary(format!("open[{j}]"));
    }
    for i in 0..num_demands {
        for j in 0..num_installations {
            model.add_binary(format!("covers[{i},{j}]"));
        }
    }
    CoveringLayout {
        num_installations,
        num_demands,
    }
}

fn cover_row(layout: &CoveringLayout, demand: usize) -> Constraint {
    (0..layout.num_installations).fold(
        Constraint::new(Sense::GreaterEqual, 1.0).with_name(format!("cover_demand[{demand}]")),
        |row, j| row.with_term(layout.covers(demand, j), 1.0),
    )
}

fn link_row(layout: &CoveringLayout, demand: usize, installation: usize) -> Constraint {
    Constraint::new(Sense::LessEqual, 0.0)
        .with_name(format!("link[{demand},{installation}]"))
        .with_term(layout.covers(demand, installation), 1.0)
        .with_term(layout.open(installation), -1.0)
}

fn distance_row(layout: &CoveringLayout, demand: usize, installation: usize) -> Constraint {
    Constraint::new(Sense::Equal, 0.0)
        .with_name(format!("distance_limit[{demand},{installation}]"))
        .with_term(layout.covers(demand, installation), 1.0)
}

/// Set covering with service levels.
///
/// Minimize `Σ_j open[j]` subject to, in this order:
/// 1. `Σ_j covers[i,j] ≥ 1` for every demand
/// 2. `covers[i,j] ≤ open[j]` for every pair
/// 3. `covers[i,j] = 0` for every pair farther apart than the demand's
///    service level
pub fn set_covering(instance: &SetCoveringInstance) -> Result<Formulation<CoveringLayout>> {
    instance.validate()?;
    let mut model = Model::new("set_covering", Direction::Minimize);
    let layout = covering_variables(
        &mut model,
        instance.num_installations,
        instance.num_demands,
    );
    for j in 0..instance.num_installations {
        model.set_objective_coefficient(layout.open(j), 1.0)?;
    }

    for i in 0..instance.num_demands {
        model.add_constraint(cover_row(&layout, i))?;
    }
    for i in 0..instance.num_demands {
        for j in 0..instance.num_installations {
            model.add_constraint(link_row(&layout, i, j))?;
        }
    }
    for i in 0..instance.num_demands {
        for j in 0..instance.num_installations {
            if !instance.within_service_level(i, j) {
                model.add_constraint(distance_row(&layout, i, j))?;
            }
        }
    }

    debug!(
        "set covering model: {} variables, {} constraints",
        model.num_variables(),
        model.num_constraints()
    );
    Ok(Formulation { model, layout })
}

/// Max covering with an opening budget.
///
/// Maximize `Σ_{i,j} covers[i,j]` subject to, in this order:
/// 1. `Σ_j covers[i,j] ≥ 1` for every demand
/// 2. `Σ_j open[j] = num_to_open`
/// 3. per pair: `covers[i,j] = 0` if out of service level, then
///    `covers[i,j] ≤ open[j]`
pub fn max_covering(instance: &MaxCoveringInstance) -> Result<Formulation<CoveringLayout>> {
    instance.validate()?;
    let mut model = Model::new("max_covering", Direction::Maximize);
    let layout = covering_variables(
        &mut model,
        instance.num_installations,
        instance.num_demands,
    );
    for i in 0..instance.num_demands {
        for j in 0..instance.num_installations {
            model.set_objective_coefficient(layout.covers(i, j), 1.0)?;
        }
    }

    for i in 0..instance.num_demands {
        model.add_constraint(cover_row(&layout, i))?;
    }
    let budget = (0..instance.num_installations).fold(
        Constraint::new(Sense::Equal, instance.num_to_open as f64).with_name("open_budget"),
        |row, j| row.with_term(layout.open(j), 1.0),
    );
    model.add_constraint(budget)?;
    for i in 0..instance.num_demands {
        for j in 0..instance.num_installations {
            if !instance.within_service_level(i, j) {
                model.add_constraint(distance_row(&layout, i, j))?;
            }
            model.add_constraint(link_row(&layout, i, j))?;
        }
    }

    debug!(
        "max covering model: {} variables, {} constraints",
        model.num_variables(),
        model.num_constraints()
    );
    Ok(Formulation { model, layout })
}
