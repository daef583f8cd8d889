//! Instance data for the four problem families, with validation.
//!
//! Field names follow the request payloads of the location service, so every
//! instance deserializes directly from its JSON body.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The closed set of supported problem families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemFamily {
    Capacitated,
    Uncapacitated,
    SetCovering,
    MaxCovering,
}

impl fmt::Display for ProblemFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProblemFamily::Capacitated => "capacitated facility location",
            ProblemFamily::Uncapacitated => "uncapacitated facility location",
            ProblemFamily::SetCovering => "set covering",
            ProblemFamily::MaxCovering => "max covering",
        };
        f.write_str(name)
    }
}

/// Capacitated facility location: open facilities and assign every customer
/// to one open facility without exceeding capacities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacitatedInstance {
    pub num_facilities: usize,
    pub num_customers: usize,
    /// `fixed_costs[i]`, cost of opening facility `i`
    pub fixed_costs: Vec<f64>,
    /// `transport_costs[i][j]`, cost of serving customer `j` from facility `i`
    #[serde(rename = "transportation_costs")]
    pub transport_costs: Vec<Vec<f64>>,
    pub capacities: Vec<f64>,
    pub demands: Vec<f64>,
}

impl CapacitatedInstance {
    /// # Errors
    ///
    /// `Error::InvalidInput` on zero counts, dimension mismatches, or
    /// negative or non-finite costs, capacities or demands.
    pub fn validate(&self) -> Result<()> {
        check_count("num_facilities", self.num_facilities)?;
        check_count("num_customers", self.num_customers)?;
        check_vector("fixed_costs", &self.fixed_costs, self.num_facilities)?;
        check_matrix(
            "transportation_costs",
            &self.transport_costs,
            self.num_facilities,
            self.num_customers,
        )?;
        check_vector("capacities", &self.capacities, self.num_facilities)?;
        check_vector("demands", &self.demands, self.num_customers)
    }

    /// The same instance without capacities.
    pub fn uncapacitated(&self) -> UncapacitatedInstance {
        UncapacitatedInstance {
            num_facilities: self.num_facilities,
            num_customers: self.num_customers,
            fixed_costs: self.fixed_costs.clone(),
            transport_costs: self.transport_costs.clone(),
        }
    }
}

/// Uncapacitated facility location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UncapacitatedInstance {
    pub num_facilities: usize,
    pub num_customers: usize,
    pub fixed_costs: Vec<f64>,
    #[serde(rename = "transportation_costs")]
    pub transport_costs: Vec<Vec<f64>>,
}

impl UncapacitatedInstance {
    /// # Errors
    ///
    /// `Error::InvalidInput` on zero counts, dimension mismatches, or
    /// negative or non-finite costs.
    pub fn validate(&self) -> Result<()> {
        check_count("num_facilities", self.num_facilities)?;
        check_count("num_customers", self.num_customers)?;
        check_vector("fixed_costs", &self.fixed_costs, self.num_facilities)?;
        check_matrix(
            "transportation_costs",
            &self.transport_costs,
            self.num_facilities,
            self.num_customers,
        )
    }
}

/// Set covering with per-demand service levels: open the fewest installations
/// so every demand has an open installation within its service level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetCoveringInstance {
    pub num_installations: usize,
    pub num_demands: usize,
    /// `distances[i][j]`, distance from demand `i` to installation `j`
    pub distances: Vec<Vec<f64>>,
    /// Largest distance at which demand `i` counts as covered
    pub service_levels: Vec<f64>,
}

impl SetCoveringInstance {
    /// # Errors
    ///
    /// `Error::InvalidInput` on zero counts, dimension mismatches, or
    /// negative or non-finite distances or service levels.
    pub fn validate(&self) -> Result<()> {
        check_covering(
            self.num_installations,
            self.num_demands,
            &self.distances,
            &self.service_levels,
        )
    }

    /// True if installation `j` may cover demand `i`.
    pub fn within_service_level(&self, demand: usize, installation: usize) -> bool {
        self.distances[demand][installation] <= self.service_levels[demand]
    }
}

/// Max covering: open exactly `num_to_open` installations, maximizing the
/// number of covered (demand, installation) pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaxCoveringInstance {
    pub num_installations: usize,
    pub num_demands: usize,
    pub distances: Vec<Vec<f64>>,
    pub service_levels: Vec<f64>,
    pub num_to_open: usize,
}

impl MaxCoveringInstance {
    /// # Errors
    ///
    /// As [`SetCoveringInstance::validate`], plus a zero `num_to_open`.
    /// A budget above `num_installations` is not an input error; the search
    /// reports it as infeasible.
    pub fn validate(&self) -> Result<()> {
        check_covering(
            self.num_installations,
            self.num_demands,
            &self.distances,
            &self.service_levels,
        )?;
        check_count("num_to_open", self.num_to_open)
    }

    pub fn within_service_level(&self, demand: usize, installation: usize) -> bool {
        self.distances[demand][installation] <= self.service_levels[demand]
    }
}

/// A request for any of the four families, tagged by `"family"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum Problem {
    Capacitated(CapacitatedInstance),
    Uncapacitated(UncapacitatedInstance),
    SetCovering(SetCoveringInstance),
    MaxCovering(MaxCoveringInstance),
}

impl Problem {
    /// Parses a tagged request body. A missing field is reported by name.
    pub fn from_json(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }

    pub fn family(&self) -> ProblemFamily {
        match self {
            Problem::Capacitated(_) => ProblemFamily::Capacitated,
            Problem::Uncapacitated(_) => ProblemFamily::Uncapacitated,
            Problem::SetCovering(_) => ProblemFamily::SetCovering,
            Problem::MaxCovering(_) => ProblemFamily::MaxCovering,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Problem::Capacitated(p) => p.validate(),
            Problem::Uncapacitated(p) => p.validate(),
            Problem::SetCovering(p) => p.validate(),
            Problem::MaxCovering(p) => p.validate(),
        }
    }
}

fn check_count(name: &str, count: usize) -> Result<()> {
    if count == 0 {
        return Err(Error::invalid_input(format!("{name} must be positive")));
    }
    Ok(())
}

fn check_values(name: &str, values: &[f64]) -> Result<()> {
    if let Some((k, v)) = values
        .iter()
        .enumerate()
        .find(|(_, v)| !v.is_finite() || **v < 0.0)
    {
        return Err(Error::invalid_input(format!(
            "{name}[{k}] = {v} must be a non-negative number"
        )));
    }
    Ok(())
}

fn check_vector(name: &str, values: &[f64], expected: usize) -> Result<()> {
    if values.len() != expected {
        return Err(Error::invalid_input(format!(
            "{name} has {} entries, expected {expected}",
            values.len()
        )));
    }
    check_values(name, values)
}

fn check_matrix(name: &str, rows: &[Vec<f64>], n_rows: usize, n_cols: usize) -> Result<()> {
    if rows.len() != n_rows {
        return Err(Error::invalid_input(format!(
            "{name} has {} rows, expected {n_rows}",
            rows.len()
        )));
    }
    for (r, row) in rows.iter().enumerate() {
        check_vector(&format!("{name}[{r}]"), row, n_cols)?;
    }
    Ok(())
}

fn check_covering(
    installations: usize,
    demands: usize,
    distances: &[Vec<f64>],
    service_levels: &[f64],
) -> Result<()> {
    check_count("num_installations", installations)?;
    check_count("num_demands", demands)?;
    check_matrix("distances", distances, demands, installations)?;
    check_vector("service_levels", service_levels, demands)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capacitated() -> CapacitatedInstance {
        CapacitatedInstance {
            num_facilities: 2,
            num_customers: 3,
            fixed_costs: vec![10.0, 10.0],
            transport_costs: vec![vec![2.0, 4.0, 6.0], vec![5.0, 3.0, 1.0]],
            capacities: vec![5.0, 5.0],
            demands: vec![2.0, 2.0, 2.0],
        }
    }

    #[test]
    fn test_valid_instance() {
        assert!(capacitated().validate().is_ok());
        assert!(capacitated().uncapacitated().validate().is_ok());
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut instance = capacitated();
        instance.fixed_costs.pop();
        let err = instance.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(err.to_string().contains("fixed_costs"));

        let mut instance = capacitated();
        instance.transport_costs[1].push(1.0);
        assert!(instance.validate().unwrap_err().to_string().contains("transportation_costs[1]"));
    }

    #[test]
    fn test_negative_values_rejected() {
        let mut instance = capacitated();
        instance.demands[2] = -1.0;
        assert!(instance.validate().unwrap_err().to_string().contains("demands[2]"));

        let mut instance = capacitated();
        instance.capacities[0] = f64::NAN;
        assert!(instance.validate().is_err());
    }

    #[test]
    fn test_zero_counts_rejected() {
        let instance = SetCoveringInstance {
            num_installations: 0,
            num_demands: 1,
            distances: vec![vec![]],
            service_levels: vec![1.0],
        };
        assert!(instance.validate().unwrap_err().to_string().contains("num_installations"));

        let instance = MaxCoveringInstance {
            num_installations: 2,
            num_demands: 1,
            distances: vec![vec![1.0, 2.0]],
            service_levels: vec![1.5],
            num_to_open: 0,
        };
        assert!(instance.validate().is_err());
    }

    #[test]
    fn test_budget_above_installations_is_valid_input() {
        let instance = MaxCoveringInstance {
            num_installations: 2,
            num_demands: 1,
            distances: vec![vec![1.0, 2.0]],
            service_levels: vec![1.5],
            num_to_open: 3,
        };
        assert!(instance.validate().is_ok());
        assert!(instance.within_service_level(0, 0));
        assert!(!instance.within_service_level(0, 1));
    }

    #[test]
    fn test_tagged_request_parsing() {
        let body = r#"{
            "family": "set_covering",
            "num_installations": 3,
            "num_demands": 2,
            "distances": [[1, 5, 9], [8, 2, 1]],
            "service_levels": [3, 3]
        }"#;
        let problem = Problem::from_json(body).unwrap();
        assert_eq!(problem.family(), ProblemFamily::SetCovering);
        assert!(problem.validate().is_ok());

        let body = r#"{"family": "uncapacitated", "num_facilities": 1, "num_customers": 1,
                       "fixed_costs": [1]}"#;
        let err = Problem::from_json(body).unwrap_err();
        assert!(err.is_client_error());
        assert!(err.to_string().contains("transportation_costs"));
    }
}
