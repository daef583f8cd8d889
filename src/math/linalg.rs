//! Linear algebra kernel used by the simplex method.
//!
//! Provides:
//! - tolerance-aware scalar comparisons
//! - a compressed sparse column matrix for constraint coefficients
//! - a product-form basis inverse with `ftran`/`btran` on `ndarray` vectors

use std::ops::Index;

use ndarray::Array1;

use crate::error::{Error, Result};

/// Smallest magnitude treated as a structural non-zero.
pub const EPSILON: f64 = 1e-12;

/// Returns true when `value` lies within `tolerance` of an integer.
pub fn is_integral(value: f64, tolerance: f64) -> bool {
    (value - value.round()).abs() <= tolerance
}

/// Distance from `value` to the nearest integer, in `[0, 0.5]`.
///
/// A value of exactly 0.5 is the most fractional a variable can be.
pub fn fractionality(value: f64) -> f64 {
    let frac = value - value.floor();
    frac.min(1.0 - frac)
}

/// Constraint matrix stored column by column.
///
/// Columns are what the revised simplex touches most: pricing computes
/// `y^T a_j` and the ratio test needs `B^-1 a_q`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnMatrix {
    n_rows: usize,
    col_starts: Vec<usize>,
    row_indices: Vec<usize>,
    values: Vec<f64>,
}

impl ColumnMatrix {
    /// Builds a matrix from `(row, col, value)` triplets.
    ///
    /// Entries with magnitude below [`EPSILON`] are dropped; duplicate
    /// coordinates are summed.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if any coordinate is out of range or any
    /// value is not finite.
    pub fn from_triplets<I>(n_rows: usize, n_cols: usize, triplets: I) -> Result<Self>
    where
        I: IntoIterator<Item = (usize, usize, f64)>,
    {
        let mut columns: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n_cols];
        for (row, col, value) in triplets {
            if row >= n_rows || col >= n_cols {
                return Err(Error::invalid_input(format!(
                    "matrix entry ({row}, {col}) outside {n_rows}x{n_cols}"
                )));
            }
            if !value.is_finite() {
                return Err(Error::invalid_input(format!(
                    "matrix entry ({row}, {col}) is not finite"
                )));
            }
            columns[col].push((row, value));
        }

        let mut col_starts = Vec::with_capacity(n_cols + 1);
        let mut row_indices = Vec::new();
        let mut values = Vec::new();
        col_starts.push(0);
        for mut column in columns {
            column.sort_by_key(|&(row, _)| row);
            let mut merged: Vec<(usize, f64)> = Vec::with_capacity(column.len());
            for (row, value) in column {
                match merged.last_mut() {
                    Some(last) if last.0 == row => last.1 += value,
                    _ => merged.push((row, value)),
                }
            }
            for (row, value) in merged {
                if value.abs() > EPSILON {
                    row_indices.push(row);
                    values.push(value);
                }
            }
            col_starts.push(row_indices.len());
        }

        Ok(Self {
            n_rows,
            col_starts,
            row_indices,
            values,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.col_starts.len().saturating_sub(1)
    }

    /// Number of stored non-zeros.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Row indices and values of column `col`.
    pub fn column(&self, col: usize) -> (&[usize], &[f64]) {
        let range = self.col_starts[col]..self.col_starts[col + 1];
        (&self.row_indices[range.clone()], &self.values[range])
    }

    /// Computes `y^T a_col`.
    pub fn column_dot<V>(&self, col: usize, y: &V) -> f64
    where
        V: Index<usize, Output = f64> + ?Sized,
    {
        let (rows, vals) = self.column(col);
        rows.iter().zip(vals).map(|(&r, &v)| y[r] * v).sum()
    }

    /// Computes `A x` for a dense `x` of length `n_cols`.
    pub fn mul_vec(&self, x: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.n_rows];
        for (col, &xj) in x.iter().enumerate().take(self.n_cols()) {
            if xj == 0.0 {
                continue;
            }
            let (rows, vals) = self.column(col);
            for (&r, &v) in rows.iter().zip(vals) {
                out[r] += v * xj;
            }
        }
        out
    }
}

/// One elementary transformation of a product-form inverse.
///
/// Pivoting the transformed column `alpha` on `row` gives the eta column
/// `1 / alpha_row` at `row` and `-alpha_i / alpha_row` elsewhere.
#[derive(Debug, Clone, PartialEq)]
struct Eta {
    row: usize,
    pivot: f64,
    entries: Vec<(usize, f64)>,
}

/// Basis inverse kept in product form, `B^-1 = E_k ... E_1`.
///
/// Each basis change appends one sparse eta column instead of touching an
/// explicit `m x m` inverse, so `ftran` and `btran` cost the number of
/// stored non-zeros rather than `m^2`. The simplex rebuilds the file from
/// the current basis once it grows long.
#[derive(Debug, Clone, PartialEq)]
pub struct EtaFile {
    dim: usize,
    etas: Vec<Eta>,
    nnz: usize,
}

impl EtaFile {
    /// Inverse of the `dim x dim` identity.
    pub fn identity(dim: usize) -> Self {
        Self {
            dim,
            etas: Vec::new(),
            nnz: 0,
        }
    }

    /// Number of eta columns.
    pub fn eta_count(&self) -> usize {
        self.etas.len()
    }

    /// Off-pivot non-zeros over all eta columns.
    pub fn nnz(&self) -> usize {
        self.nnz
    }

    /// Replaces basis column `row` by the column whose transformed form is
    /// `alpha = B^-1 a_q`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Numeric` if `|alpha[row]|` is not above
    /// `pivot_tolerance`.
    pub fn push(&mut self, alpha: &Array1<f64>, row: usize, pivot_tolerance: f64) -> Result<()> {
        let pivot = alpha[row];
        if pivot.abs() <= pivot_tolerance {
            return Err(Error::numeric(format!(
                "pivot {pivot:e} on row {row} is numerically zero"
            )));
        }
        let entries: Vec<(usize, f64)> = alpha
            .iter()
            .enumerate()
            .filter(|&(i, a)| i != row && a.abs() > EPSILON)
            .map(|(i, &a)| (i, -a / pivot))
            .collect();
        self.nnz += entries.len();
        self.etas.push(Eta {
            row,
            pivot: 1.0 / pivot,
            entries,
        });
        Ok(())
    }

    /// Overwrites `x` with `B^-1 x`.
    pub fn ftran(&self, x: &mut Array1<f64>) {
        for eta in &self.etas {
            let t = x[eta.row];
            if t == 0.0 {
                continue;
            }
            x[eta.row] = t * eta.pivot;
            for &(i, e) in &eta.entries {
                x[i] += e * t;
            }
        }
    }

    /// Overwrites the row vector `y` with `y^T B^-1`.
    pub fn btran(&self, y: &mut Array1<f64>) {
        for eta in self.etas.iter().rev() {
            let s = eta
                .entries
                .iter()
                .fold(y[eta.row] * eta.pivot, |acc, &(i, e)| acc + y[i] * e);
            y[eta.row] = s;
        }
    }

    /// Computes `B^-1 a` for a sparse column `a` given as parallel slices.
    pub fn solve_sparse(&self, rows: &[usize], values: &[f64]) -> Array1<f64> {
        let mut out = Array1::<f64>::zeros(self.dim);
        for (&r, &v) in rows.iter().zip(values) {
            out[r] += v;
        }
        self.ftran(&mut out);
        out
    }
}
