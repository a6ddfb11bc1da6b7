//! A small row-oriented sparse matrix used to accumulate Jacobians.

use std::fmt;
use std::fmt::Formatter;

use crate::DMatrixf64;

/// Sparse Jacobian builder with add-or-create semantics
///
/// Every row keeps its non-zero entries as `(column, value)` pairs. Rows of a spline Jacobian only
/// ever hold a handful of entries (bounded by the spline degree), so a linear scan per row is
/// cheaper than any hashing.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseJacobian {
    ncols: usize,
    rows: Vec<Vec<(usize, f64)>>,
}

impl SparseJacobian {
    /// Returns an all-zero Jacobian of the given shape
    ///
    /// # Examples
    ///
    /// ```
    /// use ctrlspline::SparseJacobian;
    /// let mut jac = SparseJacobian::new(2, 10);
    /// jac.add(1, 7, 0.5);
    /// jac.add(1, 7, 0.25);
    /// assert_eq!(0.75, jac.get(1, 7));
    /// assert_eq!(1, jac.nnz());
    /// ```
    pub fn new(nrows: usize, ncols: usize) -> SparseJacobian {
        SparseJacobian {
            ncols,
            rows: vec![Vec::new(); nrows],
        }
    }

    pub fn nrows(&self) -> usize {
        self.rows.len()
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Adds `value` to the entry at (`row`, `col`), creating the entry if it does not exist yet
    ///
    /// # Panics
    ///
    /// If the index lies outside the declared shape.
    pub fn add(&mut self, row: usize, col: usize, value: f64) {
        if row >= self.rows.len() || col >= self.ncols {
            panic!("Index ({}, {}) is outside of a {}x{} Jacobian", row, col, self.rows.len(), self.ncols);
        }

        let entries = &mut self.rows[row];
        match entries.iter_mut().find(|(c, _)| *c == col) {
            Some((_, v)) => *v += value,
            None => entries.push((col, value)),
        }
    }

    /// Returns the entry at (`row`, `col`), zero if it was never touched
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.rows
            .get(row)
            .and_then(|entries| entries.iter().find(|(c, _)| *c == col))
            .map_or(0., |(_, v)| *v)
    }

    /// Number of stored entries (entries that were added to, even if they cancelled out)
    pub fn nnz(&self) -> usize {
        self.rows.iter().map(|r| r.len()).sum()
    }

    /// Iterates over the stored `(row, col, value)` triplets
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.rows
            .iter()
            .enumerate()
            .flat_map(|(r, entries)| entries.iter().map(move |&(c, v)| (r, c, v)))
    }

    pub fn to_dense(&self) -> DMatrixf64 {
        let mut dense = DMatrixf64::zeros(self.rows.len(), self.ncols);
        for (r, c, v) in self.iter() {
            dense[(r, c)] += v;
        }
        dense
    }
}

impl fmt::Display for SparseJacobian {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "SparseJacobian({}x{}, nnz: {})", self.rows.len(), self.ncols, self.nnz())
    }
}
