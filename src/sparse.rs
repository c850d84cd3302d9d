//! Row-major sparse matrix used for HMM transition probabilities and counts.
//!
//! Rows and columns are kept in `BTreeMap`s so iteration order is the key
//! order, deterministic across platforms. The recursions that consume this
//! type must not depend on any particular iteration order, but deterministic
//! order keeps training runs reproducible bit for bit.

use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One sparse row: non-zero columns in ascending column order.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SparseRow {
    cells: BTreeMap<usize, f64>,
}

impl SparseRow {
    /// Value stored at `col`, or 0 when absent.
    pub fn get(&self, col: usize) -> f64 {
        self.cells.get(&col).copied().unwrap_or(0.0)
    }

    /// Iterate the non-zero `(column, value)` cells in ascending column order.
    pub fn entries(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.cells.iter().map(|(c, v)| (*c, *v))
    }

    /// Sum of all stored values.
    pub fn sum(&self) -> f64 {
        self.cells.values().sum()
    }

    /// Number of stored cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the row stores no cells.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Row-major sparse map from `(row, col)` to a probability or count.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SparseMatrix {
    rows: BTreeMap<usize, SparseRow>,
}

impl SparseMatrix {
    /// Create an empty matrix.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` at `(row, col)`, overwriting any previous cell.
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.rows.entry(row).or_default().cells.insert(col, value);
    }

    /// Add `value` to the cell at `(row, col)`, materialising it if absent.
    pub fn add(&mut self, row: usize, col: usize, value: f64) {
        *self
            .rows
            .entry(row)
            .or_default()
            .cells
            .entry(col)
            .or_insert(0.0) += value;
    }

    /// Value stored at `(row, col)`, or 0 when absent.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.rows.get(&row).map_or(0.0, |r| r.get(col))
    }

    /// Iterate `(row_index, row)` pairs in ascending row order.
    pub fn rows(&self) -> impl Iterator<Item = (usize, &SparseRow)> + '_ {
        self.rows.iter().map(|(r, row)| (*r, row))
    }

    /// The stored row at `row`, if any cell of it was ever set.
    pub fn row(&self, row: usize) -> Option<&SparseRow> {
        self.rows.get(&row)
    }

    /// Number of stored rows.
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Extract column `col` as a dense vector of the given length.
    ///
    /// Rows at or beyond `len` are ignored; absent cells read as 0.
    pub fn column(&self, col: usize, len: usize) -> Vec<f64> {
        let mut out = vec![0.0; len];
        for (r, row) in self.rows.iter() {
            if *r < len {
                out[*r] = row.get(col);
            }
        }
        out
    }

    /// Row-normalize into a new matrix: each row with positive mass is scaled
    /// to sum to 1; rows with zero or negative mass are dropped. Idempotent
    /// on the result.
    pub fn normalize_rows(&self) -> SparseMatrix {
        let mut out = SparseMatrix::new();
        for (r, row) in self.rows.iter() {
            let total = row.sum();
            if total <= 0.0 {
                continue;
            }
            let scale = 1.0 / total;
            for (c, v) in row.entries() {
                out.set(*r, c, v * scale);
            }
        }
        out
    }
}

/// Build a matrix from dense rows, storing every value including zeros.
///
/// Convenient for literal transition tables; zeros participate in row sums
/// but contribute nothing.
pub fn from_dense_rows(rows: &[Vec<f64>]) -> SparseMatrix {
    let mut mat = SparseMatrix::new();
    for (r, row) in rows.iter().enumerate() {
        for (c, &v) in row.iter().enumerate() {
            mat.set(r, c, v);
        }
    }
    mat
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_set_get_add() {
        let mut m = SparseMatrix::new();
        assert_eq!(m.get(3, 7), 0.0);
        m.set(3, 7, 0.25);
        assert_eq!(m.get(3, 7), 0.25);
        m.add(3, 7, 0.25);
        assert_eq!(m.get(3, 7), 0.5);
        m.add(0, 0, 1.0);
        assert_eq!(m.get(0, 0), 1.0);
        assert_eq!(m.num_rows(), 2);
    }

    #[test]
    fn test_rows_iterate_in_order() {
        let mut m = SparseMatrix::new();
        m.set(2, 0, 1.0);
        m.set(0, 1, 2.0);
        m.set(1, 2, 3.0);
        let order: Vec<usize> = m.rows().map(|(r, _)| r).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_column_extraction() {
        let m = from_dense_rows(&[vec![0.8, 0.2, 0.0], vec![0.0, 0.5, 0.5]]);
        let col = m.column(2, 3);
        assert_eq!(col, vec![0.0, 0.5, 0.0]);
    }

    #[test]
    fn test_normalize_rows() {
        let mut m = SparseMatrix::new();
        m.set(0, 0, 2.0);
        m.set(0, 1, 6.0);
        m.set(1, 0, 0.0); // zero-mass row is dropped
        let n = m.normalize_rows();
        assert_approx_eq!(n.get(0, 0), 0.25, 1e-12);
        assert_approx_eq!(n.get(0, 1), 0.75, 1e-12);
        assert!(n.row(1).is_none());

        let row_sum: f64 = n.row(0).unwrap().sum();
        assert_approx_eq!(row_sum, 1.0, 1e-9);
    }

    #[test]
    fn test_normalize_idempotent() {
        let m = from_dense_rows(&[vec![1.0, 3.0], vec![4.0, 4.0]]);
        let once = m.normalize_rows();
        let twice = once.normalize_rows();
        assert_eq!(once, twice);
    }
}
