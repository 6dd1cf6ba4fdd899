//! Abelian irrep product tables.
//!
//! The multiplication table of the point group is consumed, not constructed:
//! callers supply it (typically from a character-table generator, or from
//! the usual binary-label convention for the real Abelian groups) and this
//! module only validates the properties the determinant block addressing
//! relies on.

use anyhow::{self, ensure};
use itertools::Itertools;
use ndarray::Array2;

#[cfg(test)]
#[path = "symmetry_tests.rs"]
mod symmetry_tests;

/// The multiplication table of the irreducible representations of an Abelian
/// point group.
///
/// Irreps are labelled by their row/column index; index `0` is the totally
/// symmetric irrep. The determinant indexing requires every irrep to be its
/// own inverse (true for all real Abelian point groups), so this is checked
/// at construction alongside commutativity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IrrepProductTable {
    table: Array2<usize>,
}

impl IrrepProductTable {
    /// Wraps an externally supplied product table.
    ///
    /// # Errors
    ///
    /// Errors if the table is not square, has an entry out of range, is not
    /// commutative, does not have the totally symmetric irrep at index `0`,
    /// contains an irrep that is not self-inverse, or has a row that is not
    /// a permutation of the irrep labels.
    pub fn from_table(table: Array2<usize>) -> Result<Self, anyhow::Error> {
        let order = table.nrows();
        ensure!(order > 0, "An empty irrep product table is not meaningful.");
        ensure!(
            table.ncols() == order,
            "The irrep product table must be square."
        );
        ensure!(
            table.iter().all(|&prod| prod < order),
            "The irrep product table contains an entry out of range."
        );
        ensure!(
            table == table.t(),
            "The irrep product table must be commutative."
        );
        ensure!(
            (0..order).all(|irrep| table[[0, irrep]] == irrep),
            "Irrep 0 must be the totally symmetric irrep."
        );
        ensure!(
            (0..order).all(|irrep| table[[irrep, irrep]] == 0),
            "Every irrep must be its own inverse."
        );
        for row in 0..order {
            ensure!(
                (0..order).map(|col| table[[row, col]]).sorted().eq(0..order),
                "Row {row} of the irrep product table is not a permutation."
            );
        }
        Ok(Self { table })
    }

    /// The product table of the real Abelian point groups (C1, Ci, C2, Cs,
    /// C2h, C2v, D2 and D2h), in which the product of irreps `a` and `b` is
    /// `a XOR b`.
    ///
    /// # Errors
    ///
    /// Errors if `order` is not 1, 2, 4 or 8.
    pub fn boolean(order: usize) -> Result<Self, anyhow::Error> {
        ensure!(
            matches!(order, 1 | 2 | 4 | 8),
            "A real Abelian point group has 1, 2, 4 or 8 irreps, not {order}."
        );
        let table = Array2::from_shape_fn((order, order), |(row, col)| row ^ col);
        Self::from_table(table)
    }

    /// The number of irreps in the group.
    pub fn order(&self) -> usize {
        self.table.nrows()
    }

    /// The product of two irreps.
    ///
    /// # Panics
    ///
    /// Panics if either label is out of range.
    #[inline]
    pub fn product(&self, irrep_a: usize, irrep_b: usize) -> usize {
        self.table[[irrep_a, irrep_b]]
    }
}
