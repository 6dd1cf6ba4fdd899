//! Molecular integral providers.
//!
//! The engine consumes orbital metadata and one- and two-body integrals
//! through the [`IntegralSource`] trait; loading or transforming integrals
//! from a quantum-chemistry input format happens elsewhere. Two-body
//! integrals are supplied in physicist notation `<ij|kl>` and converted to
//! chemist notation internally by the engine.

use derive_builder::Builder;
use ndarray::{Array2, Array4};

use crate::symmetry::IrrepProductTable;


/// A provider of molecular integrals over L spatial orbitals.
///
/// Implementations must be consistent with the symmetry metadata they carry:
/// `one_body(i, j)` and `two_body(i, j, k, l)` are expected to vanish
/// whenever the product of the irreps of their orbital indices is not the
/// totally symmetric irrep, and to carry the usual real-orbital permutation
/// symmetries.
pub trait IntegralSource {
    /// The number of spatial orbitals L.
    fn n_orbitals(&self) -> usize;

    /// The irrep of orbital `orb`.
    fn orbital_irrep(&self, orb: usize) -> usize;

    /// The irrep product table of the Abelian point group.
    fn irrep_table(&self) -> &IrrepProductTable;

    /// The scalar core (nuclear repulsion plus frozen-core) energy.
    fn core_energy(&self) -> f64;

    /// The one-body integral T_ij.
    fn one_body(&self, orb_i: usize, orb_j: usize) -> f64;

    /// The two-body integral `<ij|kl>` in physicist notation,
    /// `int dr1 dr2 i(r1) j(r2) k(r1) l(r2) / |r1 - r2|` for real orbitals.
    fn two_body(&self, orb_i: usize, orb_j: usize, orb_k: usize, orb_l: usize) -> f64;
}

/// An in-memory [`IntegralSource`] backed by dense arrays.
#[derive(Builder, Clone, Debug)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct DenseIntegrals {
    /// The irrep product table of the Abelian point group.
    group: IrrepProductTable,

    /// The irrep of each orbital.
    orbital_irreps: Vec<usize>,

    /// The scalar core energy.
    #[builder(default = "0.0")]
    core_energy: f64,

    /// The one-body integrals, shape (L, L).
    tmat: Array2<f64>,

    /// The two-body integrals in physicist notation, shape (L, L, L, L).
    vmat: Array4<f64>,
}

impl DenseIntegrals {
    pub fn builder() -> DenseIntegralsBuilder {
        DenseIntegralsBuilder::default()
    }
}

impl DenseIntegralsBuilder {
    fn validate(&self) -> Result<(), String> {
        let orbital_irreps = self
            .orbital_irreps
            .as_ref()
            .ok_or("No orbital irreps found.".to_string())?;
        let n_orbitals = orbital_irreps.len();
        let group = self.group.as_ref().ok_or("No irrep table found.".to_string())?;
        if orbital_irreps.iter().any(|&irrep| irrep >= group.order()) {
            return Err("An orbital irrep lies outside the irrep table.".to_string());
        }
        let tmat = self
            .tmat
            .as_ref()
            .ok_or("No one-body integrals found.".to_string())?;
        if tmat.shape() != [n_orbitals, n_orbitals] {
            return Err("The one-body integral matrix must have shape (L, L).".to_string());
        }
        let vmat = self
            .vmat
            .as_ref()
            .ok_or("No two-body integrals found.".to_string())?;
        if vmat.shape() != [n_orbitals, n_orbitals, n_orbitals, n_orbitals] {
            return Err("The two-body integral tensor must have shape (L, L, L, L).".to_string());
        }
        Ok(())
    }
}

impl IntegralSource for DenseIntegrals {
    fn n_orbitals(&self) -> usize {
        self.orbital_irreps.len()
    }

    fn orbital_irrep(&self, orb: usize) -> usize {
        self.orbital_irreps[orb]
    }

    fn irrep_table(&self) -> &IrrepProductTable {
        &self.group
    }

    fn core_energy(&self) -> f64 {
        self.core_energy
    }

    fn one_body(&self, orb_i: usize, orb_j: usize) -> f64 {
        self.tmat[[orb_i, orb_j]]
    }

    fn two_body(&self, orb_i: usize, orb_j: usize, orb_k: usize, orb_l: usize) -> f64 {
        self.vmat[[orb_i, orb_j, orb_k, orb_l]]
    }
}
