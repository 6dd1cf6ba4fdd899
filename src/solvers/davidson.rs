//! A Davidson eigensolver for the lowest eigenpair of a symmetric
//! matrix-free operator.
//!
//! The solver keeps an orthonormal subspace basis together with the operator
//! images of its vectors, diagonalises the projected operator with
//! [`nalgebra::SymmetricEigen`], and expands the basis with the
//! diagonal-preconditioned residual of the lowest Ritz pair. When the basis
//! reaches its bound it deflates to the few lowest Ritz vectors and
//! continues.

use anyhow::{self, bail};
use derive_builder::Builder;
use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::Array1;

use crate::solvers::{HamiltonianOperator, PRECOND_CUTOFF, RTOL_BASE};

#[cfg(test)]
#[path = "davidson_tests.rs"]
mod davidson_tests;

/// Settings of the Davidson eigensolver.
#[derive(Builder, Clone, Debug)]
pub struct DavidsonSettings {
    /// The largest subspace dimension before a deflated restart.
    #[builder(default = "32")]
    pub max_subspace: usize,

    /// The number of Ritz vectors kept across a restart.
    #[builder(default = "3")]
    pub n_keep: usize,

    /// The residual tolerance per square-rooted vector-length unit.
    #[builder(default = "RTOL_BASE")]
    pub rtol_base: f64,

    /// The floor applied to near-singular preconditioner denominators.
    #[builder(default = "PRECOND_CUTOFF")]
    pub precond_cutoff: f64,

    /// The hard bound on matrix-vector multiplications.
    #[builder(default = "20_000")]
    pub max_multiplications: usize,
}

impl Default for DavidsonSettings {
    fn default() -> Self {
        DavidsonSettingsBuilder::default()
            .build()
            .expect("All Davidson settings carry defaults.")
    }
}

/// The converged lowest eigenpair.
#[derive(Clone, Debug)]
pub struct DavidsonOutcome {
    pub eigenvalue: f64,
    pub eigenvector: Array1<f64>,
    pub n_multiplications: usize,
}

/// Solves for the lowest eigenpair of a symmetric operator, starting from
/// the given guess vector.
///
/// # Errors
///
/// Errors when the guess vanishes, has the wrong length, or the bound on
/// matrix-vector multiplications is exhausted before convergence.
pub fn solve<H>(
    operator: &H,
    guess: Array1<f64>,
    settings: &DavidsonSettings,
) -> Result<DavidsonOutcome, anyhow::Error>
where
    H: HamiltonianOperator,
{
    let dimension = operator.dimension();
    if guess.len() != dimension {
        bail!(
            "The guess vector length {} does not match the operator dimension {dimension}.",
            guess.len()
        );
    }
    let guess_norm = guess.dot(&guess).sqrt();
    if guess_norm <= 0.0 {
        bail!("The Davidson guess vector vanishes.");
    }
    let rtol = settings.rtol_base * (dimension as f64).sqrt();
    let max_subspace = settings.max_subspace.min(dimension).max(2);
    let n_keep = settings.n_keep.min(max_subspace - 1).max(1);

    let mut diagonal = Array1::zeros(dimension);
    operator.diagonal(diagonal.view_mut());

    let mut basis: Vec<Array1<f64>> = vec![&guess / guess_norm];
    let mut images: Vec<Array1<f64>> = Vec::new();
    let mut n_multiplications = 0;

    loop {
        // Operator images of the vectors added since the last round.
        while images.len() < basis.len() {
            let mut image = Array1::zeros(dimension);
            operator.apply(basis[images.len()].view(), image.view_mut());
            images.push(image);
            n_multiplications += 1;
        }

        // Projected operator and its lowest Ritz pair.
        let subspace_dim = basis.len();
        let mut projected = DMatrix::<f64>::zeros(subspace_dim, subspace_dim);
        for row in 0..subspace_dim {
            for col in row..subspace_dim {
                let element = basis[row].dot(&images[col]);
                projected[(row, col)] = element;
                projected[(col, row)] = element;
            }
        }
        let eigen = SymmetricEigen::new(projected);
        let lowest = (0..subspace_dim)
            .min_by(|&a, &b| eigen.eigenvalues[a].total_cmp(&eigen.eigenvalues[b]))
            .expect("The subspace is never empty.");
        let theta = eigen.eigenvalues[lowest];
        let weights = eigen.eigenvectors.column(lowest);

        let mut ritz = Array1::<f64>::zeros(dimension);
        let mut ritz_image = Array1::<f64>::zeros(dimension);
        for (k, weight) in weights.iter().enumerate() {
            ritz.scaled_add(*weight, &basis[k]);
            ritz_image.scaled_add(*weight, &images[k]);
        }

        let residual = &ritz_image - &(&ritz * theta);
        let residual_norm = residual.dot(&residual).sqrt();
        log::debug!(
            "Davidson subspace {subspace_dim}: theta = {theta:.12}, |r| = {residual_norm:.6e}."
        );
        if residual_norm < rtol || subspace_dim == dimension {
            return Ok(DavidsonOutcome {
                eigenvalue: theta,
                eigenvector: ritz,
                n_multiplications,
            });
        }
        if n_multiplications >= settings.max_multiplications {
            bail!(
                "Davidson failed to converge within {} matrix-vector multiplications \
                 (residual {residual_norm:.6e}, tolerance {rtol:.6e}).",
                settings.max_multiplications
            );
        }

        // Deflated restart once the subspace is full: keep the lowest Ritz
        // vectors, which are orthonormal by construction.
        if subspace_dim == max_subspace {
            let order = {
                let mut order: Vec<usize> = (0..subspace_dim).collect();
                order.sort_by(|&a, &b| eigen.eigenvalues[a].total_cmp(&eigen.eigenvalues[b]));
                order.truncate(n_keep);
                order
            };
            let mut new_basis = Vec::with_capacity(n_keep);
            let mut new_images = Vec::with_capacity(n_keep);
            for &index in &order {
                let column = eigen.eigenvectors.column(index);
                let mut vector = Array1::<f64>::zeros(dimension);
                let mut image = Array1::<f64>::zeros(dimension);
                for (k, weight) in column.iter().enumerate() {
                    vector.scaled_add(*weight, &basis[k]);
                    image.scaled_add(*weight, &images[k]);
                }
                new_basis.push(vector);
                new_images.push(image);
            }
            basis = new_basis;
            images = new_images;
            continue;
        }

        // Diagonal-preconditioned residual, orthonormalised against the
        // basis (twice, for numerical safety).
        let mut expansion = ndarray::Zip::from(&residual)
            .and(&diagonal)
            .map_collect(|&r, &d| {
                let mut denominator = d - theta;
                if denominator.abs() < settings.precond_cutoff {
                    denominator = settings.precond_cutoff.copysign(denominator);
                }
                r / denominator
            });
        let norm = expansion.dot(&expansion).sqrt();
        if norm <= 0.0 {
            return Ok(DavidsonOutcome {
                eigenvalue: theta,
                eigenvector: ritz,
                n_multiplications,
            });
        }
        expansion /= norm;
        for _ in 0..2 {
            for vector in &basis {
                let overlap = expansion.dot(vector);
                expansion.scaled_add(-overlap, vector);
            }
        }
        let norm = expansion.dot(&expansion).sqrt();
        if norm < 1e-8 {
            // The preconditioned residual lies in the span of the basis:
            // the Ritz pair is as converged as the arithmetic allows.
            log::debug!("Davidson expansion space exhausted at |r| = {residual_norm:.6e}.");
            return Ok(DavidsonOutcome {
                eigenvalue: theta,
                eigenvector: ritz,
                n_multiplications,
            });
        }
        basis.push(expansion / norm);
    }
}
