//! Conjugate gradients for the complex-shifted linear systems behind
//! frequency-domain response quantities.
//!
//! The target system `(alpha + beta H + i eta) x = b` is reduced to real
//! arithmetic through the symmetric positive definite normal operator
//! `precon [ (alpha + beta H)^2 + eta^2 ] precon`; this module provides the
//! shifted operator applications and the core conjugate-gradient loop on
//! that normal operator. The engine-level driver assembling the two solves
//! and the preconditioner algebra is
//! [`crate::hamiltonian::FciSolver::cg_solve_system`].

use derive_builder::Builder;
use ndarray::{Array1, ArrayView1, ArrayViewMut1, Zip};

use crate::solvers::{HamiltonianOperator, RTOL_BASE};

#[cfg(test)]
#[path = "cg_tests.rs"]
mod cg_tests;

/// The factor relating the conjugate-gradient residual threshold to the
/// eigensolver tolerance.
const CG_RESIDUAL_FACTOR: f64 = 100.0;

/// Settings of the conjugate-gradient solver.
#[derive(Builder, Clone, Debug)]
pub struct CgSettings {
    /// The residual tolerance per square-rooted vector-length unit, before
    /// the conjugate-gradient factor.
    #[builder(default = "RTOL_BASE")]
    pub rtol_base: f64,

    /// The hard bound on conjugate-gradient iterations.
    #[builder(default = "50_000")]
    pub max_iterations: usize,
}

impl Default for CgSettings {
    fn default() -> Self {
        CgSettingsBuilder::default()
            .build()
            .expect("All conjugate-gradient settings carry defaults.")
    }
}

/// The outcome of one conjugate-gradient solve.
#[derive(Clone, Copy, Debug)]
pub struct CgReport {
    pub iterations: usize,
    pub residual_norm: f64,
    pub converged: bool,
}

/// Applies the shifted operator: `output = (alpha + beta H) input`. The
/// scalar `alpha` must already carry any constant folded out of `H`.
pub fn shifted_apply<H>(
    operator: &H,
    alpha: f64,
    beta: f64,
    input: ArrayView1<f64>,
    mut output: ArrayViewMut1<f64>,
) where
    H: HamiltonianOperator,
{
    operator.apply(input, output.view_mut());
    Zip::from(&mut output)
        .and(&input)
        .for_each(|out, &x| *out = alpha * x + beta * *out);
}

/// Applies the preconditioned normal operator:
/// `output = precon [ (alpha + beta H)^2 + eta^2 ] precon input`.
fn normal_apply<H>(
    operator: &H,
    alpha: f64,
    beta: f64,
    eta: f64,
    precon: ArrayView1<f64>,
    input: ArrayView1<f64>,
    mut output: ArrayViewMut1<f64>,
) where
    H: HamiltonianOperator,
{
    let scaled = Zip::from(&precon)
        .and(&input)
        .map_collect(|&p, &x| p * x);
    let mut once = Array1::zeros(input.len());
    shifted_apply(operator, alpha, beta, scaled.view(), once.view_mut());
    shifted_apply(operator, alpha, beta, once.view(), output.view_mut());
    Zip::from(&mut output)
        .and(&scaled)
        .and(&precon)
        .for_each(|out, &s, &p| *out = p * (*out + eta * eta * s));
}

/// Runs conjugate gradients on the preconditioned normal operator, starting
/// from the initial guess in `solution` and the right-hand side `rhs` of the
/// *preconditioned* system. The converged `solution` still carries the
/// preconditioner; the caller unwinds it.
#[allow(clippy::too_many_arguments)]
pub fn solve_normal_system<H>(
    operator: &H,
    alpha: f64,
    beta: f64,
    eta: f64,
    precon: ArrayView1<f64>,
    mut solution: ArrayViewMut1<f64>,
    rhs: ArrayView1<f64>,
    settings: &CgSettings,
) -> CgReport
where
    H: HamiltonianOperator,
{
    let dimension = operator.dimension();
    assert_eq!(solution.len(), dimension);
    assert_eq!(rhs.len(), dimension);
    let threshold = CG_RESIDUAL_FACTOR * settings.rtol_base * (dimension as f64).sqrt();

    // r_0 = b - A x_0 ; p_0 = r_0.
    let mut image = Array1::zeros(dimension);
    normal_apply(
        operator,
        alpha,
        beta,
        eta,
        precon,
        solution.view(),
        image.view_mut(),
    );
    let mut residual = &rhs - &image;
    let mut direction = residual.clone();
    let mut rho = residual.dot(&residual);
    let mut residual_norm = rho.sqrt();

    let mut iterations = 0;
    while residual_norm >= threshold && iterations < settings.max_iterations {
        normal_apply(
            operator,
            alpha,
            beta,
            eta,
            precon,
            direction.view(),
            image.view_mut(),
        );
        let step = rho / direction.dot(&image);
        solution.scaled_add(step, &direction);
        residual.scaled_add(-step, &image);
        let rho_next = residual.dot(&residual);
        let ratio = rho_next / rho;
        Zip::from(&mut direction)
            .and(&residual)
            .for_each(|p, &r| *p = r + ratio * *p);
        rho = rho_next;
        residual_norm = rho.sqrt();
        iterations += 1;
        log::debug!("CG iteration {iterations}: |r| = {residual_norm:.6e}.");
    }

    let converged = residual_norm < threshold;
    if !converged {
        log::warn!(
            "CG stopped at the iteration bound {} with residual {residual_norm:.6e} \
             (threshold {threshold:.6e}).",
            settings.max_iterations
        );
    }
    CgReport {
        iterations,
        residual_norm,
        converged,
    }
}
