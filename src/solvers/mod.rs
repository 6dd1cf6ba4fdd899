//! Iterative solvers over matrix-free Hamiltonians.
//!
//! The solvers are decoupled from the Hamiltonian representation through the
//! [`HamiltonianOperator`] trait: a solver only ever requests the operator
//! dimension, its diagonal, and operator--vector products. The engine-level
//! adapters ([`crate::hamiltonian::FciSolver::gs_davidson`] and
//! [`crate::hamiltonian::FciSolver::cg_solve_system`]) live here as well.

use anyhow::{self, ensure};
use ndarray::{Array1, ArrayView1, ArrayViewMut1};

use crate::hamiltonian::FciSolver;

pub mod cg;
pub mod davidson;

/// The residual tolerance per square-rooted vector-length unit shared by the
/// iterative solvers.
pub const RTOL_BASE: f64 = 1e-10;

/// The floor applied to near-singular preconditioner denominators.
pub const PRECOND_CUTOFF: f64 = 1e-12;

/// A symmetric operator available only through matrix-free products.
pub trait HamiltonianOperator: Sync {
    /// The vector dimension.
    fn dimension(&self) -> usize;

    /// Writes the exact operator diagonal into `diag`.
    fn diagonal(&self, diag: ArrayViewMut1<f64>);

    /// Applies the operator: `output = H input`.
    fn apply(&self, input: ArrayView1<f64>, output: ArrayViewMut1<f64>);
}

impl HamiltonianOperator for FciSolver {
    fn dimension(&self) -> usize {
        self.vec_length(0)
    }

    fn diagonal(&self, diag: ArrayViewMut1<f64>) {
        self.diag_ham(diag);
    }

    fn apply(&self, input: ArrayView1<f64>, output: ArrayViewMut1<f64>) {
        self.ham_times_vec(input, output);
    }
}

impl FciSolver {
    /// Solves for the ground state of the sector with the Davidson
    /// eigensolver.
    ///
    /// When `inoutput` is given it is used as the initial guess and is
    /// overwritten with the converged eigenvector; otherwise the solver
    /// starts from a pseudo-random vector. Returns the ground-state energy,
    /// eigenvalue plus core energy.
    ///
    /// # Errors
    ///
    /// Errors when `inoutput` has the wrong length or the eigensolver
    /// exhausts its iteration allowance.
    pub fn gs_davidson(&self, inoutput: Option<&mut Array1<f64>>) -> Result<f64, anyhow::Error> {
        let dimension = self.vec_length(0);
        let mut guess = Array1::zeros(dimension);
        match inoutput.as_deref() {
            Some(vector) => {
                ensure!(
                    vector.len() == dimension,
                    "The guess vector length {} does not match the sector dimension {dimension}.",
                    vector.len()
                );
                guess.assign(vector);
            }
            None => Self::fill_random(guess.view_mut()),
        }

        let settings = davidson::DavidsonSettings::default();
        let outcome = davidson::solve(self, guess, &settings)?;
        log::debug!(
            "Davidson required {} matrix-vector multiplications.",
            outcome.n_multiplications
        );
        let energy = outcome.eigenvalue + self.core_energy();
        log::info!("Converged ground state energy: {energy:.12}.");
        if let Some(vector) = inoutput {
            vector.assign(&outcome.eigenvector);
        }
        Ok(energy)
    }

    /// Solves `(alpha + beta H + i eta) x = b` for the complex solution
    /// `x = real_sol + i imag_sol`, with `H` the full Hamiltonian of the
    /// sector (core energy included) and real `b`.
    ///
    /// The conjugate gradient method requires a symmetric positive definite
    /// operator, so the imaginary part is solved first through the
    /// Jacobi-preconditioned normal operator
    /// `precon [ (alpha + beta H)^2 + eta^2 ] precon`, with the diagonals of
    /// `H` and `H^2` evaluated in closed form; the real part is then
    /// recovered algebraically as `-(alpha + beta H) / eta` applied to the
    /// imaginary part, corrected for the preconditioner.
    ///
    /// # Errors
    ///
    /// Errors when `eta` is zero.
    ///
    /// # Panics
    ///
    /// Panics if a buffer does not have the sector's vector length.
    pub fn cg_solve_system(
        &self,
        alpha: f64,
        beta: f64,
        eta: f64,
        rhs: ArrayView1<f64>,
        mut real_sol: ArrayViewMut1<f64>,
        mut imag_sol: ArrayViewMut1<f64>,
    ) -> Result<(), anyhow::Error> {
        ensure!(
            eta != 0.0,
            "The imaginary shift of the linear system must not vanish."
        );
        let dimension = self.vec_length(0);
        assert_eq!(rhs.len(), dimension);
        assert_eq!(real_sol.len(), dimension);
        assert_eq!(imag_sol.len(), dimension);

        // HamTimesVec covers only the second-quantised part of H; the core
        // energy is folded into the scalar shift.
        let alpha_op = alpha + beta * self.core_energy();
        let precon = self.cg_jacobi_preconditioner(alpha_op, beta, eta);
        let settings = cg::CgSettings::default();

        // Imaginary part: the preconditioned normal system has right-hand
        // side -eta precon b, and the right-hand side itself is an educated
        // initial guess (exact for a diagonal operator).
        let rhs_imag = ndarray::Zip::from(&precon)
            .and(&rhs)
            .map_collect(|&p, &b| -eta * p * b);
        log::debug!(
            "Two-norm of the right-hand side for the imaginary part: {:.6e}.",
            rhs_imag.dot(&rhs_imag).sqrt()
        );
        imag_sol.assign(&rhs_imag);
        let report = cg::solve_normal_system(
            self,
            alpha_op,
            beta,
            eta,
            precon.view(),
            imag_sol.view_mut(),
            rhs_imag.view(),
            &settings,
        );
        log::debug!(
            "CG imaginary part: {} iterations, residual {:.6e}, converged {}.",
            report.iterations,
            report.residual_norm,
            report.converged
        );
        ndarray::Zip::from(&mut imag_sol)
            .and(&precon)
            .for_each(|x, &p| *x *= p);

        // Real part: initial guess from the imaginary part, then the same
        // preconditioned normal solve with right-hand side
        // precon (alpha + beta H) b.
        cg::shifted_apply(self, -alpha_op / eta, -beta / eta, imag_sol.view(), real_sol.view_mut());
        ndarray::Zip::from(&mut real_sol).and(&precon).for_each(|x, &p| {
            *x /= p.max(PRECOND_CUTOFF);
        });
        let mut rhs_real = Array1::zeros(dimension);
        cg::shifted_apply(self, alpha_op, beta, rhs, rhs_real.view_mut());
        ndarray::Zip::from(&mut rhs_real)
            .and(&precon)
            .for_each(|b, &p| *b *= p);
        log::debug!(
            "Two-norm of the right-hand side for the real part: {:.6e}.",
            rhs_real.dot(&rhs_real).sqrt()
        );
        let report = cg::solve_normal_system(
            self,
            alpha_op,
            beta,
            eta,
            precon.view(),
            real_sol.view_mut(),
            rhs_real.view(),
            &settings,
        );
        log::debug!(
            "CG real part: {} iterations, residual {:.6e}, converged {}.",
            report.iterations,
            report.residual_norm,
            report.converged
        );
        ndarray::Zip::from(&mut real_sol)
            .and(&precon)
            .for_each(|x, &p| *x *= p);

        Ok(())
    }

    /// The Jacobi preconditioner `1 / sqrt(diag[(alpha + beta H)^2 + eta^2])`
    /// of the shifted normal operator, with the diagonals of `H` and `H^2`
    /// evaluated in closed form.
    fn cg_jacobi_preconditioner(&self, alpha_op: f64, beta: f64, eta: f64) -> Array1<f64> {
        let dimension = self.vec_length(0);
        let mut diag_h = Array1::zeros(dimension);
        self.diag_ham(diag_h.view_mut());
        let mut diag_h2 = Array1::zeros(dimension);
        self.diag_ham_squared(diag_h2.view_mut());

        let constant = alpha_op * alpha_op + eta * eta;
        let linear = 2.0 * alpha_op * beta;
        let quadratic = beta * beta;
        let precon = ndarray::Zip::from(&diag_h)
            .and(&diag_h2)
            .map_collect(|&h, &h2| 1.0 / (constant + linear * h + quadratic * h2).sqrt());
        if log::log_enabled!(log::Level::Debug) {
            let max = precon.iter().cloned().fold(f64::MIN, f64::max);
            let min = precon.iter().cloned().fold(f64::MAX, f64::min);
            log::debug!(
                "diag[(alpha + beta H)^2 + eta^2] ranges over [{:.6e}, {:.6e}].",
                1.0 / (max * max),
                1.0 / (min * min)
            );
        }
        precon
    }
}
