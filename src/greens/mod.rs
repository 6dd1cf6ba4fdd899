//! Resolvent-based response quantities: one-particle addition/removal
//! Green's functions and density-response functions.
//!
//! All drivers reduce to complex-shifted linear solves
//! ([`FciSolver::cg_solve_system`]); the particle addition/removal functions
//! additionally build an auxiliary engine at shifted electron count and
//! target irrep from the same integral source, and map vectors between the
//! two sectors with elementary second-quantised operators.

use anyhow::{self, ensure};
use ndarray::{Array1, Array2, Array4, ArrayView1, ArrayViewMut1, Zip};
use num_complex::Complex64;

use crate::basis::{parity_below, Spin};
use crate::hamiltonian::FciSolver;
use crate::integrals::IntegralSource;


/// An elementary second-quantised operator kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldOperator {
    Creation,
    Annihilation,
}

/// Which auxiliary 2-RDMs to extract alongside a Green's-function solve.
#[derive(Clone, Copy, Debug, Default)]
pub struct RdmRequest {
    /// The 2-RDM of the real part of the solution.
    pub real: bool,
    /// The 2-RDM of the imaginary part of the solution.
    pub imag: bool,
    /// The 2-RDM of the perturbation source vector itself.
    pub source: bool,
}

/// The 2-RDMs extracted from one Green's-function solve.
#[derive(Clone, Debug, Default)]
pub struct GfRdms {
    pub real: Option<Array4<f64>>,
    pub imag: Option<Array4<f64>>,
    pub source: Option<Array4<f64>>,
}

/// A matrix of Green's-function amplitudes over (left, right) orbital lists,
/// with the per-right-orbital 2-RDMs that were requested.
#[derive(Clone, Debug)]
pub struct GfMatrix {
    pub values: Array2<Complex64>,
    /// Indexed by the right orbital list.
    pub rdms: Vec<GfRdms>,
}

impl FciSolver {
    /// Applies the total number operator of one orbital:
    /// `result = n_orb source`.
    ///
    /// # Panics
    ///
    /// Panics on an out-of-range orbital index or mismatched buffer lengths.
    pub fn act_with_number_operator(
        &self,
        orb: usize,
        source: ArrayView1<f64>,
        mut result: ArrayViewMut1<f64>,
    ) {
        assert!(orb < self.n_orbitals());
        assert_eq!(source.len(), self.vec_length(0));
        assert_eq!(result.len(), self.vec_length(0));
        Zip::indexed(result.view_mut()).par_for_each(|counter, value| {
            let (string_up, string_down) = self.strings_of_counter(0, counter);
            let occupation = ((string_up >> orb) & 1) + ((string_down >> orb) & 1);
            *value = occupation as f64 * source[counter];
        });
    }

    /// Applies an elementary second-quantised operator `a^+_{orb,spin}` or
    /// `a_{orb,spin}` to a vector of *another* engine instance, writing the
    /// image in this instance's sector. The two instances differ by one
    /// electron in the given spin channel; a target-irrep mismatch yields a
    /// zero vector rather than an error. Down-channel operators carry the
    /// fermion-string phase of the up channel they anticommute past.
    ///
    /// # Panics
    ///
    /// Panics when the two engines disagree on the orbital count, on an
    /// out-of-range orbital index, or on mismatched buffer lengths.
    pub fn act_with_second_quantized_operator(
        &self,
        operator: FieldOperator,
        spin: Spin,
        orb: usize,
        mut result: ArrayViewMut1<f64>,
        source_solver: &FciSolver,
        source_vector: ArrayView1<f64>,
    ) {
        assert_eq!(
            self.n_orbitals(),
            source_solver.n_orbitals(),
            "The two engines must share the orbital count."
        );
        assert!(orb < self.n_orbitals());
        assert_eq!(result.len(), self.vec_length(0));
        assert_eq!(source_vector.len(), source_solver.vec_length(0));

        if self.target_irrep()
            != self
                .irrep_table()
                .product(source_solver.target_irrep(), self.orbital_irrep(orb))
        {
            result.fill(0.0);
            return;
        }

        // Orbital ordering puts the whole up string before the down string,
        // so down-channel operators anticommute past all up electrons.
        let channel_phase = match spin {
            Spin::Up => 1,
            Spin::Down => {
                if self.nel_up() % 2 == 0 {
                    1
                } else {
                    -1
                }
            }
        };
        let bit = 1u64 << orb;

        Zip::indexed(result.view_mut()).par_for_each(|counter, value| {
            let (string_up, string_down) = self.strings_of_counter(0, counter);
            *value = match (operator, spin) {
                (FieldOperator::Creation, Spin::Up) => {
                    if string_up & bit != 0 {
                        f64::from(parity_below(string_up, orb))
                            * source_solver.coefficient(
                                string_up & !bit,
                                string_down,
                                source_vector,
                            )
                    } else {
                        0.0
                    }
                }
                (FieldOperator::Creation, Spin::Down) => {
                    if string_down & bit != 0 {
                        f64::from(channel_phase * parity_below(string_down, orb))
                            * source_solver.coefficient(
                                string_up,
                                string_down & !bit,
                                source_vector,
                            )
                    } else {
                        0.0
                    }
                }
                (FieldOperator::Annihilation, Spin::Up) => {
                    if string_up & bit == 0 {
                        f64::from(parity_below(string_up, orb))
                            * source_solver.coefficient(
                                string_up | bit,
                                string_down,
                                source_vector,
                            )
                    } else {
                        0.0
                    }
                }
                (FieldOperator::Annihilation, Spin::Down) => {
                    if string_down & bit == 0 {
                        f64::from(channel_phase * parity_below(string_down, orb))
                            * source_solver.coefficient(
                                string_up,
                                string_down | bit,
                                source_vector,
                            )
                    } else {
                        0.0
                    }
                }
            };
        });
    }

    /// The electron-addition Green's-function matrix
    ///
    /// ```text
    /// GF[i, j] = <0| a_{left[i],spin} [alpha + beta H + i eta]^{-1}
    ///               a^+_{right[j],spin} |0>
    /// ```
    ///
    /// over orbital lists, with optional 2-RDM extraction from the solution
    /// and source vectors of each right orbital. Entries whose orbital
    /// irreps differ, and right orbitals for which no electron can be added,
    /// stay zero.
    ///
    /// # Errors
    ///
    /// Errors when an orbital list is empty, when `eta` vanishes, or when an
    /// auxiliary engine cannot be built.
    #[allow(clippy::too_many_arguments)]
    pub fn gf_matrix_addition<S>(
        &self,
        alpha: f64,
        beta: f64,
        eta: f64,
        orbs_left: &[usize],
        orbs_right: &[usize],
        spin: Spin,
        gs_vector: ArrayView1<f64>,
        source: &S,
        request: RdmRequest,
    ) -> Result<GfMatrix, anyhow::Error>
    where
        S: IntegralSource,
    {
        self.gf_matrix(
            FieldOperator::Creation,
            alpha,
            beta,
            eta,
            orbs_left,
            orbs_right,
            spin,
            gs_vector,
            source,
            request,
        )
    }

    /// The electron-removal Green's-function matrix
    ///
    /// ```text
    /// GF[i, j] = <0| a^+_{left[i],spin} [alpha + beta H + i eta]^{-1}
    ///               a_{right[j],spin} |0>
    /// ```
    ///
    /// over orbital lists; the removal counterpart of
    /// [`Self::gf_matrix_addition`].
    ///
    /// # Errors
    ///
    /// Errors when an orbital list is empty, when `eta` vanishes, or when an
    /// auxiliary engine cannot be built.
    #[allow(clippy::too_many_arguments)]
    pub fn gf_matrix_removal<S>(
        &self,
        alpha: f64,
        beta: f64,
        eta: f64,
        orbs_left: &[usize],
        orbs_right: &[usize],
        spin: Spin,
        gs_vector: ArrayView1<f64>,
        source: &S,
        request: RdmRequest,
    ) -> Result<GfMatrix, anyhow::Error>
    where
        S: IntegralSource,
    {
        self.gf_matrix(
            FieldOperator::Annihilation,
            alpha,
            beta,
            eta,
            orbs_left,
            orbs_right,
            spin,
            gs_vector,
            source,
            request,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn gf_matrix<S>(
        &self,
        operator: FieldOperator,
        alpha: f64,
        beta: f64,
        eta: f64,
        orbs_left: &[usize],
        orbs_right: &[usize],
        spin: Spin,
        gs_vector: ArrayView1<f64>,
        source: &S,
        request: RdmRequest,
    ) -> Result<GfMatrix, anyhow::Error>
    where
        S: IntegralSource,
    {
        ensure!(
            !orbs_left.is_empty() && !orbs_right.is_empty(),
            "The Green's-function orbital lists must not be empty."
        );
        let l = self.n_orbitals();
        assert!(orbs_left.iter().chain(orbs_right).all(|&orb| orb < l));
        assert_eq!(gs_vector.len(), self.vec_length(0));

        let mut values = Array2::zeros((orbs_left.len(), orbs_right.len()));
        let mut rdms = vec![GfRdms::default(); orbs_right.len()];

        // The sector shift of the elementary operator.
        let sector_allowed = match (operator, spin) {
            (FieldOperator::Creation, Spin::Up) => self.nel_up() < l,
            (FieldOperator::Creation, Spin::Down) => self.nel_down() < l,
            (FieldOperator::Annihilation, Spin::Up) => self.nel_up() > 0,
            (FieldOperator::Annihilation, Spin::Down) => self.nel_down() > 0,
        };

        for (col, &orb_right) in orbs_right.iter().enumerate() {
            let matching_irrep = orbs_left
                .iter()
                .any(|&orb_left| self.orbital_irrep(orb_left) == self.orbital_irrep(orb_right));
            if !(sector_allowed && matching_irrep) {
                continue;
            }

            let delta = |count: usize, shifted: bool| match operator {
                FieldOperator::Creation => count + usize::from(shifted),
                FieldOperator::Annihilation => count - usize::from(shifted),
            };
            let aux_nel_up = delta(self.nel_up(), spin == Spin::Up);
            let aux_nel_down = delta(self.nel_down(), spin == Spin::Down);
            let aux_irrep = self
                .irrep_table()
                .product(self.target_irrep(), self.orbital_irrep(orb_right));
            let aux = FciSolver::new(
                source,
                aux_nel_up,
                aux_nel_down,
                aux_irrep,
                self.max_work_mb(),
            )?;
            let aux_length = aux.vec_length(0);

            // |source> = a^(+)_{right,spin} |0> in the auxiliary sector.
            let mut operator_vector = Array1::zeros(aux_length);
            aux.act_with_second_quantized_operator(
                operator,
                spin,
                orb_right,
                operator_vector.view_mut(),
                self,
                gs_vector,
            );

            let mut real_solution = Array1::zeros(aux_length);
            let mut imag_solution = Array1::zeros(aux_length);
            aux.cg_solve_system(
                alpha,
                beta,
                eta,
                operator_vector.view(),
                real_solution.view_mut(),
                imag_solution.view_mut(),
            )?;

            let extract = |vector: ArrayView1<f64>| {
                let mut rdm = Array4::zeros((l, l, l, l));
                aux.fill_2rdm(vector, &mut rdm);
                rdm
            };
            if request.real {
                rdms[col].real = Some(extract(real_solution.view()));
            }
            if request.imag {
                rdms[col].imag = Some(extract(imag_solution.view()));
            }
            if request.source {
                rdms[col].source = Some(extract(operator_vector.view()));
            }

            for (row, &orb_left) in orbs_left.iter().enumerate() {
                if self.orbital_irrep(orb_left) != self.orbital_irrep(orb_right) {
                    continue;
                }
                aux.act_with_second_quantized_operator(
                    operator,
                    spin,
                    orb_left,
                    operator_vector.view_mut(),
                    self,
                    gs_vector,
                );
                values[[row, col]] = Complex64::new(
                    operator_vector.dot(&real_solution),
                    operator_vector.dot(&imag_solution),
                );
            }
        }

        Ok(GfMatrix { values, rdms })
    }

    /// The addition amplitude of the retarded one-particle Green's function,
    /// `<0| a_{alpha,spin} [omega - H + E_0 + i eta]^{-1} a^+_{beta,spin} |0>`.
    ///
    /// # Errors
    ///
    /// Errors when `eta` vanishes or an auxiliary engine cannot be built.
    #[allow(clippy::too_many_arguments)]
    pub fn retarded_gf_addition<S>(
        &self,
        omega: f64,
        eta: f64,
        orb_alpha: usize,
        orb_beta: usize,
        spin: Spin,
        gs_energy: f64,
        gs_vector: ArrayView1<f64>,
        source: &S,
    ) -> Result<Complex64, anyhow::Error>
    where
        S: IntegralSource,
    {
        let gf = self.gf_matrix_addition(
            omega + gs_energy,
            -1.0,
            eta,
            &[orb_alpha],
            &[orb_beta],
            spin,
            gs_vector,
            source,
            RdmRequest::default(),
        )?;
        Ok(gf.values[[0, 0]])
    }

    /// The removal amplitude of the retarded one-particle Green's function,
    /// `<0| a^+_{beta,spin} [omega + H - E_0 + i eta]^{-1} a_{alpha,spin} |0>`.
    ///
    /// # Errors
    ///
    /// Errors when `eta` vanishes or an auxiliary engine cannot be built.
    #[allow(clippy::too_many_arguments)]
    pub fn retarded_gf_removal<S>(
        &self,
        omega: f64,
        eta: f64,
        orb_alpha: usize,
        orb_beta: usize,
        spin: Spin,
        gs_energy: f64,
        gs_vector: ArrayView1<f64>,
        source: &S,
    ) -> Result<Complex64, anyhow::Error>
    where
        S: IntegralSource,
    {
        let gf = self.gf_matrix_removal(
            omega - gs_energy,
            1.0,
            eta,
            &[orb_beta],
            &[orb_alpha],
            spin,
            gs_vector,
            source,
            RdmRequest::default(),
        )?;
        Ok(gf.values[[0, 0]])
    }

    /// The retarded one-particle Green's function
    ///
    /// ```text
    /// G(omega) = <0| a_{alpha,spin}  [omega - H + E_0 + i eta]^{-1} a^+_{beta,spin} |0>
    ///          + <0| a^+_{beta,spin} [omega + H - E_0 + i eta]^{-1} a_{alpha,spin}  |0>
    /// ```
    ///
    /// # Errors
    ///
    /// Errors when `eta` vanishes or an auxiliary engine cannot be built.
    #[allow(clippy::too_many_arguments)]
    pub fn retarded_gf<S>(
        &self,
        omega: f64,
        eta: f64,
        orb_alpha: usize,
        orb_beta: usize,
        spin: Spin,
        gs_energy: f64,
        gs_vector: ArrayView1<f64>,
        source: &S,
    ) -> Result<Complex64, anyhow::Error>
    where
        S: IntegralSource,
    {
        let value = self.retarded_gf_addition(
            omega, eta, orb_alpha, orb_beta, spin, gs_energy, gs_vector, source,
        )? + self.retarded_gf_removal(
            omega, eta, orb_alpha, orb_beta, spin, gs_energy, gs_vector, source,
        )?;
        log::info!(
            "G(omega = {omega}; eta = {eta}; i = {orb_alpha}; j = {orb_beta}) = {} + I {}; \
             LDOS = {}.",
            value.re,
            value.im,
            -value.im / std::f64::consts::PI
        );
        Ok(value)
    }

    /// The mean-shifted number-operator source vector
    /// `(n_orb - <0|n_orb|0>) |0>` of the density response.
    fn density_source(&self, orb: usize, gs_vector: ArrayView1<f64>) -> Array1<f64> {
        let mut density = Array1::zeros(self.vec_length(0));
        self.act_with_number_operator(orb, gs_vector, density.view_mut());
        let mean = density.dot(&gs_vector);
        density.scaled_add(-mean, &gs_vector);
        density
    }

    /// The forward amplitude of the density-response function,
    /// `<0| dn_alpha [omega - H + E_0 + i eta]^{-1} dn_beta |0>` with
    /// `dn = n - <0|n|0>`, with optional 2-RDM extraction from the solution
    /// and source vectors.
    ///
    /// # Errors
    ///
    /// Errors when `eta` vanishes.
    #[allow(clippy::too_many_arguments)]
    pub fn density_response_gf_forward(
        &self,
        omega: f64,
        eta: f64,
        orb_alpha: usize,
        orb_beta: usize,
        gs_energy: f64,
        gs_vector: ArrayView1<f64>,
        request: RdmRequest,
    ) -> Result<(Complex64, GfRdms), anyhow::Error> {
        self.density_response_amplitude(
            omega + gs_energy,
            -1.0,
            eta,
            orb_beta,
            orb_alpha,
            gs_vector,
            request,
        )
    }

    /// The backward amplitude of the density-response function,
    /// `<0| dn_beta [omega + H - E_0 + i eta]^{-1} dn_alpha |0>`.
    ///
    /// # Errors
    ///
    /// Errors when `eta` vanishes.
    #[allow(clippy::too_many_arguments)]
    pub fn density_response_gf_backward(
        &self,
        omega: f64,
        eta: f64,
        orb_alpha: usize,
        orb_beta: usize,
        gs_energy: f64,
        gs_vector: ArrayView1<f64>,
        request: RdmRequest,
    ) -> Result<(Complex64, GfRdms), anyhow::Error> {
        self.density_response_amplitude(
            omega - gs_energy,
            1.0,
            eta,
            orb_alpha,
            orb_beta,
            gs_vector,
            request,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn density_response_amplitude(
        &self,
        alpha: f64,
        beta: f64,
        eta: f64,
        orb_solve: usize,
        orb_project: usize,
        gs_vector: ArrayView1<f64>,
        request: RdmRequest,
    ) -> Result<(Complex64, GfRdms), anyhow::Error> {
        assert!(orb_solve < self.n_orbitals() && orb_project < self.n_orbitals());
        assert_eq!(gs_vector.len(), self.vec_length(0));

        let solve_source = self.density_source(orb_solve, gs_vector);
        let project_source = if orb_project == orb_solve {
            None
        } else {
            Some(self.density_source(orb_project, gs_vector))
        };

        let mut real_solution = Array1::zeros(self.vec_length(0));
        let mut imag_solution = Array1::zeros(self.vec_length(0));
        self.cg_solve_system(
            alpha,
            beta,
            eta,
            solve_source.view(),
            real_solution.view_mut(),
            imag_solution.view_mut(),
        )?;

        let l = self.n_orbitals();
        let mut rdms = GfRdms::default();
        let extract = |vector: ArrayView1<f64>| {
            let mut rdm = Array4::zeros((l, l, l, l));
            self.fill_2rdm(vector, &mut rdm);
            rdm
        };
        if request.real {
            rdms.real = Some(extract(real_solution.view()));
        }
        if request.imag {
            rdms.imag = Some(extract(imag_solution.view()));
        }
        if request.source {
            rdms.source = Some(extract(solve_source.view()));
        }

        let projector = project_source.as_ref().unwrap_or(&solve_source);
        let value = Complex64::new(
            projector.dot(&real_solution),
            projector.dot(&imag_solution),
        );
        Ok((value, rdms))
    }

    /// The density-response function
    ///
    /// ```text
    /// X(omega) = <0| dn_alpha [omega - H + E_0 + i eta]^{-1} dn_beta  |0>
    ///          - <0| dn_beta  [omega + H - E_0 + i eta]^{-1} dn_alpha |0>
    /// ```
    ///
    /// with `dn = n - <0|n|0>`.
    ///
    /// # Errors
    ///
    /// Errors when `eta` vanishes.
    pub fn density_response_gf(
        &self,
        omega: f64,
        eta: f64,
        orb_alpha: usize,
        orb_beta: usize,
        gs_energy: f64,
        gs_vector: ArrayView1<f64>,
    ) -> Result<Complex64, anyhow::Error> {
        let (forward, _) = self.density_response_gf_forward(
            omega,
            eta,
            orb_alpha,
            orb_beta,
            gs_energy,
            gs_vector,
            RdmRequest::default(),
        )?;
        let (backward, _) = self.density_response_gf_backward(
            omega,
            eta,
            orb_alpha,
            orb_beta,
            gs_energy,
            gs_vector,
            RdmRequest::default(),
        )?;
        let value = forward - backward;
        log::info!(
            "X(omega = {omega}; eta = {eta}; i = {orb_alpha}; j = {orb_beta}) = {} + I {}; \
             LDDR = {}.",
            value.re,
            value.im,
            -value.im / std::f64::consts::PI
        );
        Ok(value)
    }
}
