//! The matrix-free FCI Hamiltonian engine.
//!
//! [`FciSolver`] owns, for one (electron count, target irrep) sector, the
//! symmetry-blocked determinant bases of both spin channels, the excitation
//! lookup tables, and private copies of the molecular integrals. On top of
//! these it provides the Hamiltonian--vector product without ever
//! materialising the Hamiltonian, the application of single excitation
//! operators, and exact diagonal and Slater--Condon diagnostics.
//!
//! CI vectors are dense arrays addressed by concatenating, for a chosen
//! *center irrep* (the irrep of the operator pairs acting on the vector),
//! all (up-irrep block x compatible down-irrep block) sub-blocks through a
//! prefix-sum jump table; the up counter is the fast index within a block.
//! The plain CI vector of the sector is the center-irrep-0 layout.
//!
//! The matrix-vector product follows the determinant-based formulation of
//! P. J. Knowles and N. C. Handy, Chem. Phys. Lett. 111, 315 (1984): gather
//! all single-excitation amplitudes for the orbital pairs of one center
//! irrep, contract the pair dimension against the restricted two-body
//! integrals with a dense matrix product, and scatter back through the
//! transposed excitation maps.

use std::time::Instant;

use anyhow::{self, ensure};
use ndarray::linalg::{general_mat_mul, general_mat_vec_mul};
use ndarray::{s, Array1, Array2, Array4, ArrayView1, ArrayViewMut1, Zip};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::basis::OccupationBasis;
use crate::integrals::IntegralSource;
use crate::symmetry::IrrepProductTable;


/// The seed of the deterministic pseudo-random CI vector fill.
const RANDOM_FILL_SEED: u64 = 13;

/// A matrix-free FCI Hamiltonian engine for one symmetry sector.
///
/// All tables and integral copies are built at construction and are
/// immutable for the lifetime of the engine; the only state a method call
/// mutates is the caller-supplied CI-vector buffer it writes to. Engines for
/// different sectors of the same molecule (as needed by Green's-function
/// evaluations) are fully independent objects built from the same
/// [`IntegralSource`].
pub struct FciSolver {
    n_orbitals: usize,
    n_irreps: usize,
    nel_up: usize,
    nel_down: usize,
    target_irrep: usize,
    max_work_mb: f64,
    core_energy: f64,
    table: IrrepProductTable,
    orbital_irreps: Vec<usize>,
    /// The folded one-body integrals `G_ij = T_ij - 0.5 sum_k <ik|kj>`.
    gmat: Array2<f64>,
    /// The two-body integrals in chemist notation, `(ij|kl) = <ik|jl>`.
    eri: Array4<f64>,
    up: OccupationBasis,
    down: OccupationBasis,
    /// Per center irrep, the orbital pairs `(i, j)` with `i <= j` whose
    /// irrep product equals the center irrep.
    pairs: Vec<Vec<(usize, usize)>>,
    /// Per center irrep, the cumulative vector-length contributions across
    /// up-irrep blocks (`n_irreps + 1` entries each).
    jumps: Vec<Vec<usize>>,
    /// The number of f64 slots available to each of the two working buffers
    /// of the matrix-vector product, after the memory-budget clamp.
    workspace_size: usize,
}

impl FciSolver {
    /// Builds the engine for one symmetry sector.
    ///
    /// Two-body integrals are consumed in physicist notation and converted
    /// to chemist notation internally; the one-body integrals are folded
    /// into `G_ij = T_ij - 0.5 sum_k <ik|kj>`.
    ///
    /// # Errors
    ///
    /// Errors when an electron count exceeds the orbital count, the target
    /// irrep lies outside the irrep table, the memory budget is not
    /// positive, or the orbital count does not fit a determinant word.
    pub fn new(
        source: &impl IntegralSource,
        nel_up: usize,
        nel_down: usize,
        target_irrep: usize,
        max_work_mb: f64,
    ) -> Result<Self, anyhow::Error> {
        let n_orbitals = source.n_orbitals();
        let table = source.irrep_table().clone();
        let n_irreps = table.order();
        ensure!(
            target_irrep < n_irreps,
            "The target irrep {target_irrep} lies outside the irrep table."
        );
        ensure!(
            max_work_mb > 0.0,
            "The working-memory budget must be positive."
        );
        let orbital_irreps: Vec<usize> = (0..n_orbitals)
            .map(|orb| source.orbital_irrep(orb))
            .collect();
        ensure!(
            orbital_irreps.iter().all(|&irrep| irrep < n_irreps),
            "An orbital irrep lies outside the irrep table."
        );

        let gmat = Array2::from_shape_fn((n_orbitals, n_orbitals), |(i, j)| {
            source.one_body(i, j)
                - 0.5 * (0..n_orbitals).map(|k| source.two_body(i, k, k, j)).sum::<f64>()
        });
        let eri = Array4::from_shape_fn((n_orbitals, n_orbitals, n_orbitals, n_orbitals), |(i, j, k, l)| {
            source.two_body(i, k, j, l)
        });

        let up = OccupationBasis::new(nel_up, &orbital_irreps, &table)?;
        let down = OccupationBasis::new(nel_down, &orbital_irreps, &table)?;

        // Orbital pairs (i <= j) grouped by the irrep of their product.
        let mut pairs = vec![Vec::new(); n_irreps];
        for i in 0..n_orbitals {
            for j in i..n_orbitals {
                pairs[table.product(orbital_irreps[i], orbital_irreps[j])].push((i, j));
            }
        }

        // Jump tables addressing the CI vector per center irrep.
        let jumps: Vec<Vec<usize>> = (0..n_irreps)
            .map(|center| {
                let local_target = table.product(center, target_irrep);
                let mut cumulative = vec![0usize; n_irreps + 1];
                for irrep_up in 0..n_irreps {
                    let irrep_down = table.product(irrep_up, local_target);
                    cumulative[irrep_up + 1] = cumulative[irrep_up]
                        + up.count(irrep_up) * down.count(irrep_down);
                }
                cumulative
            })
            .collect();

        // The natural workspace holds all (pair, vector-index) combinations
        // of the worst center irrep; the memory budget caps it, forcing the
        // matrix-vector product into chunked passes instead of failing.
        let natural = (0..n_irreps)
            .map(|center| pairs[center].len() * jumps[center][n_irreps])
            .max()
            .unwrap_or(0);
        let budget = ((max_work_mb * 1e6) / (2.0 * std::mem::size_of::<f64>() as f64)).ceil() as usize;
        let workspace_size = if natural > budget {
            log::debug!(
                "Matrix-vector workspace of {:.3} MB constrained to {:.3} MB.",
                1e-6 * (2 * std::mem::size_of::<f64>() * natural) as f64,
                1e-6 * (2 * std::mem::size_of::<f64>() * budget) as f64,
            );
            budget.max(1)
        } else {
            natural.max(1)
        };

        let solver = Self {
            n_orbitals,
            n_irreps,
            nel_up,
            nel_down,
            target_irrep,
            max_work_mb,
            core_energy: source.core_energy(),
            table,
            orbital_irreps,
            gmat,
            eri,
            up,
            down,
            pairs,
            jumps,
            workspace_size,
        };
        log::info!(
            "Number of variables in the FCI vector: {}",
            solver.vec_length(0)
        );
        Ok(solver)
    }

    pub fn n_orbitals(&self) -> usize {
        self.n_orbitals
    }

    pub fn n_irreps(&self) -> usize {
        self.n_irreps
    }

    pub fn nel_up(&self) -> usize {
        self.nel_up
    }

    pub fn nel_down(&self) -> usize {
        self.nel_down
    }

    pub fn target_irrep(&self) -> usize {
        self.target_irrep
    }

    pub fn core_energy(&self) -> f64 {
        self.core_energy
    }

    pub fn max_work_mb(&self) -> f64 {
        self.max_work_mb
    }

    pub fn irrep_table(&self) -> &IrrepProductTable {
        &self.table
    }

    pub fn orbital_irrep(&self, orb: usize) -> usize {
        self.orbital_irreps[orb]
    }

    /// The folded one-body integral `G_ij`.
    #[inline]
    pub fn gmat(&self, orb_i: usize, orb_j: usize) -> f64 {
        self.gmat[[orb_i, orb_j]]
    }

    /// The two-body integral `(ij|kl)` in chemist notation.
    #[inline]
    pub fn eri(&self, orb_i: usize, orb_j: usize, orb_k: usize, orb_l: usize) -> f64 {
        self.eri[[orb_i, orb_j, orb_k, orb_l]]
    }

    /// The CI vector length for a center irrep. The plain CI vector of the
    /// sector has center irrep 0.
    pub fn vec_length(&self, center: usize) -> usize {
        self.jumps[center][self.n_irreps]
    }

    /// Splits a vector index of the given center-irrep layout into its
    /// (up irrep, up counter, down counter) block coordinates.
    #[inline]
    fn decompose(&self, center: usize, counter: usize) -> (usize, usize, usize) {
        let jumps = &self.jumps[center];
        let irrep_up = jumps.partition_point(|&jump| jump <= counter) - 1;
        let offset = counter - jumps[irrep_up];
        let n_up = self.up.count(irrep_up);
        (irrep_up, offset % n_up, offset / n_up)
    }

    /// The occupation strings of both spin channels at a vector index of the
    /// given center-irrep layout.
    pub fn strings_of_counter(&self, center: usize, counter: usize) -> (u64, u64) {
        let (irrep_up, cnt_up, cnt_down) = self.decompose(center, counter);
        let local_target = self.table.product(center, self.target_irrep);
        let irrep_down = self.table.product(irrep_up, local_target);
        (
            self.up.string(irrep_up, cnt_up),
            self.down.string(irrep_down, cnt_down),
        )
    }

    /// The CI coefficient of an explicit occupation pattern, or zero when
    /// the pattern does not belong to this sector.
    ///
    /// # Panics
    ///
    /// Panics if a string addresses orbitals beyond the orbital count, or if
    /// `vector` does not have the sector's vector length.
    pub fn coefficient(
        &self,
        string_up: u64,
        string_down: u64,
        vector: ArrayView1<f64>,
    ) -> f64 {
        assert!(string_up < (1 << self.n_orbitals) && string_down < (1 << self.n_orbitals));
        assert_eq!(vector.len(), self.vec_length(0));
        let Some((irrep_up, cnt_up)) = self.up.index_of(string_up) else {
            return 0.0;
        };
        let Some((irrep_down, cnt_down)) = self.down.index_of(string_down) else {
            return 0.0;
        };
        if self.table.product(irrep_up, irrep_down) != self.target_irrep {
            return 0.0;
        }
        vector[self.jumps[0][irrep_up] + cnt_up + self.up.count(irrep_up) * cnt_down]
    }

    /// Fills a CI vector with deterministic pseudo-random values in
    /// `[-1, 1]`.
    pub fn fill_random(mut vector: ArrayViewMut1<f64>) {
        let mut rng = StdRng::seed_from_u64(RANDOM_FILL_SEED);
        let dist = Uniform::new_inclusive(-1.0, 1.0);
        vector.iter_mut().for_each(|value| *value = dist.sample(&mut rng));
    }

    /// One element of the gathered single-excitation amplitude
    /// `(E_{crea<=anni} + (1 - delta) E_{anni>crea}) |input>`, evaluated at
    /// `counter` of the center-irrep layout. `input` is in the plain
    /// (center-irrep-0) layout.
    #[inline]
    fn gather_pair_amplitude(
        &self,
        center: usize,
        crea: usize,
        anni: usize,
        counter: usize,
        input: &ArrayView1<f64>,
    ) -> f64 {
        let (irrep_up, cnt_up, cnt_down) = self.decompose(center, counter);
        let local_target = self.table.product(center, self.target_irrep);
        let irrep_down = self.table.product(irrep_up, local_target);
        let zero_jumps = &self.jumps[0];
        let mut acc = 0.0;

        let entry = self.up.excitation(irrep_up, crea, anni, cnt_up);
        if entry.sign != 0 {
            let irrep_old = entry.irrep as usize;
            acc += entry.sign as f64
                * input[zero_jumps[irrep_old]
                    + entry.counter as usize
                    + self.up.count(irrep_old) * cnt_down];
        }
        let entry = self.down.excitation(irrep_down, crea, anni, cnt_down);
        if entry.sign != 0 {
            acc += entry.sign as f64
                * input[zero_jumps[irrep_up]
                    + cnt_up
                    + self.up.count(irrep_up) * entry.counter as usize];
        }
        if anni > crea {
            let entry = self.up.excitation(irrep_up, anni, crea, cnt_up);
            if entry.sign != 0 {
                let irrep_old = entry.irrep as usize;
                acc += entry.sign as f64
                    * input[zero_jumps[irrep_old]
                        + entry.counter as usize
                        + self.up.count(irrep_old) * cnt_down];
            }
            let entry = self.down.excitation(irrep_down, anni, crea, cnt_down);
            if entry.sign != 0 {
                acc += entry.sign as f64
                    * input[zero_jumps[irrep_up]
                        + cnt_up
                        + self.up.count(irrep_up) * entry.counter as usize];
            }
        }
        acc
    }

    /// Applies the Hamiltonian (without the scalar core energy) to a CI
    /// vector: `output = H input`, matrix-free.
    ///
    /// Results are reproducible up to floating-point summation order across
    /// parallel chunks.
    ///
    /// # Panics
    ///
    /// Panics if either buffer does not have the sector's vector length.
    pub fn ham_times_vec(&self, input: ArrayView1<f64>, mut output: ArrayViewMut1<f64>) {
        let started = Instant::now();
        let vec_length = self.vec_length(0);
        assert_eq!(input.len(), vec_length);
        assert_eq!(output.len(), vec_length);
        output.fill(0.0);

        for center in 0..self.n_irreps {
            let local_length = self.vec_length(center);
            let pairs = &self.pairs[center];
            let n_pairs = pairs.len();
            if n_pairs == 0 || local_length == 0 {
                continue;
            }

            // 0.5 x (i<=j|k<=l), restricted to the pairs of this center.
            let halferi = Array2::from_shape_fn((n_pairs, n_pairs), |(p, q)| {
                let (pi, pj) = pairs[p];
                let (qi, qj) = pairs[q];
                0.5 * self.eri[[pi, pj, qi, qj]]
            });

            let chunk_capacity = (self.workspace_size / n_pairs).max(1);
            let mut start = 0;
            while start < local_length {
                let stop = (start + chunk_capacity).min(local_length);
                let chunk_len = stop - start;

                // work1[p, y] = (E_{i<=j} + (1 - delta) E_{j>i}) |input>.
                let mut work1 = Array2::<f64>::zeros((n_pairs, chunk_len));
                Zip::indexed(&mut work1).par_for_each(|(p, off), value| {
                    let (crea, anni) = pairs[p];
                    *value = self.gather_pair_amplitude(center, crea, anni, start + off, &input);
                });

                // One-body term, confined to the totally symmetric center.
                if center == 0 {
                    let gvec =
                        Array1::from_iter(pairs.iter().map(|&(i, j)| self.gmat[[i, j]]));
                    let mut out_chunk = output.slice_mut(s![start..stop]);
                    general_mat_vec_mul(1.0, &work1.t(), &gvec, 1.0, &mut out_chunk);
                }

                // work2[p, y] = 0.5 (i<=j|k<=l) work1[q, y].
                let mut work2 = Array2::<f64>::zeros((n_pairs, chunk_len));
                general_mat_mul(1.0, &halferi, &work1, 0.0, &mut work2);

                // Scatter through the transposed excitation maps. Each output
                // entry is owned by exactly one parallel iteration: the
                // lookup encodes E_{ij}|old> = s|new> in both directions, so
                // the scatter is a gather over output entries.
                Zip::indexed(output.view_mut()).par_for_each(|x, value| {
                    let (irrep_up_x, cnt_up_x, cnt_down_x) = self.decompose(0, x);
                    let irrep_down_x = self.table.product(irrep_up_x, self.target_irrep);
                    let center_jumps = &self.jumps[center];
                    let mut acc = 0.0;
                    for (p, &(crea, anni)) in pairs.iter().enumerate() {
                        let entry = self.up.excitation(irrep_up_x, crea, anni, cnt_up_x);
                        if entry.sign != 0 {
                            let irrep_y = entry.irrep as usize;
                            let y = center_jumps[irrep_y]
                                + entry.counter as usize
                                + self.up.count(irrep_y) * cnt_down_x;
                            if y >= start && y < stop {
                                acc += entry.sign as f64 * work2[[p, y - start]];
                            }
                        }
                        let entry = self.down.excitation(irrep_down_x, crea, anni, cnt_down_x);
                        if entry.sign != 0 {
                            let y = center_jumps[irrep_up_x]
                                + cnt_up_x
                                + self.up.count(irrep_up_x) * entry.counter as usize;
                            if y >= start && y < stop {
                                acc += entry.sign as f64 * work2[[p, y - start]];
                            }
                        }
                        if anni > crea {
                            let entry = self.up.excitation(irrep_up_x, anni, crea, cnt_up_x);
                            if entry.sign != 0 {
                                let irrep_y = entry.irrep as usize;
                                let y = center_jumps[irrep_y]
                                    + entry.counter as usize
                                    + self.up.count(irrep_y) * cnt_down_x;
                                if y >= start && y < stop {
                                    acc += entry.sign as f64 * work2[[p, y - start]];
                                }
                            }
                            let entry =
                                self.down.excitation(irrep_down_x, anni, crea, cnt_down_x);
                            if entry.sign != 0 {
                                let y = center_jumps[irrep_up_x]
                                    + cnt_up_x
                                    + self.up.count(irrep_up_x) * entry.counter as usize;
                                if y >= start && y < stop {
                                    acc += entry.sign as f64 * work2[[p, y - start]];
                                }
                            }
                        }
                    }
                    *value += acc;
                });

                start = stop;
            }
        }
        log::debug!(
            "HamTimesVec wall time: {:.6} s",
            started.elapsed().as_secs_f64()
        );
    }

    /// Applies the single excitation operator `E_{crea,anni}` (both spin
    /// channels) to a vector of target irrep `source_target_irrep`, writing
    /// the image of target irrep
    /// `source_target_irrep x irrep(crea) x irrep(anni)` into `result`.
    ///
    /// # Panics
    ///
    /// Panics on out-of-range orbital indices or mismatched buffer lengths.
    pub fn apply_excitation(
        &self,
        source: ArrayView1<f64>,
        crea: usize,
        anni: usize,
        source_target_irrep: usize,
        mut result: ArrayViewMut1<f64>,
    ) {
        assert!(crea < self.n_orbitals && anni < self.n_orbitals);
        let pair_irrep = self
            .table
            .product(self.orbital_irreps[crea], self.orbital_irreps[anni]);
        let result_target = self.table.product(pair_irrep, source_target_irrep);
        let source_center = self.table.product(self.target_irrep, source_target_irrep);
        let result_center = self.table.product(self.target_irrep, result_target);
        assert_eq!(source.len(), self.vec_length(source_center));
        assert_eq!(result.len(), self.vec_length(result_center));

        let source_jumps = &self.jumps[source_center];
        for result_irrep_up in 0..self.n_irreps {
            let result_irrep_down = self.table.product(result_irrep_up, result_target);
            let n_up = self.up.count(result_irrep_up);
            let n_down = self.down.count(result_irrep_down);
            if n_up * n_down == 0 {
                continue;
            }
            let base = self.jumps[result_center][result_irrep_up];
            let block = result
                .slice_mut(s![base..base + n_up * n_down])
                .into_shape((n_down, n_up))
                .expect("The block slice is contiguous.");
            Zip::indexed(block).par_for_each(|(cnt_down, cnt_up), value| {
                let mut acc = 0.0;
                let entry = self.up.excitation(result_irrep_up, crea, anni, cnt_up);
                if entry.sign != 0 {
                    let irrep_old = entry.irrep as usize;
                    acc += entry.sign as f64
                        * source[source_jumps[irrep_old]
                            + entry.counter as usize
                            + self.up.count(irrep_old) * cnt_down];
                }
                let entry = self.down.excitation(result_irrep_down, crea, anni, cnt_down);
                if entry.sign != 0 {
                    acc += entry.sign as f64
                        * source[source_jumps[result_irrep_up]
                            + cnt_up
                            + n_up * entry.counter as usize];
                }
                *value = acc;
            });
        }
    }

    /// The diagonal Hamiltonian element of one determinant pair.
    fn diagonal_element(&self, string_up: u64, string_down: u64) -> f64 {
        let occ = |string: u64, orb: usize| ((string >> orb) & 1) as i32;
        let mut result = 0.0;
        for orb1 in 0..self.n_orbitals {
            let up1 = occ(string_up, orb1);
            let down1 = occ(string_down, orb1);
            let n1 = up1 + down1;
            if n1 == 0 {
                continue;
            }
            result += f64::from(n1) * self.gmat[[orb1, orb1]];
            for orb2 in 0..self.n_orbitals {
                let up2 = occ(string_up, orb2);
                let down2 = occ(string_down, orb2);
                let n2 = up2 + down2;
                result += 0.5 * f64::from(n1 * n2) * self.eri[[orb1, orb1, orb2, orb2]];
                result += 0.5
                    * f64::from(n1 - up1 * up2 - down1 * down2)
                    * self.eri[[orb1, orb2, orb2, orb1]];
            }
        }
        result
    }

    /// The exact diagonal of the Hamiltonian (without the core energy), one
    /// determinant at a time.
    ///
    /// # Panics
    ///
    /// Panics if `diag` does not have the sector's vector length.
    pub fn diag_ham(&self, mut diag: ArrayViewMut1<f64>) {
        assert_eq!(diag.len(), self.vec_length(0));
        Zip::indexed(diag.view_mut()).par_for_each(|counter, value| {
            let (string_up, string_down) = self.strings_of_counter(0, counter);
            *value = self.diagonal_element(string_up, string_down);
        });
    }

    /// The index of the determinant with the lowest diagonal energy.
    pub fn lowest_energy_determinant(&self) -> usize {
        let mut energies = Array1::zeros(self.vec_length(0));
        self.diag_ham(energies.view_mut());
        energies
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(index, _)| index)
            .expect("The sector contains at least one determinant.")
    }

    /// The exact diagonal of the squared Hamiltonian, evaluated per
    /// determinant through a Wick's-theorem closed form rather than by
    /// squaring the operator.
    ///
    /// # Panics
    ///
    /// Panics if `output` does not have the sector's vector length.
    pub fn diag_ham_squared(&self, mut output: ArrayViewMut1<f64>) {
        let started = Instant::now();
        assert_eq!(output.len(), self.vec_length(0));
        let l = self.n_orbitals;

        let mut orbs_by_irrep = vec![Vec::new(); self.n_irreps];
        for orb in 0..l {
            orbs_by_irrep[self.orbital_irreps[orb]].push(orb);
        }

        Zip::indexed(output.view_mut()).par_for_each(|counter, out_value| {
            let (string_up, string_down) = self.strings_of_counter(0, counter);
            let occ_up = |orb: usize| ((string_up >> orb) & 1) as i32;
            let occ_down = |orb: usize| ((string_down >> orb) & 1) as i32;

            // Occupation-weighted Coulomb and exchange intermediates:
            // J_ij = (ij|kk)(n_k,up + n_k,down); K^occ and K^bar carry
            // (ik|kj) weighted by n_k and (1 - n_k) per channel.
            let mut jmat = Array2::<f64>::zeros((l, l));
            let mut k_occ_up = Array2::<f64>::zeros((l, l));
            let mut k_occ_down = Array2::<f64>::zeros((l, l));
            let mut k_bar_up = Array2::<f64>::zeros((l, l));
            let mut k_bar_down = Array2::<f64>::zeros((l, l));
            for i in 0..l {
                for j in i..l {
                    if self.orbital_irreps[i] != self.orbital_irreps[j] {
                        continue;
                    }
                    let mut val_j = 0.0;
                    let mut val_k_occ_up = 0.0;
                    let mut val_k_occ_down = 0.0;
                    let mut val_k_bar_up = 0.0;
                    let mut val_k_bar_down = 0.0;
                    for k in 0..l {
                        let exchange = self.eri[[i, k, k, j]];
                        val_j += self.eri[[i, j, k, k]] * f64::from(occ_up(k) + occ_down(k));
                        val_k_occ_up += exchange * f64::from(occ_up(k));
                        val_k_occ_down += exchange * f64::from(occ_down(k));
                        val_k_bar_up += exchange * f64::from(1 - occ_up(k));
                        val_k_bar_down += exchange * f64::from(1 - occ_down(k));
                    }
                    jmat[[i, j]] = val_j;
                    jmat[[j, i]] = val_j;
                    k_occ_up[[i, j]] = val_k_occ_up;
                    k_occ_up[[j, i]] = val_k_occ_up;
                    k_occ_down[[i, j]] = val_k_occ_down;
                    k_occ_down[[j, i]] = val_k_occ_down;
                    k_bar_up[[i, j]] = val_k_bar_up;
                    k_bar_up[[j, i]] = val_k_bar_up;
                    k_bar_down[[i, j]] = val_k_bar_down;
                    k_bar_down[[j, i]] = val_k_bar_down;
                }
            }

            // Fully contracted part: the square of the diagonal expectation.
            let mut diagonal = 0.0;
            for i in 0..l {
                let n_i = occ_up(i) + occ_down(i);
                diagonal += self.gmat[[i, i]] * f64::from(n_i)
                    + 0.5
                        * (jmat[[i, i]] * f64::from(n_i)
                            + k_bar_up[[i, i]] * f64::from(occ_up(i))
                            + k_bar_down[[i, i]] * f64::from(occ_down(i)));
            }
            let mut result = diagonal * diagonal;

            // Singly contracted one-body-like part.
            for p in 0..l {
                for q in 0..l {
                    if self.orbital_irreps[p] != self.orbital_irreps[q] {
                        continue;
                    }
                    let hop_pq =
                        occ_up(p) * (1 - occ_up(q)) + occ_down(p) * (1 - occ_down(q));
                    let g_plus_j_pq = self.gmat[[p, q]] + jmat[[p, q]];
                    let k_cross_pq_up = (k_bar_up[[p, q]] - k_occ_up[[p, q]])
                        * f64::from(occ_up(p) * (1 - occ_up(q)));
                    let k_cross_pq_down = (k_bar_down[[p, q]] - k_occ_down[[p, q]])
                        * f64::from(occ_down(p) * (1 - occ_down(q)));
                    result += g_plus_j_pq
                        * (f64::from(hop_pq) * g_plus_j_pq + k_cross_pq_up + k_cross_pq_down)
                        + 0.25
                            * (k_cross_pq_up * k_cross_pq_up
                                + k_cross_pq_down * k_cross_pq_down);
                }
            }

            // Doubly contracted two-body part:
            //   0.5 (ak|ci)(ak|ci) [n_a(1-n_k)]_up+down [n_c(1-n_i)]_up+down
            // - 0.5 (ak|ci)(ai|ck) [n_a n_c (1-n_i)(1-n_k)] per channel.
            for k in 0..l {
                if occ_up(k) + occ_down(k) == 2 {
                    continue;
                }
                for a in 0..l {
                    let hop_ak_up = occ_up(a) * (1 - occ_up(k));
                    let hop_ak_down = occ_down(a) * (1 - occ_down(k));
                    let hop_ak = hop_ak_up + hop_ak_down;
                    if hop_ak == 0 {
                        continue;
                    }
                    let irrep_ak = self
                        .table
                        .product(self.orbital_irreps[a], self.orbital_irreps[k]);
                    for i in 0..l {
                        if occ_up(i) + occ_down(i) == 2 {
                            continue;
                        }
                        let bar_i_up = 1 - occ_up(i);
                        let bar_i_down = 1 - occ_down(i);
                        let irrep_c = self.table.product(irrep_ak, self.orbital_irreps[i]);
                        for &c in &orbs_by_irrep[irrep_c] {
                            let hop_ic_up = occ_up(c) * bar_i_up;
                            let hop_ic_down = occ_down(c) * bar_i_down;
                            let prefactor1 = (hop_ic_up + hop_ic_down) * hop_ak;
                            let prefactor2 = hop_ak_up * hop_ic_up + hop_ak_down * hop_ic_down;
                            let eri_akci = self.eri[[a, k, c, i]];
                            let eri_aick = self.eri[[a, i, c, k]];
                            result += 0.5
                                * eri_akci
                                * (f64::from(prefactor1) * eri_akci
                                    - f64::from(prefactor2) * eri_aick);
                        }
                    }
                }
            }

            *out_value = result;
        });
        log::debug!(
            "DiagHamSquared wall time: {:.6} s",
            started.elapsed().as_secs_f64()
        );
    }

    /// The expectation value of the total spin squared, `<S^2>`, of a CI
    /// vector, by parallel reduction over determinants.
    ///
    /// # Panics
    ///
    /// Panics if `vector` does not have the sector's vector length.
    pub fn spin_squared(&self, vector: ArrayView1<f64>) -> f64 {
        let vec_length = self.vec_length(0);
        assert_eq!(vector.len(), vec_length);
        let zero_jumps = &self.jumps[0];

        let result: f64 = (0..vec_length)
            .into_par_iter()
            .map(|counter| {
                let (irrep_up, cnt_up, cnt_down) = self.decompose(0, counter);
                let irrep_down = self.table.product(irrep_up, self.target_irrep);
                let weight = vector[counter] * vector[counter];
                let mut acc = 0.0;
                for orbi in 0..self.n_orbitals {
                    // The diagonal lookup entry is the channel occupation.
                    let diff_ii = i32::from(self.up.excitation(irrep_up, orbi, orbi, cnt_up).sign)
                        - i32::from(self.down.excitation(irrep_down, orbi, orbi, cnt_down).sign);
                    acc += 0.75 * f64::from(diff_ii * diff_ii) * weight;

                    for orbj in (orbi + 1)..self.n_orbitals {
                        // Sz Sz cross term.
                        let diff_jj =
                            i32::from(self.up.excitation(irrep_up, orbj, orbj, cnt_up).sign)
                                - i32::from(
                                    self.down.excitation(irrep_down, orbj, orbj, cnt_down).sign,
                                );
                        acc += 0.5 * f64::from(diff_ii * diff_jj) * weight;

                        let irrep_up_flip = self.table.product(
                            irrep_up,
                            self.table
                                .product(self.orbital_irreps[orbi], self.orbital_irreps[orbj]),
                        );

                        // - (a+_i,up a_j,up)(a+_j,down a_i,down)
                        let entry_up = self.up.excitation(irrep_up, orbi, orbj, cnt_up);
                        let entry_down = self.down.excitation(irrep_down, orbj, orbi, cnt_down);
                        let sign_product = i32::from(entry_up.sign) * i32::from(entry_down.sign);
                        if sign_product != 0 {
                            acc -= f64::from(sign_product)
                                * vector[zero_jumps[irrep_up_flip]
                                    + entry_up.counter as usize
                                    + self.up.count(irrep_up_flip) * entry_down.counter as usize]
                                * vector[counter];
                        }

                        // - (a+_j,up a_i,up)(a+_i,down a_j,down)
                        let entry_up = self.up.excitation(irrep_up, orbj, orbi, cnt_up);
                        let entry_down = self.down.excitation(irrep_down, orbi, orbj, cnt_down);
                        let sign_product = i32::from(entry_up.sign) * i32::from(entry_down.sign);
                        if sign_product != 0 {
                            acc -= f64::from(sign_product)
                                * vector[zero_jumps[irrep_up_flip]
                                    + entry_up.counter as usize
                                    + self.up.count(irrep_up_flip) * entry_down.counter as usize]
                                * vector[counter];
                        }
                    }
                }
                acc
            })
            .sum();

        let intended_spin = 0.5 * (self.nel_up as f64 - self.nel_down as f64).abs();
        log::info!(
            "Measured S(S+1) = {result:.12}; intended S(S+1) = {:.12}.",
            intended_spin * (intended_spin + 1.0)
        );
        result
    }

    /// The direct Slater--Condon matrix element `<bra|H|ket>` (without the
    /// core energy) of two explicit determinant pairs, valid for zero, one
    /// or two simultaneous orbital differences per spin channel and zero
    /// otherwise.
    pub fn matrix_element(
        &self,
        bra_up: u64,
        bra_down: u64,
        ket_up: u64,
        ket_down: u64,
    ) -> f64 {
        let l = self.n_orbitals;
        assert!(bra_up < (1 << l) && bra_down < (1 << l) && ket_up < (1 << l) && ket_down < (1 << l));

        // Collect the orbitals created in / annihilated from the ket, per
        // spin channel, bailing out beyond double differences.
        let mut crea_up = [0usize; 2];
        let mut anni_up = [0usize; 2];
        let mut crea_down = [0usize; 2];
        let mut anni_down = [0usize; 2];
        let mut n_crea_up = 0;
        let mut n_anni_up = 0;
        let mut n_crea_down = 0;
        let mut n_anni_down = 0;
        for orb in 0..l {
            let bit = 1u64 << orb;
            if (bra_up ^ ket_up) & bit != 0 {
                if ket_up & bit != 0 {
                    if n_anni_up == 2 {
                        return 0.0;
                    }
                    anni_up[n_anni_up] = orb;
                    n_anni_up += 1;
                } else {
                    if n_crea_up == 2 {
                        return 0.0;
                    }
                    crea_up[n_crea_up] = orb;
                    n_crea_up += 1;
                }
            }
            if (bra_down ^ ket_down) & bit != 0 {
                if ket_down & bit != 0 {
                    if n_anni_down == 2 {
                        return 0.0;
                    }
                    anni_down[n_anni_down] = orb;
                    n_anni_down += 1;
                } else {
                    if n_crea_down == 2 {
                        return 0.0;
                    }
                    crea_down[n_crea_down] = orb;
                    n_crea_down += 1;
                }
            }
        }
        if n_anni_up != n_crea_up || n_anni_down != n_crea_down {
            return 0.0;
        }
        if n_anni_up + n_anni_down > 2 {
            return 0.0;
        }

        let occ = |string: u64, orb: usize| ((string >> orb) & 1) as i32;

        match (n_anni_up, n_anni_down) {
            // |bra> == |ket>.
            (0, 0) => self.diagonal_element(ket_up, ket_down),

            // Single difference in one channel.
            (1, 0) | (0, 1) => {
                let (orbj, orbl, string) = if n_anni_up == 1 {
                    (crea_up[0], anni_up[0], ket_up)
                } else {
                    (crea_down[0], anni_down[0], ket_down)
                };
                let mut result = self.gmat[[orbj, orbl]];
                for orb in 0..l {
                    result += self.eri[[orbj, orb, orb, orbl]]
                        * (0.5 - f64::from(occ(string, orb)))
                        + self.eri[[orb, orb, orbj, orbl]]
                            * f64::from(occ(ket_up, orb) + occ(ket_down, orb));
                }
                result * f64::from(parity_between(string, orbj, orbl))
            }

            // Double difference within one channel; the creator and
            // annihilator lists are filled in increasing orbital order.
            (2, 0) | (0, 2) => {
                let (crea, anni, ket_string, bra_string) = if n_anni_up == 2 {
                    (crea_up, anni_up, ket_up, bra_up)
                } else {
                    (crea_down, anni_down, ket_down, bra_down)
                };
                let result = self.eri[[crea[0], anni[0], crea[1], anni[1]]]
                    - self.eri[[crea[0], anni[1], crea[1], anni[0]]];
                let phase = parity_between(ket_string, anni[0], anni[1])
                    * parity_between(bra_string, crea[0], crea[1]);
                result * f64::from(phase)
            }

            // One difference in each channel.
            (1, 1) => {
                let result = self.eri[[crea_up[0], anni_up[0], crea_down[0], anni_down[0]]];
                let phase = parity_between(ket_up, crea_up[0], anni_up[0])
                    * parity_between(ket_down, crea_down[0], anni_down[0]);
                result * f64::from(phase)
            }

            _ => 0.0,
        }
    }
}

/// The fermionic phase `(-1)^n` with `n` the number of occupied orbitals of
/// `string` strictly between the two orbital indices.
#[inline]
fn parity_between(string: u64, orb_a: usize, orb_b: usize) -> i32 {
    let (lo, hi) = if orb_a <= orb_b {
        (orb_a, orb_b)
    } else {
        (orb_b, orb_a)
    };
    if hi - lo < 2 {
        return 1;
    }
    let mask = ((1u64 << hi) - 1) & !((1u64 << (lo + 1)) - 1);
    if (string & mask).count_ones() % 2 == 0 {
        1
    } else {
        -1
    }
}
