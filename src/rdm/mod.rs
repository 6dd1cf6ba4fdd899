//! Reduced density matrices from chained excitation contractions.
//!
//! The k-particle reduced density matrices of a CI vector are assembled by
//! applying chains of k single excitation operators
//! ([`FciSolver::apply_excitation`]) and inner-producting with the original
//! vector. Only index combinations consistent with irrep-product matching
//! and an index-ordering constraint are contracted explicitly; the remaining
//! tensor entries follow from exact permutation-symmetry relations (4-fold
//! plus transpose for the 2-RDM, 12-fold for the 3-RDM).

use std::time::Instant;

use ndarray::{s, Array1, Array2, Array4, Array6, ArrayView1};

use crate::hamiltonian::FciSolver;


impl FciSolver {
    /// The largest CI vector length over all center irreps, sizing the
    /// excitation-chain workspaces.
    fn max_vec_length(&self) -> usize {
        (0..self.n_irreps())
            .map(|center| self.vec_length(center))
            .max()
            .expect("The irrep table is never empty.")
    }

    /// Fills the spin-summed one-particle reduced density matrix
    /// `Gamma_ij = <E_ij>` of a normalised CI vector.
    ///
    /// # Panics
    ///
    /// Panics if the sector is empty of electrons, or on mismatched shapes.
    pub fn fill_1rdm(&self, vector: ArrayView1<f64>, one_rdm: &mut Array2<f64>) {
        let l = self.n_orbitals();
        assert!(self.nel_up() + self.nel_down() >= 1);
        assert_eq!(vector.len(), self.vec_length(0));
        assert_eq!(one_rdm.shape(), [l, l]);

        one_rdm.fill(0.0);
        let length = self.vec_length(0);
        let mut workspace = Array1::zeros(length);
        for anni in 0..l {
            for crea in anni..l {
                // Only the totally symmetric operator pairs contribute.
                if self.orbital_irrep(crea) != self.orbital_irrep(anni) {
                    continue;
                }
                self.apply_excitation(
                    vector,
                    crea,
                    anni,
                    self.target_irrep(),
                    workspace.view_mut(),
                );
                let value = workspace.dot(&vector);
                one_rdm[[crea, anni]] = value;
                one_rdm[[anni, crea]] = value;
            }
        }
    }

    /// Fills the spin-summed two-particle reduced density matrix
    /// `Gamma_ijkl = <E_ik E_jl> - delta_jk <E_il>` of a normalised CI
    /// vector and returns the total electronic energy recomputed from it, a
    /// built-in cross-check against the eigensolver.
    ///
    /// # Panics
    ///
    /// Panics if the sector holds fewer than two electrons, or on mismatched
    /// shapes.
    pub fn fill_2rdm(&self, vector: ArrayView1<f64>, two_rdm: &mut Array4<f64>) -> f64 {
        let started = Instant::now();
        let l = self.n_orbitals();
        assert!(self.nel_up() + self.nel_down() >= 2);
        assert_eq!(vector.len(), self.vec_length(0));
        assert_eq!(two_rdm.shape(), [l, l, l, l]);

        two_rdm.fill(0.0);
        let length0 = self.vec_length(0);
        let table = self.irrep_table();
        let mut workspace1 = Array1::zeros(self.max_vec_length());
        let mut workspace2 = Array1::zeros(length0);

        for center1 in 0..self.n_irreps() {
            let length1 = self.vec_length(center1);
            let target1 = table.product(self.target_irrep(), center1);

            for anni1 in 0..l {
                for crea1 in anni1..l {
                    if table.product(self.orbital_irrep(crea1), self.orbital_irrep(anni1))
                        != center1
                    {
                        continue;
                    }
                    self.apply_excitation(
                        vector,
                        crea1,
                        anni1,
                        self.target_irrep(),
                        workspace1.slice_mut(s![..length1]),
                    );

                    // - delta_jk <E_il> correction.
                    if center1 == 0 {
                        let value = workspace1.slice(s![..length0]).dot(&vector);
                        for contracted in anni1..l {
                            two_rdm[[crea1, contracted, contracted, anni1]] -= value;
                        }
                    }

                    for crea2 in anni1..l {
                        for anni2 in anni1..l {
                            if table
                                .product(self.orbital_irrep(crea2), self.orbital_irrep(anni2))
                                != center1
                            {
                                continue;
                            }
                            self.apply_excitation(
                                workspace1.slice(s![..length1]),
                                crea2,
                                anni2,
                                target1,
                                workspace2.view_mut(),
                            );
                            let value = workspace2.dot(&vector);
                            two_rdm[[crea2, crea1, anni2, anni1]] += value;
                        }
                    }
                }
            }
        }

        // Four-fold (plus transpose) permutation symmetry.
        for anni1 in 0..l {
            for crea1 in anni1..l {
                let pair1 = table.product(self.orbital_irrep(crea1), self.orbital_irrep(anni1));
                for crea2 in anni1..l {
                    for anni2 in anni1..l {
                        let pair2 =
                            table.product(self.orbital_irrep(crea2), self.orbital_irrep(anni2));
                        if pair1 == pair2 {
                            let value = two_rdm[[crea2, crea1, anni2, anni1]];
                            two_rdm[[crea1, crea2, anni1, anni2]] = value;
                            two_rdm[[anni2, anni1, crea2, crea1]] = value;
                            two_rdm[[anni1, anni2, crea1, crea2]] = value;
                        }
                    }
                }
            }
        }

        // The total electronic energy as a contraction of the 2-RDM with
        // the integrals.
        let nel = (self.nel_up() + self.nel_down()) as f64;
        let mut energy = self.core_energy();
        for orb1 in 0..l {
            for orb2 in 0..l {
                let mut exchange = 0.0;
                let mut contracted = 0.0;
                for orb3 in 0..l {
                    exchange += self.eri(orb1, orb3, orb3, orb2);
                    contracted += two_rdm[[orb1, orb3, orb2, orb3]];
                    for orb4 in 0..l {
                        energy += 0.5
                            * two_rdm[[orb1, orb2, orb3, orb4]]
                            * self.eri(orb1, orb3, orb2, orb4);
                    }
                }
                energy += (self.gmat(orb1, orb2) + 0.5 * exchange) * contracted / (nel - 1.0);
            }
        }

        log::debug!("Fill2RDM wall time: {:.6} s", started.elapsed().as_secs_f64());
        log::info!("Energy recomputed from the 2-RDM: {energy:.12}.");
        energy
    }

    /// Fills the spin-summed three-particle reduced density matrix
    ///
    /// ```text
    /// Gamma_ijk,lmn = <E_il E_jm E_kn>
    ///               - delta_kl <E_jm E_in> - delta_jl <E_im E_kn>
    ///               - delta_km <E_il E_jn>
    ///               + delta_kl delta_im <E_jn> + delta_jl delta_km <E_in>
    /// ```
    ///
    /// of a normalised CI vector, enumerating only irrep-matched and
    /// index-ordered operator chains and completing the tensor through its
    /// 12-fold permutation symmetry.
    ///
    /// # Panics
    ///
    /// Panics if the sector holds fewer than three electrons, or on
    /// mismatched shapes.
    pub fn fill_3rdm(&self, vector: ArrayView1<f64>, three_rdm: &mut Array6<f64>) {
        let started = Instant::now();
        let l = self.n_orbitals();
        assert!(self.nel_up() + self.nel_down() >= 3);
        assert_eq!(vector.len(), self.vec_length(0));
        assert_eq!(three_rdm.shape(), [l, l, l, l, l, l]);

        three_rdm.fill(0.0);
        let length0 = self.vec_length(0);
        let table = self.irrep_table();
        let max_length = self.max_vec_length();
        let mut workspace1 = Array1::zeros(max_length);
        let mut workspace2 = Array1::zeros(max_length);
        let mut workspace3 = Array1::zeros(length0);

        for center1 in 0..self.n_irreps() {
            let length1 = self.vec_length(center1);
            let target1 = table.product(self.target_irrep(), center1);

            for anni1 in 0..l {
                for crea1 in anni1..l {
                    if table.product(self.orbital_irrep(crea1), self.orbital_irrep(anni1))
                        != center1
                    {
                        continue;
                    }
                    self.apply_excitation(
                        vector,
                        crea1,
                        anni1,
                        self.target_irrep(),
                        workspace1.slice_mut(s![..length1]),
                    );

                    // + delta_kl delta_im <E_jn> and + delta_jl delta_km <E_in>.
                    if center1 == 0 {
                        let value = workspace1.slice(s![..length0]).dot(&vector);
                        for orb_m in anni1..l {
                            for orb_l in anni1..l {
                                three_rdm[[orb_m, crea1, orb_l, orb_l, orb_m, anni1]] += value;
                                three_rdm[[crea1, orb_l, orb_m, orb_l, orb_m, anni1]] += value;
                            }
                        }
                    }

                    for center2 in 0..self.n_irreps() {
                        let target2 = table.product(target1, center2);
                        let center3 = table.product(center1, center2);
                        let length2 = self.vec_length(center3);

                        for crea2 in anni1..l {
                            for anni2 in anni1..l {
                                if table.product(
                                    self.orbital_irrep(crea2),
                                    self.orbital_irrep(anni2),
                                ) != center2
                                {
                                    continue;
                                }
                                self.apply_excitation(
                                    workspace1.slice(s![..length1]),
                                    crea2,
                                    anni2,
                                    target1,
                                    workspace2.slice_mut(s![..length2]),
                                );

                                // - delta_kl <E_jm E_in>, - delta_jl <E_im E_kn>
                                // and - delta_km <E_il E_jn>.
                                if center1 == center2 {
                                    let value = workspace2.slice(s![..length0]).dot(&vector);
                                    for orb in anni1..l {
                                        three_rdm[[crea1, crea2, orb, orb, anni2, anni1]] -= value;
                                        three_rdm[[crea2, orb, crea1, orb, anni2, anni1]] -= value;
                                        three_rdm[[crea2, crea1, orb, anni2, orb, anni1]] -= value;
                                    }
                                }

                                for crea3 in crea2..l {
                                    for anni3 in anni1..l {
                                        if table.product(
                                            self.orbital_irrep(crea3),
                                            self.orbital_irrep(anni3),
                                        ) != center3
                                        {
                                            continue;
                                        }
                                        self.apply_excitation(
                                            workspace2.slice(s![..length2]),
                                            crea3,
                                            anni3,
                                            target2,
                                            workspace3.view_mut(),
                                        );
                                        let value = workspace3.dot(&vector);
                                        three_rdm
                                            [[crea3, crea2, crea1, anni3, anni2, anni1]] += value;
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        // Twelve-fold permutation symmetry: simultaneous permutations of the
        // creator and annihilator triples, plus the transpose.
        for anni1 in 0..l {
            for crea1 in anni1..l {
                let prod1 = table.product(self.orbital_irrep(crea1), self.orbital_irrep(anni1));
                for crea2 in anni1..l {
                    let prod2 = table.product(prod1, self.orbital_irrep(crea2));
                    for anni2 in anni1..l {
                        let prod3 = table.product(prod2, self.orbital_irrep(anni2));
                        for crea3 in crea2..l {
                            let prod4 = table.product(prod3, self.orbital_irrep(crea3));
                            for anni3 in anni1..l {
                                if prod4 != self.orbital_irrep(anni3) {
                                    continue;
                                }
                                let value =
                                    three_rdm[[crea3, crea2, crea1, anni3, anni2, anni1]];
                                three_rdm[[crea2, crea3, crea1, anni2, anni3, anni1]] = value;
                                three_rdm[[crea2, crea1, crea3, anni2, anni1, anni3]] = value;
                                three_rdm[[crea3, crea1, crea2, anni3, anni1, anni2]] = value;
                                three_rdm[[crea1, crea3, crea2, anni1, anni3, anni2]] = value;
                                three_rdm[[crea1, crea2, crea3, anni1, anni2, anni3]] = value;
                                three_rdm[[anni3, anni2, anni1, crea3, crea2, crea1]] = value;
                                three_rdm[[anni2, anni3, anni1, crea2, crea3, crea1]] = value;
                                three_rdm[[anni2, anni1, anni3, crea2, crea1, crea3]] = value;
                                three_rdm[[anni3, anni1, anni2, crea3, crea1, crea2]] = value;
                                three_rdm[[anni1, anni3, anni2, crea1, crea3, crea2]] = value;
                                three_rdm[[anni1, anni2, anni3, crea1, crea2, crea3]] = value;
                            }
                        }
                    }
                }
            }
        }

        log::debug!("Fill3RDM wall time: {:.6} s", started.elapsed().as_secs_f64());
    }
}
