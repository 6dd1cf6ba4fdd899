//! Shared model systems for the unit tests.

use ndarray::{Array1, Array2, Array4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::hamiltonian::FciSolver;
use crate::integrals::DenseIntegrals;
use crate::symmetry::IrrepProductTable;

/// An open Hubbard chain with hopping `t` and on-site repulsion `u`, without
/// point-group symmetry.
pub(crate) fn hubbard_chain(l: usize, t: f64, u: f64, core_energy: f64) -> DenseIntegrals {
    let group = IrrepProductTable::boolean(1).unwrap();
    let mut tmat = Array2::zeros((l, l));
    for site in 0..l.saturating_sub(1) {
        tmat[[site, site + 1]] = -t;
        tmat[[site + 1, site]] = -t;
    }
    let mut vmat = Array4::zeros((l, l, l, l));
    for site in 0..l {
        vmat[[site, site, site, site]] = u;
    }
    DenseIntegrals::builder()
        .group(group)
        .orbital_irreps(vec![0; l])
        .core_energy(core_energy)
        .tmat(tmat)
        .vmat(vmat)
        .build()
        .unwrap()
}

/// Random integrals with the full real-orbital permutation symmetry and the
/// point-group selection rule of the given orbital irreps, deterministic in
/// the seed.
pub(crate) fn random_integrals(
    group_order: usize,
    orbital_irreps: &[usize],
    seed: u64,
    core_energy: f64,
) -> DenseIntegrals {
    let l = orbital_irreps.len();
    let group = IrrepProductTable::boolean(group_order).unwrap();
    let mut rng = StdRng::seed_from_u64(seed);

    let mut tmat = Array2::zeros((l, l));
    for i in 0..l {
        for j in i..l {
            if orbital_irreps[i] == orbital_irreps[j] {
                let value = rng.gen_range(-1.0..1.0);
                tmat[[i, j]] = value;
                tmat[[j, i]] = value;
            }
        }
    }

    // Chemist-notation (ab|cd) over canonical index quadruples, spread over
    // the eight-fold permutation symmetry, then converted to the physicist
    // notation the provider trait speaks.
    let mut chem = Array4::zeros((l, l, l, l));
    for a in 0..l {
        for b in a..l {
            for c in 0..l {
                for d in c..l {
                    if (a, b) > (c, d) {
                        continue;
                    }
                    let allowed = group.product(orbital_irreps[a], orbital_irreps[b])
                        == group.product(orbital_irreps[c], orbital_irreps[d]);
                    let value = if allowed { rng.gen_range(-1.0..1.0) } else { 0.0 };
                    for (p, q) in [(a, b), (b, a)] {
                        for (r, s) in [(c, d), (d, c)] {
                            chem[[p, q, r, s]] = value;
                            chem[[r, s, p, q]] = value;
                        }
                    }
                }
            }
        }
    }
    let vmat = Array4::from_shape_fn((l, l, l, l), |(i, j, k, m)| chem[[i, k, j, m]]);

    DenseIntegrals::builder()
        .group(group)
        .orbital_irreps(orbital_irreps.to_vec())
        .core_energy(core_energy)
        .tmat(tmat)
        .vmat(vmat)
        .build()
        .unwrap()
}

/// The dense Hamiltonian of a sector (without the core energy), built
/// column by column from matrix-vector products on unit basis vectors.
pub(crate) fn dense_hamiltonian(solver: &FciSolver) -> Array2<f64> {
    let dimension = solver.vec_length(0);
    let mut matrix = Array2::zeros((dimension, dimension));
    let mut unit = Array1::zeros(dimension);
    let mut column = Array1::zeros(dimension);
    for col in 0..dimension {
        unit.fill(0.0);
        unit[col] = 1.0;
        solver.ham_times_vec(unit.view(), column.view_mut());
        matrix.column_mut(col).assign(&column);
    }
    matrix
}
