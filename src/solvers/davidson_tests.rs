use approx::{assert_abs_diff_eq, assert_relative_eq};
use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array1, Array2, ArrayView1, ArrayViewMut1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::hamiltonian::FciSolver;
use crate::solvers::davidson::{self, DavidsonSettings, DavidsonSettingsBuilder};
use crate::solvers::HamiltonianOperator;
use crate::test_fixtures::hubbard_chain;

/// A dense symmetric matrix exposed through the operator protocol.
struct DenseOperator {
    matrix: Array2<f64>,
}

impl HamiltonianOperator for DenseOperator {
    fn dimension(&self) -> usize {
        self.matrix.nrows()
    }

    fn diagonal(&self, mut diag: ArrayViewMut1<f64>) {
        diag.assign(&self.matrix.diag());
    }

    fn apply(&self, input: ArrayView1<f64>, mut output: ArrayViewMut1<f64>) {
        output.assign(&self.matrix.dot(&input));
    }
}

fn random_symmetric(dimension: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut matrix = Array2::zeros((dimension, dimension));
    for row in 0..dimension {
        for col in row..dimension {
            let value = rng.gen_range(-1.0..1.0);
            matrix[[row, col]] = value;
            matrix[[col, row]] = value;
        }
        // A dominant diagonal keeps the spectrum well separated.
        matrix[[row, row]] += -2.0 * (dimension - row) as f64;
    }
    matrix
}

#[test]
fn test_davidson_against_dense_diagonalisation() {
    for (dimension, seed) in [(6usize, 1u64), (40, 2), (75, 3)] {
        let matrix = random_symmetric(dimension, seed);
        let operator = DenseOperator {
            matrix: matrix.clone(),
        };

        let reference = SymmetricEigen::new(DMatrix::from_fn(dimension, dimension, |i, j| {
            matrix[[i, j]]
        }));
        let lowest = (0..dimension)
            .min_by(|&a, &b| reference.eigenvalues[a].total_cmp(&reference.eigenvalues[b]))
            .unwrap();

        let mut guess = Array1::zeros(dimension);
        FciSolver::fill_random(guess.view_mut());
        let outcome =
            davidson::solve(&operator, guess, &DavidsonSettings::default()).unwrap();
        assert_relative_eq!(
            outcome.eigenvalue,
            reference.eigenvalues[lowest],
            epsilon = 1e-8,
            max_relative = 1e-8
        );

        // The eigenvector matches up to a global sign.
        let overlap: f64 = (0..dimension)
            .map(|index| outcome.eigenvector[index] * reference.eigenvectors[(index, lowest)])
            .sum();
        assert_abs_diff_eq!(overlap.abs(), 1.0, epsilon = 1e-7);
    }
}

#[test]
fn test_davidson_restart_path() {
    // A subspace bound far below the dimension forces deflated restarts.
    let matrix = random_symmetric(60, 4);
    let operator = DenseOperator {
        matrix: matrix.clone(),
    };
    let settings = DavidsonSettingsBuilder::default()
        .max_subspace(8_usize)
        .build()
        .unwrap();
    let mut guess = Array1::zeros(60);
    FciSolver::fill_random(guess.view_mut());
    let outcome = davidson::solve(&operator, guess, &settings).unwrap();

    let reference = SymmetricEigen::new(DMatrix::from_fn(60, 60, |i, j| matrix[[i, j]]));
    let lowest = (0..60)
        .map(|index| reference.eigenvalues[index])
        .fold(f64::MAX, f64::min);
    assert_relative_eq!(outcome.eigenvalue, lowest, epsilon = 1e-8, max_relative = 1e-8);
}

#[test]
fn test_davidson_rejects_degenerate_guesses() {
    let operator = DenseOperator {
        matrix: random_symmetric(5, 6),
    };
    assert!(davidson::solve(&operator, Array1::zeros(5), &DavidsonSettings::default()).is_err());
    assert!(davidson::solve(&operator, Array1::zeros(4), &DavidsonSettings::default()).is_err());
}

#[test]
fn test_gs_davidson_hubbard_dimer_analytic() {
    // One-band Hubbard dimer at half filling: the singlet ground state has
    // E = U/2 - sqrt((U/2)^2 + 4 t^2).
    let hopping = 1.0;
    let repulsion = 4.0;
    let core_energy = 0.3;
    let source = hubbard_chain(2, hopping, repulsion, core_energy);
    let solver = FciSolver::new(&source, 1, 1, 0, 16.0).unwrap();

    let analytic = 0.5 * repulsion
        - (0.25 * repulsion * repulsion + 4.0 * hopping * hopping).sqrt()
        + core_energy;
    let mut ground = Array1::zeros(solver.vec_length(0));
    let energy = solver.gs_davidson(Some(&mut ground)).unwrap();
    assert_relative_eq!(energy, analytic, epsilon = 1e-9, max_relative = 1e-9);

    // The returned vector is the normalised eigenvector of the operator.
    let mut image = Array1::zeros(solver.vec_length(0));
    solver.ham_times_vec(ground.view(), image.view_mut());
    let eigenvalue = energy - core_energy;
    for index in 0..solver.vec_length(0) {
        assert_abs_diff_eq!(image[index], eigenvalue * ground[index], epsilon = 1e-7);
    }
    assert_abs_diff_eq!(ground.dot(&ground), 1.0, epsilon = 1e-9);
}
