use approx::assert_abs_diff_eq;
use ndarray::Array1;
use num_complex::Complex64;

use crate::hamiltonian::FciSolver;
use crate::solvers::cg;
use crate::test_fixtures::{hubbard_chain, random_integrals};

#[test]
fn test_cg_rejects_vanishing_imaginary_shift() {
    let solver = FciSolver::new(&hubbard_chain(2, 1.0, 4.0, 0.0), 1, 1, 0, 16.0).unwrap();
    let dimension = solver.vec_length(0);
    let rhs = Array1::ones(dimension);
    let mut real_sol = Array1::zeros(dimension);
    let mut imag_sol = Array1::zeros(dimension);
    assert!(solver
        .cg_solve_system(
            0.5,
            1.0,
            0.0,
            rhs.view(),
            real_sol.view_mut(),
            imag_sol.view_mut()
        )
        .is_err());
}

#[test]
fn test_cg_eigenvector_right_hand_side_reduces_to_scalar_division() {
    // For b an eigenvector of H with eigenvalue lambda, the solution of
    // (alpha + beta H + i eta) x = b is b / (alpha + beta lambda + i eta).
    let core_energy = 0.2;
    let solver =
        FciSolver::new(&hubbard_chain(2, 1.0, 4.0, core_energy), 1, 1, 0, 16.0).unwrap();
    let dimension = solver.vec_length(0);

    let mut ground = Array1::zeros(dimension);
    let energy = solver.gs_davidson(Some(&mut ground)).unwrap();

    let alpha = 0.7;
    let beta = 1.0;
    for eta in [0.05, 1e-3] {
        let mut real_sol = Array1::zeros(dimension);
        let mut imag_sol = Array1::zeros(dimension);
        solver
            .cg_solve_system(
                alpha,
                beta,
                eta,
                ground.view(),
                real_sol.view_mut(),
                imag_sol.view_mut(),
            )
            .unwrap();

        let scale = Complex64::new(1.0, 0.0) / Complex64::new(alpha + beta * energy, eta);
        for index in 0..dimension {
            assert_abs_diff_eq!(real_sol[index], scale.re * ground[index], epsilon = 1e-6);
            assert_abs_diff_eq!(imag_sol[index], scale.im * ground[index], epsilon = 1e-6);
        }
    }
}

#[test]
fn test_cg_solution_satisfies_the_complex_system() {
    // (alpha + beta H) x_r - eta x_i = b and (alpha + beta H) x_i + eta x_r = 0.
    let source = random_integrals(2, &[0, 1, 0, 1], 31, -0.4);
    let solver = FciSolver::new(&source, 2, 1, 1, 16.0).unwrap();
    let dimension = solver.vec_length(0);

    let mut rhs = Array1::zeros(dimension);
    FciSolver::fill_random(rhs.view_mut());
    let (alpha, beta, eta) = (0.3, -1.0, 0.02);

    let mut real_sol = Array1::zeros(dimension);
    let mut imag_sol = Array1::zeros(dimension);
    solver
        .cg_solve_system(
            alpha,
            beta,
            eta,
            rhs.view(),
            real_sol.view_mut(),
            imag_sol.view_mut(),
        )
        .unwrap();

    let alpha_op = alpha + beta * solver.core_energy();
    let mut real_image = Array1::zeros(dimension);
    cg::shifted_apply(&solver, alpha_op, beta, real_sol.view(), real_image.view_mut());
    let mut imag_image = Array1::zeros(dimension);
    cg::shifted_apply(&solver, alpha_op, beta, imag_sol.view(), imag_image.view_mut());

    for index in 0..dimension {
        assert_abs_diff_eq!(
            real_image[index] - eta * imag_sol[index],
            rhs[index],
            epsilon = 1e-6
        );
        assert_abs_diff_eq!(
            imag_image[index] + eta * real_sol[index],
            0.0,
            epsilon = 1e-6
        );
    }
}
