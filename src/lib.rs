//! # QFCI: a symmetry-adapted full configuration interaction engine
//!
//! QFCI represents a many-electron wavefunction as an expansion over Slater
//! determinants classified by Abelian point-group symmetry and electron
//! count, and provides matrix-free application of the electronic Hamiltonian
//! and of single excitation operators to such vectors. On top of this kernel
//! it offers:
//! - a Davidson ground-state eigensolver,
//! - a complex-shifted conjugate-gradient linear solver for frequency-domain
//!   response quantities,
//! - one-, two- and three-particle reduced density matrices,
//! - one-particle addition/removal Green's functions and density-response
//!   functions, and
//! - exact diagonal and Slater--Condon diagnostics for cross-validation.
//!
//! Determinants are occupation bit-patterns (one bit per orbital per spin
//! channel, stored as `u64`), partitioned per irreducible representation
//! into dense blocks. All tables and integral copies are built once at
//! construction from an [`integrals::IntegralSource`] and are immutable for
//! the lifetime of the engine; see [`hamiltonian::FciSolver`].
//!
//! Verbosity is controlled through the [`log`] crate: table statistics and
//! solver iteration traces are emitted at `debug!` level, converged energies
//! and wall-time reports at `info!` level.

pub mod basis;
pub mod greens;
pub mod hamiltonian;
pub mod integrals;
pub mod rdm;
pub mod solvers;
pub mod symmetry;

#[cfg(test)]
pub(crate) mod test_fixtures;
