//! Determinant occupation strings and their dense per-irrep indexing.
//!
//! A determinant of one spin channel is an occupation bit-pattern over the L
//! spatial orbitals, stored as a `u64` with bit `i` set when orbital `i` is
//! occupied. [`OccupationBasis`] enumerates, for one spin channel, all
//! strings with the channel's electron count, partitions them by irrep, and
//! equips every irrep block with
//! - a bijection between strings and dense per-irrep counters, and
//! - a single-excitation lookup table mapping, for every
//!   (creator, annihilator, new-counter) triple, the originating counter and
//!   irrep together with the fermionic phase.
//!
//! The lookup tables are built once and are read-only thereafter; they drive
//! both directions of the Hamiltonian action, since
//! `E_{ij}|old> = s|new>` if and only if `E_{ji}|new> = s|old>` with the
//! same sign `s`.

use anyhow::{self, ensure};
use rayon::prelude::*;

use crate::symmetry::IrrepProductTable;

#[cfg(test)]
#[path = "basis_tests.rs"]
mod basis_tests;

/// A spin channel label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Spin {
    Up,
    Down,
}

/// Applies the single excitation operator `E_{crea,anni} = a^+_crea a_anni`
/// to an occupation string.
///
/// Returns `None` when the transition is forbidden (annihilator unoccupied,
/// or creator already occupied), otherwise the fermionic sign together with
/// the resulting string. The sign is the parity of the number of occupied
/// orbitals strictly between the two operator indices, following the
/// anticommutation of the elementary operators; for `crea == anni` the
/// operator is the occupation number and the sign is `+1`.
///
/// # Panics
///
/// Panics in debug builds if an orbital index is 64 or larger.
#[inline]
pub fn single_excitation(string: u64, crea: usize, anni: usize) -> Option<(i32, u64)> {
    debug_assert!(crea < 64 && anni < 64);
    if string & (1 << anni) == 0 {
        return None;
    }
    let stripped = string & !(1 << anni);
    if stripped & (1 << crea) != 0 {
        return None;
    }
    let below_crea = (1u64 << crea) - 1;
    let below_anni = (1u64 << anni) - 1;
    let parity = (stripped & (below_crea ^ below_anni)).count_ones();
    let sign = if parity % 2 == 0 { 1 } else { -1 };
    Some((sign, stripped | (1 << crea)))
}

/// The fermionic phase accumulated by an elementary operator `a^+_orb` or
/// `a_orb` anticommuted past the occupied orbitals below `orb` in `string`.
#[inline]
pub fn parity_below(string: u64, orb: usize) -> i32 {
    debug_assert!(orb < 64);
    if (string & ((1u64 << orb) - 1)).count_ones() % 2 == 0 {
        1
    } else {
        -1
    }
}

/// One entry of the single-excitation lookup table: the originating counter
/// and irrep of `E_{crea,anni}|old> = sign|new>`, addressed from the `new`
/// side. A `sign` of zero encodes a forbidden transition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExcitationEntry {
    pub sign: i8,
    pub irrep: u8,
    pub counter: u32,
}

/// The symmetry-blocked determinant basis of one spin channel.
#[derive(Clone, Debug)]
pub struct OccupationBasis {
    n_orbitals: usize,
    n_electrons: usize,
    /// The number of determinants per irrep.
    counts: Vec<usize>,
    /// Per irrep, the occupation string of each counter.
    cnt2str: Vec<Vec<u64>>,
    /// Per occupation string, the unique (irrep, counter) pair, or `None`
    /// when the electron count does not match the channel target.
    str2cnt: Vec<Option<(u8, u32)>>,
    /// Per irrep, the excitation lookup addressed as
    /// `crea + L * (anni + L * counter_new)`.
    lookup: Vec<Vec<ExcitationEntry>>,
}

impl OccupationBasis {
    /// Enumerates the channel basis and builds its lookup tables.
    ///
    /// # Errors
    ///
    /// Errors if the electron count exceeds the orbital count, if the
    /// orbital count does not fit a determinant word, or if an irrep block
    /// is too large for the compact lookup representation.
    pub fn new(
        n_electrons: usize,
        orbital_irreps: &[usize],
        table: &IrrepProductTable,
    ) -> Result<Self, anyhow::Error> {
        let n_orbitals = orbital_irreps.len();
        let n_irreps = table.order();
        ensure!(
            n_orbitals >= 1 && n_orbitals <= 63,
            "The orbital count {n_orbitals} does not fit a determinant word."
        );
        ensure!(
            n_electrons <= n_orbitals,
            "The electron count {n_electrons} exceeds the orbital count {n_orbitals}."
        );
        ensure!(
            n_irreps <= u8::MAX as usize,
            "The irrep count {n_irreps} exceeds the lookup representation."
        );

        // Classify all 2^L strings by electron count and irrep, assigning
        // dense counters to the strings matching the channel target.
        let n_strings = 1usize << n_orbitals;
        let mut counts = vec![0usize; n_irreps];
        let mut cnt2str = vec![Vec::new(); n_irreps];
        let mut str2cnt = vec![None; n_strings];
        for string in 0..n_strings as u64 {
            if string.count_ones() as usize != n_electrons {
                continue;
            }
            let irrep = string_irrep(string, orbital_irreps, table);
            ensure!(
                counts[irrep] < u32::MAX as usize,
                "Irrep block {irrep} is too large for the lookup representation."
            );
            str2cnt[string as usize] = Some((irrep as u8, counts[irrep] as u32));
            cnt2str[irrep].push(string);
            counts[irrep] += 1;
        }

        log::debug!(
            "Channel with {} electrons in {} orbitals: {:?} determinants per irrep.",
            n_electrons,
            n_orbitals,
            counts
        );

        // Quick lookup tables for `sign|new> = E_{crea,anni}|old>`, indexed
        // from the new side: E_{anni,crea} applied to the new string yields
        // the old string with the same sign.
        let lookup = (0..n_irreps)
            .map(|irrep_new| {
                let mut block =
                    vec![ExcitationEntry::default(); n_orbitals * n_orbitals * counts[irrep_new]];
                block
                    .par_chunks_mut(n_orbitals * n_orbitals)
                    .enumerate()
                    .for_each(|(counter_new, chunk)| {
                        let string_new = cnt2str[irrep_new][counter_new];
                        for crea in 0..n_orbitals {
                            for anni in 0..n_orbitals {
                                if let Some((sign, string_old)) =
                                    single_excitation(string_new, anni, crea)
                                {
                                    let (irrep_old, counter_old) = str2cnt[string_old as usize]
                                        .expect("The old string conserves the electron count.");
                                    chunk[crea + n_orbitals * anni] = ExcitationEntry {
                                        sign: sign as i8,
                                        irrep: irrep_old,
                                        counter: counter_old,
                                    };
                                }
                            }
                        }
                    });
                block
            })
            .collect();

        Ok(Self {
            n_orbitals,
            n_electrons,
            counts,
            cnt2str,
            str2cnt,
            lookup,
        })
    }

    pub fn n_orbitals(&self) -> usize {
        self.n_orbitals
    }

    pub fn n_electrons(&self) -> usize {
        self.n_electrons
    }

    /// The number of determinants in an irrep block.
    #[inline]
    pub fn count(&self, irrep: usize) -> usize {
        self.counts[irrep]
    }

    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    /// The occupation string of a (irrep, counter) pair.
    #[inline]
    pub fn string(&self, irrep: usize, counter: usize) -> u64 {
        self.cnt2str[irrep][counter]
    }

    /// The unique (irrep, counter) pair of an occupation string, or `None`
    /// when the electron count does not match the channel target.
    #[inline]
    pub fn index_of(&self, string: u64) -> Option<(usize, usize)> {
        self.str2cnt[string as usize].map(|(irrep, counter)| (irrep as usize, counter as usize))
    }

    /// The lookup entry of `E_{crea,anni}` addressed from the new side.
    #[inline]
    pub fn excitation(
        &self,
        irrep_new: usize,
        crea: usize,
        anni: usize,
        counter_new: usize,
    ) -> ExcitationEntry {
        self.lookup[irrep_new][crea + self.n_orbitals * (anni + self.n_orbitals * counter_new)]
    }
}

/// The irrep of an occupation string: the product over the irreps of its
/// occupied orbitals.
#[inline]
pub fn string_irrep(string: u64, orbital_irreps: &[usize], table: &IrrepProductTable) -> usize {
    orbital_irreps
        .iter()
        .enumerate()
        .filter(|&(orb, _)| string & (1 << orb) != 0)
        .fold(0, |irrep, (_, &orb_irrep)| table.product(irrep, orb_irrep))
}
