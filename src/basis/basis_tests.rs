use crate::basis::{single_excitation, string_irrep, OccupationBasis};
use crate::symmetry::IrrepProductTable;

/// Reference phase evaluation: explicit left-to-right alternating scan over
/// an occupation bit array, one elementary operator at a time.
fn single_excitation_by_scan(string: u64, crea: usize, anni: usize, l: usize) -> Option<(i32, u64)> {
    let mut bits: Vec<bool> = (0..l).map(|orb| string & (1 << orb) != 0).collect();
    if !bits[anni] {
        return None;
    }
    let mut sign = 1;
    for orb in 0..anni {
        if bits[orb] {
            sign = -sign;
        }
    }
    bits[anni] = false;
    if crea != anni && bits[crea] {
        return None;
    }
    for orb in 0..crea {
        if bits[orb] {
            sign = -sign;
        }
    }
    bits[crea] = true;
    let new = bits
        .iter()
        .enumerate()
        .filter(|&(_, &occ)| occ)
        .fold(0u64, |acc, (orb, _)| acc | (1 << orb));
    Some((sign, new))
}

#[test]
fn test_basis_single_excitation_against_scan() {
    let l = 5;
    for string in 0..(1u64 << l) {
        for crea in 0..l {
            for anni in 0..l {
                assert_eq!(
                    single_excitation(string, crea, anni),
                    single_excitation_by_scan(string, crea, anni, l),
                    "string {string:#b}, crea {crea}, anni {anni}"
                );
            }
        }
    }
}

#[test]
fn test_basis_single_excitation_examples() {
    // E_{2,0} |0b001> = |0b100> with no orbitals in between.
    assert_eq!(single_excitation(0b001, 2, 0), Some((1, 0b100)));
    // E_{2,0} |0b011> = -|0b110>: orbital 1 lies in between and is occupied.
    assert_eq!(single_excitation(0b011, 2, 0), Some((-1, 0b110)));
    // Occupation number operator.
    assert_eq!(single_excitation(0b011, 1, 1), Some((1, 0b011)));
    assert_eq!(single_excitation(0b001, 1, 1), None);
    // Pauli blocking.
    assert_eq!(single_excitation(0b101, 2, 0), None);
    // Annihilating an empty orbital.
    assert_eq!(single_excitation(0b100, 0, 1), None);
}

#[test]
fn test_basis_counter_bijection() {
    let table = IrrepProductTable::boolean(4).unwrap();
    let orbital_irreps = [0usize, 1, 2, 3, 0];
    let n_electrons = 2;
    let basis = OccupationBasis::new(n_electrons, &orbital_irreps, &table).unwrap();

    // Every string with the right electron count maps to exactly one
    // (irrep, counter) pair, and the inverse map recovers it.
    let mut total = 0;
    for string in 0..(1u64 << orbital_irreps.len()) {
        match basis.index_of(string) {
            Some((irrep, counter)) => {
                assert_eq!(string.count_ones() as usize, n_electrons);
                assert_eq!(irrep, string_irrep(string, &orbital_irreps, &table));
                assert_eq!(basis.string(irrep, counter), string);
                total += 1;
            }
            None => assert_ne!(string.count_ones() as usize, n_electrons),
        }
    }
    // C(5, 2) determinants in total.
    assert_eq!(total, 10);
    assert_eq!(basis.counts().iter().sum::<usize>(), 10);
}

#[test]
fn test_basis_excitation_lookup_consistency() {
    let table = IrrepProductTable::boolean(2).unwrap();
    let orbital_irreps = [0usize, 1, 0, 1];
    let l = orbital_irreps.len();
    let basis = OccupationBasis::new(2, &orbital_irreps, &table).unwrap();

    for irrep_new in 0..table.order() {
        for counter_new in 0..basis.count(irrep_new) {
            let string_new = basis.string(irrep_new, counter_new);
            for crea in 0..l {
                for anni in 0..l {
                    let entry = basis.excitation(irrep_new, crea, anni, counter_new);
                    // Forward reconstruction: E_{crea,anni} applied to the
                    // old string must reproduce the new string and sign.
                    match single_excitation(string_new, anni, crea) {
                        Some((sign, string_old)) => {
                            assert_eq!(entry.sign as i32, sign);
                            let (irrep_old, counter_old) = basis.index_of(string_old).unwrap();
                            assert_eq!(entry.irrep as usize, irrep_old);
                            assert_eq!(entry.counter as usize, counter_old);
                            // The lookup irrep matches the irrep product rule.
                            assert_eq!(
                                irrep_old,
                                table.product(
                                    irrep_new,
                                    table.product(orbital_irreps[crea], orbital_irreps[anni])
                                )
                            );
                            assert_eq!(
                                single_excitation(string_old, crea, anni),
                                Some((sign, string_new))
                            );
                        }
                        None => assert_eq!(entry.sign, 0),
                    }
                }
            }
        }
    }
}

#[test]
fn test_basis_rejects_invalid_inputs() {
    let table = IrrepProductTable::boolean(1).unwrap();
    assert!(OccupationBasis::new(3, &[0, 0], &table).is_err());
    assert!(OccupationBasis::new(0, &[], &table).is_err());
}
