use ndarray::array;

use crate::symmetry::IrrepProductTable;

#[test]
fn test_symmetry_boolean_tables() {
    for order in [1usize, 2, 4, 8] {
        let table = IrrepProductTable::boolean(order).unwrap();
        assert_eq!(table.order(), order);
        for irrep_a in 0..order {
            assert_eq!(table.product(0, irrep_a), irrep_a);
            assert_eq!(table.product(irrep_a, irrep_a), 0);
            for irrep_b in 0..order {
                assert_eq!(table.product(irrep_a, irrep_b), irrep_a ^ irrep_b);
            }
        }
    }
    assert!(IrrepProductTable::boolean(3).is_err());
    assert!(IrrepProductTable::boolean(0).is_err());
}

#[test]
fn test_symmetry_from_table_rejects_invalid_tables() {
    // Not square.
    assert!(IrrepProductTable::from_table(array![[0, 1]]).is_err());

    // Entry out of range.
    assert!(IrrepProductTable::from_table(array![[0, 1], [1, 2]]).is_err());

    // Not commutative.
    assert!(IrrepProductTable::from_table(array![
        [0, 1, 2],
        [2, 0, 1],
        [1, 2, 0]
    ])
    .is_err());

    // Identity not at index 0.
    assert!(IrrepProductTable::from_table(array![[1, 0], [0, 1]]).is_err());

    // Valid C2v-style table.
    let c2v = IrrepProductTable::from_table(array![
        [0, 1, 2, 3],
        [1, 0, 3, 2],
        [2, 3, 0, 1],
        [3, 2, 1, 0]
    ])
    .unwrap();
    assert_eq!(c2v.product(2, 3), 1);
}
