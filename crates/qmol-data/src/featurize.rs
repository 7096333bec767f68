//! Atom and bond featurization.
//!
//! Every feature is categorical and encoded as an index into a fixed-size
//! vocabulary, so models can embed each column separately. The per-column
//! vocabulary sizes double as the padding vector for virtual edges: the
//! padding index is one past the largest valid category, signalling
//! "no bond" without colliding with any real value.
//!
//! The feature set is intentionally closed; richer chemistry (chirality,
//! hybridization) belongs to the upstream featurizer, not this pipeline.

use crate::smiles::{BondOrder, Element, Molecule};

/// Number of categorical atom feature columns.
pub const NUM_ATOM_FEATURES: usize = 6;

/// Number of categorical bond feature columns.
pub const NUM_BOND_FEATURES: usize = 2;

/// Vocabulary size per atom feature column:
/// element, degree, formal charge (+2 shift), attached hydrogens,
/// aromatic flag, in-ring flag.
pub const ATOM_FEATURE_DIMS: [i64; NUM_ATOM_FEATURES] =
    [Element::VOCAB_SIZE as i64, 7, 5, 9, 2, 2];

/// Vocabulary size per bond feature column: bond type, in-ring flag.
pub const BOND_FEATURE_DIMS: [i64; NUM_BOND_FEATURES] = [BondOrder::VOCAB_SIZE as i64, 2];

/// The "no bond" feature vector used for virtual complete-graph edges.
pub fn bond_padding() -> [i64; NUM_BOND_FEATURES] {
    BOND_FEATURE_DIMS
}

/// Per-atom feature vectors for a hydrogen-expanded molecule.
pub fn atom_features(mol: &Molecule) -> Vec<[i64; NUM_ATOM_FEATURES]> {
    let degrees = mol.degrees();
    let (atom_in_ring, _) = mol.ring_flags();
    mol.atoms
        .iter()
        .enumerate()
        .map(|(i, atom)| {
            [
                atom.element.vocab_index(),
                i64::from(degrees[i]).min(ATOM_FEATURE_DIMS[1] - 1),
                i64::from((atom.charge + 2).clamp(0, 4)),
                i64::from(atom.num_h).min(ATOM_FEATURE_DIMS[3] - 1),
                i64::from(atom.aromatic),
                i64::from(atom_in_ring[i]),
            ]
        })
        .collect()
}

/// Per-bond feature vectors, aligned with `mol.bonds` (undirected; the
/// store emits each bond in both directions with the same feature).
pub fn bond_features(mol: &Molecule) -> Vec<[i64; NUM_BOND_FEATURES]> {
    let (_, bond_in_ring) = mol.ring_flags();
    mol.bonds
        .iter()
        .enumerate()
        .map(|(i, bond)| [bond.order.type_index(), i64::from(bond_in_ring[i])])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding_is_one_past_every_category() {
        let pad = bond_padding();
        for (col, &dim) in BOND_FEATURE_DIMS.iter().enumerate() {
            assert_eq!(pad[col], dim);
        }
    }

    #[test]
    fn test_water_features() {
        let mol = Molecule::parse("O").unwrap().with_explicit_hydrogens();
        let feats = atom_features(&mol);
        assert_eq!(feats.len(), 3);
        // Oxygen: element O, degree 2, neutral, 2 attached H, not aromatic, no ring.
        assert_eq!(feats[0], [4, 2, 2, 2, 0, 0]);
        // Hydrogen: degree 1, no attached H of its own.
        assert_eq!(feats[1][0], 0);
        assert_eq!(feats[1][1], 1);
    }

    #[test]
    fn test_aromatic_ring_bonds() {
        let mol = Molecule::parse("c1ccccc1").unwrap();
        let bonds = bond_features(&mol);
        assert_eq!(bonds.len(), 6);
        for b in bonds {
            assert_eq!(b[0], 3); // aromatic bond type
            assert_eq!(b[1], 1); // in ring
        }
    }

    #[test]
    fn test_acyclic_bonds_not_in_ring() {
        let mol = Molecule::parse("C=O").unwrap();
        let bonds = bond_features(&mol);
        assert_eq!(bonds[0], [1, 0]);
    }
}
