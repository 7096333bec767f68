//! Spectral positional encodings from the molecular bond graph.
//!
//! For each molecule the build step eigendecomposes
//! `L = I - D^{-1/2} (D - A) D^{-1/2}` over the unweighted bond adjacency,
//! keeps the `max_freqs` components with the smallest eigenvalues in
//! ascending order, L2-normalizes each atom's eigenvector row, and pads
//! with NaN when the molecule has fewer atoms than frequencies. NaN is the
//! sentinel consumers mask on; it survives serialization unlike an
//! in-band magic value.
//!
//! The formula is kept exactly as the reference pipeline computes it, so
//! encodings stay numerically comparable with previously trained models.

use nalgebra::{DMatrix, SymmetricEigen};

/// Default number of retained spectral components.
pub const MAX_FREQS: usize = 10;

/// Row-normalization floor, matching the reference implementation.
const NORM_EPS: f64 = 1e-12;

/// Spectral encoding of one molecule, padded to `max_freqs` columns.
#[derive(Debug, Clone)]
pub struct SpectralEncoding {
    /// Eigenvalues, ascending, length `max_freqs`, NaN-padded.
    pub eig_vals: Vec<f32>,
    /// Eigenvector rows, row-major `[n_atoms, max_freqs]`, NaN-padded.
    pub eig_vecs: Vec<f32>,
}

/// Compute the encoding for a molecule given its undirected bonds.
pub fn laplacian_encoding(
    n_atoms: usize,
    bonds: &[(usize, usize)],
    max_freqs: usize,
) -> SpectralEncoding {
    let mut adj = DMatrix::<f64>::zeros(n_atoms, n_atoms);
    for &(a, b) in bonds {
        adj[(a, b)] = 1.0;
        adj[(b, a)] = 1.0;
    }
    let degrees: Vec<f64> = (0..n_atoms).map(|i| adj.row(i).sum()).collect();
    let inv_sqrt: Vec<f64> = degrees
        .iter()
        .map(|&d| if d > 0.0 { d.powf(-0.5) } else { 0.0 })
        .collect();

    let mut l = DMatrix::<f64>::zeros(n_atoms, n_atoms);
    for i in 0..n_atoms {
        for j in 0..n_atoms {
            let lap = if i == j { degrees[i] } else { 0.0 } - adj[(i, j)];
            let scaled = inv_sqrt[i] * lap * inv_sqrt[j];
            l[(i, j)] = if i == j { 1.0 - scaled } else { -scaled };
        }
    }

    let eigen = SymmetricEigen::new(l);
    let mut order: Vec<usize> = (0..n_atoms).collect();
    order.sort_by(|&a, &b| eigen.eigenvalues[a].total_cmp(&eigen.eigenvalues[b]));
    let k = max_freqs.min(n_atoms);
    order.truncate(k);

    let mut eig_vals = vec![f32::NAN; max_freqs];
    for (col, &src) in order.iter().enumerate() {
        eig_vals[col] = eigen.eigenvalues[src] as f32;
    }

    let mut eig_vecs = vec![f32::NAN; n_atoms * max_freqs];
    for row in 0..n_atoms {
        let norm = order
            .iter()
            .map(|&src| eigen.eigenvectors[(row, src)].powi(2))
            .sum::<f64>()
            .sqrt()
            .max(NORM_EPS);
        for (col, &src) in order.iter().enumerate() {
            eig_vecs[row * max_freqs + col] = (eigen.eigenvectors[(row, src)] / norm) as f32;
        }
    }

    SpectralEncoding { eig_vals, eig_vecs }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_atom_spectrum() {
        // Single bond: L = D^{-1/2} A D^{-1/2}, eigenvalues {-1, 1}.
        let enc = laplacian_encoding(2, &[(0, 1)], MAX_FREQS);
        assert!((enc.eig_vals[0] + 1.0).abs() < 1e-5);
        assert!((enc.eig_vals[1] - 1.0).abs() < 1e-5);
        // Remaining frequencies are padded.
        assert!(enc.eig_vals[2..].iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_rows_are_unit_norm() {
        let enc = laplacian_encoding(4, &[(0, 1), (1, 2), (2, 3)], MAX_FREQS);
        for row in 0..4 {
            let norm: f32 = (0..4)
                .map(|c| enc.eig_vecs[row * MAX_FREQS + c].powi(2))
                .sum::<f32>()
                .sqrt();
            assert!((norm - 1.0).abs() < 1e-4, "row {row} norm {norm}");
        }
    }

    #[test]
    fn test_padding_shape() {
        let enc = laplacian_encoding(3, &[(0, 1), (1, 2)], 10);
        assert_eq!(enc.eig_vals.len(), 10);
        assert_eq!(enc.eig_vecs.len(), 30);
        // Columns beyond n_atoms are NaN for every row.
        for row in 0..3 {
            assert!(enc.eig_vecs[row * 10 + 3].is_nan());
        }
    }

    #[test]
    fn test_small_molecule_keeps_all_frequencies() {
        let enc = laplacian_encoding(12, &(0..11).map(|i| (i, i + 1)).collect::<Vec<_>>(), 10);
        assert!(enc.eig_vals.iter().all(|v| v.is_finite()));
        // Ascending order.
        for w in enc.eig_vals.windows(2) {
            assert!(w[0] <= w[1]);
        }
    }
}
