//! Radial basis expansion of interatomic distances.
//!
//! Expands scalar distances into a smooth fixed-width embedding using the
//! zeroth-order spherical Bessel basis:
//!
//! ```text
//! f_n(d) = sqrt(2 / c) * sin(n * pi * d / c) / d,   n = 1..=num_radial
//! ```
//!
//! where `c` is the cutoff radius. Distance-aware message passing layers
//! consume this instead of the raw scalar.

use crate::Result;
use candle_core::Tensor;
use std::f32::consts::PI;

/// Default cutoff radius in Angstrom.
pub const DEFAULT_CUTOFF: f32 = 5.0;

/// Expand distances `[num_edges, 1]` into `[num_edges, num_radial]`.
///
/// Distances of exactly zero would divide by zero; molecular graphs exclude
/// self-loops so every distance is positive.
pub fn bessel_expansion(dist: &Tensor, num_radial: usize, cutoff: f32) -> Result<Tensor> {
    let freqs: Vec<f32> = (1..=num_radial)
        .map(|n| n as f32 * PI / cutoff)
        .collect();
    let freqs = Tensor::from_vec(freqs, (1, num_radial), dist.device())?;
    let scale = (2.0 / cutoff).sqrt() as f64;
    let out = dist
        .broadcast_mul(&freqs)?
        .sin()?
        .broadcast_div(dist)?
        .affine(scale, 0.0)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_expansion_shape() {
        let dev = Device::Cpu;
        let d = Tensor::from_vec(vec![1.0f32, 2.5, 4.0], (3, 1), &dev).unwrap();
        let emb = bessel_expansion(&d, 6, DEFAULT_CUTOFF).unwrap();
        assert_eq!(emb.dims(), &[3, 6]);
    }

    #[test]
    fn test_first_basis_value() {
        let dev = Device::Cpu;
        let d = Tensor::from_vec(vec![1.0f32], (1, 1), &dev).unwrap();
        let emb = bessel_expansion(&d, 1, 5.0).unwrap();
        let got = emb.to_vec2::<f32>().unwrap()[0][0];
        let want = (2.0f32 / 5.0).sqrt() * (PI / 5.0).sin() / 1.0;
        assert!((got - want).abs() < 1e-6);
    }

    #[test]
    fn test_vanishes_at_cutoff() {
        let dev = Device::Cpu;
        let d = Tensor::from_vec(vec![5.0f32], (1, 1), &dev).unwrap();
        let emb = bessel_expansion(&d, 4, 5.0).unwrap();
        for v in emb.to_vec2::<f32>().unwrap()[0].iter() {
            assert!(v.abs() < 1e-5);
        }
    }
}
