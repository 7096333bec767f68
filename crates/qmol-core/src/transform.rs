//! Coordinate transforms applied when materializing 3D graphs.

use crate::Result;
use candle_core::Tensor;

/// A transform over node coordinates `[num_nodes, 3]`.
///
/// The set is closed; coordinate-only message-passing architectures pick
/// one at dataset construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordTransform {
    /// Translate the molecule so its centroid sits at the origin.
    Center,
}

impl CoordTransform {
    /// Apply to a coordinate tensor, returning a new tensor.
    pub fn apply(&self, pos: &Tensor) -> Result<Tensor> {
        match self {
            CoordTransform::Center => {
                let centroid = pos.mean(0)?.unsqueeze(0)?;
                Ok(pos.broadcast_sub(&centroid)?)
            }
        }
    }
}
