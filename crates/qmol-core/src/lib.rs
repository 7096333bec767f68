#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::uninlined_format_args)]

//! Tensor-backed molecular graph types.
//!
//! This crate provides the graph values the qmol data pipeline hands to
//! models:
//!
//! - [`MolGraph`] - a directed graph in COO format with optional tensor
//!   attributes on nodes (features, coordinates, spectral encodings) and
//!   edges (features, distances, radial embeddings, real-bond flags)
//! - [`BondCompleteGraph`] - two fixed edge relations (`bond`, `complete`)
//!   over one node set
//! - [`MolGraph::batch`] / [`BondCompleteGraph::batch`] - disjoint-union
//!   batching that offsets index spaces and concatenates attributes
//! - [`CoordTransform`] - coordinate transforms for 3D-only graphs
//! - [`rbf`] - Bessel radial basis expansion of edge distances
//!
//! Graphs are transient values built fresh per access; batches are built
//! fresh per training step. Tensors are refcounted, so `Clone` is cheap
//! and structural mutation (e.g. [`MolGraph::remove_nodes`]) never writes
//! through shared storage.
//!
//! # Example
//!
//! ```rust
//! use qmol_core::{EdgeStore, MolGraph};
//!
//! let a = MolGraph::new(3, EdgeStore::from_pairs(vec![0, 1], vec![1, 0])).unwrap();
//! let b = MolGraph::new(4, EdgeStore::from_pairs(vec![2, 3], vec![3, 2])).unwrap();
//!
//! let batched = MolGraph::batch(&[a, b]).unwrap();
//! assert_eq!(batched.num_nodes(), 7);
//! assert_eq!(batched.batch_num_nodes(), &[3, 4]);
//! ```

mod error;
mod graph;
mod hetero;
pub mod rbf;
mod transform;

pub use error::{Error, Result};
pub use graph::{EdgeData, EdgeStore, MolGraph, NodeData};
pub use hetero::BondCompleteGraph;
pub use transform::CoordTransform;

// Re-export the tensor backend so downstream crates agree on versions.
pub use candle_core::{DType, Device, Tensor};
