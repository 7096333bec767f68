//! Directed molecular graphs in COO format.
//!
//! A [`MolGraph`] is a fixed node set plus one edge relation stored as
//! parallel source/destination index vectors, with optional tensor
//! attributes on nodes and edges. Graphs are transient values: builders
//! always hand out fresh owned graphs, and batching produces a new graph
//! rather than mutating its inputs. Tensor attributes are refcounted by
//! the backend, so cloning a graph is cheap and never aliases mutable
//! state.
//!
//! # Example
//!
//! ```rust
//! use qmol_core::{EdgeStore, MolGraph};
//!
//! // A triangle, both directions per bond.
//! let edges = EdgeStore::from_pairs(
//!     vec![0, 1, 1, 2, 2, 0],
//!     vec![1, 0, 2, 1, 0, 2],
//! );
//! let g = MolGraph::new(3, edges).unwrap();
//! assert_eq!(g.num_nodes(), 3);
//! assert_eq!(g.num_edges(), 6);
//! ```

use crate::{Error, Result};
use candle_core::{Device, Tensor, D};

/// Edge storage in COO format: parallel source/destination index vectors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeStore {
    /// Source node indices.
    pub src: Vec<u32>,
    /// Destination node indices.
    pub dst: Vec<u32>,
}

impl EdgeStore {
    /// Create an empty edge store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from parallel index vectors.
    pub fn from_pairs(src: Vec<u32>, dst: Vec<u32>) -> Self {
        debug_assert_eq!(src.len(), dst.len());
        Self { src, dst }
    }

    /// Number of edges.
    pub fn num_edges(&self) -> usize {
        self.src.len()
    }

    /// Iterate over (src, dst) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.src.iter().copied().zip(self.dst.iter().copied())
    }
}

/// Per-node tensor attributes. All present tensors are row-aligned with the
/// node index space.
#[derive(Debug, Clone, Default)]
pub struct NodeData {
    /// Categorical feature vectors, `[num_nodes, A]`.
    pub feat: Option<Tensor>,
    /// 3D coordinates, `[num_nodes, 3]`.
    pub pos: Option<Tensor>,
    /// Spectral positional encoding, `[num_nodes, K, 2]`.
    pub pos_enc: Option<Tensor>,
}

/// Per-edge tensor attributes, row-aligned with the edge index space.
#[derive(Debug, Clone, Default)]
pub struct EdgeData {
    /// Bond feature vectors, `[num_edges, B]`.
    pub feat: Option<Tensor>,
    /// Euclidean distances between endpoints, `[num_edges, 1]`.
    pub dist: Option<Tensor>,
    /// Radial-basis expansion of the distances, `[num_edges, R]`.
    pub rbf: Option<Tensor>,
    /// 1 where the edge corresponds to a chemical bond, 0 for virtual edges.
    pub real: Option<Tensor>,
}

/// A directed graph over one molecule (or a disjoint union of molecules).
#[derive(Debug, Clone)]
pub struct MolGraph {
    num_nodes: usize,
    edges: EdgeStore,
    /// Node attributes.
    pub ndata: NodeData,
    /// Edge attributes.
    pub edata: EdgeData,
    /// Node counts of the graphs merged into this one. Singleton for an
    /// unbatched graph; flattened when batches are batched again.
    batch_num_nodes: Vec<usize>,
    /// Edge counts, aligned with `batch_num_nodes`.
    batch_num_edges: Vec<usize>,
}

/// Build a U32 index tensor from a slice.
pub(crate) fn index_tensor(indices: &[u32], device: &Device) -> Result<Tensor> {
    Ok(Tensor::from_vec(indices.to_vec(), indices.len(), device)?)
}

/// Concatenate an optional attribute across graphs. Present-on-some raises
/// [`Error::AttributeMismatch`]; absent everywhere stays absent.
fn cat_optional(name: &'static str, items: &[Option<&Tensor>]) -> Result<Option<Tensor>> {
    let present: Vec<&Tensor> = items.iter().copied().flatten().collect();
    if present.is_empty() {
        return Ok(None);
    }
    if present.len() != items.len() {
        return Err(Error::AttributeMismatch(name));
    }
    Ok(Some(Tensor::cat(&present, 0)?))
}

impl MolGraph {
    /// Create a graph with no attributes. Edge endpoints are validated
    /// against the node count.
    pub fn new(num_nodes: usize, edges: EdgeStore) -> Result<Self> {
        if edges.src.len() != edges.dst.len() {
            return Err(Error::EdgeLengthMismatch {
                src: edges.src.len(),
                dst: edges.dst.len(),
            });
        }
        for &i in edges.src.iter().chain(edges.dst.iter()) {
            if i as usize >= num_nodes {
                return Err(Error::NodeOutOfRange {
                    index: i,
                    num_nodes,
                });
            }
        }
        let num_edges = edges.num_edges();
        Ok(Self {
            num_nodes,
            edges,
            ndata: NodeData::default(),
            edata: EdgeData::default(),
            batch_num_nodes: vec![num_nodes],
            batch_num_edges: vec![num_edges],
        })
    }

    /// Number of nodes.
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Number of edges.
    pub fn num_edges(&self) -> usize {
        self.edges.num_edges()
    }

    /// The edge store.
    pub fn edges(&self) -> &EdgeStore {
        &self.edges
    }

    /// Per-source-graph node counts of a batched graph.
    pub fn batch_num_nodes(&self) -> &[usize] {
        &self.batch_num_nodes
    }

    /// Per-source-graph edge counts of a batched graph.
    pub fn batch_num_edges(&self) -> &[usize] {
        &self.batch_num_edges
    }

    /// Number of source graphs merged into this one.
    pub fn batch_size(&self) -> usize {
        self.batch_num_nodes.len()
    }

    /// Recompute `edata.dist` as the Euclidean distance between edge
    /// endpoint positions. Requires `ndata.pos`.
    pub fn compute_edge_distances(&mut self) -> Result<()> {
        let pos = self
            .ndata
            .pos
            .as_ref()
            .ok_or(Error::MissingAttribute("pos"))?;
        let src = index_tensor(&self.edges.src, pos.device())?;
        let dst = index_tensor(&self.edges.dst, pos.device())?;
        let diff = (pos.index_select(&src, 0)? - pos.index_select(&dst, 0)?)?;
        let dist = diff.sqr()?.sum(D::Minus1)?.sqrt()?.unsqueeze(D::Minus1)?;
        self.edata.dist = Some(dist);
        Ok(())
    }

    /// Remove the given nodes, their incident edges, and the matching rows
    /// of every present attribute. Remaining indices are compacted while
    /// preserving order. Duplicate entries in `nodes` are tolerated.
    ///
    /// This restructures the graph in place; callers augmenting shared or
    /// cached graphs must clone first.
    pub fn remove_nodes(&mut self, nodes: &[u32]) -> Result<()> {
        let mut keep = vec![true; self.num_nodes];
        for &n in nodes {
            if n as usize >= self.num_nodes {
                return Err(Error::NodeOutOfRange {
                    index: n,
                    num_nodes: self.num_nodes,
                });
            }
            keep[n as usize] = false;
        }

        // Old index -> new index for kept nodes.
        let mut remap = vec![u32::MAX; self.num_nodes];
        let mut kept_nodes: Vec<u32> = Vec::new();
        for (old, &k) in keep.iter().enumerate() {
            if k {
                remap[old] = kept_nodes.len() as u32;
                kept_nodes.push(old as u32);
            }
        }

        let mut new_src = Vec::with_capacity(self.edges.num_edges());
        let mut new_dst = Vec::with_capacity(self.edges.num_edges());
        let mut kept_edges: Vec<u32> = Vec::new();
        for (e, (s, d)) in self.edges.iter().enumerate() {
            if keep[s as usize] && keep[d as usize] {
                new_src.push(remap[s as usize]);
                new_dst.push(remap[d as usize]);
                kept_edges.push(e as u32);
            }
        }

        let select = |t: &Option<Tensor>, rows: &[u32]| -> Result<Option<Tensor>> {
            match t {
                Some(t) => {
                    let idx = index_tensor(rows, t.device())?;
                    Ok(Some(t.index_select(&idx, 0)?))
                }
                None => Ok(None),
            }
        };
        self.ndata.feat = select(&self.ndata.feat, &kept_nodes)?;
        self.ndata.pos = select(&self.ndata.pos, &kept_nodes)?;
        self.ndata.pos_enc = select(&self.ndata.pos_enc, &kept_nodes)?;
        self.edata.feat = select(&self.edata.feat, &kept_edges)?;
        self.edata.dist = select(&self.edata.dist, &kept_edges)?;
        self.edata.rbf = select(&self.edata.rbf, &kept_edges)?;
        self.edata.real = select(&self.edata.real, &kept_edges)?;

        self.num_nodes = kept_nodes.len();
        self.edges = EdgeStore::from_pairs(new_src, new_dst);
        self.batch_num_nodes = vec![self.num_nodes];
        self.batch_num_edges = vec![self.edges.num_edges()];
        Ok(())
    }

    /// Merge graphs by disjoint union. Node and edge index spaces are
    /// offset so no edge connects nodes from two different source graphs.
    /// Every attribute must be present on all graphs or on none.
    pub fn batch(graphs: &[MolGraph]) -> Result<MolGraph> {
        if graphs.is_empty() {
            return Err(Error::EmptyBatch);
        }

        let total_nodes: usize = graphs.iter().map(|g| g.num_nodes).sum();
        let total_edges: usize = graphs.iter().map(|g| g.num_edges()).sum();
        let mut src = Vec::with_capacity(total_edges);
        let mut dst = Vec::with_capacity(total_edges);
        let mut batch_num_nodes = Vec::new();
        let mut batch_num_edges = Vec::new();
        let mut offset: u32 = 0;
        for g in graphs {
            src.extend(g.edges.src.iter().map(|&s| s + offset));
            dst.extend(g.edges.dst.iter().map(|&d| d + offset));
            batch_num_nodes.extend_from_slice(&g.batch_num_nodes);
            batch_num_edges.extend_from_slice(&g.batch_num_edges);
            offset += g.num_nodes as u32;
        }

        let pick = |f: fn(&MolGraph) -> Option<&Tensor>| -> Vec<Option<&Tensor>> {
            graphs.iter().map(f).collect()
        };
        let ndata = NodeData {
            feat: cat_optional("feat", &pick(|g| g.ndata.feat.as_ref()))?,
            pos: cat_optional("pos", &pick(|g| g.ndata.pos.as_ref()))?,
            pos_enc: cat_optional("pos_enc", &pick(|g| g.ndata.pos_enc.as_ref()))?,
        };
        let edata = EdgeData {
            feat: cat_optional("efeat", &pick(|g| g.edata.feat.as_ref()))?,
            dist: cat_optional("dist", &pick(|g| g.edata.dist.as_ref()))?,
            rbf: cat_optional("rbf", &pick(|g| g.edata.rbf.as_ref()))?,
            real: cat_optional("real", &pick(|g| g.edata.real.as_ref()))?,
        };

        Ok(MolGraph {
            num_nodes: total_nodes,
            edges: EdgeStore::from_pairs(src, dst),
            ndata,
            edata,
            batch_num_nodes,
            batch_num_edges,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn line_graph(n: usize) -> MolGraph {
        // Path graph with bidirectional edges.
        let mut src = Vec::new();
        let mut dst = Vec::new();
        for i in 0..n.saturating_sub(1) {
            src.push(i as u32);
            dst.push(i as u32 + 1);
            src.push(i as u32 + 1);
            dst.push(i as u32);
        }
        MolGraph::new(n, EdgeStore::from_pairs(src, dst)).unwrap()
    }

    #[test]
    fn test_new_validates_endpoints() {
        let edges = EdgeStore::from_pairs(vec![0, 3], vec![1, 0]);
        assert!(matches!(
            MolGraph::new(3, edges),
            Err(Error::NodeOutOfRange { index: 3, .. })
        ));
    }

    #[test]
    fn test_batch_counts() {
        let a = line_graph(3);
        let b = line_graph(4);
        let batched = MolGraph::batch(&[a, b]).unwrap();
        assert_eq!(batched.num_nodes(), 7);
        assert_eq!(batched.num_edges(), 4 + 6);
        assert_eq!(batched.batch_num_nodes(), &[3, 4]);
        assert_eq!(batched.batch_num_edges(), &[4, 6]);
    }

    #[test]
    fn test_batch_no_cross_edges() {
        let a = line_graph(3);
        let b = line_graph(4);
        let batched = MolGraph::batch(&[a, b]).unwrap();
        for (s, d) in batched.edges().iter() {
            let same_side = (s < 3 && d < 3) || (s >= 3 && d >= 3);
            assert!(same_side, "edge ({s}, {d}) crosses source graphs");
        }
    }

    #[test]
    fn test_batch_of_batches_flattens() {
        let inner = MolGraph::batch(&[line_graph(2), line_graph(3)]).unwrap();
        let outer = MolGraph::batch(&[inner.clone(), inner]).unwrap();
        assert_eq!(outer.batch_num_nodes(), &[2, 3, 2, 3]);
        assert_eq!(outer.num_nodes(), 10);
    }

    #[test]
    fn test_batch_attribute_mismatch() {
        let dev = Device::Cpu;
        let mut a = line_graph(2);
        a.ndata.pos = Some(Tensor::zeros((2, 3), DType::F32, &dev).unwrap());
        let b = line_graph(2);
        assert!(matches!(
            MolGraph::batch(&[a, b]),
            Err(Error::AttributeMismatch("pos"))
        ));
    }

    #[test]
    fn test_compute_edge_distances() {
        let dev = Device::Cpu;
        let mut g = line_graph(3);
        g.ndata.pos = Some(
            Tensor::from_vec(
                vec![0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 2.0, 0.0],
                (3, 3),
                &dev,
            )
            .unwrap(),
        );
        g.compute_edge_distances().unwrap();
        let d = g.edata.dist.as_ref().unwrap().to_vec2::<f32>().unwrap();
        // Edges: (0,1), (1,0), (1,2), (2,1).
        assert!((d[0][0] - 1.0).abs() < 1e-6);
        assert!((d[2][0] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_remove_nodes() {
        let dev = Device::Cpu;
        let mut g = line_graph(4);
        g.ndata.pos = Some(
            Tensor::from_vec(
                vec![0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 2.0, 0.0, 0.0, 3.0, 0.0, 0.0],
                (4, 3),
                &dev,
            )
            .unwrap(),
        );
        // Drop node 1: edges (0,1),(1,0),(1,2),(2,1) disappear, (2,3),(3,2) stay.
        g.remove_nodes(&[1]).unwrap();
        assert_eq!(g.num_nodes(), 3);
        assert_eq!(g.num_edges(), 2);
        assert_eq!(g.edges().src, vec![1, 2]);
        assert_eq!(g.edges().dst, vec![2, 1]);
        let pos = g.ndata.pos.as_ref().unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(pos[1][0], 2.0);
    }

    #[test]
    fn test_remove_nodes_tolerates_duplicates() {
        let mut g = line_graph(4);
        g.remove_nodes(&[2, 2]).unwrap();
        assert_eq!(g.num_nodes(), 3);
    }

    #[test]
    fn test_remove_nodes_out_of_range() {
        let mut g = line_graph(3);
        assert!(g.remove_nodes(&[7]).is_err());
    }

    #[test]
    fn test_empty_batch() {
        assert!(matches!(MolGraph::batch(&[]), Err(Error::EmptyBatch)));
    }
}
