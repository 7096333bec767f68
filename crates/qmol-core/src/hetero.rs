//! Heterogeneous molecular graphs.
//!
//! A [`BondCompleteGraph`] carries two fixed edge relations over the same
//! node set: `bond` (real chemical bonds, optionally with bond features)
//! and `complete` (all ordered pairs, unlabeled). The relation set is
//! closed: models that attend beyond explicit bonds read the `complete`
//! relation, bond-aware message passing reads `bond`.

use crate::graph::EdgeStore;
use crate::{Error, Result};
use candle_core::Tensor;

/// Concatenate an attribute that must be present on all graphs or none.
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

/// Two parallel edge relations over one node set.
#[derive(Debug, Clone)]
pub struct BondCompleteGraph {
    num_nodes: usize,
    bond: EdgeStore,
    complete: EdgeStore,
    /// Node feature vectors, `[num_nodes, A]`.
    pub feat: Option<Tensor>,
    /// Node coordinates, `[num_nodes, 3]`.
    pub pos: Option<Tensor>,
    /// Bond feature vectors aligned with the `bond` relation, `[num_bonds, B]`.
    pub bond_feat: Option<Tensor>,
    batch_num_nodes: Vec<usize>,
}

impl BondCompleteGraph {
    /// Create from the two edge relations, validating endpoints.
    pub fn new(num_nodes: usize, bond: EdgeStore, complete: EdgeStore) -> Result<Self> {
        for store in [&bond, &complete] {
            if store.src.len() != store.dst.len() {
                return Err(Error::EdgeLengthMismatch {
                    src: store.src.len(),
                    dst: store.dst.len(),
                });
            }
            for &i in store.src.iter().chain(store.dst.iter()) {
                if i as usize >= num_nodes {
                    return Err(Error::NodeOutOfRange {
                        index: i,
                        num_nodes,
                    });
                }
            }
        }
        Ok(Self {
            num_nodes,
            bond,
            complete,
            feat: None,
            pos: None,
            bond_feat: None,
            batch_num_nodes: vec![num_nodes],
        })
    }

    /// Number of nodes.
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// The `bond` relation.
    pub fn bond_edges(&self) -> &EdgeStore {
        &self.bond
    }

    /// The `complete` relation.
    pub fn complete_edges(&self) -> &EdgeStore {
        &self.complete
    }

    /// Per-source-graph node counts of a batched graph.
    pub fn batch_num_nodes(&self) -> &[usize] {
        &self.batch_num_nodes
    }

    /// Merge graphs by disjoint union, offsetting both relations.
    pub fn batch(graphs: &[BondCompleteGraph]) -> Result<BondCompleteGraph> {
        if graphs.is_empty() {
            return Err(Error::EmptyBatch);
        }

        let mut bond = EdgeStore::new();
        let mut complete = EdgeStore::new();
        let mut batch_num_nodes = Vec::new();
        let mut offset: u32 = 0;
        for g in graphs {
            bond.src.extend(g.bond.src.iter().map(|&s| s + offset));
            bond.dst.extend(g.bond.dst.iter().map(|&d| d + offset));
            complete
                .src
                .extend(g.complete.src.iter().map(|&s| s + offset));
            complete
                .dst
                .extend(g.complete.dst.iter().map(|&d| d + offset));
            batch_num_nodes.extend_from_slice(&g.batch_num_nodes);
            offset += g.num_nodes as u32;
        }

        let feats: Vec<Option<&Tensor>> = graphs.iter().map(|g| g.feat.as_ref()).collect();
        let pos: Vec<Option<&Tensor>> = graphs.iter().map(|g| g.pos.as_ref()).collect();
        let bond_feats: Vec<Option<&Tensor>> =
            graphs.iter().map(|g| g.bond_feat.as_ref()).collect();

        Ok(BondCompleteGraph {
            num_nodes: graphs.iter().map(|g| g.num_nodes).sum(),
            bond,
            complete,
            feat: cat_optional("feat", &feats)?,
            pos: cat_optional("pos", &pos)?,
            bond_feat: cat_optional("bond_feat", &bond_feats)?,
            batch_num_nodes,
        })
    }
}
