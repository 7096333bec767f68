//! Batch assembly: merge per-molecule samples into one training batch.
//!
//! Every variant merges graphs by disjoint union (via `MolGraph::batch`)
//! and stacks targets along a new leading dimension. Samples are the
//! tuples produced by [`Qm9Dataset::get`](crate::dataset::Qm9Dataset::get);
//! each collate documents the tuple layout it expects and fails with
//! [`Error::SampleShape`] on anything else.
//!
//! The augmenting variants (noise, conformers, node dropping) take paired
//! `[topological graph, geometric graph, ..]` samples, batch both streams,
//! and augment only the geometric one, so a contrastive trainer can feed
//! the unmodified topology and the perturbed geometry to separate models.
//! They clone the sample graphs before touching them, so prefetched graphs
//! survive across epochs. Noise uses the process-global RNG; determinism
//! is the caller's concern.

use candle_core::{Device, Tensor};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::StandardNormal;

use qmol_core::{BondCompleteGraph, MolGraph};

use crate::dataset::DataItem;
use crate::error::{Error, Result};

/// One dataset sample: one entry per configured return kind.
pub type Sample = Vec<DataItem>;

fn require_graph(sample: &Sample, pos: usize) -> Result<MolGraph> {
    sample
        .get(pos)
        .ok_or(Error::SampleShape("a graph entry"))?
        .graph()
        .cloned()
}

fn require_tensor(sample: &Sample, pos: usize) -> Result<Tensor> {
    sample
        .get(pos)
        .ok_or(Error::SampleShape("a tensor entry"))?
        .tensor()
        .cloned()
}

fn stack_targets(samples: &[Sample], pos: usize) -> Result<Tensor> {
    let targets = samples
        .iter()
        .map(|s| require_tensor(s, pos))
        .collect::<Result<Vec<_>>>()?;
    Ok(Tensor::stack(&targets, 0)?)
}

fn batch_graphs(samples: &[Sample], pos: usize) -> Result<MolGraph> {
    if samples.is_empty() {
        return Err(Error::EmptyBatch);
    }
    let graphs = samples
        .iter()
        .map(|s| require_graph(s, pos))
        .collect::<Result<Vec<_>>>()?;
    Ok(MolGraph::batch(&graphs)?)
}

/// Per-node aggregation weights `1/sqrt(graph_size)`, `[total_nodes, 1]`.
fn snorm_nodes(graph: &MolGraph) -> Result<Tensor> {
    let device = graph
        .ndata
        .feat
        .as_ref()
        .map(|t| t.device().clone())
        .unwrap_or(Device::Cpu);
    let mut weights = Vec::with_capacity(graph.num_nodes());
    for &n in graph.batch_num_nodes() {
        let w = 1.0 / (n as f32).sqrt();
        weights.extend(std::iter::repeat(w).take(n));
    }
    let total = weights.len();
    Ok(Tensor::from_vec(weights, (total, 1), &device)?)
}

fn gaussian_like(t: &Tensor, std: f64) -> Result<Tensor> {
    let len = t.elem_count();
    let mut rng = rand::thread_rng();
    let noise: Vec<f32> = (0..len)
        .map(|_| rng.sample::<f32, _>(StandardNormal) * std as f32)
        .collect();
    Ok(Tensor::from_vec(noise, t.dims(), t.device())?)
}

/// Stacked targets from position `pos` when every sample carries one
/// there, `None` when no sample does. A mix is a shape error.
fn optional_targets(samples: &[Sample], pos: usize) -> Result<Option<Tensor>> {
    let with = samples.iter().filter(|s| s.len() > pos).count();
    if with == 0 {
        Ok(None)
    } else if with == samples.len() {
        Ok(Some(stack_targets(samples, pos)?))
    } else {
        Err(Error::SampleShape("targets on every sample or on none"))
    }
}

/// Samples of `[graph, targets]` into one batched graph and stacked targets.
pub fn graph_collate(samples: &[Sample]) -> Result<(MolGraph, Tensor)> {
    let batched = batch_graphs(samples, 0)?;
    let targets = stack_targets(samples, 1)?;
    Ok((batched, targets))
}

/// Samples of `[two-relation graph, targets]`.
pub fn hetero_graph_collate(samples: &[Sample]) -> Result<(BondCompleteGraph, Tensor)> {
    if samples.is_empty() {
        return Err(Error::EmptyBatch);
    }
    let graphs = samples
        .iter()
        .map(|s| {
            s.first()
                .ok_or(Error::SampleShape("a two-relation graph entry"))?
                .hetero()
                .cloned()
        })
        .collect::<Result<Vec<_>>>()?;
    let batched = BondCompleteGraph::batch(&graphs)?;
    let targets = stack_targets(samples, 1)?;
    Ok((batched, targets))
}

/// [`graph_collate`] plus per-node `1/sqrt(n)` aggregation weights.
pub fn s_norm_graph_collate(samples: &[Sample]) -> Result<(MolGraph, Tensor, Tensor)> {
    let (batched, targets) = graph_collate(samples)?;
    let snorm = snorm_nodes(&batched)?;
    Ok((batched, snorm, targets))
}

/// Samples of `[graph-with-distances, targets]`, flattened: endpoint
/// indices offset into a shared node space and concatenated, distances
/// concatenated, no batched graph built.
pub fn pairwise_distance_collate(samples: &[Sample]) -> Result<(Tensor, Tensor, Tensor)> {
    if samples.is_empty() {
        return Err(Error::EmptyBatch);
    }
    let mut src: Vec<u32> = Vec::new();
    let mut dst: Vec<u32> = Vec::new();
    let mut dists: Vec<Tensor> = Vec::new();
    let mut offset = 0u32;
    for sample in samples {
        let g = sample
            .first()
            .ok_or(Error::SampleShape("a graph entry"))?
            .graph()?;
        let dist = g
            .edata
            .dist
            .as_ref()
            .ok_or(Error::SampleShape("a graph carrying edge distances"))?;
        for (a, b) in g.edges().iter() {
            src.push(a + offset);
            dst.push(b + offset);
        }
        dists.push(dist.clone());
        offset += g.num_nodes() as u32;
    }
    let e = src.len();
    let mut flat = src;
    flat.extend_from_slice(&dst);
    let device = dists[0].device().clone();
    let indices = Tensor::from_vec(flat, (2, e), &device)?;
    let dist_refs: Vec<&Tensor> = dists.iter().collect();
    let distances = Tensor::cat(&dist_refs, 0)?;
    let targets = stack_targets(samples, 1)?;
    Ok((indices, distances, targets))
}

/// Samples of `[topological graph, geometric graph]` with an optional
/// trailing target tensor. Both graph streams are batched separately.
pub fn contrastive_collate(
    samples: &[Sample],
) -> Result<(MolGraph, MolGraph, Option<Tensor>)> {
    let g2d = batch_graphs(samples, 0)?;
    let g3d = batch_graphs(samples, 1)?;
    let targets = optional_targets(samples, 2)?;
    Ok((g2d, g3d, targets))
}

/// [`contrastive_collate`] plus aggregation weights for the topological
/// graph.
pub fn s_norm_contrastive_collate(
    samples: &[Sample],
) -> Result<(MolGraph, Tensor, MolGraph, Option<Tensor>)> {
    let (g2d, g3d, targets) = contrastive_collate(samples)?;
    let snorm = snorm_nodes(&g2d)?;
    Ok((g2d, snorm, g3d, targets))
}

/// Gaussian noise added directly to the geometric graph's stored edge
/// distances.
///
/// Samples are `[topological graph, geometric graph]` with an optional
/// trailing target tensor. The geometric output holds `num_noised + 1`
/// replicas merged by disjoint union; replica 0 is the unperturbed batch.
#[derive(Debug, Clone, Copy)]
pub struct NoisedDistancesCollate {
    pub std: f64,
    pub num_noised: usize,
}

impl NoisedDistancesCollate {
    pub fn collate(&self, samples: &[Sample]) -> Result<(MolGraph, MolGraph, Option<Tensor>)> {
        let g2d = batch_graphs(samples, 0)?;
        let base = batch_graphs(samples, 1)?;
        let dist = base
            .edata
            .dist
            .clone()
            .ok_or(Error::SampleShape("a geometric graph carrying edge distances"))?;
        let mut replicas = vec![base.clone()];
        for _ in 0..self.num_noised {
            let mut g = base.clone();
            g.edata.dist = Some((&dist + gaussian_like(&dist, self.std)?)?);
            replicas.push(g);
        }
        let merged = MolGraph::batch(&replicas)?;
        let targets = optional_targets(samples, 2)?;
        Ok((g2d, merged, targets))
    }
}

/// Gaussian noise added to the geometric graph's node positions, with edge
/// distances recomputed from the perturbed endpoints. Replica 0 is
/// unperturbed. Sample layout as in [`NoisedDistancesCollate`].
#[derive(Debug, Clone, Copy)]
pub struct NoisedCoordinatesCollate {
    pub std: f64,
    pub num_noised: usize,
}

impl NoisedCoordinatesCollate {
    pub fn collate(&self, samples: &[Sample]) -> Result<(MolGraph, MolGraph, Option<Tensor>)> {
        let g2d = batch_graphs(samples, 0)?;
        let mut base = batch_graphs(samples, 1)?;
        let pos = base
            .ndata
            .pos
            .clone()
            .ok_or(Error::SampleShape("a geometric graph carrying node positions"))?;
        if base.edata.dist.is_none() {
            base.compute_edge_distances()?;
        }
        let mut replicas = vec![base.clone()];
        for _ in 0..self.num_noised {
            let mut g = base.clone();
            g.ndata.pos = Some((&pos + gaussian_like(&pos, self.std)?)?);
            g.compute_edge_distances()?;
            replicas.push(g);
        }
        let merged = MolGraph::batch(&replicas)?;
        let targets = optional_targets(samples, 2)?;
        Ok((g2d, merged, targets))
    }
}

/// One replica of the batched geometric graph per conformer, node positions
/// replaced by that conformer's coordinates; stored distances are
/// recomputed when the graphs carry them.
///
/// Samples are `[topological graph, geometric graph, conformer-coordinates]`
/// with an optional trailing target tensor; the coordinate rows are
/// `3 * num_conformers` wide.
#[derive(Debug, Clone, Copy)]
pub struct ConformerCollate {
    pub num_conformers: usize,
}

impl ConformerCollate {
    pub fn collate(&self, samples: &[Sample]) -> Result<(MolGraph, MolGraph, Option<Tensor>)> {
        let g2d = batch_graphs(samples, 0)?;
        let base = batch_graphs(samples, 1)?;
        let conf = samples
            .iter()
            .map(|s| require_tensor(s, 2))
            .collect::<Result<Vec<_>>>()?;
        let conf_refs: Vec<&Tensor> = conf.iter().collect();
        let conf = Tensor::cat(&conf_refs, 0)?;
        let width = conf.dims()[1];
        if width % 3 != 0 || width / 3 != self.num_conformers {
            return Err(Error::ConformerWidth(width));
        }
        let mut replicas = Vec::with_capacity(self.num_conformers);
        for c in 0..self.num_conformers {
            let mut g = base.clone();
            g.ndata.pos = Some(conf.narrow(1, 3 * c, 3)?.contiguous()?);
            if g.edata.dist.is_some() {
                g.compute_edge_distances()?;
            }
            replicas.push(g);
        }
        let merged = MolGraph::batch(&replicas)?;
        let targets = optional_targets(samples, 3)?;
        Ok((g2d, merged, targets))
    }
}

fn node_drop_collate(
    samples: &[Sample],
    num_drop: usize,
    drop_geometric: bool,
) -> Result<(MolGraph, MolGraph)> {
    if samples.is_empty() {
        return Err(Error::EmptyBatch);
    }
    let mut rng = rand::thread_rng();
    let mut g2d = Vec::with_capacity(samples.len());
    let mut g3d = Vec::with_capacity(samples.len());
    for sample in samples {
        // Dropping restructures the graph, so it operates on these clones
        // only, never on a prefetched original.
        let mut a = require_graph(sample, 0)?;
        let mut b = require_graph(sample, 1)?;
        let target = if drop_geometric { &mut b } else { &mut a };
        if num_drop > 1 {
            let count = rng.gen_range(0..num_drop).min(target.num_nodes());
            let mut nodes: Vec<u32> = (0..target.num_nodes() as u32).collect();
            nodes.shuffle(&mut rng);
            nodes.truncate(count);
            target.remove_nodes(&nodes)?;
        }
        g2d.push(a);
        g3d.push(b);
    }
    Ok((MolGraph::batch(&g2d)?, MolGraph::batch(&g3d)?))
}

/// Random node dropping on the topological stream of
/// `[topological graph, geometric graph]` samples: per molecule, removes a
/// uniform count in `[0, num_drop)` of uniformly chosen nodes with their
/// incident edges, then batches both streams.
#[derive(Debug, Clone, Copy)]
pub struct NodeDrop2dCollate {
    pub num_drop: usize,
}

impl NodeDrop2dCollate {
    pub fn collate(&self, samples: &[Sample]) -> Result<(MolGraph, MolGraph)> {
        node_drop_collate(samples, self.num_drop, false)
    }
}

/// [`NodeDrop2dCollate`] dropping from the geometric stream instead;
/// surviving edges keep their attribute rows.
#[derive(Debug, Clone, Copy)]
pub struct NodeDrop3dCollate {
    pub num_drop: usize,
}

impl NodeDrop3dCollate {
    pub fn collate(&self, samples: &[Sample]) -> Result<(MolGraph, MolGraph)> {
        node_drop_collate(samples, self.num_drop, true)
    }
}

fn pad_rows(t: &Tensor, to: usize) -> Result<Tensor> {
    let n = t.dims()[0];
    if n == to {
        return Ok(t.clone());
    }
    let mut dims = t.dims().to_vec();
    dims[0] = to - n;
    let zeros = Tensor::zeros(dims, t.dtype(), t.device())?;
    Ok(Tensor::cat(&[t, &zeros], 0)?)
}

fn padding_mask(lengths: &[usize], max_len: usize, device: &Device) -> Result<Tensor> {
    let mut mask = Vec::with_capacity(lengths.len() * max_len);
    for &n in lengths {
        mask.extend(std::iter::repeat(0u8).take(n));
        mask.extend(std::iter::repeat(1u8).take(max_len - n));
    }
    Ok(Tensor::from_vec(mask, (lengths.len(), max_len), device)?)
}

fn pad_stream(samples: &[Sample], pos: usize) -> Result<(Tensor, Vec<usize>)> {
    let rows = samples
        .iter()
        .map(|s| require_tensor(s, pos))
        .collect::<Result<Vec<_>>>()?;
    let lengths: Vec<usize> = rows.iter().map(|t| t.dims()[0]).collect();
    let max_len = lengths.iter().copied().max().unwrap_or(0);
    let padded = rows
        .iter()
        .map(|t| pad_rows(t, max_len))
        .collect::<Result<Vec<_>>>()?;
    let padded_refs: Vec<&Tensor> = padded.iter().collect();
    Ok((Tensor::stack(&padded_refs, 0)?, lengths))
}

/// Samples of `[features, targets]` with variable row counts, right-padded
/// with zero rows to the batch maximum. The mask is `true` (1) at padding
/// positions, shape `[batch, max_len]`.
pub fn padded_collate(samples: &[Sample]) -> Result<(Tensor, Tensor, Tensor)> {
    if samples.is_empty() {
        return Err(Error::EmptyBatch);
    }
    let (padded, lengths) = pad_stream(samples, 0)?;
    let max_len = padded.dims()[1];
    let mask = padding_mask(&lengths, max_len, padded.device())?;
    let targets = stack_targets(samples, 1)?;
    Ok((padded, mask, targets))
}

/// [`padded_collate`] over `[features, positional-encoding, targets]`;
/// both streams are padded identically under one mask.
pub fn padded_collate_positional_encoding(
    samples: &[Sample],
) -> Result<(Tensor, Tensor, Tensor, Tensor)> {
    if samples.is_empty() {
        return Err(Error::EmptyBatch);
    }
    let (feat, lengths) = pad_stream(samples, 0)?;
    let (enc, enc_lengths) = pad_stream(samples, 1)?;
    if lengths != enc_lengths {
        return Err(Error::SampleShape("aligned feature and encoding rows"));
    }
    let max_len = feat.dims()[1];
    let mask = padding_mask(&lengths, max_len, feat.device())?;
    let targets = stack_targets(samples, 2)?;
    Ok((feat, enc, mask, targets))
}

/// Samples of `[graph, distances]`: graphs merged by disjoint union,
/// variable-length distance sequences right-padded under a mask.
pub fn padded_distances_collate(samples: &[Sample]) -> Result<(MolGraph, Tensor, Tensor)> {
    let batched = batch_graphs(samples, 0)?;
    let (padded, lengths) = pad_stream(samples, 1)?;
    let max_len = padded.dims()[1];
    let mask = padding_mask(&lengths, max_len, padded.device())?;
    Ok((batched, padded, mask))
}
