//! Dataset facade: per-molecule samples materialized from the flat store.
//!
//! A [`Qm9Dataset`] is configured with the return kinds each sample should
//! carry and the target properties to predict. `get(index)` materializes
//! the requested graph topologies from [`FlatMoleculeStore`] rows and the
//! [`PairwiseIndexCache`], moves tensors to the configured device, and
//! returns one [`DataItem`] per kind in request order.
//!
//! Graphs are built fresh on every access. With prefetching enabled the
//! attribute-free skeletons (node counts plus edge indices) are built once
//! at construction; accesses clone a skeleton and attach attribute tensors,
//! so cached structures are never mutated.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use candle_core::{Device, Tensor};
use rand::Rng;

use qmol_core::rbf;
use qmol_core::{BondCompleteGraph, CoordTransform, EdgeStore, MolGraph};

use crate::error::{Error, Result};
use crate::featurize::{bond_padding, NUM_BOND_FEATURES};
use crate::pairwise::{PairIndices, PairwiseIndexCache};
use crate::spectral::MAX_FREQS;
use crate::store::FlatMoleculeStore;
use crate::targets::{TargetScaler, TargetTask};

/// What a sample tuple entry contains. Closed set; configuration strings
/// that do not match fail at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnKind {
    /// Bonded graph with atom features, coordinates, and bond features.
    MolGraph,
    /// Bonded graph carrying coordinates only.
    MolGraph3d,
    /// All-pairs graph with scattered bond features and edge distances.
    CompleteGraph,
    /// All-pairs graph carrying coordinates and distances only.
    CompleteGraph3d,
    /// Bond and complete relations over one node set.
    MolCompleteGraph,
    /// All-pairs graph with coordinates, spectral node encodings, and
    /// real-edge flags.
    SanGraph,
    /// Atom feature table, `[n_atoms, A]`.
    RawFeatures,
    /// Coordinate table, `[n_atoms, 3]`.
    Coordinates,
    /// External molecule identifier.
    MolId,
    /// Selected target properties, `[n_tasks]`.
    Targets,
    /// Local edge endpoints, `[2, n_edges]`.
    EdgeIndices,
    /// The molecule's SMILES string.
    Smiles,
    /// Atomic numbers, `[n_atoms]`.
    AtomicNumbers,
}

impl ReturnKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ReturnKind::MolGraph => "mol_graph",
            ReturnKind::MolGraph3d => "mol_graph_3d",
            ReturnKind::CompleteGraph => "complete_graph",
            ReturnKind::CompleteGraph3d => "complete_graph_3d",
            ReturnKind::MolCompleteGraph => "mol_complete_graph",
            ReturnKind::SanGraph => "san_graph",
            ReturnKind::RawFeatures => "raw_features",
            ReturnKind::Coordinates => "coordinates",
            ReturnKind::MolId => "mol_id",
            ReturnKind::Targets => "targets",
            ReturnKind::EdgeIndices => "edge_indices",
            ReturnKind::Smiles => "smiles",
            ReturnKind::AtomicNumbers => "atomic_numbers",
        }
    }

    const ALL: [ReturnKind; 13] = [
        ReturnKind::MolGraph,
        ReturnKind::MolGraph3d,
        ReturnKind::CompleteGraph,
        ReturnKind::CompleteGraph3d,
        ReturnKind::MolCompleteGraph,
        ReturnKind::SanGraph,
        ReturnKind::RawFeatures,
        ReturnKind::Coordinates,
        ReturnKind::MolId,
        ReturnKind::Targets,
        ReturnKind::EdgeIndices,
        ReturnKind::Smiles,
        ReturnKind::AtomicNumbers,
    ];
}

impl fmt::Display for ReturnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReturnKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ReturnKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| Error::UnknownReturnKind(s.to_string()))
    }
}

/// One entry of a sample tuple.
#[derive(Debug, Clone)]
pub enum DataItem {
    Graph(MolGraph),
    Hetero(BondCompleteGraph),
    Tensor(Tensor),
    Id(u32),
    Smiles(String),
}

impl DataItem {
    pub fn graph(&self) -> Result<&MolGraph> {
        match self {
            DataItem::Graph(g) => Ok(g),
            _ => Err(Error::SampleShape("a graph entry")),
        }
    }

    pub fn hetero(&self) -> Result<&BondCompleteGraph> {
        match self {
            DataItem::Hetero(g) => Ok(g),
            _ => Err(Error::SampleShape("a two-relation graph entry")),
        }
    }

    pub fn tensor(&self) -> Result<&Tensor> {
        match self {
            DataItem::Tensor(t) => Ok(t),
            _ => Err(Error::SampleShape("a tensor entry")),
        }
    }
}

/// Dataset construction options.
#[derive(Debug, Clone)]
pub struct DatasetConfig {
    pub return_kinds: Vec<ReturnKind>,
    pub tasks: Vec<TargetTask>,
    pub normalize: bool,
    pub device: Device,
    pub prefetch_graphs: bool,
    /// Attach a radial-basis expansion wherever edge distances exist.
    pub dist_embedding: bool,
    pub num_radial: usize,
    pub transform: Option<CoordTransform>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        DatasetConfig {
            return_kinds: vec![ReturnKind::MolGraph, ReturnKind::Targets],
            tasks: TargetTask::default_tasks(),
            normalize: true,
            device: Device::Cpu,
            prefetch_graphs: false,
            dist_embedding: false,
            num_radial: 6,
            transform: None,
        }
    }
}

impl DatasetConfig {
    /// Parse return kinds and task names, failing on any unknown name.
    pub fn from_names(kinds: &[&str], tasks: &[&str]) -> Result<DatasetConfig> {
        let return_kinds = kinds
            .iter()
            .map(|k| k.parse())
            .collect::<Result<Vec<ReturnKind>>>()?;
        let tasks = tasks
            .iter()
            .map(|t| t.parse())
            .collect::<Result<Vec<TargetTask>>>()?;
        Ok(DatasetConfig {
            return_kinds,
            tasks,
            ..DatasetConfig::default()
        })
    }

    pub fn with_return_kinds(mut self, kinds: Vec<ReturnKind>) -> Self {
        self.return_kinds = kinds;
        self
    }

    pub fn with_tasks(mut self, tasks: Vec<TargetTask>) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_prefetch(mut self, prefetch: bool) -> Self {
        self.prefetch_graphs = prefetch;
        self
    }

    pub fn with_dist_embedding(mut self, num_radial: usize) -> Self {
        self.dist_embedding = true;
        self.num_radial = num_radial;
        self
    }

    pub fn with_transform(mut self, transform: CoordTransform) -> Self {
        self.transform = Some(transform);
        self
    }
}

/// Skeletons cached when prefetching is enabled.
#[derive(Debug, Default)]
struct Prefetched {
    bonded: Option<Vec<MolGraph>>,
    complete: Option<Vec<MolGraph>>,
    hetero: Option<Vec<BondCompleteGraph>>,
}

/// QM9 dataset over a flat store.
///
/// Holds a [`PairwiseIndexCache`], which makes the dataset `!Sync`; run one
/// instance per loader worker.
#[derive(Debug)]
pub struct Qm9Dataset {
    store: FlatMoleculeStore,
    config: DatasetConfig,
    /// `[num_molecules, n_tasks]`, column-selected, normalized if enabled.
    labels: Tensor,
    scaler: TargetScaler,
    pairwise: PairwiseIndexCache,
    prefetched: Prefetched,
}

impl Qm9Dataset {
    pub fn new(store: FlatMoleculeStore, config: DatasetConfig) -> Result<Qm9Dataset> {
        let cols: Vec<u32> = config.tasks.iter().map(|t| t.column() as u32).collect();
        let n_cols = cols.len();
        let col_index = Tensor::from_vec(cols, n_cols, &Device::Cpu)?;
        let selected = store.targets.index_select(&col_index, 1)?;
        let (labels, scaler) = if config.normalize {
            let scaler = TargetScaler::fit(config.tasks.clone(), &selected)?;
            (scaler.normalize(&selected)?, scaler)
        } else {
            let scaler = TargetScaler {
                tasks: config.tasks.clone(),
                mean: vec![0.0; n_cols],
                std: vec![1.0; n_cols],
            };
            (selected, scaler)
        };

        let mut dataset = Qm9Dataset {
            store,
            config,
            labels,
            scaler,
            pairwise: PairwiseIndexCache::new(),
            prefetched: Prefetched::default(),
        };
        if dataset.config.prefetch_graphs {
            dataset.prefetch()?;
        }
        Ok(dataset)
    }

    /// Load (or build) the store under `root` and wrap it.
    pub fn open(root: &Path, config: DatasetConfig) -> Result<Qm9Dataset> {
        Qm9Dataset::new(FlatMoleculeStore::open(root)?, config)
    }

    pub fn len(&self) -> usize {
        self.store.num_molecules()
    }

    pub fn is_empty(&self) -> bool {
        self.store.num_molecules() == 0
    }

    pub fn store(&self) -> &FlatMoleculeStore {
        &self.store
    }

    /// Fitted normalization statistics, for de-normalizing predictions.
    pub fn scaler(&self) -> &TargetScaler {
        &self.scaler
    }

    /// Map normalized predictions back to converted units.
    pub fn denormalize(&self, predictions: &Tensor) -> Result<Tensor> {
        self.scaler.denormalize(predictions)
    }

    fn prefetch(&mut self) -> Result<()> {
        let kinds = &self.config.return_kinds;
        let needs_bonded = kinds
            .iter()
            .any(|k| matches!(k, ReturnKind::MolGraph | ReturnKind::MolGraph3d));
        let needs_complete = kinds.iter().any(|k| {
            matches!(
                k,
                ReturnKind::CompleteGraph | ReturnKind::CompleteGraph3d | ReturnKind::SanGraph
            )
        });
        let needs_hetero = kinds.contains(&ReturnKind::MolCompleteGraph);
        log::info!(
            "prefetching graph skeletons for {} molecules (bonded: {needs_bonded}, complete: {needs_complete}, two-relation: {needs_hetero})",
            self.len()
        );
        if needs_bonded {
            let skeletons = (0..self.len())
                .map(|i| self.bonded_skeleton(i))
                .collect::<Result<Vec<_>>>()?;
            self.prefetched.bonded = Some(skeletons);
        }
        if needs_complete {
            let skeletons = (0..self.len())
                .map(|i| self.complete_skeleton(i))
                .collect::<Result<Vec<_>>>()?;
            self.prefetched.complete = Some(skeletons);
        }
        if needs_hetero {
            let skeletons = (0..self.len())
                .map(|i| self.hetero_skeleton(i))
                .collect::<Result<Vec<_>>>()?;
            self.prefetched.hetero = Some(skeletons);
        }
        Ok(())
    }

    /// One sample: one entry per configured return kind, in order.
    pub fn get(&self, index: usize) -> Result<Vec<DataItem>> {
        // Validates the index once up front.
        self.store.slice(index)?;
        self.config
            .return_kinds
            .iter()
            .map(|kind| self.item(index, *kind))
            .collect()
    }

    fn item(&self, index: usize, kind: ReturnKind) -> Result<DataItem> {
        match kind {
            ReturnKind::MolGraph => Ok(DataItem::Graph(self.mol_graph(index)?)),
            ReturnKind::MolGraph3d => Ok(DataItem::Graph(self.mol_graph_3d(index)?)),
            ReturnKind::CompleteGraph => Ok(DataItem::Graph(self.complete_graph(index, true)?)),
            ReturnKind::CompleteGraph3d => {
                Ok(DataItem::Graph(self.complete_graph(index, false)?))
            }
            ReturnKind::MolCompleteGraph => Ok(DataItem::Hetero(self.mol_complete(index)?)),
            ReturnKind::SanGraph => Ok(DataItem::Graph(self.san_graph(index)?)),
            ReturnKind::RawFeatures => {
                Ok(DataItem::Tensor(self.to_dev(self.atom_rows(index)?)?))
            }
            ReturnKind::Coordinates => {
                Ok(DataItem::Tensor(self.to_dev(self.coord_rows(index)?)?))
            }
            ReturnKind::MolId => Ok(DataItem::Id(self.store.mol_ids[index])),
            ReturnKind::Targets => {
                let row = self.labels.narrow(0, index, 1)?.squeeze(0)?;
                Ok(DataItem::Tensor(self.to_dev(row)?))
            }
            ReturnKind::EdgeIndices => {
                let (src, dst) = self.store.local_edges(index)?;
                let e = src.len();
                let mut flat = src;
                flat.extend_from_slice(&dst);
                let t = Tensor::from_vec(flat, (2, e), &Device::Cpu)?;
                Ok(DataItem::Tensor(self.to_dev(t)?))
            }
            ReturnKind::Smiles => Ok(DataItem::Smiles(self.store.smiles[index].clone())),
            ReturnKind::AtomicNumbers => {
                let slice = self.store.slice(index)?;
                let nums = self.store.atomic_numbers[slice.atoms].to_vec();
                let n = nums.len();
                let t = Tensor::from_vec(nums, n, &Device::Cpu)?;
                Ok(DataItem::Tensor(self.to_dev(t)?))
            }
        }
    }

    fn to_dev(&self, t: Tensor) -> Result<Tensor> {
        Ok(t.to_device(&self.config.device)?)
    }

    fn atom_rows(&self, index: usize) -> Result<Tensor> {
        let slice = self.store.slice(index)?;
        Ok(self
            .store
            .atom_features
            .narrow(0, slice.atoms.start, slice.atoms.len())?)
    }

    fn coord_rows(&self, index: usize) -> Result<Tensor> {
        let slice = self.store.slice(index)?;
        let pos = self
            .store
            .coordinates
            .narrow(0, slice.atoms.start, slice.atoms.len())?;
        match &self.config.transform {
            Some(t) => Ok(t.apply(&pos)?),
            None => Ok(pos),
        }
    }

    fn bond_rows(&self, index: usize) -> Result<Tensor> {
        let slice = self.store.slice(index)?;
        Ok(self
            .store
            .edge_features
            .narrow(0, slice.edges.start, slice.edges.len())?)
    }

    fn bonded_skeleton(&self, index: usize) -> Result<MolGraph> {
        let n = self.store.n_atoms[index] as usize;
        let (src, dst) = self.store.local_edges(index)?;
        Ok(MolGraph::new(n, EdgeStore::from_pairs(src, dst))?)
    }

    fn complete_skeleton(&self, index: usize) -> Result<MolGraph> {
        let n = self.store.n_atoms[index] as usize;
        let pairs = self.pairwise.pairs(n);
        Ok(MolGraph::new(
            n,
            EdgeStore::from_pairs(pairs.src.clone(), pairs.dst.clone()),
        )?)
    }

    fn hetero_skeleton(&self, index: usize) -> Result<BondCompleteGraph> {
        let n = self.store.n_atoms[index] as usize;
        let (src, dst) = self.store.local_edges(index)?;
        let pairs = self.pairwise.pairs(n);
        Ok(BondCompleteGraph::new(
            n,
            EdgeStore::from_pairs(src, dst),
            EdgeStore::from_pairs(pairs.src.clone(), pairs.dst.clone()),
        )?)
    }

    fn bonded(&self, index: usize) -> Result<MolGraph> {
        match &self.prefetched.bonded {
            Some(cache) => Ok(cache[index].clone()),
            None => self.bonded_skeleton(index),
        }
    }

    fn complete(&self, index: usize) -> Result<MolGraph> {
        match &self.prefetched.complete {
            Some(cache) => Ok(cache[index].clone()),
            None => self.complete_skeleton(index),
        }
    }

    fn mol_graph(&self, index: usize) -> Result<MolGraph> {
        let mut g = self.bonded(index)?;
        g.ndata.feat = Some(self.to_dev(self.atom_rows(index)?)?);
        g.ndata.pos = Some(self.to_dev(self.coord_rows(index)?)?);
        g.edata.feat = Some(self.to_dev(self.bond_rows(index)?)?);
        Ok(g)
    }

    fn mol_graph_3d(&self, index: usize) -> Result<MolGraph> {
        let mut g = self.bonded(index)?;
        g.ndata.pos = Some(self.to_dev(self.coord_rows(index)?)?);
        Ok(g)
    }

    /// Complete graph with endpoint distances; `with_features` scatters the
    /// molecule's bond features into the all-pairs edge table.
    fn complete_graph(&self, index: usize, with_features: bool) -> Result<MolGraph> {
        let n = self.store.n_atoms[index] as usize;
        let mut g = self.complete(index)?;
        g.ndata.pos = Some(self.to_dev(self.coord_rows(index)?)?);
        if with_features {
            g.ndata.feat = Some(self.to_dev(self.atom_rows(index)?)?);
            let scattered = self.scattered_bond_features(index, n)?;
            g.edata.feat = Some(self.to_dev(scattered)?);
        }
        g.compute_edge_distances()?;
        if self.config.dist_embedding {
            if let Some(dist) = &g.edata.dist {
                g.edata.rbf = Some(rbf::bessel_expansion(
                    dist,
                    self.config.num_radial,
                    rbf::DEFAULT_CUTOFF,
                )?);
            }
        }
        Ok(g)
    }

    fn mol_complete(&self, index: usize) -> Result<BondCompleteGraph> {
        let mut g = match &self.prefetched.hetero {
            Some(cache) => cache[index].clone(),
            None => self.hetero_skeleton(index)?,
        };
        g.feat = Some(self.to_dev(self.atom_rows(index)?)?);
        g.pos = Some(self.to_dev(self.coord_rows(index)?)?);
        g.bond_feat = Some(self.to_dev(self.bond_rows(index)?)?);
        Ok(g)
    }

    fn san_graph(&self, index: usize) -> Result<MolGraph> {
        let n = self.store.n_atoms[index] as usize;
        let mut g = self.complete(index)?;
        g.ndata.feat = Some(self.to_dev(self.atom_rows(index)?)?);
        g.ndata.pos = Some(self.to_dev(self.coord_rows(index)?)?);
        g.ndata.pos_enc = Some(self.to_dev(self.sign_flipped_encoding(index, n)?)?);
        let (feat, real) = self.san_edge_features(index, n)?;
        g.edata.feat = Some(self.to_dev(feat)?);
        g.edata.real = Some(self.to_dev(real)?);
        Ok(g)
    }

    /// Bond features placed at their all-pairs positions, the padding
    /// vector everywhere else.
    fn scattered_bond_features(&self, index: usize, n: usize) -> Result<Tensor> {
        let e = n * n.saturating_sub(1);
        let pad = bond_padding();
        let mut rows = vec![0i64; e * NUM_BOND_FEATURES];
        for row in rows.chunks_mut(NUM_BOND_FEATURES) {
            row.copy_from_slice(&pad);
        }
        self.scatter_bonds(index, n, &mut rows, None)?;
        Ok(Tensor::from_vec(rows, (e, NUM_BOND_FEATURES), &Device::Cpu)?)
    }

    /// Zero edge features with bonds scattered in, plus the real-bond flag.
    fn san_edge_features(&self, index: usize, n: usize) -> Result<(Tensor, Tensor)> {
        let e = n * n.saturating_sub(1);
        let mut rows = vec![0i64; e * NUM_BOND_FEATURES];
        let mut real = vec![0f32; e];
        self.scatter_bonds(index, n, &mut rows, Some(&mut real))?;
        let feat = Tensor::from_vec(rows, (e, NUM_BOND_FEATURES), &Device::Cpu)?;
        let real = Tensor::from_vec(real, (e, 1), &Device::Cpu)?;
        Ok((feat, real))
    }

    fn scatter_bonds(
        &self,
        index: usize,
        n: usize,
        rows: &mut [i64],
        mut real: Option<&mut [f32]>,
    ) -> Result<()> {
        let (src, dst) = self.store.local_edges(index)?;
        let bond_rows = self.bond_rows(index)?.to_vec2::<i64>()?;
        for (k, (&s, &d)) in src.iter().zip(&dst).enumerate() {
            let p = PairIndices::position(n, s as usize, d as usize);
            rows[p * NUM_BOND_FEATURES..(p + 1) * NUM_BOND_FEATURES]
                .copy_from_slice(&bond_rows[k]);
            if let Some(flags) = real.as_deref_mut() {
                flags[p] = 1.0;
            }
        }
        Ok(())
    }

    /// `[n, K, 2]` stack of (eigenvalue, sign-randomized eigenvector) per
    /// node and frequency. One fair coin per spectral component per access.
    fn sign_flipped_encoding(&self, index: usize, n: usize) -> Result<Tensor> {
        let slice = self.store.slice(index)?;
        let vals = self.store.eig_vals.narrow(0, index, 1)?.to_vec2::<f32>()?;
        let vecs = self
            .store
            .eig_vecs
            .narrow(0, slice.atoms.start, n)?
            .to_vec2::<f32>()?;
        let mut rng = rand::thread_rng();
        let flips: Vec<f32> = (0..MAX_FREQS)
            .map(|_| if rng.gen_bool(0.5) { 1.0 } else { -1.0 })
            .collect();
        let mut out = Vec::with_capacity(n * MAX_FREQS * 2);
        for row in vecs.iter().take(n) {
            for k in 0..MAX_FREQS {
                out.push(vals[0][k]);
                out.push(row[k] * flips[k]);
            }
        }
        Ok(Tensor::from_vec(out, (n, MAX_FREQS, 2), &Device::Cpu)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RawMolecule;
    use crate::targets::HARTREE_TO_EV;

    fn tiny_store() -> FlatMoleculeStore {
        let mut t1 = [0f64; 19];
        t1[TargetTask::Mu.column()] = 1.0;
        t1[TargetTask::Homo.column()] = 0.5;
        let mut t2 = [0f64; 19];
        t2[TargetTask::Mu.column()] = 3.0;
        t2[TargetTask::Homo.column()] = 0.7;
        FlatMoleculeStore::build(&[
            RawMolecule {
                mol_id: 1,
                smiles: "O".to_string(),
                coords: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
                targets: t1,
            },
            RawMolecule {
                mol_id: 2,
                smiles: "N".to_string(),
                coords: vec![
                    [0.0, 0.0, 0.0],
                    [1.0, 0.0, 0.0],
                    [0.0, 1.0, 0.0],
                    [0.0, 0.0, 1.0],
                ],
                targets: t2,
            },
        ])
        .unwrap()
    }

    fn dataset(kinds: Vec<ReturnKind>) -> Qm9Dataset {
        let config = DatasetConfig::default()
            .with_return_kinds(kinds)
            .with_tasks(vec![TargetTask::Mu, TargetTask::Homo])
            .with_normalize(false);
        Qm9Dataset::new(tiny_store(), config).unwrap()
    }

    #[test]
    fn test_unknown_names_are_fatal() {
        assert!(matches!(
            DatasetConfig::from_names(&["mol_graph", "bogus"], &["mu"]),
            Err(Error::UnknownReturnKind(_))
        ));
        assert!(matches!(
            DatasetConfig::from_names(&["mol_graph"], &["enthalpy"]),
            Err(Error::UnknownTargetTask(_))
        ));
    }

    #[test]
    fn test_sample_order_matches_request() {
        let ds = dataset(vec![ReturnKind::Targets, ReturnKind::MolGraph, ReturnKind::MolId]);
        let sample = ds.get(0).unwrap();
        assert_eq!(sample.len(), 3);
        assert!(matches!(sample[0], DataItem::Tensor(_)));
        assert!(matches!(sample[1], DataItem::Graph(_)));
        assert!(matches!(sample[2], DataItem::Id(1)));
    }

    #[test]
    fn test_bonded_graph_shapes() {
        let ds = dataset(vec![ReturnKind::MolGraph]);
        let sample = ds.get(0).unwrap();
        let g = sample[0].graph().unwrap();
        assert_eq!(g.num_nodes(), 3);
        assert_eq!(g.num_edges(), 4);
        assert_eq!(g.ndata.feat.as_ref().unwrap().dims()[0], 3);
        assert_eq!(g.edata.feat.as_ref().unwrap().dims()[0], 4);
        // Coordinates ride along on the bonded graph as well.
        assert_eq!(g.ndata.pos.as_ref().unwrap().dims(), &[3, 3]);
    }

    #[test]
    fn test_complete_graph_scatter() {
        let ds = dataset(vec![ReturnKind::CompleteGraph]);
        let sample = ds.get(0).unwrap();
        let g = sample[0].graph().unwrap();
        assert_eq!(g.num_edges(), 6);
        let feat = g.edata.feat.as_ref().unwrap().to_vec2::<i64>().unwrap();
        let pad = bond_padding();
        // Water bonds are O-H single bonds at pairs (0,1), (0,2) and back.
        let bond_positions = [
            PairIndices::position(3, 0, 1),
            PairIndices::position(3, 1, 0),
            PairIndices::position(3, 0, 2),
            PairIndices::position(3, 2, 0),
        ];
        for (p, row) in feat.iter().enumerate() {
            if bond_positions.contains(&p) {
                assert_ne!(row.as_slice(), &pad[..]);
            } else {
                assert_eq!(row.as_slice(), &pad[..]);
            }
        }
        // H-H virtual edge at unit distance along each axis pair.
        assert!(g.edata.dist.is_some());
    }

    #[test]
    fn test_complete_3d_omits_categorical_features() {
        let ds = dataset(vec![ReturnKind::CompleteGraph3d]);
        let sample = ds.get(1).unwrap();
        let g = sample[0].graph().unwrap();
        assert_eq!(g.num_edges(), 12);
        assert!(g.ndata.feat.is_none());
        assert!(g.edata.feat.is_none());
        assert!(g.ndata.pos.is_some());
        assert!(g.edata.dist.is_some());
    }

    #[test]
    fn test_san_graph_encoding() {
        let ds = dataset(vec![ReturnKind::SanGraph]);
        let sample = ds.get(0).unwrap();
        let g = sample[0].graph().unwrap();
        assert_eq!(g.ndata.pos.as_ref().unwrap().dims(), &[3, 3]);
        let enc = g.ndata.pos_enc.as_ref().unwrap();
        assert_eq!(enc.dims(), &[3, MAX_FREQS, 2]);
        let real = g.edata.real.as_ref().unwrap().to_vec2::<f32>().unwrap();
        let n_real: f32 = real.iter().map(|r| r[0]).sum();
        assert_eq!(n_real, 4.0);
        // Sign flips never change magnitudes.
        let enc = enc.to_vec3::<f32>().unwrap();
        let direct = ds.store().eig_vecs.to_vec2::<f32>().unwrap();
        for node in 0..3 {
            for k in 0..3 {
                assert!((enc[node][k][1].abs() - direct[node][k].abs()).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_hetero_sample() {
        let ds = dataset(vec![ReturnKind::MolCompleteGraph]);
        let sample = ds.get(1).unwrap();
        let g = sample[0].hetero().unwrap();
        assert_eq!(g.num_nodes(), 4);
        assert_eq!(g.bond_edges().num_edges(), 6);
        assert_eq!(g.complete_edges().num_edges(), 12);
        assert!(g.feat.is_some());
        assert!(g.bond_feat.is_some());
    }

    #[test]
    fn test_normalized_targets_round_trip() {
        let config = DatasetConfig::default()
            .with_return_kinds(vec![ReturnKind::Targets])
            .with_tasks(vec![TargetTask::Mu, TargetTask::Homo]);
        let ds = Qm9Dataset::new(tiny_store(), config).unwrap();
        let sample = ds.get(0).unwrap();
        let y = sample[0].tensor().unwrap();
        assert_eq!(y.dims(), &[2]);
        let restored = ds
            .denormalize(&y.unsqueeze(0).unwrap())
            .unwrap()
            .to_vec2::<f32>()
            .unwrap();
        assert!((restored[0][0] - 1.0).abs() < 1e-4);
        assert!((restored[0][1] - 0.5 * HARTREE_TO_EV as f32).abs() < 1e-3);
    }

    #[test]
    fn test_prefetch_matches_lazy() {
        let lazy = dataset(vec![ReturnKind::MolGraph, ReturnKind::CompleteGraph3d]);
        let config = DatasetConfig::default()
            .with_return_kinds(vec![ReturnKind::MolGraph, ReturnKind::CompleteGraph3d])
            .with_tasks(vec![TargetTask::Mu])
            .with_normalize(false)
            .with_prefetch(true);
        let eager = Qm9Dataset::new(tiny_store(), config).unwrap();
        for i in 0..2 {
            let a = lazy.get(i).unwrap();
            let b = eager.get(i).unwrap();
            let (ga, gb) = (a[0].graph().unwrap(), b[0].graph().unwrap());
            assert_eq!(ga.num_nodes(), gb.num_nodes());
            assert_eq!(ga.num_edges(), gb.num_edges());
            let da = a[1].graph().unwrap().edata.dist.as_ref().unwrap();
            let db = b[1].graph().unwrap().edata.dist.as_ref().unwrap();
            assert_eq!(
                da.to_vec2::<f32>().unwrap(),
                db.to_vec2::<f32>().unwrap()
            );
        }
    }

    #[test]
    fn test_dist_embedding_attaches_rbf() {
        let config = DatasetConfig::default()
            .with_return_kinds(vec![ReturnKind::CompleteGraph3d])
            .with_tasks(vec![TargetTask::Mu])
            .with_normalize(false)
            .with_dist_embedding(6);
        let ds = Qm9Dataset::new(tiny_store(), config).unwrap();
        let sample = ds.get(0).unwrap();
        let g = sample[0].graph().unwrap();
        assert_eq!(g.edata.rbf.as_ref().unwrap().dims(), &[6, 6]);
    }

    #[test]
    fn test_side_tables() {
        let ds = dataset(vec![
            ReturnKind::Smiles,
            ReturnKind::AtomicNumbers,
            ReturnKind::EdgeIndices,
            ReturnKind::Coordinates,
        ]);
        let sample = ds.get(0).unwrap();
        assert!(matches!(&sample[0], DataItem::Smiles(s) if s == "O"));
        let nums = sample[1].tensor().unwrap().to_vec1::<i64>().unwrap();
        assert_eq!(nums, vec![8, 1, 1]);
        assert_eq!(sample[2].tensor().unwrap().dims(), &[2, 4]);
        assert_eq!(sample[3].tensor().unwrap().dims(), &[3, 3]);
    }

    #[test]
    fn test_index_out_of_range() {
        let ds = dataset(vec![ReturnKind::MolGraph]);
        assert!(matches!(
            ds.get(5),
            Err(Error::IndexOutOfRange { index: 5, len: 2 })
        ));
    }
}
