//! Flat molecule store: contiguous per-atom and per-edge tables with
//! slice offsets delimiting each molecule.
//!
//! Molecules are never held as individual heap objects at rest. Every
//! per-atom quantity lives in one table row-aligned with `atom_slices`,
//! every per-edge quantity in one table aligned with `edge_slices`, and
//! molecule `i` owns rows `[slices[i], slices[i + 1])`. The store is built
//! once from the raw QM9 inputs and persisted as a gzip-compressed bincode
//! record; later runs load the artifact in a single read.
//!
//! Edge endpoints are stored in store-wide atom numbering.
//! [`FlatMoleculeStore::local_edges`] rebases them to a molecule's own
//! index space when a per-molecule graph is materialized.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use candle_core::{Device, Tensor};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::featurize::{
    atom_features, bond_features, NUM_ATOM_FEATURES, NUM_BOND_FEATURES,
};
use crate::smiles::Molecule;
use crate::spectral::{laplacian_encoding, MAX_FREQS};
use crate::targets::TargetTask;

/// Persisted artifact, relative to the dataset root.
pub const ARTIFACT_PATH: &str = "processed/qm9_processed.bin";
/// Raw target table, relative to the dataset root.
pub const RAW_TABLE: &str = "qm9.csv";
/// Raw spatial bundle, relative to the dataset root.
pub const RAW_SPATIAL: &str = "qm9_spatial.bin.gz";

/// One molecule of raw input, before featurization.
#[derive(Debug, Clone)]
pub struct RawMolecule {
    pub mol_id: u32,
    pub smiles: String,
    /// One row per atom, heavy atoms first then hydrogens in parent order.
    pub coords: Vec<[f32; 3]>,
    /// The nineteen raw table values in canonical column order.
    pub targets: [f64; 19],
}

/// Coordinates and identifiers shipped alongside the CSV table.
#[derive(Debug, Serialize, Deserialize)]
struct SpatialBundle {
    mol_ids: Vec<u32>,
    n_atoms: Vec<u32>,
    /// Flattened `[total_atoms, 3]`, row-major.
    coordinates: Vec<f32>,
    atomic_numbers: Vec<i64>,
}

/// Serialized form of the store: plain vectors only, so the artifact stays
/// independent of the tensor backend.
#[derive(Debug, Serialize, Deserialize)]
struct StoreRecord {
    atom_features: Vec<i64>,
    edge_features: Vec<i64>,
    coordinates: Vec<f32>,
    edge_src: Vec<u32>,
    edge_dst: Vec<u32>,
    atom_slices: Vec<usize>,
    edge_slices: Vec<usize>,
    n_atoms: Vec<u32>,
    targets: Vec<f32>,
    eig_vals: Vec<f32>,
    eig_vecs: Vec<f32>,
    smiles: Vec<String>,
    atomic_numbers: Vec<i64>,
    mol_ids: Vec<u32>,
    avg_degree: f64,
}

/// Atom and edge row ranges of one molecule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MolSlice {
    pub atoms: std::ops::Range<usize>,
    pub edges: std::ops::Range<usize>,
}

/// Immutable in-memory tables for the whole dataset. Tensors live on the
/// CPU; device placement happens when a dataset hands samples out.
#[derive(Debug)]
pub struct FlatMoleculeStore {
    /// `[total_atoms, NUM_ATOM_FEATURES]`, I64 categorical codes.
    pub atom_features: Tensor,
    /// `[total_edges, NUM_BOND_FEATURES]`, I64, both directions of every bond.
    pub edge_features: Tensor,
    /// `[total_atoms, 3]`, F32.
    pub coordinates: Tensor,
    /// Store-wide endpoint indices, aligned with `edge_features`.
    pub edge_src: Vec<u32>,
    pub edge_dst: Vec<u32>,
    /// Length `num_molecules + 1`, starting at 0, non-decreasing.
    pub atom_slices: Vec<usize>,
    pub edge_slices: Vec<usize>,
    pub n_atoms: Vec<u32>,
    /// `[num_molecules, 19]`, F32, unit conversions already applied.
    pub targets: Tensor,
    /// `[num_molecules, MAX_FREQS]`, F32, NaN-padded.
    pub eig_vals: Tensor,
    /// `[total_atoms, MAX_FREQS]`, F32, NaN-padded.
    pub eig_vecs: Tensor,
    pub smiles: Vec<String>,
    pub atomic_numbers: Vec<i64>,
    pub mol_ids: Vec<u32>,
    /// Mean over molecules of bonds per atom.
    pub avg_degree: f64,
}

impl FlatMoleculeStore {
    /// Featurize raw molecules into flat tables. Any parse or shape failure
    /// aborts the whole build; slice offsets require every row represented.
    pub fn build(rows: &[RawMolecule]) -> Result<FlatMoleculeStore> {
        log::info!("building flat store over {} molecules", rows.len());
        let mut atom_feat: Vec<i64> = Vec::new();
        let mut edge_feat: Vec<i64> = Vec::new();
        let mut coords: Vec<f32> = Vec::new();
        let mut edge_src: Vec<u32> = Vec::new();
        let mut edge_dst: Vec<u32> = Vec::new();
        let mut atom_slices: Vec<usize> = vec![0];
        let mut edge_slices: Vec<usize> = vec![0];
        let mut n_atoms: Vec<u32> = Vec::new();
        let mut targets: Vec<f32> = Vec::new();
        let mut eig_vals: Vec<f32> = Vec::new();
        let mut eig_vecs: Vec<f32> = Vec::new();
        let mut smiles: Vec<String> = Vec::new();
        let mut atomic_numbers: Vec<i64> = Vec::new();
        let mut mol_ids: Vec<u32> = Vec::new();
        let mut total_atoms = 0usize;
        let mut total_edges = 0usize;
        let mut degree_sum = 0f64;

        for (i, row) in rows.iter().enumerate() {
            if i > 0 && i % 10_000 == 0 {
                log::debug!("featurized {i} molecules");
            }
            let mol = Molecule::parse(&row.smiles)?.with_explicit_hydrogens();
            let n = mol.num_atoms();
            if n != row.coords.len() {
                return Err(Error::AtomCountMismatch {
                    mol_id: row.mol_id,
                    parsed: n,
                    coords: row.coords.len(),
                });
            }

            for feat in atom_features(&mol) {
                atom_feat.extend_from_slice(&feat);
            }
            for atom in &mol.atoms {
                atomic_numbers.push(atom.element.atomic_number());
            }
            for xyz in &row.coords {
                coords.extend_from_slice(xyz);
            }

            let base = total_atoms as u32;
            let bond_feat = bond_features(&mol);
            for (bond, feat) in mol.bonds.iter().zip(&bond_feat) {
                // Both directions share one feature row each.
                edge_src.push(base + bond.a as u32);
                edge_dst.push(base + bond.b as u32);
                edge_feat.extend_from_slice(feat);
                edge_src.push(base + bond.b as u32);
                edge_dst.push(base + bond.a as u32);
                edge_feat.extend_from_slice(feat);
            }

            let undirected: Vec<(usize, usize)> =
                mol.bonds.iter().map(|b| (b.a, b.b)).collect();
            let enc = laplacian_encoding(n, &undirected, MAX_FREQS);
            eig_vals.extend_from_slice(&enc.eig_vals);
            eig_vecs.extend_from_slice(&enc.eig_vecs);

            for (k, task) in TargetTask::ALL.iter().enumerate() {
                targets.push((row.targets[k] * task.unit_conversion()) as f32);
            }

            degree_sum += mol.bonds.len() as f64 / n as f64;
            total_atoms += n;
            total_edges += 2 * mol.bonds.len();
            atom_slices.push(total_atoms);
            edge_slices.push(total_edges);
            n_atoms.push(n as u32);
            smiles.push(row.smiles.clone());
            mol_ids.push(row.mol_id);
        }

        let avg_degree = if rows.is_empty() {
            0.0
        } else {
            degree_sum / rows.len() as f64
        };
        log::info!(
            "store built: {} molecules, {total_atoms} atoms, {total_edges} directed edges, avg degree {avg_degree:.3}",
            rows.len()
        );

        FlatMoleculeStore::from_record(StoreRecord {
            atom_features: atom_feat,
            edge_features: edge_feat,
            coordinates: coords,
            edge_src,
            edge_dst,
            atom_slices,
            edge_slices,
            n_atoms,
            targets,
            eig_vals,
            eig_vecs,
            smiles,
            atomic_numbers,
            mol_ids,
            avg_degree,
        })
    }

    fn from_record(record: StoreRecord) -> Result<FlatMoleculeStore> {
        let device = Device::Cpu;
        let total_atoms = record.atom_features.len() / NUM_ATOM_FEATURES;
        let total_edges = record.edge_features.len() / NUM_BOND_FEATURES;
        let num_molecules = record.n_atoms.len();
        let atom_features = Tensor::from_vec(
            record.atom_features,
            (total_atoms, NUM_ATOM_FEATURES),
            &device,
        )?;
        let edge_features = Tensor::from_vec(
            record.edge_features,
            (total_edges, NUM_BOND_FEATURES),
            &device,
        )?;
        let coordinates = Tensor::from_vec(record.coordinates, (total_atoms, 3), &device)?;
        let targets = Tensor::from_vec(record.targets, (num_molecules, 19), &device)?;
        let eig_vals = Tensor::from_vec(record.eig_vals, (num_molecules, MAX_FREQS), &device)?;
        let eig_vecs = Tensor::from_vec(record.eig_vecs, (total_atoms, MAX_FREQS), &device)?;
        Ok(FlatMoleculeStore {
            atom_features,
            edge_features,
            coordinates,
            edge_src: record.edge_src,
            edge_dst: record.edge_dst,
            atom_slices: record.atom_slices,
            edge_slices: record.edge_slices,
            n_atoms: record.n_atoms,
            targets,
            eig_vals,
            eig_vecs,
            smiles: record.smiles,
            atomic_numbers: record.atomic_numbers,
            mol_ids: record.mol_ids,
            avg_degree: record.avg_degree,
        })
    }

    fn to_record(&self) -> Result<StoreRecord> {
        Ok(StoreRecord {
            atom_features: self.atom_features.flatten_all()?.to_vec1::<i64>()?,
            edge_features: self.edge_features.flatten_all()?.to_vec1::<i64>()?,
            coordinates: self.coordinates.flatten_all()?.to_vec1::<f32>()?,
            edge_src: self.edge_src.clone(),
            edge_dst: self.edge_dst.clone(),
            atom_slices: self.atom_slices.clone(),
            edge_slices: self.edge_slices.clone(),
            n_atoms: self.n_atoms.clone(),
            targets: self.targets.flatten_all()?.to_vec1::<f32>()?,
            eig_vals: self.eig_vals.flatten_all()?.to_vec1::<f32>()?,
            eig_vecs: self.eig_vecs.flatten_all()?.to_vec1::<f32>()?,
            smiles: self.smiles.clone(),
            atomic_numbers: self.atomic_numbers.clone(),
            mol_ids: self.mol_ids.clone(),
            avg_degree: self.avg_degree,
        })
    }

    pub fn num_molecules(&self) -> usize {
        self.n_atoms.len()
    }

    pub fn total_atoms(&self) -> usize {
        self.atomic_numbers.len()
    }

    pub fn total_edges(&self) -> usize {
        self.edge_src.len()
    }

    /// Row ranges of molecule `index` in the atom and edge tables.
    pub fn slice(&self, index: usize) -> Result<MolSlice> {
        if index >= self.num_molecules() {
            return Err(Error::IndexOutOfRange {
                index,
                len: self.num_molecules(),
            });
        }
        Ok(MolSlice {
            atoms: self.atom_slices[index]..self.atom_slices[index + 1],
            edges: self.edge_slices[index]..self.edge_slices[index + 1],
        })
    }

    /// Endpoints of molecule `index`'s edges, rebased to its own atom
    /// numbering.
    pub fn local_edges(&self, index: usize) -> Result<(Vec<u32>, Vec<u32>)> {
        let slice = self.slice(index)?;
        let base = slice.atoms.start as u32;
        let src = self.edge_src[slice.edges.clone()]
            .iter()
            .map(|&s| s - base)
            .collect();
        let dst = self.edge_dst[slice.edges]
            .iter()
            .map(|&d| d - base)
            .collect();
        Ok((src, dst))
    }

    /// Serialize into `writer` as gzip-compressed bincode.
    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        let mut encoder = GzEncoder::new(writer, Compression::default());
        bincode::serialize_into(&mut encoder, &self.to_record()?)?;
        encoder.finish()?;
        Ok(())
    }

    /// Deserialize a store previously written with [`write_to`](Self::write_to).
    pub fn read_from<R: Read>(reader: R) -> Result<FlatMoleculeStore> {
        let record: StoreRecord = bincode::deserialize_from(GzDecoder::new(reader))?;
        FlatMoleculeStore::from_record(record)
    }

    /// Persist the artifact under `root`, creating `processed/`.
    pub fn save(&self, root: &Path) -> Result<()> {
        let path = root.join(ARTIFACT_PATH);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        self.write_to(BufWriter::new(File::create(&path)?))?;
        log::info!("persisted store artifact to {}", path.display());
        Ok(())
    }

    /// Load the persisted artifact if present, otherwise build from the raw
    /// inputs under `root` and persist before returning.
    pub fn open(root: &Path) -> Result<FlatMoleculeStore> {
        let artifact = root.join(ARTIFACT_PATH);
        if artifact.is_file() {
            log::info!("loading store artifact from {}", artifact.display());
            return FlatMoleculeStore::read_from(BufReader::new(File::open(&artifact)?));
        }
        let rows = load_raw(root)?;
        let store = FlatMoleculeStore::build(&rows)?;
        store.save(root)?;
        Ok(store)
    }
}

/// Read the raw CSV table and spatial bundle under `root` and pair them
/// up row by row.
pub fn load_raw(root: &Path) -> Result<Vec<RawMolecule>> {
    let table = root.join(RAW_TABLE);
    if !table.is_file() {
        return Err(Error::MissingInput(table));
    }
    let spatial_path = root.join(RAW_SPATIAL);
    if !spatial_path.is_file() {
        return Err(Error::MissingInput(spatial_path));
    }

    let bundle: SpatialBundle = bincode::deserialize_from(GzDecoder::new(BufReader::new(
        File::open(&spatial_path)?,
    )))?;
    let expected = bundle.n_atoms.iter().map(|&n| n as usize).sum::<usize>() * 3;
    if bundle.coordinates.len() != expected {
        return Err(Error::SpatialLength {
            expected,
            found: bundle.coordinates.len(),
        });
    }

    let mut rows = Vec::with_capacity(bundle.n_atoms.len());
    let mut reader = csv::Reader::from_path(&table)?;
    let mut atom_cursor = 0usize;
    for (i, record) in reader.records().enumerate() {
        let record = record?;
        // name, smiles, then the 19 property columns.
        if record.len() != 2 + 19 {
            return Err(Error::MalformedTargets {
                row: i,
                expected: 2 + 19,
                found: record.len(),
            });
        }
        let smiles = record[1].to_string();
        let mut targets = [0f64; 19];
        for (k, slot) in targets.iter_mut().enumerate() {
            *slot = record[2 + k].trim().parse::<f64>().map_err(|_| {
                Error::MalformedTargets {
                    row: i,
                    expected: 2 + 19,
                    found: 2 + k,
                }
            })?;
        }

        let n = *bundle
            .n_atoms
            .get(i)
            .ok_or(Error::IndexOutOfRange {
                index: i,
                len: bundle.n_atoms.len(),
            })? as usize;
        let mut coords = Vec::with_capacity(n);
        for a in 0..n {
            let at = (atom_cursor + a) * 3;
            coords.push([
                bundle.coordinates[at],
                bundle.coordinates[at + 1],
                bundle.coordinates[at + 2],
            ]);
        }
        atom_cursor += n;
        rows.push(RawMolecule {
            mol_id: bundle.mol_ids.get(i).copied().unwrap_or(i as u32),
            smiles,
            coords,
            targets,
        });
    }
    log::info!("read {} raw molecules from {}", rows.len(), table.display());
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::targets::HARTREE_TO_EV;

    fn water() -> RawMolecule {
        let mut targets = [0f64; 19];
        targets[TargetTask::Homo.column()] = 1.0;
        targets[TargetTask::Mu.column()] = 2.5;
        RawMolecule {
            mol_id: 1,
            smiles: "O".to_string(),
            coords: vec![[0.0, 0.0, 0.0], [0.96, 0.0, 0.0], [-0.24, 0.93, 0.0]],
            targets,
        }
    }

    fn ammonia() -> RawMolecule {
        RawMolecule {
            mol_id: 2,
            smiles: "N".to_string(),
            coords: vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [-0.3, 0.9, 0.0],
                [-0.3, -0.4, 0.8],
            ],
            targets: [0.0; 19],
        }
    }

    #[test]
    fn test_slices_cover_tables() {
        let store = FlatMoleculeStore::build(&[water(), ammonia()]).unwrap();
        assert_eq!(store.num_molecules(), 2);
        assert_eq!(store.atom_slices, vec![0, 3, 7]);
        // Water has 2 bonds, ammonia 3, both directions stored.
        assert_eq!(store.edge_slices, vec![0, 4, 10]);
        assert_eq!(store.n_atoms, vec![3, 4]);
        assert_eq!(store.total_atoms(), 7);
        assert_eq!(store.total_edges(), 10);
        assert_eq!(store.atom_features.dims(), &[7, NUM_ATOM_FEATURES]);
        assert_eq!(store.edge_features.dims(), &[10, NUM_BOND_FEATURES]);
    }

    #[test]
    fn test_store_wide_edge_numbering() {
        let store = FlatMoleculeStore::build(&[water(), ammonia()]).unwrap();
        // Ammonia's edges index atoms 3..7.
        let slice = store.slice(1).unwrap();
        for k in slice.edges.clone() {
            assert!(store.edge_src[k] >= 3 && store.edge_src[k] < 7);
            assert!(store.edge_dst[k] >= 3 && store.edge_dst[k] < 7);
        }
        let (src, dst) = store.local_edges(1).unwrap();
        assert!(src.iter().chain(dst.iter()).all(|&v| v < 4));
        // Central nitrogen carries all bonds.
        assert_eq!(src.iter().filter(|&&s| s == 0).count(), 3);
    }

    #[test]
    fn test_unit_conversion_applied() {
        let store = FlatMoleculeStore::build(&[water()]).unwrap();
        let row = store.targets.to_vec2::<f32>().unwrap();
        let homo = row[0][TargetTask::Homo.column()];
        let mu = row[0][TargetTask::Mu.column()];
        assert!((homo - HARTREE_TO_EV as f32).abs() < 1e-3);
        assert!((mu - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_avg_degree_is_per_molecule_mean() {
        let store = FlatMoleculeStore::build(&[water(), ammonia()]).unwrap();
        // Water: 2 bonds over 3 atoms; ammonia: 3 bonds over 4 atoms.
        let expected = (2.0 / 3.0 + 3.0 / 4.0) / 2.0;
        assert!((store.avg_degree - expected).abs() < 1e-12);
    }

    #[test]
    fn test_atom_count_mismatch_is_fatal() {
        let mut bad = water();
        bad.coords.pop();
        let err = FlatMoleculeStore::build(&[bad]).unwrap_err();
        assert!(matches!(err, Error::AtomCountMismatch { parsed: 3, coords: 2, .. }));
    }

    #[test]
    fn test_round_trip_through_gzip() {
        let store = FlatMoleculeStore::build(&[water(), ammonia()]).unwrap();
        let mut buf = Vec::new();
        store.write_to(&mut buf).unwrap();
        let loaded = FlatMoleculeStore::read_from(buf.as_slice()).unwrap();
        assert_eq!(loaded.atom_slices, store.atom_slices);
        assert_eq!(loaded.edge_src, store.edge_src);
        assert_eq!(loaded.smiles, vec!["O", "N"]);
        assert_eq!(loaded.avg_degree, store.avg_degree);
        let a = store.targets.to_vec2::<f32>().unwrap();
        let b = loaded.targets.to_vec2::<f32>().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_out_of_range_index() {
        let store = FlatMoleculeStore::build(&[water()]).unwrap();
        assert!(matches!(
            store.slice(1),
            Err(Error::IndexOutOfRange { index: 1, len: 1 })
        ));
    }

    #[test]
    fn test_spectral_rows_aligned_with_atoms() {
        let store = FlatMoleculeStore::build(&[water(), ammonia()]).unwrap();
        assert_eq!(store.eig_vals.dims(), &[2, MAX_FREQS]);
        assert_eq!(store.eig_vecs.dims(), &[7, MAX_FREQS]);
        let vals = store.eig_vals.to_vec2::<f32>().unwrap();
        // 3-atom water has 3 finite frequencies, the rest padded.
        assert!(vals[0][..3].iter().all(|v| v.is_finite()));
        assert!(vals[0][3..].iter().all(|v| v.is_nan()));
    }
}
