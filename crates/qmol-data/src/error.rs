use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in qmol-data.
#[derive(Error, Debug)]
pub enum Error {
    /// A return-kind name did not match the closed set.
    #[error("return kind not supported: {0}")]
    UnknownReturnKind(String),
    /// A target-task name did not match the closed set.
    #[error("target task not supported: {0}")]
    UnknownTargetTask(String),
    /// SMILES parsing failed; the whole build aborts.
    #[error("failed to parse SMILES '{smiles}' at byte {pos}: {msg}")]
    SmilesParse {
        smiles: String,
        pos: usize,
        msg: String,
    },
    /// The bonding structure and the coordinate table disagree on atom count.
    #[error("molecule {mol_id}: SMILES expands to {parsed} atoms but the spatial table has {coords}")]
    AtomCountMismatch {
        mol_id: u32,
        parsed: usize,
        coords: usize,
    },
    /// A raw input file is absent.
    #[error("missing raw input: {0}")]
    MissingInput(PathBuf),
    /// The spatial bundle's coordinate table does not cover its atom counts.
    #[error("spatial bundle carries {found} coordinate values, expected {expected}")]
    SpatialLength { expected: usize, found: usize },
    /// A raw target row did not carry the expected number of properties.
    #[error("row {row}: expected {expected} target columns, found {found}")]
    MalformedTargets {
        row: usize,
        expected: usize,
        found: usize,
    },
    /// Molecule index past the end of the store.
    #[error("molecule index {index} out of range for {len} molecules")]
    IndexOutOfRange { index: usize, len: usize },
    /// Collating an empty sample list.
    #[error("cannot collate an empty batch")]
    EmptyBatch,
    /// A sample tuple did not have the shape a collate function expects.
    #[error("sample has unexpected shape: expected {0}")]
    SampleShape(&'static str),
    /// Conformer coordinate rows must be `3 * num_conformers` wide.
    #[error("conformer coordinates are {0} wide, not divisible by 3")]
    ConformerWidth(usize),
    /// Graph-structural error from qmol-core.
    #[error(transparent)]
    Graph(#[from] qmol_core::Error),
    /// Tensor backend error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// CSV error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    /// Store artifact encoding error.
    #[error("artifact encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

/// Result type alias for qmol-data.
pub type Result<T> = std::result::Result<T, Error>;
