use thiserror::Error;

/// Errors that can occur in qmol-core.
#[derive(Error, Debug)]
pub enum Error {
    /// An edge endpoint refers to a node that does not exist.
    #[error("edge endpoint {index} out of range for graph with {num_nodes} nodes")]
    NodeOutOfRange { index: u32, num_nodes: usize },
    /// Source and destination index vectors differ in length.
    #[error("edge index length mismatch: {src} sources vs {dst} destinations")]
    EdgeLengthMismatch { src: usize, dst: usize },
    /// An attribute that every graph in a batch must carry was missing on some of them.
    #[error("attribute '{0}' present on some graphs in the batch but not all")]
    AttributeMismatch(&'static str),
    /// An operation needed an attribute the graph does not carry.
    #[error("graph is missing required attribute '{0}'")]
    MissingAttribute(&'static str),
    /// Batching an empty list of graphs.
    #[error("cannot batch an empty list of graphs")]
    EmptyBatch,
    /// A tensor attribute has the wrong leading dimension.
    #[error("attribute '{name}' has {rows} rows, expected {expected}")]
    AttributeShape {
        name: &'static str,
        rows: usize,
        expected: usize,
    },
    /// Tensor backend error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}

/// Result type alias for qmol-core.
pub type Result<T> = std::result::Result<T, Error>;
