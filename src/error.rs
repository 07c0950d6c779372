//! Library error type.
//!
//! Every fallible operation in the crate returns [`Result`]. Errors are raised
//! synchronously on the calling thread by the operation that detected them;
//! nothing is retried internally.

use thiserror::Error;

/// Errors raised while building, running, or persisting a network.
#[derive(Debug, Error)]
pub enum NnError {
    /// Output of one layer does not fit the input of the next.
    #[error("layer dimension mismatch: {from} out {out_size} != {to} in {in_size}")]
    ConnectionMismatch {
        from: String,
        to: String,
        out_size: usize,
        in_size: usize,
    },

    /// Training or inference data does not fit the network.
    #[error("data mismatch: {0}")]
    DataMismatch(String),

    /// Spatial dimensions are not an integer multiple of the pooling window.
    #[error("input size ({width}x{height}) must be a multiple of pooling size ({pool})")]
    PoolingSizeMismatch {
        width: usize,
        height: usize,
        pool: usize,
    },

    /// Channel counts cannot be split into the requested number of groups.
    #[error("invalid group size: {groups} groups for {rows}x{cols} channels")]
    InvalidGroupSize {
        groups: usize,
        rows: usize,
        cols: usize,
    },

    /// Any other invalid layer or training configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A connection referenced a slot outside the declared sizes.
    #[error("{kind} index {index} out of range (size {size})")]
    Index {
        kind: &'static str,
        index: usize,
        size: usize,
    },

    /// The layer graph is malformed (cycle, dangling id, missing port).
    #[error("graph error: {0}")]
    Graph(String),

    /// Stub backend path.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    /// An optimizer that needs the Hessian diagonal was handed none.
    #[error("optimizer requires hessian but none was computed")]
    MissingHessian,

    /// A token in a weight stream is not a number.
    #[error("cannot parse weight value {0:?}")]
    Parse(String),

    /// The weight stream ended before every parameter was read.
    #[error("weight stream ended early: expected {expected} values, read {read}")]
    ShortStream { expected: usize, read: usize },

    /// Binary model container is malformed.
    #[error("invalid model file: {0}")]
    Format(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, NnError>;
