//! Error types for doc3vec.

use thiserror::Error;

/// Everything that can go wrong outside the per-example hot path.
///
/// Degenerate training examples (short lines, saturated scores) are not
/// errors; they are skipped where they occur.
#[derive(Error, Debug)]
pub enum Error {
    /// A weight matrix could not be allocated.
    #[error("memory allocation failed for a {rows}x{cols} embedding table")]
    Allocation { rows: usize, cols: usize },

    /// A model name that isn't one of the five supported models.
    #[error("unknown model type {0:?} (expected cbow, skipgram, pvdbow, pvdm or pvdm-concat)")]
    UnknownModel(String),

    /// Training options that can't describe a working network.
    #[error("invalid training options: {0}")]
    Config(String),

    /// A vector or vocabulary file that doesn't parse.
    #[error("invalid file format: {0}")]
    Format(String),

    /// A training thread panicked.
    #[error("worker thread {0} panicked")]
    Worker(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
