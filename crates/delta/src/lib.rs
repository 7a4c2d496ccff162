//! Build manifests, block signatures and the patch differencing engine.
//!
//! A push describes the new build as a [`Container`] (paths, kinds, sizes,
//! modes) whose bytes are read through a [`FilePool`]. The [`DiffContext`]
//! compares that content against the previous build's [`BlockHash`]
//! signature and writes two streams at once:
//!
//! - the **patch**: reuse ops pointing into the old build plus fresh data
//! - the **signature**: block hashes of the new build, used as the baseline
//!   for the next push
//!
//! Both streams are length-prefixed `bincode` frames behind a small
//! uncompressed header, compressed according to [`CompressionSettings`].

pub mod container;
pub mod diff;
pub mod pool;
pub mod rolling;
pub mod signature;
pub mod validation;
mod wire;

pub use container::{Container, ContainerStats, Entry, EntryKind};
pub use diff::{DiffContext, DiffProgress, DiffStats, MAX_DATA_OP, SyncHeader, SyncOp};
pub use pool::{DirPool, FilePool, MemoryPool, ZipPool};
pub use signature::{BlockHash, SignatureWriter, compute_signature, read_signature};
pub use validation::validate_entry_path;
pub use wire::{CompressionAlgorithm, CompressionSettings, PATCH_MAGIC, SIGNATURE_MAGIC};

/// Size of the fixed blocks signatures are computed over (64 KiB).
pub const BLOCK_SIZE: usize = 64 * 1024;

/// Errors produced by the delta crate.
#[derive(Debug, thiserror::Error)]
pub enum DeltaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid format: {0}")]
    Format(String),

    #[error("no file at index {0}")]
    NoSuchFile(usize),

    #[error("cancelled")]
    Cancelled,
}
