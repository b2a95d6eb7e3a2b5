//! Chunked parallel block transfer engine.
//!
//! A file is cut into indexed blocks (or byte ranges for downloads), a
//! fixed pool of workers pushes every block through an injected
//! [`Transport`], failed blocks are retried until they succeed, and the
//! acknowledged blocks are handed to a [`Committer`] in index order.
//!
//! Nothing in this crate speaks HTTP; the client crate implements the
//! transports on top of the object store.

mod block;
mod completion;
mod config;
mod engine;
mod output;
mod pool;
mod progress;

pub use block::{Block, BlockReader, ByteRange, block_count, checksum_bytes, partition_ranges};
pub use completion::{CompletedPart, CompletionMap, Recorded};
pub use config::{
    DEFAULT_BLOCK_SIZE, DEFAULT_CONCURRENCY, FALLBACK_BLOCK_SIZE, MAX_BLOCK_SIZE, RANGE_THRESHOLD,
    RetryPolicy, TransferConfig, clamp_block_size,
};
pub use engine::{Committer, DownloadEngine, TransferResult, UploadEngine};
pub use output::OutputFile;
pub use pool::{BoxFuture, CompletionToken, Transport, WorkItem, WorkerPool};
pub use progress::{ProgressSink, SpeedCalculator, TransferProgress};

/// Fatal errors: the whole file transfer is abandoned.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("commit failed: {0}")]
    Commit(String),

    #[error("block {index} still failing after {attempts} attempts")]
    RetriesExhausted { index: u32, attempts: u32 },

    #[error("only {recorded} of {expected} blocks acknowledged")]
    Incomplete { expected: u32, recorded: u32 },

    #[error("block {0} is outside the session")]
    InvalidBlock(u32),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("worker task failed: {0}")]
    Join(String),

    #[error("transfer aborted")]
    Aborted,
}

/// Per-block failures. Every variant is retried by the worker pool.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("unreadable response: {0}")]
    Decode(String),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for BlockError {
    fn from(e: std::io::Error) -> Self {
        BlockError::Io(e.to_string())
    }
}
