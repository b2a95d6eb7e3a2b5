use std::path::Path;
use std::sync::Arc;

use tokio::io::AsyncRead;
use tracing::{debug, info};

use crate::block::{Block, BlockReader, ByteRange, partition_ranges};
use crate::completion::{CompletedPart, CompletionMap};
use crate::config::TransferConfig;
use crate::pool::{BoxFuture, Transport, WorkerPool};
use crate::progress::ProgressSink;
use crate::TransferError;

/// Issues the merge call that turns acknowledged blocks into one object.
///
/// Receives every block in index order. Returns the identifier the remote
/// side assigned to the committed object; any error is fatal for the file.
pub trait Committer: Send + Sync {
    fn commit<'a>(&'a self, parts: Vec<CompletedPart>) -> BoxFuture<'a, Result<String, TransferError>>;
}

/// Outcome of a finished transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    /// Object hash for uploads, resolved link for downloads.
    pub id: String,
    pub blocks: u32,
    pub bytes: u64,
}

// ---------------------------------------------------------------------------
// Upload
// ---------------------------------------------------------------------------

/// Uploads files block by block and commits them.
pub struct UploadEngine {
    config: TransferConfig,
    progress: Option<ProgressSink>,
}

impl UploadEngine {
    pub fn new(config: TransferConfig) -> Result<Self, TransferError> {
        config.validate()?;
        Ok(Self {
            config,
            progress: None,
        })
    }

    /// Reports the size of every acknowledged block to `sink`.
    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Uploads the file at `path`.
    pub async fn upload_file<T, C>(
        &self,
        path: &Path,
        transport: Arc<T>,
        committer: &C,
    ) -> Result<TransferResult, TransferError>
    where
        T: Transport<Block>,
        C: Committer + ?Sized,
    {
        let reader = BlockReader::open(path, self.config.block_size).await?;
        info!(path = %path.display(), size = reader.size(), "uploading file");
        self.upload(reader, transport, committer).await
    }

    /// Uploads `size` bytes read from `source`.
    pub async fn upload_reader<R, T, C>(
        &self,
        source: R,
        size: u64,
        transport: Arc<T>,
        committer: &C,
    ) -> Result<TransferResult, TransferError>
    where
        R: AsyncRead + Unpin,
        T: Transport<Block>,
        C: Committer + ?Sized,
    {
        let reader = BlockReader::new(source, size, self.config.block_size);
        self.upload(reader, transport, committer).await
    }

    async fn upload<R, T, C>(
        &self,
        mut reader: BlockReader<R>,
        transport: Arc<T>,
        committer: &C,
    ) -> Result<TransferResult, TransferError>
    where
        R: AsyncRead + Unpin,
        T: Transport<Block>,
        C: Committer + ?Sized,
    {
        let total = reader.expected_blocks()?;
        let completions = Arc::new(CompletionMap::new(total));
        let mut pool = WorkerPool::start(
            transport,
            Arc::clone(&completions),
            &self.config,
            self.progress.clone(),
        )?;

        let mut submitted = 0u32;
        let mut bytes = 0u64;
        while let Some(block) = reader.next_block().await? {
            debug!(block = block.index, size = block.size(), "queueing block");
            bytes += block.size() as u64;
            submitted += 1;
            pool.submit(block).await?;
        }
        pool.finish().await?;

        if submitted != total {
            return Err(TransferError::Incomplete {
                expected: total,
                recorded: submitted,
            });
        }

        let parts = completions.ordered_parts()?;
        debug!(blocks = parts.len(), "all blocks acknowledged, committing");
        let id = committer.commit(parts).await?;
        info!(blocks = total, bytes, "upload committed");

        Ok(TransferResult {
            id,
            blocks: total,
            bytes,
        })
    }
}

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

/// Downloads a remote object as parallel byte ranges.
///
/// The transport writes each range into place, so no merge step follows.
pub struct DownloadEngine {
    config: TransferConfig,
    progress: Option<ProgressSink>,
}

impl DownloadEngine {
    pub fn new(config: TransferConfig) -> Result<Self, TransferError> {
        config.validate()?;
        Ok(Self {
            config,
            progress: None,
        })
    }

    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Ranges this engine would request for `length` bytes.
    pub fn plan(&self, length: u64, accepts_ranges: bool) -> Vec<ByteRange> {
        partition_ranges(
            length,
            self.config.concurrency,
            accepts_ranges,
            self.config.range_threshold,
        )
    }

    /// Fetches every range of `link` through `transport`.
    pub async fn download<T>(
        &self,
        link: &str,
        length: u64,
        accepts_ranges: bool,
        transport: Arc<T>,
    ) -> Result<TransferResult, TransferError>
    where
        T: Transport<ByteRange>,
    {
        let ranges = self.plan(length, accepts_ranges);
        let total = ranges.len() as u32;
        info!(length, ranges = total, "downloading");

        let completions = Arc::new(CompletionMap::new(total));
        let mut pool = WorkerPool::start(
            transport,
            Arc::clone(&completions),
            &self.config,
            self.progress.clone(),
        )?;
        for range in ranges {
            pool.submit(range).await?;
        }
        pool.finish().await?;

        if !completions.is_complete() {
            return Err(TransferError::Incomplete {
                expected: total,
                recorded: completions.len(),
            });
        }

        Ok(TransferResult {
            id: link.to_string(),
            blocks: total,
            bytes: length,
        })
    }
}
