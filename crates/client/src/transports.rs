//! Engine adapters over [`StorageClient`].

use std::sync::Arc;

use cowshare_protocol::{MergePart, UploadSession};
use cowshare_transfer::{
    Block, BlockError, BoxFuture, ByteRange, CompletedPart, CompletionToken, Committer,
    OutputFile, Transport, TransferError, checksum_bytes,
};
use tracing::debug;

use crate::storage::StorageClient;

/// Uploads blocks into an open multipart session.
pub struct BlockUploader {
    storage: Arc<StorageClient>,
    session: Arc<UploadSession>,
    verify_checksum: bool,
}

impl BlockUploader {
    pub fn new(storage: Arc<StorageClient>, session: Arc<UploadSession>) -> Self {
        Self {
            storage,
            session,
            verify_checksum: false,
        }
    }

    /// Compares the store's MD5 of every block with the local one.
    pub fn verify_checksum(mut self, enabled: bool) -> Self {
        self.verify_checksum = enabled;
        self
    }
}

impl Transport<Block> for BlockUploader {
    fn transfer<'a>(
        &'a self,
        block: &'a Block,
    ) -> BoxFuture<'a, Result<CompletionToken, BlockError>> {
        Box::pin(async move {
            let part = self
                .storage
                .put_block(&self.session, block.index, block.data.clone())
                .await?;
            if self.verify_checksum {
                let local = checksum_bytes(&block.data);
                if local != part.md5 {
                    return Err(BlockError::ChecksumMismatch {
                        expected: local,
                        actual: part.md5,
                    });
                }
                debug!(block = block.index, md5 = %local, "checksum verified");
            }
            Ok(part.etag)
        })
    }
}

/// Merges the acknowledged blocks of a session into one object.
pub struct MultipartCommitter {
    storage: Arc<StorageClient>,
    session: Arc<UploadSession>,
    file_name: String,
}

impl MultipartCommitter {
    pub fn new(
        storage: Arc<StorageClient>,
        session: Arc<UploadSession>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            session,
            file_name: file_name.into(),
        }
    }
}

impl Committer for MultipartCommitter {
    fn commit<'a>(
        &'a self,
        parts: Vec<CompletedPart>,
    ) -> BoxFuture<'a, Result<String, TransferError>> {
        Box::pin(async move {
            let parts = parts
                .into_iter()
                .map(|p| MergePart {
                    etag: p.token,
                    part_number: p.index,
                })
                .collect();
            let merged = self
                .storage
                .merge(&self.session, parts, &self.file_name)
                .await
                .map_err(|e| TransferError::Commit(e.to_string()))?;
            if merged.hash.is_empty() {
                return Err(TransferError::Commit("merge returned no hash".into()));
            }
            Ok(merged.hash)
        })
    }
}

/// Downloads ranges of one link straight into the destination file.
pub struct RangeFetcher {
    storage: Arc<StorageClient>,
    url: String,
    out: OutputFile,
}

impl RangeFetcher {
    pub fn new(storage: Arc<StorageClient>, url: impl Into<String>, out: OutputFile) -> Self {
        Self {
            storage,
            url: url.into(),
            out,
        }
    }
}

impl Transport<ByteRange> for RangeFetcher {
    fn transfer<'a>(
        &'a self,
        range: &'a ByteRange,
    ) -> BoxFuture<'a, Result<CompletionToken, BlockError>> {
        Box::pin(async move {
            let Some(header) = range.header_value() else {
                return Ok(String::new());
            };
            self.storage.fetch_range(&self.url, range, &self.out).await?;
            Ok(header)
        })
    }
}
