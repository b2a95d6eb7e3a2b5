use std::io;
use std::path::Path;

use bytes::Bytes;
use md5::{Digest, Md5};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::TransferError;
use crate::pool::WorkItem;

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes MD5 of `data` and returns the lowercase hex digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Number of blocks needed to cover `size` bytes.
pub fn block_count(size: u64, block_size: usize) -> Result<u32, TransferError> {
    if block_size == 0 {
        return Err(TransferError::InvalidConfig("block size must be positive".into()));
    }
    let count = size.div_ceil(block_size as u64);
    u32::try_from(count).map_err(|_| {
        TransferError::InvalidConfig(format!("{count} blocks do not fit in one session"))
    })
}

// ---------------------------------------------------------------------------
// Upload blocks
// ---------------------------------------------------------------------------

/// One indexed slice of an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// 1-based position within the file.
    pub index: u32,
    /// Byte offset of the first byte.
    pub offset: u64,
    pub data: Bytes,
}

impl Block {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl WorkItem for Block {
    fn index(&self) -> u32 {
        self.index
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Reads a source sequentially in fixed-size blocks.
///
/// Only the first `size` bytes are read, so a file that grows while it is
/// being uploaded still yields the block count computed at open time. Every
/// block except the last is exactly `block_size` bytes long.
pub struct BlockReader<R> {
    reader: R,
    block_size: usize,
    size: u64,
    offset: u64,
    next_index: u32,
}

impl BlockReader<tokio::fs::File> {
    /// Opens `path` and reads its current length.
    pub async fn open(path: &Path, block_size: usize) -> Result<Self, io::Error> {
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        Ok(Self::new(file, size, block_size))
    }
}

impl<R: AsyncRead + Unpin> BlockReader<R> {
    pub fn new(reader: R, size: u64, block_size: usize) -> Self {
        Self {
            reader,
            block_size: block_size.max(1),
            size,
            offset: 0,
            next_index: 1,
        }
    }

    /// Reads the next block. Returns `None` at the end of the source.
    pub async fn next_block(&mut self) -> Result<Option<Block>, io::Error> {
        let remaining = self.size - self.offset;
        if remaining == 0 {
            return Ok(None);
        }

        let want = remaining.min(self.block_size as u64) as usize;
        let mut buf = vec![0u8; want];
        let mut filled = 0;
        while filled < want {
            let n = self.reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            self.size = self.offset;
            return Ok(None);
        }
        buf.truncate(filled);

        let block = Block {
            index: self.next_index,
            offset: self.offset,
            data: Bytes::from(buf),
        };
        self.offset += filled as u64;
        self.next_index += 1;
        if filled < want {
            // Source ended early; this was the last block.
            self.size = self.offset;
        }
        Ok(Some(block))
    }

    /// Bytes this reader will cover.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Blocks this reader yields in total.
    pub fn expected_blocks(&self) -> Result<u32, TransferError> {
        block_count(self.size, self.block_size)
    }
}

// ---------------------------------------------------------------------------
// Download ranges
// ---------------------------------------------------------------------------

/// Half-open byte span `[start, end)` of a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub index: u32,
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// `Range` header value (`bytes=<first>-<last>`, inclusive).
    ///
    /// Empty ranges have no header and need no request.
    pub fn header_value(&self) -> Option<String> {
        if self.is_empty() {
            None
        } else {
            Some(format!("bytes={}-{}", self.start, self.end - 1))
        }
    }
}

impl WorkItem for ByteRange {
    fn index(&self) -> u32 {
        self.index
    }

    fn len(&self) -> u64 {
        ByteRange::len(self)
    }
}

/// Splits `length` bytes into download ranges.
///
/// Parallel ranges are used only when the content is larger than
/// `threshold`, the server advertises range support and `parallelism` is
/// above one. Then `parallelism + 1` ranges of `length / parallelism` bytes
/// are produced and the last one runs to `length`, absorbing the remainder
/// (it is empty when the division is exact). Otherwise one range covers
/// everything.
pub fn partition_ranges(
    length: u64,
    parallelism: usize,
    accepts_ranges: bool,
    threshold: u64,
) -> Vec<ByteRange> {
    let parallel = if length > threshold && accepts_ranges && parallelism > 1 {
        parallelism as u64
    } else {
        1
    };

    if parallel == 1 {
        return vec![ByteRange {
            index: 1,
            start: 0,
            end: length,
        }];
    }

    let span = length / parallel;
    (0..=parallel)
        .map(|i| {
            let start = i * span;
            let end = if i == parallel { length } else { start + span };
            ByteRange {
                index: i as u32 + 1,
                start,
                end,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RANGE_THRESHOLD;
    use std::io::Cursor;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    async fn read_all<R: AsyncRead + Unpin>(reader: &mut BlockReader<R>) -> Vec<Block> {
        let mut blocks = Vec::new();
        while let Some(block) = reader.next_block().await.unwrap() {
            blocks.push(block);
        }
        blocks
    }

    #[test]
    fn checksum_is_md5_hex() {
        assert_eq!(
            checksum_bytes(b"hello world"),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
    }

    #[test]
    fn block_count_rounds_up() {
        assert_eq!(block_count(0, 4).unwrap(), 0);
        assert_eq!(block_count(4, 4).unwrap(), 1);
        assert_eq!(block_count(5, 4).unwrap(), 2);
        assert!(block_count(10, 0).is_err());
    }

    #[tokio::test]
    async fn reader_reads_all() {
        let data = b"AABBCCDDEE".to_vec(); // 10 bytes.
        let mut reader = BlockReader::new(Cursor::new(data), 10, 4);
        assert_eq!(reader.expected_blocks().unwrap(), 3);

        let blocks = read_all(&mut reader).await;
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].index, 1);
        assert_eq!(&blocks[0].data[..], b"AABB");
        assert_eq!(blocks[1].offset, 4);
        assert_eq!(&blocks[1].data[..], b"CCDD");
        assert_eq!(blocks[2].index, 3);
        assert_eq!(&blocks[2].data[..], b"EE");
        assert!(reader.next_block().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ten_megabytes_in_four_mebibyte_blocks() {
        let data = pattern(10_000_000);
        let mut reader = BlockReader::new(Cursor::new(data), 10_000_000, 4_194_304);

        let sizes: Vec<usize> = read_all(&mut reader).await.iter().map(Block::size).collect();
        assert_eq!(sizes, vec![4_194_304, 4_194_304, 1_611_392]);
    }

    #[tokio::test]
    async fn blocks_partition_the_file() {
        for (size, block_size) in [(1usize, 1usize), (7, 3), (9, 3), (1000, 64), (4096, 4096)] {
            let data = pattern(size);
            let mut reader = BlockReader::new(Cursor::new(data.clone()), size as u64, block_size);
            let blocks = read_all(&mut reader).await;

            assert_eq!(blocks.len(), size.div_ceil(block_size));
            let mut expected_offset = 0u64;
            for (i, block) in blocks.iter().enumerate() {
                assert_eq!(block.index as usize, i + 1);
                assert_eq!(block.offset, expected_offset);
                expected_offset += block.size() as u64;
            }
            assert_eq!(expected_offset, size as u64);

            let joined: Vec<u8> = blocks.iter().flat_map(|b| b.data.to_vec()).collect();
            assert_eq!(joined, data);
        }
    }

    #[tokio::test]
    async fn empty_source_yields_nothing() {
        let mut reader = BlockReader::new(Cursor::new(Vec::new()), 0, 8);
        assert!(reader.next_block().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn short_source_stops_early() {
        // Declared 10 bytes but only 6 available.
        let mut reader = BlockReader::new(Cursor::new(b"ABCDEF".to_vec()), 10, 4);
        let blocks = read_all(&mut reader).await;
        assert_eq!(blocks.len(), 2);
        assert_eq!(&blocks[1].data[..], b"EF");
        assert_eq!(reader.size(), 6);
    }

    #[tokio::test]
    async fn reader_ignores_bytes_past_declared_size() {
        let mut reader = BlockReader::new(Cursor::new(b"ABCDEFGH".to_vec()), 5, 4);
        let blocks = read_all(&mut reader).await;
        assert_eq!(blocks.len(), 2);
        assert_eq!(&blocks[1].data[..], b"E");
    }

    #[tokio::test]
    async fn open_reads_file_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("src.bin");
        std::fs::write(&path, pattern(100)).unwrap();

        let mut reader = BlockReader::open(&path, 30).await.unwrap();
        assert_eq!(reader.size(), 100);
        assert_eq!(read_all(&mut reader).await.len(), 4);
    }

    #[test]
    fn fifty_megabytes_four_ways() {
        let ranges = partition_ranges(50_000_000, 4, true, RANGE_THRESHOLD);
        assert_eq!(ranges.len(), 5);
        assert_eq!(ranges[0].start, 0);
        assert_eq!(ranges[0].end, 12_500_000);
        assert_eq!(ranges[3].end, 50_000_000);
        assert_eq!(ranges[4].end, 50_000_000);
        assert!(ranges[4].is_empty());
        assert_eq!(ranges[4].header_value(), None);
    }

    #[test]
    fn remainder_lands_in_last_range() {
        let length = 20 * 1024 * 1024 + 3;
        let ranges = partition_ranges(length, 4, true, RANGE_THRESHOLD);
        assert_eq!(ranges.len(), 5);
        assert_eq!(ranges[4].len(), 3);
        assert_eq!(ranges[4].end, length);
    }

    #[test]
    fn ranges_cover_without_gaps() {
        for length in [10_485_761u64, 33_333_333, 50_000_000] {
            for parallelism in 2..8 {
                let ranges = partition_ranges(length, parallelism, true, RANGE_THRESHOLD);
                assert_eq!(ranges.len(), parallelism + 1);
                let mut next = 0;
                for (i, range) in ranges.iter().enumerate() {
                    assert_eq!(range.index as usize, i + 1);
                    assert_eq!(range.start, next);
                    next = range.end;
                }
                assert_eq!(next, length);
            }
        }
    }

    #[test]
    fn small_or_unranged_downloads_use_one_range() {
        let small = partition_ranges(1024, 4, true, RANGE_THRESHOLD);
        assert_eq!(small, vec![ByteRange { index: 1, start: 0, end: 1024 }]);

        let unranged = partition_ranges(50_000_000, 4, false, RANGE_THRESHOLD);
        assert_eq!(unranged.len(), 1);
        assert_eq!(unranged[0].end, 50_000_000);

        let serial = partition_ranges(50_000_000, 1, true, RANGE_THRESHOLD);
        assert_eq!(serial.len(), 1);
    }

    #[test]
    fn header_is_inclusive() {
        let range = ByteRange {
            index: 2,
            start: 100,
            end: 200,
        };
        assert_eq!(range.header_value().as_deref(), Some("bytes=100-199"));
        assert_eq!(range.len(), 100);
    }
}
