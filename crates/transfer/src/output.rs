use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;

/// Destination of a download, written at explicit offsets.
///
/// The file is sized up front, so every range can be written independently
/// and in any order. Ranges never overlap, which lets all workers share one
/// handle without locking.
#[derive(Clone)]
pub struct OutputFile {
    file: Arc<File>,
    path: PathBuf,
    len: u64,
}

impl OutputFile {
    /// Creates (or truncates) `path` and sizes it to `len` bytes.
    pub fn create(path: &Path, len: u64) -> Result<Self, io::Error> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.set_len(len)?;
        Ok(Self {
            file: Arc::new(file),
            path: path.to_path_buf(),
            len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Writes `data` at `offset` and returns the number of bytes kept.
    ///
    /// Bytes past the sized length are dropped, so an over-long response
    /// cannot grow the file.
    pub async fn write_at(&self, offset: u64, data: Bytes) -> Result<usize, io::Error> {
        if offset >= self.len || data.is_empty() {
            return Ok(0);
        }
        let keep = (self.len - offset).min(data.len() as u64) as usize;
        let data = data.slice(..keep);
        let file = Arc::clone(&self.file);

        tokio::task::spawn_blocking(move || write_all_at(&file, &data, offset))
            .await
            .map_err(io::Error::other)??;
        Ok(keep)
    }

    /// Flushes file contents to disk.
    pub async fn sync(&self) -> Result<(), io::Error> {
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || file.sync_all())
            .await
            .map_err(io::Error::other)?
    }
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        let n = file.seek_write(buf, offset)?;
        if n == 0 {
            return Err(io::Error::from(io::ErrorKind::WriteZero));
        }
        buf = &buf[n..];
        offset += n as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn out_of_order_writes_land_at_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let out = OutputFile::create(&path, 11).unwrap();

        out.write_at(6, Bytes::from_static(b"World")).await.unwrap();
        out.write_at(0, Bytes::from_static(b"Hello ")).await.unwrap();
        out.sync().await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"Hello World");
    }

    #[tokio::test]
    async fn create_presizes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sized.bin");
        let out = OutputFile::create(&path, 4096).unwrap();
        assert_eq!(out.len(), 4096);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4096);
    }

    #[tokio::test]
    async fn writes_past_end_are_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clamp.bin");
        let out = OutputFile::create(&path, 4).unwrap();

        let kept = out.write_at(2, Bytes::from_static(b"abcdef")).await.unwrap();
        assert_eq!(kept, 2);
        let kept = out.write_at(4, Bytes::from_static(b"zz")).await.unwrap();
        assert_eq!(kept, 0);
        assert_eq!(std::fs::read(&path).unwrap(), b"\0\0ab");
    }

    #[tokio::test]
    async fn create_makes_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("f.bin");
        OutputFile::create(&path, 1).unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn concurrent_disjoint_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("par.bin");
        let out = OutputFile::create(&path, 1000).unwrap();

        let mut tasks = Vec::new();
        for i in 0..10u8 {
            let out = out.clone();
            tasks.push(tokio::spawn(async move {
                out.write_at(i as u64 * 100, Bytes::from(vec![i; 100]))
                    .await
                    .unwrap();
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        let content = std::fs::read(&path).unwrap();
        for i in 0..10usize {
            assert!(content[i * 100..(i + 1) * 100].iter().all(|&b| b == i as u8));
        }
    }
}
