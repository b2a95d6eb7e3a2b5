//! Local file discovery for upload.
//!
//! Expands the paths given on the command line into the list of regular
//! files to upload, walking directories recursively.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// A regular file selected for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub path: PathBuf,
    /// Final path component, used as the remote file name.
    pub name: String,
    pub size: u64,
}

/// Result of expanding the input paths.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub files: Vec<LocalFile>,
    /// Inputs that do not exist.
    pub missing: Vec<PathBuf>,
    pub total_size: u64,
}

/// Expands `inputs` into regular files.
///
/// Missing inputs are reported, unreadable entries inside a directory are
/// logged and skipped. Directory entries are visited in name order.
pub fn scan_inputs(inputs: &[PathBuf]) -> ScanReport {
    let mut report = ScanReport::default();

    for input in inputs {
        let metadata = match std::fs::metadata(input) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %input.display(), "not found");
                report.missing.push(input.clone());
                continue;
            }
            Err(e) => {
                warn!(path = %input.display(), error = %e, "cannot stat, skipping");
                continue;
            }
        };

        if metadata.is_dir() {
            walk_dir(input, &mut report);
        } else if metadata.is_file() {
            push_file(input, metadata.len(), &mut report);
        }
    }

    report
}

fn walk_dir(dir: &Path, report: &mut ScanReport) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "cannot read directory, skipping");
            return;
        }
    };

    let mut entries: Vec<_> = entries.filter_map(Result::ok).collect();
    entries.sort_by_key(|e| e.path());

    for entry in entries {
        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot stat, skipping");
                continue;
            }
        };

        if file_type.is_dir() {
            walk_dir(&path, report);
        } else if file_type.is_symlink() {
            // Linked files are uploaded, linked directories are not walked.
            match std::fs::metadata(&path) {
                Ok(m) if m.is_file() => push_file(&path, m.len(), report),
                Ok(_) => debug!(path = %path.display(), "skipping linked directory"),
                Err(e) => warn!(path = %path.display(), error = %e, "broken link, skipping"),
            }
        } else if file_type.is_file() {
            match entry.metadata() {
                Ok(m) => push_file(&path, m.len(), report),
                Err(e) => warn!(path = %path.display(), error = %e, "cannot stat, skipping"),
            }
        }
    }
}

fn push_file(path: &Path, size: u64, report: &mut ScanReport) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned());
    report.files.push(LocalFile {
        path: path.to_path_buf(),
        name,
        size,
    });
    report.total_size += size;
}
