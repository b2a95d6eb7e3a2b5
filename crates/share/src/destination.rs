//! Where downloaded files land on disk.

use std::path::{Component, Path, PathBuf};

use crate::error::ShareError;

/// Validates a file name announced by the service.
///
/// The name is joined onto a local directory, so it must stay inside it.
/// Rejects:
/// - Empty names
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent directory traversal (`..`)
/// - Windows prefix components (`C:`, `\\server`)
pub fn validate_remote_name(name: &str) -> Result<(), ShareError> {
    if name.trim().is_empty() {
        return Err(ShareError::InvalidName("empty name".into()));
    }

    let path = Path::new(name);
    if path.is_absolute() {
        return Err(ShareError::InvalidName(format!("absolute path: {name}")));
    }

    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(ShareError::InvalidName(format!("parent traversal: {name}")));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(ShareError::InvalidName(format!("absolute path: {name}")));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    Ok(())
}

/// Resolves the local path for a downloaded file.
///
/// - `prefix` is an existing directory: the file goes inside it.
/// - `prefix` is an existing file: it is overwritten.
/// - `prefix` does not exist: it names the file when the share holds a
///   single file, otherwise a directory that will be created.
pub fn resolve_destination(
    prefix: &Path,
    file_name: &str,
    single_file: bool,
) -> Result<PathBuf, ShareError> {
    validate_remote_name(file_name)?;

    match std::fs::metadata(prefix) {
        Ok(m) if m.is_dir() => Ok(prefix.join(file_name)),
        Ok(_) => Ok(prefix.to_path_buf()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if single_file {
                Ok(prefix.to_path_buf())
            } else {
                Ok(prefix.join(file_name))
            }
        }
        Err(e) => Err(e.into()),
    }
}
