//! Hash-gated atomic file writer.
//!
//! ## `atomic_write` protocol
//!
//! 1. Normalise line endings to LF.
//! 2. SHA-256 hash the normalised content.
//! 3. Hash the file currently on disk, if any.
//! 4. Skip if identical.
//! 5. Write to `<path>.fraktal.tmp` and apply the requested mode.
//! 6. Rename to final path (atomic on POSIX).

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{io_err, WorkspaceError};

/// Outcome of an individual file write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// File was written (content changed or did not previously exist).
    Written { path: PathBuf },
    /// File was skipped because the content on disk already matches.
    Unchanged { path: PathBuf },
}

impl WriteResult {
    pub fn path(&self) -> &Path {
        match self {
            WriteResult::Written { path } | WriteResult::Unchanged { path } => path,
        }
    }

    pub fn is_written(&self) -> bool {
        matches!(self, WriteResult::Written { .. })
    }
}

/// Hex SHA-256 of `bytes`.
pub fn digest(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

/// `<path>.fraktal.tmp`, always in the same directory as the target.
pub fn tmp_path_for(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.fraktal.tmp", path.display()))
}

/// Atomically write `content` to `path` unless the file already holds it.
///
/// `mode` is applied to the temporary file before the rename, so the final
/// path never exists with looser permissions.
pub fn atomic_write(
    path: &Path,
    content: &str,
    mode: Option<u32>,
) -> Result<WriteResult, WorkspaceError> {
    let normalized = content.replace("\r\n", "\n");
    let wanted = digest(normalized.as_bytes());

    if path.is_file() {
        let existing = std::fs::read(path).map_err(|e| io_err(path, e))?;
        if digest(&existing) == wanted {
            tracing::debug!(path = %path.display(), "unchanged");
            return Ok(WriteResult::Unchanged {
                path: path.to_path_buf(),
            });
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }

    let tmp = tmp_path_for(path);
    std::fs::write(&tmp, normalized.as_bytes()).map_err(|e| io_err(&tmp, e))?;
    if let Some(mode) = mode {
        if let Err(e) = set_mode(&tmp, mode) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }
    }

    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }

    tracing::debug!(path = %path.display(), "wrote");
    Ok(WriteResult::Written {
        path: path.to_path_buf(),
    })
}

#[cfg(unix)]
pub(crate) fn set_mode(path: &Path, mode: u32) -> Result<(), WorkspaceError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
pub(crate) fn set_mode(_path: &Path, _mode: u32) -> Result<(), WorkspaceError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn first_write_returns_written() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("IDENTITY.md");
        let result = atomic_write(&path, "hello", None).unwrap();
        assert!(result.is_written());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
    }

    #[test]
    fn same_content_is_unchanged() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("file.md");
        atomic_write(&path, "same content", None).unwrap();
        let result = atomic_write(&path, "same content", None).unwrap();
        assert!(matches!(result, WriteResult::Unchanged { .. }));
    }

    #[test]
    fn crlf_is_normalised_before_comparison() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("file.md");
        atomic_write(&path, "a\r\nb\r\n", None).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\nb\n");
        let again = atomic_write(&path, "a\nb\n", None).unwrap();
        assert!(!again.is_written());
    }

    #[test]
    fn changed_content_is_written() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("file.md");
        atomic_write(&path, "v1", None).unwrap();
        assert!(atomic_write(&path, "v2", None).unwrap().is_written());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "v2");
    }

    #[test]
    fn tmp_file_removed_after_write() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("clean.md");
        atomic_write(&path, "data", None).unwrap();
        assert!(!tmp_path_for(&path).exists(), ".fraktal.tmp must be cleaned up");
    }

    #[test]
    fn creates_parent_directories() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("memory").join("notes").join("today.md");
        atomic_write(&path, "x", None).unwrap();
        assert!(path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn mode_is_applied() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("SOUL.md");
        atomic_write(&path, "x", Some(0o640)).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
    }
}
