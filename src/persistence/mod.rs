//! Persistence: checkpoint files and write-ahead log.
//!
//! A checkpoint writes three sibling files sharing a base path:
//! `<base>.vectors`, `<base>.graph`, `<base>.meta` (formats in
//! [`format`]), plus an optional `<base>.wal`. All integers are
//! little-endian and strings UTF-8; the layouts are bit-exact for
//! cross-implementation compatibility.
//!
//! Each file is written to a `.tmp` sibling and renamed into place, so an
//! interrupted checkpoint leaves the previous files and the in-memory index
//! untouched.

use std::path::{Path, PathBuf};

use thiserror::Error;

pub mod format;
pub mod wal;

pub use wal::{WalRecord, WalWriter};

/// Errors from checkpoint reads and writes.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The OS refused a read or write.
    #[error("io error on {path:?}: {source}")]
    Io {
        /// Path of the file being read or written.
        path: PathBuf,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A file failed structural validation.
    #[error("corrupt file: {reason}")]
    Corrupt {
        /// What failed validation.
        reason: String,
        /// The offending file.
        file: Option<PathBuf>,
    },
}

/// Errors from the write-ahead log.
#[derive(Debug, Error)]
pub enum WalError {
    /// The OS refused a read or write.
    #[error("io error on {path:?}: {source}")]
    Io {
        /// Path of the log file.
        path: PathBuf,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },
}

/// The sibling files derived from a configured base path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointPaths {
    /// `<base>.vectors`
    pub vectors: PathBuf,
    /// `<base>.graph`
    pub graph: PathBuf,
    /// `<base>.meta`
    pub meta: PathBuf,
    /// `<base>.wal`
    pub wal: PathBuf,
}

impl CheckpointPaths {
    /// Derives the sibling paths from `base`.
    #[must_use]
    pub fn new(base: &Path) -> Self {
        Self {
            vectors: with_suffix(base, ".vectors"),
            graph: with_suffix(base, ".graph"),
            meta: with_suffix(base, ".meta"),
            wal: with_suffix(base, ".wal"),
        }
    }

    /// Whether all three checkpoint files are present.
    ///
    /// A partially present checkpoint is treated as absent by recovery;
    /// the caller logs what it found.
    #[must_use]
    pub fn checkpoint_complete(&self) -> bool {
        self.vectors.exists() && self.graph.exists() && self.meta.exists()
    }

    /// Whether any checkpoint file is present.
    #[must_use]
    pub fn any_present(&self) -> bool {
        self.vectors.exists() || self.graph.exists() || self.meta.exists()
    }
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut s = base.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

/// Writes `bytes` to `path` via a `.tmp` sibling and an atomic rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    let tmp = with_suffix(path, ".tmp");
    std::fs::write(&tmp, bytes).map_err(|source| PersistenceError::Io {
        path: tmp.clone(),
        source,
    })?;
    std::fs::rename(&tmp, path).map_err(|source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn read_file(path: &Path) -> Result<Vec<u8>, PersistenceError> {
    std::fs::read(path).map_err(|source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_share_base() {
        let paths = CheckpointPaths::new(Path::new("/tmp/ix"));
        assert_eq!(paths.vectors, PathBuf::from("/tmp/ix.vectors"));
        assert_eq!(paths.graph, PathBuf::from("/tmp/ix.graph"));
        assert_eq!(paths.meta, PathBuf::from("/tmp/ix.meta"));
        assert_eq!(paths.wal, PathBuf::from("/tmp/ix.wal"));
    }

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert!(!path.with_extension("tmp").exists());
    }
}
