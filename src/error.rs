//! Unified error hierarchy.
//!
//! Component modules define their own narrow error enums (`GraphError`,
//! `StoreError`, `PersistenceError`, `WalError`); everything converges on
//! [`IndexError`] at the public API boundary. Every surfaced error carries
//! enough context to identify the offending input or file.

use std::path::PathBuf;

use thiserror::Error;

use crate::graph::GraphError;
use crate::persistence::{PersistenceError, WalError};
use crate::store::StoreError;

/// Errors surfaced at the index API boundary.
#[derive(Debug, Error)]
pub enum IndexError {
    /// A vector's length differs from the index dimension.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Dimension fixed by the first successful insert.
        expected: usize,
        /// Length of the rejected vector.
        got: usize,
    },

    /// `add` was called with an external id that already exists.
    #[error("duplicate id: {0:?}")]
    DuplicateId(String),

    /// The external id is unknown.
    ///
    /// Idempotent operations (`delete`, `get`, `contains`) report a missing
    /// id through their return value instead of this error.
    #[error("id not found: {0:?}")]
    IdNotFound(String),

    /// An empty vector was provided.
    #[error("empty vector")]
    EmptyVector,

    /// An empty external id was provided.
    #[error("empty id")]
    EmptyId,

    /// A vector contains NaN or infinite components.
    #[error("invalid vector: {0}")]
    InvalidVector(String),

    /// The allocator refused to grow a sub-store.
    #[error("allocation failed in {0}")]
    AllocationFailed(&'static str),

    /// Persistence recovery detected structural damage.
    #[error("corrupt state: {reason}{}", file_suffix(.file))]
    CorruptState {
        /// What failed validation.
        reason: String,
        /// The offending file, when one can be named.
        file: Option<PathBuf>,
    },

    /// A persistence read or write failed for OS reasons.
    #[error("io error on {path:?}: {source}")]
    Io {
        /// Path of the file being read or written.
        path: PathBuf,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// An immutable option was changed after the first insert.
    #[error("configuration frozen: {0} cannot change after the first insert")]
    ConfigurationFrozen(&'static str),

    /// `checkpoint` or `open` was called without a configured persistence path.
    #[error("persistence disabled: no persistence path configured")]
    PersistenceDisabled,
}

fn file_suffix(file: &Option<PathBuf>) -> String {
    match file {
        Some(p) => format!(" ({})", p.display()),
        None => String::new(),
    }
}

impl From<StoreError> for IndexError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AllocationFailed(component) => IndexError::AllocationFailed(component),
        }
    }
}

impl From<GraphError> for IndexError {
    fn from(err: GraphError) -> Self {
        IndexError::CorruptState {
            reason: err.to_string(),
            file: None,
        }
    }
}

impl From<PersistenceError> for IndexError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::Io { path, source } => IndexError::Io { path, source },
            PersistenceError::Corrupt { reason, file } => IndexError::CorruptState { reason, file },
        }
    }
}

impl From<WalError> for IndexError {
    fn from(err: WalError) -> Self {
        match err {
            WalError::Io { path, source } => IndexError::Io { path, source },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_mismatch_display() {
        let err = IndexError::DimensionMismatch {
            expected: 16,
            got: 2,
        };
        assert_eq!(err.to_string(), "dimension mismatch: expected 16, got 2");
    }

    #[test]
    fn test_corrupt_state_display_names_file() {
        let err = IndexError::CorruptState {
            reason: "bad magic".into(),
            file: Some(PathBuf::from("/tmp/ix.graph")),
        };
        assert!(err.to_string().contains("/tmp/ix.graph"));
    }
}
