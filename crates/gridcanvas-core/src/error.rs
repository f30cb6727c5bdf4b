//! Error types for gridcanvas-core

use thiserror::Error;

use crate::shape::{HolderId, ShapeId};

/// Shape store and canvas error type
#[derive(Debug, Error)]
pub enum Error {
    /// Mutation attempted on a shape leased by another holder
    #[error("shape {shape} is locked by {holder}")]
    LockConflict {
        /// Shape that was targeted
        shape: ShapeId,
        /// Current lease holder
        holder: HolderId,
    },

    /// No shape with this id in the store
    #[error("shape not found: {0}")]
    ShapeNotFound(ShapeId),

    /// `add` with an id that is already present
    #[error("shape already exists: {0}")]
    DuplicateShape(ShapeId),

    /// A remote buffer the document could not decode
    #[error("malformed update: {0}")]
    MalformedUpdate(String),

    /// A shape map in the document that does not describe a valid shape
    #[error("invalid shape record {id}: {reason}")]
    InvalidRecord {
        /// Key of the record
        id: String,
        /// What was wrong with it
        reason: String,
    },

    /// A command batch that failed to decode
    #[error("invalid command: {0}")]
    InvalidCommand(#[from] serde_json::Error),

    /// Error from the replicated document
    #[error("document error: {0}")]
    Automerge(#[from] automerge::AutomergeError),
}

impl Error {
    /// Lock conflicts and missing shapes are expected under concurrent
    /// editing and are safe to ignore
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::LockConflict { .. } | Self::ShapeNotFound(_) | Self::MalformedUpdate(_)
        )
    }

    /// Stable code for logs and protocol messages
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::LockConflict { .. } => "lock_conflict",
            Self::ShapeNotFound(_) => "shape_not_found",
            Self::DuplicateShape(_) => "duplicate_shape",
            Self::MalformedUpdate(_) => "malformed_update",
            Self::InvalidRecord { .. } => "invalid_record",
            Self::InvalidCommand(_) => "invalid_command",
            Self::Automerge(_) => "document_error",
        }
    }
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_conflict_is_recoverable() {
        let err = Error::LockConflict {
            shape: ShapeId::from("s1"),
            holder: HolderId::from("A"),
        };
        assert!(err.is_recoverable());
        assert_eq!(err.code(), "lock_conflict");
        assert!(err.to_string().contains("locked by A"));
    }

    #[test]
    fn test_from_serde_error() {
        let result: std::result::Result<i32, serde_json::Error> = serde_json::from_str("{");
        let err: Error = result.unwrap_err().into();
        assert_eq!(err.code(), "invalid_command");
        assert!(!err.is_recoverable());
    }
}
