//! Error types of the inventory engine.
//!
//! Everything except [`SnapshotError`] is a reported outcome of a single
//! command: the store is left exactly as it was and the command still
//! consumes its slot in the log.

use thiserror::Error;

use crate::engine::command::EntityKind;
use crate::engine::entry::PrintJobStatus;

/// An entity field violates a domain rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{kind} {field} cannot be empty")]
    EmptyField {
        kind: EntityKind,
        field: &'static str,
    },

    #[error("{kind} {field} must be positive, got {value}")]
    NotPositive {
        kind: EntityKind,
        field: &'static str,
        value: i64,
    },

    #[error("remaining weight {remaining} g must be between 0 and total weight {total} g")]
    RemainingOutOfRange { remaining: i64, total: i64 },
}

/// Encoding or decoding of a command or its payload failed.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode {what}: {source}")]
    Encode {
        what: &'static str,
        source: bincode::Error,
    },

    #[error("failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        source: bincode::Error,
    },
}

/// Broad class of an [`ApplyError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Decode,
    Validation,
    NotFound,
    Invariant,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Decode => "decode",
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Invariant => "invariant",
        }
    }
}

/// Rejection of a committed command by the apply engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("malformed command: {0}")]
    Decode(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: EntityKind, id: String },

    #[error("insufficient filament: required {required} g, available {available} g")]
    InsufficientFilament { required: i64, available: i64 },

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: PrintJobStatus,
        to: PrintJobStatus,
    },
}

impl ApplyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApplyError::Decode(_) => ErrorKind::Decode,
            ApplyError::Validation(_) => ErrorKind::Validation,
            ApplyError::NotFound { .. } => ErrorKind::NotFound,
            ApplyError::AlreadyExists { .. }
            | ApplyError::InsufficientFilament { .. }
            | ApplyError::InvalidTransition { .. } => ErrorKind::Invariant,
        }
    }

    pub(crate) fn not_found(kind: EntityKind, id: &str) -> Self {
        ApplyError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

impl From<CodecError> for ApplyError {
    fn from(e: CodecError) -> Self {
        ApplyError::Decode(e.to_string())
    }
}

/// A snapshot could not be produced, transferred or restored.
///
/// A failed restore leaves the previous store contents in place.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to encode snapshot: {0}")]
    Encode(bincode::Error),

    #[error("failed to decode snapshot: {0}")]
    Decode(bincode::Error),

    #[error("unsupported snapshot version {0}")]
    Version(u32),

    #[error("corrupt snapshot: {0}")]
    Corrupt(String),

    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),
}
