//! Error types for container and binding operations.

use std::sync::Arc;

use thiserror::Error;

use crate::ValueKind;

/// Errors surfaced by the public container, binding, and factory surfaces.
///
/// Conflict outcomes are deliberately absent: a stale update and a broken
/// propagation cycle are silent no-ops, not failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The named field is not part of the container's schema.
    #[error("unknown field: {field}")]
    UnknownField {
        /// The field name that failed the lookup.
        field: Arc<str>,
    },

    /// The field exists but its access mode forbids reading it.
    #[error("field is not readable: {field}")]
    NotReadable {
        /// The field that refused the read.
        field: Arc<str>,
    },

    /// The field exists but its access mode forbids writing it directly.
    ///
    /// Propagated updates are exempt: a read-only field still follows the
    /// container it is bound to.
    #[error("field is not writable: {field}")]
    NotWritable {
        /// The field that refused the write.
        field: Arc<str>,
    },

    /// The value's kind does not match the field's declared kind.
    #[error("type mismatch on field {field}: expected {expected}, got {found}")]
    TypeMismatch {
        /// The field whose declaration was violated.
        field: Arc<str>,
        /// The kind the schema declares for the field.
        expected: ValueKind,
        /// The kind of the rejected value.
        found: ValueKind,
    },

    /// A multi-lock batch could not be fully acquired in time.
    ///
    /// Every lock acquired before the timeout has already been released.
    #[error("timed out acquiring lock {index} of {total} in a batch")]
    LockTimeout {
        /// Zero-based position of the lock that timed out.
        index: usize,
        /// Total number of locks in the batch.
        total: usize,
    },
}

impl SyncError {
    pub(crate) fn unknown_field(field: impl Into<Arc<str>>) -> Self {
        SyncError::UnknownField {
            field: field.into(),
        }
    }

    pub(crate) fn not_readable(field: impl Into<Arc<str>>) -> Self {
        SyncError::NotReadable {
            field: field.into(),
        }
    }

    pub(crate) fn not_writable(field: impl Into<Arc<str>>) -> Self {
        SyncError::NotWritable {
            field: field.into(),
        }
    }

    pub(crate) fn type_mismatch(
        field: impl Into<Arc<str>>,
        expected: ValueKind,
        found: ValueKind,
    ) -> Self {
        SyncError::TypeMismatch {
            field: field.into(),
            expected,
            found,
        }
    }
}
