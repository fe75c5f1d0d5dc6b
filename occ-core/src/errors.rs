//! Structured error type for every `ContextManager`-reachable operation.
//!
//! Modeled after the teacher's `PatchError`-style idiom: one `thiserror` enum
//! with named-field variants rather than opaque strings, so a host layer can
//! build a `{code, message, details}` triple without re-parsing text.

use thiserror::Error;

/// The seven error kinds recognized by the engine.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("segment {segment_id} is pinned and cannot be {attempted}")]
    PinnedProtected {
        segment_id: String,
        attempted: &'static str,
    },

    #[error("storage shard for project {project_id} is corrupt: {reason}")]
    StorageCorrupt { project_id: String, reason: String },

    #[error("storage I/O failure at {path}: {source}")]
    StorageIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "requested {requested_tokens} tokens but only {available_tokens} available among candidates"
    )]
    CapacityExceeded {
        requested_tokens: u64,
        available_tokens: u64,
    },

    #[error("could not acquire lock for project {project_id} within the allotted time")]
    Concurrency { project_id: String },
}

impl ContextError {
    /// Stable machine-readable code for the `{code, message, details}` triple
    /// consumed by the outer tool layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::NotFound { .. } => "not_found",
            Self::PinnedProtected { .. } => "pinned_protected",
            Self::StorageCorrupt { .. } => "storage_corrupt",
            Self::StorageIo { .. } => "storage_io",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::Concurrency { .. } => "concurrency",
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

pub type ContextResult<T> = Result<T, ContextError>;

/// Outcome of a bulk operation over many ids: successes plus a per-id error
/// list, matching the "no silent partial mutation" propagation policy — an
/// id either succeeded or has an explicit entry explaining why not.
#[derive(Debug, Default)]
pub struct BulkResult<T> {
    pub succeeded: Vec<T>,
    pub errors: Vec<(String, ContextError)>,
}

impl<T> BulkResult<T> {
    pub fn new() -> Self {
        Self {
            succeeded: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn is_fully_successful(&self) -> bool {
        self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            ContextError::invalid_argument("bad").code(),
            "invalid_argument"
        );
        assert_eq!(
            ContextError::not_found("segment", "s1").code(),
            "not_found"
        );
    }

    #[test]
    fn bulk_result_tracks_partial_success() {
        let mut result: BulkResult<String> = BulkResult::new();
        result.succeeded.push("s1".to_string());
        result
            .errors
            .push(("s2".to_string(), ContextError::not_found("segment", "s2")));
        assert!(!result.is_fully_successful());
        assert_eq!(result.succeeded.len(), 1);
    }
}
