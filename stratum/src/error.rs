use thiserror::Error;

use crate::ids::{DatabaseId, PageKey, ResourceId, Revision};

/// Error kinds for the page store. None of these are used for internal
/// control flow within a single call — `FrameReused` in particular is
/// a typed retry signal, not a panic.
#[derive(Debug, Error, Clone)]
pub enum StratumError {
    #[error("page {page_key} of resource {resource_id:?} not found at revision {revision}")]
    NotFound {
        resource_id: ResourceId,
        page_key: PageKey,
        revision: Revision,
    },

    #[error("frame for page {page_key} was reused while a guard was outstanding, retry")]
    FrameReused { page_key: PageKey },

    #[error("pool exhausted: {0}")]
    PoolExhausted(&'static str),

    #[error("I/O failure on database {database_id:?}: {message}")]
    IoFailure {
        database_id: DatabaseId,
        message: String,
    },

    #[error("fragment for page {page_key} at revision {revision} is corrupt: {reason}")]
    CorruptFragment {
        page_key: PageKey,
        revision: Revision,
        reason: &'static str,
    },

    #[error("internal contract violation: {0}")]
    ContractViolation(&'static str),
}

impl StratumError {
    /// `true` for errors a caller can retry verbatim (after reloading
    /// whatever went stale), as opposed to one that must propagate.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::FrameReused { .. })
    }
}

pub type Result<T> = std::result::Result<T, StratumError>;
