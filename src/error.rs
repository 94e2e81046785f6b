//! Error taxonomy for the identity core.
//!
//! Boundary errors (session preconditions, chain verification, shape
//! mismatches) surface to callers; numeric pathology never does — it is
//! absorbed by the guards in `utils::numerics`.

use thiserror::Error;

/// Result type for identity-core operations
pub type IdentityResult<T> = Result<T, IdentityError>;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("a session is already active: {0}")]
    SessionAlreadyActive(String),

    #[error("no active session")]
    NoActiveSession,

    #[error("vocabulary supports at most {max} dimensions, got {got}")]
    TooManyDimensions { max: usize, got: usize },

    #[error("length mismatch in {what}: {left} vs {right}")]
    LengthMismatch {
        what: &'static str,
        left: usize,
        right: usize,
    },

    #[error("declaration chain tampered at link {link}")]
    ChainTampered { link: usize },

    #[error("persisted chain state is invalid: {0}")]
    ChainStateInvalid(String),

    #[error(transparent)]
    Storage(#[from] crate::core::storage::StorageError),
}
