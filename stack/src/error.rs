//! Declaration-time errors.
//!
//! Every variant aborts the declaration pass. A graph is only usable once it
//! is complete, so nothing here is meant to be recovered from locally.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StackError {
    /// A handle was used that this builder never produced, or that names a
    /// resource of a different kind.
    #[error("Dangling reference: {0}")]
    DanglingReference(String),

    /// The graph breaks one of its structural rules.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// A binding that may exist only once was declared twice.
    #[error("Duplicate binding: {0}")]
    DuplicateBinding(String),

    /// Two resources were declared with the same logical id.
    #[error("Duplicate logical id: {0}")]
    DuplicateId(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The finalized graph could not be written or read back.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, StackError>;
