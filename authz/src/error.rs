//! Error types for policy evaluation.
//!
//! Messages carry enough detail for logs. Callers that face the network map
//! every variant to a plain deny and never echo these strings back.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthzError {
    /// Generated Cedar policy text failed to parse.
    #[error("Policy parsing failed: {0}")]
    PolicyParse(String),

    /// An entity could not be built from the request.
    #[error("Entity creation failed: {0}")]
    EntityCreation(String),

    /// The request context could not be built.
    #[error("Context creation failed: {0}")]
    ContextCreation(String),

    /// Cedar rejected the request itself.
    #[error("Authorization evaluation failed: {0}")]
    EvaluationError(String),
}

/// A specialized Result type for authorization operations.
pub type Result<T> = std::result::Result<T, AuthzError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuthzError::PolicyParse("invalid syntax".to_string());
        assert_eq!(err.to_string(), "Policy parsing failed: invalid syntax");

        let err = AuthzError::ContextCreation("bad json".to_string());
        assert_eq!(err.to_string(), "Context creation failed: bad json");
    }
}
