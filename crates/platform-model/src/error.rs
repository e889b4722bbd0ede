//! Model errors

use thiserror::Error;

/// Errors raised while validating or normalizing model values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// A field holds a value the cluster would reject
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Dotted path of the offending field
        field: String,
        /// Human readable reason
        reason: String,
    },
}

impl ModelError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
