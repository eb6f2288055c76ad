//! Error types for the value crate.

use thiserror::Error;

/// Result type for value operations.
pub type ValueResult<T> = Result<T, ValueError>;

/// Errors that can occur while converting or encoding values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// NaN has no canonical form and cannot be fingerprinted.
    #[error("NaN values are forbidden in canonical encoding")]
    NaNForbidden,

    /// A value had a different shape than the caller required.
    #[error("unexpected value type: expected {expected}, found {found}")]
    UnexpectedType {
        /// The type the caller asked for.
        expected: &'static str,
        /// The type actually present.
        found: &'static str,
    },
}

impl ValueError {
    /// Create an unexpected type error.
    pub fn unexpected_type(expected: &'static str, found: &'static str) -> Self {
        Self::UnexpectedType { expected, found }
    }
}
