//! Error types for lumen_reactive

use thiserror::Error;

/// Errors that can occur when converting dynamic values into concrete types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// The value held a different variant than the conversion expected
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

/// Result type for lumen_reactive conversions
pub type Result<T> = std::result::Result<T, ValueError>;
