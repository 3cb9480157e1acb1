//! Error types for name parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating names.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The name is empty.
    #[error("{kind} cannot be empty")]
    Empty { kind: &'static str },

    /// The name is longer than allowed.
    #[error("{kind} exceeds {max} characters")]
    TooLong { kind: &'static str, max: usize },

    /// The name contains a character not allowed for its kind.
    #[error("invalid character {character:?} in {kind} '{value}'")]
    InvalidCharacter {
        kind: &'static str,
        character: char,
        value: String,
    },

    /// The name is structurally malformed.
    #[error("invalid {kind} '{value}': {message}")]
    InvalidFormat {
        kind: &'static str,
        value: String,
        message: &'static str,
    },
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty { .. })
    }
}
