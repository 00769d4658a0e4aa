//! Error types for the entity model.

use thiserror::Error;

/// Errors raised while parsing or validating entity records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// The identifier is not of the form `<type>--<key>`.
    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    /// The identifier's type prefix does not agree with the entity type.
    #[error("Identifier {id} does not match entity type {entity_type}")]
    TypeMismatch { id: String, entity_type: String },

    /// The type is not part of the supported vocabulary.
    #[error("Unknown entity type: {0}")]
    UnknownType(String),

    /// A field required by the entity kind is absent or malformed.
    #[error("Missing field {field} on {id}")]
    MissingField { id: String, field: String },

    /// The record could not be decoded.
    #[error("Malformed entity: {0}")]
    Malformed(String),
}

impl ModelError {
    /// Create an invalid identifier error.
    pub fn invalid_id(id: impl Into<String>) -> Self {
        Self::InvalidId(id.into())
    }

    /// Create a missing field error.
    pub fn missing_field(id: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingField {
            id: id.into(),
            field: field.into(),
        }
    }

    /// Create a malformed entity error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}
