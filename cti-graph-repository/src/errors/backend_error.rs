//! Backend error types.
//!
//! This module defines the unified error type for all search backend operations,
//! covering connection faults, document and index operations, and alias management.

use thiserror::Error;

/// Unified errors from search backend operations.
///
/// Used by the `SearchBackend` trait and everything built on top of it. Connection
/// level failures are reported through [`BackendError::is_unavailable`] so callers can
/// tell a backend outage apart from a rejected request.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// Validation error (e.g., malformed identifier, empty index name).
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Failed to reach the search backend.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Failed to index a document.
    #[error("Index error: {0}")]
    IndexError(String),

    /// Failed to update a document.
    #[error("Update error: {0}")]
    UpdateError(String),

    /// Failed to execute a search or document fetch.
    #[error("Search error: {0}")]
    SearchError(String),

    /// Failed to read or modify an alias.
    #[error("Alias error: {0}")]
    AliasError(String),

    /// Failed to read an index mapping.
    #[error("Mapping error: {0}")]
    MappingError(String),

    /// Failed to create an index.
    #[error("Index creation error: {0}")]
    IndexCreationError(String),

    /// Failed to copy documents between indices.
    #[error("Reindex error: {0}")]
    ReindexError(String),

    /// Failed to parse a response from the search backend.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Failed to serialize data for the search backend.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Document not found.
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    /// Unknown error.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl BackendError {
    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::ConnectionError(msg.into())
    }

    /// Create an index error.
    pub fn index(msg: impl Into<String>) -> Self {
        Self::IndexError(msg.into())
    }

    /// Create an update error.
    pub fn update(msg: impl Into<String>) -> Self {
        Self::UpdateError(msg.into())
    }

    /// Create a search error.
    pub fn search(msg: impl Into<String>) -> Self {
        Self::SearchError(msg.into())
    }

    /// Create an alias error.
    pub fn alias(msg: impl Into<String>) -> Self {
        Self::AliasError(msg.into())
    }

    /// Create a mapping error.
    pub fn mapping(msg: impl Into<String>) -> Self {
        Self::MappingError(msg.into())
    }

    /// Create an index creation error.
    pub fn index_creation(msg: impl Into<String>) -> Self {
        Self::IndexCreationError(msg.into())
    }

    /// Create a reindex error.
    pub fn reindex(msg: impl Into<String>) -> Self {
        Self::ReindexError(msg.into())
    }

    /// Create a parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ParseError(msg.into())
    }

    /// Create a serialization error.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::SerializationError(msg.into())
    }

    /// Create a document not found error.
    pub fn document_not_found(index: &str, id: &str) -> Self {
        Self::DocumentNotFound(format!("index={}, id={}", index, id))
    }

    /// Create an unknown error.
    pub fn unknown(msg: impl Into<String>) -> Self {
        Self::Unknown(msg.into())
    }

    /// Returns true when the error means the backend could not be reached at all.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::ConnectionError(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_classification() {
        assert!(BackendError::connection("refused").is_unavailable());
        assert!(!BackendError::search("bad query").is_unavailable());
        assert!(!BackendError::document_not_found("tool", "1").is_unavailable());
    }

    #[test]
    fn test_display() {
        let err = BackendError::document_not_found("tool", "abc");
        assert_eq!(err.to_string(), "Document not found: index=tool, id=abc");
    }
}
