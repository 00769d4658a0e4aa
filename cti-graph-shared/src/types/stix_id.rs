//! Type-prefixed entity identifiers.
//!
//! Identifiers have the form `<type>--<key>`, e.g.
//! `indicator--8e2e2d2b-17d4-4cbf-938f-98ee46b3cd3f`. The key is used as the
//! backend document id and the prefix selects the per-type index.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ModelError;
use crate::types::entity_type::EntityType;

/// Namespace for deterministic (content-derived) identifiers.
const ID_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_9a3e_52d4_4b0e_8f35_1e7a_2c9d_4b60);

/// A type-prefixed entity identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StixId(String);

impl StixId {
    /// Separator between the type prefix and the key.
    pub const DELIMITER: &'static str = "--";

    /// Parse an identifier, checking it has a non-empty prefix and key.
    pub fn parse(value: &str) -> Result<Self, ModelError> {
        let (prefix, key) = value
            .split_once(Self::DELIMITER)
            .ok_or_else(|| ModelError::invalid_id(value))?;
        let prefix_ok = !prefix.is_empty()
            && prefix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if !prefix_ok || key.is_empty() {
            return Err(ModelError::invalid_id(value));
        }
        Ok(Self(value.to_string()))
    }

    /// Generate a fresh random identifier for the given type.
    pub fn generate(entity_type: EntityType) -> Self {
        Self::from_parts(entity_type, Uuid::new_v4())
    }

    /// Derive a deterministic identifier from a seed; equal seeds always
    /// produce equal identifiers.
    pub fn deterministic(entity_type: EntityType, seed: &str) -> Self {
        Self::from_parts(entity_type, Uuid::new_v5(&ID_NAMESPACE, seed.as_bytes()))
    }

    fn from_parts(entity_type: EntityType, key: Uuid) -> Self {
        Self(format!("{}{}{}", entity_type.as_str(), Self::DELIMITER, key))
    }

    /// The type prefix (everything before the delimiter).
    pub fn type_prefix(&self) -> &str {
        self.split().0
    }

    /// The key (everything after the delimiter), used as backend document id.
    pub fn key(&self) -> &str {
        self.split().1
    }

    /// The entity type named by the prefix, if it is part of the vocabulary.
    pub fn entity_type(&self) -> Option<EntityType> {
        self.type_prefix().parse().ok()
    }

    /// Returns true when the prefix names the given type.
    pub fn is_type(&self, entity_type: EntityType) -> bool {
        self.type_prefix() == entity_type.as_str()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn split(&self) -> (&str, &str) {
        // Construction guarantees the delimiter is present.
        self.0
            .split_once(Self::DELIMITER)
            .unwrap_or((self.0.as_str(), ""))
    }
}

impl fmt::Display for StixId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StixId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for StixId {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<StixId> for String {
    fn from(id: StixId) -> Self {
        id.0
    }
}

impl AsRef<str> for StixId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
