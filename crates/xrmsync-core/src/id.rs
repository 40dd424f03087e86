//! Record identifiers.
//!
//! Dataverse hands out GUIDs both bare and wrapped in braces depending on the
//! surface that produced them. [`RecordId`] only ever holds the bare form, so
//! every comparison and every URL or filter built from an id uses the same
//! spelling.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Normalized record identifier (enclosing braces and whitespace stripped).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(normalize_guid(raw.as_ref()))
    }

    /// Returns `None` when the value is empty after normalization.
    pub fn parse(raw: &str) -> Option<Self> {
        let id = Self::new(raw);
        if id.0.is_empty() { None } else { Some(id) }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::new(raw))
    }
}

/// Strip enclosing braces (and any stray braces) from a GUID string.
pub fn normalize_guid(value: &str) -> String {
    value.trim().replace(['{', '}'], "")
}

/// Quote a string literal for an OData `$filter` expression.
pub fn odata_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
