use crate::constants::MAX_SCHEMA_NAME_BYTES;
use crate::error::SdnError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Validate a schema name against the safe character class.
///
/// Accepted: 1–256 bytes of ASCII alphanumerics plus `.`, `_`, `-`, with no
/// path-traversal token (`..`). This predicate is applied at every boundary
/// where a schema name crosses into the node: frame decode, topic derivation,
/// store writes, and API paths.
pub fn validate_schema_name(name: &str) -> Result<(), SdnError> {
    if name.is_empty() || name.len() > MAX_SCHEMA_NAME_BYTES {
        return Err(SdnError::InvalidSchemaName);
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-')
    {
        return Err(SdnError::InvalidSchemaName);
    }
    // The character class already excludes '/', '\\' and whitespace; ".."
    // is the remaining traversal spelling.
    if name.contains("..") {
        return Err(SdnError::InvalidSchemaName);
    }
    Ok(())
}

/// A schema name that has passed [`validate_schema_name`].
///
/// Constructing one is the only way to hand a schema name to the store or the
/// topic fabric, so the predicate cannot be skipped on any path.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaName(String);

impl SchemaName {
    pub fn new(name: impl Into<String>) -> Result<Self, SdnError> {
        let name = name.into();
        validate_schema_name(&name)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SchemaName {
    type Error = SdnError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        SchemaName::new(s)
    }
}

impl From<SchemaName> for String {
    fn from(s: SchemaName) -> Self {
        s.0
    }
}

impl std::str::FromStr for SchemaName {
    type Err = SdnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SchemaName::new(s)
    }
}

impl fmt::Display for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SchemaName({})", self.0)
    }
}
