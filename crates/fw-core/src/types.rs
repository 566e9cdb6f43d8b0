//! Core identity types with validation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// The provided value was whitespace-only.
    #[error("{field} cannot be blank")]
    Blank { field: &'static str },
}

/// A validated client name.
///
/// Client names must be non-empty and contain at least one non-whitespace
/// character. They identify a monitored client in the registry, in benchmark
/// keys, and in history rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClientName(String);

impl ClientName {
    /// Creates a new name after validation.
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ValidationError::Empty {
                field: "client name",
            });
        }
        if name.trim().is_empty() {
            return Err(ValidationError::Blank {
                field: "client name",
            });
        }
        Ok(Self(name))
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ClientName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ClientName> for String {
    fn from(name: ClientName) -> Self {
        name.0
    }
}

impl fmt::Display for ClientName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ClientName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifies one execution slot of one client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotIdentifier {
    /// The owning client.
    pub client: ClientName,
    /// The slot id within the client.
    pub slot_id: u32,
}

impl SlotIdentifier {
    pub fn new(client: ClientName, slot_id: u32) -> Self {
        Self { client, slot_id }
    }

    /// Canonical slot name used for history rows (e.g. `folder-1:02`).
    #[must_use]
    pub fn name(&self) -> String {
        format!("{}:{:02}", self.client, self.slot_id)
    }
}

impl fmt::Display for SlotIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:02}", self.client, self.slot_id)
    }
}

/// The work unit 4-tuple: project, run, clone, generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct ProjectKey {
    pub project: u32,
    pub run: u32,
    pub clone: u32,
    #[serde(rename = "gen")]
    pub generation: u32,
}

impl ProjectKey {
    pub const fn new(project: u32, run: u32, clone: u32, generation: u32) -> Self {
        Self {
            project,
            run,
            clone,
            generation,
        }
    }
}

impl fmt::Display for ProjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "P{} (R{}, C{}, G{})",
            self.project, self.run, self.clone, self.generation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_name_rejects_empty() {
        assert!(ClientName::new("").is_err());
        assert!(ClientName::new("   ").is_err());
        assert!(ClientName::new("folder-1").is_ok());
    }

    #[test]
    fn client_name_serde_roundtrip() {
        let name = ClientName::new("rig-a").unwrap();
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"rig-a\"");
        let parsed: ClientName = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, name);
    }

    #[test]
    fn client_name_serde_rejects_empty() {
        let result: Result<ClientName, _> = serde_json::from_str("\"\"");
        assert!(result.is_err());
    }

    #[test]
    fn slot_identifier_name_pads_slot_id() {
        let slot = SlotIdentifier::new(ClientName::new("rig-a").unwrap(), 2);
        assert_eq!(slot.name(), "rig-a:02");
        assert_eq!(slot.to_string(), "rig-a:02");
    }

    #[test]
    fn project_key_display() {
        let key = ProjectKey::new(16814, 0, 1, 2);
        assert_eq!(key.to_string(), "P16814 (R0, C1, G2)");
    }
}
