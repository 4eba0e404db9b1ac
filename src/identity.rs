//! Identity tags shared by one parent/child pair.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Returns a fresh, collision-free token.
///
/// Used for pair identities and per-invocation call ids.
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Routing token carried on every message of a parent/child pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Create a new random identity.
    pub fn generate() -> Self {
        Self(generate_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
