//! Principal identities
//!
//! Approvers, admins, executors and protected resources are all addressed
//! by an `Identity`. A resource's identity doubles as the dispatch target.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque reference to a principal on the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(Uuid);

impl Identity {
    /// Create a fresh random identity
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Raw bytes, used by the canonical action encoding
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Identity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| format!("Invalid identity '{}': {}", s, e))
    }
}

impl From<Uuid> for Identity {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}
