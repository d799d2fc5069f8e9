//! Typed administrative commands and action hashing
//!
//! A `Call` is the (target, value, payload) triple an executor forwards to a
//! protected resource. The payload is a closed set of commands rather than
//! an opaque byte blob.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::identity::Identity;

/// A price source that can be installed on a priced resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceProvider {
    pub id: Identity,
    /// Native units charged per token
    pub unit_price: u64,
}

impl PriceProvider {
    pub fn new(unit_price: u64) -> Self {
        Self {
            id: Identity::new(),
            unit_price,
        }
    }
}

/// Owner-gated operations exposed by a protected resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    /// Replace the resource's price provider
    SetPriceProvider { provider: PriceProvider },
    /// Send the resource's entire native balance to `recipient`
    WithdrawNative { recipient: Identity },
    /// Hand the owner capability to another principal
    TransferOwnership { new_owner: Identity },
}

impl Command {
    /// Stable operation name
    pub fn selector(&self) -> &'static str {
        match self {
            Command::SetPriceProvider { .. } => "set_price_provider",
            Command::WithdrawNative { .. } => "withdraw_native",
            Command::TransferOwnership { .. } => "transfer_ownership",
        }
    }

    /// Canonical byte encoding: selector, a zero separator, then fixed-width arguments
    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.selector().as_bytes());
        buf.push(0);
        match self {
            Command::SetPriceProvider { provider } => {
                buf.extend_from_slice(provider.id.as_bytes());
                buf.extend_from_slice(&provider.unit_price.to_be_bytes());
            }
            Command::WithdrawNative { recipient } => {
                buf.extend_from_slice(recipient.as_bytes());
            }
            Command::TransferOwnership { new_owner } => {
                buf.extend_from_slice(new_owner.as_bytes());
            }
        }
    }
}

/// A call forwarded to a protected resource once authorized
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub target: Identity,
    /// Native amount sent along with the call (may be zero)
    pub value: u64,
    pub command: Command,
}

impl Call {
    pub fn new(target: Identity, value: u64, command: Command) -> Self {
        Self {
            target,
            value,
            command,
        }
    }

    /// Deterministic digest of (target, value, command, eta)
    pub fn action_hash(&self, eta: DateTime<Utc>) -> ActionHash {
        let mut payload = Vec::new();
        self.command.encode_into(&mut payload);

        let mut hasher = Sha256::new();
        hasher.update(self.target.as_bytes());
        hasher.update(self.value.to_be_bytes());
        hasher.update(&payload);
        hasher.update(eta.timestamp().to_be_bytes());
        hasher.update(eta.timestamp_subsec_nanos().to_be_bytes());
        ActionHash(hasher.finalize().into())
    }
}

/// SHA-256 identity of a queued delay-executor action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionHash([u8; 32]);

impl ActionHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ActionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl std::str::FromStr for ActionHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(raw).map_err(|e| format!("Invalid action hash: {}", e))?;
        let digest: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| format!("Invalid action hash: expected 32 bytes, got {}", b.len()))?;
        Ok(Self(digest))
    }
}

impl Serialize for ActionHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ActionHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
