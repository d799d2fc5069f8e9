//! Owner capability held by exactly one principal

use serde::{Deserialize, Serialize};

use super::ResourceError;
use crate::identity::Identity;

/// The single "owner" capability of a protected resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerCapability {
    holder: Identity,
    /// Number of times the capability changed hands
    transfers: u32,
}

impl OwnerCapability {
    /// Grant the capability to its first holder (usually the deployer)
    pub fn new(holder: Identity) -> Self {
        Self {
            holder,
            transfers: 0,
        }
    }

    pub fn holder(&self) -> Identity {
        self.holder
    }

    pub fn transfers(&self) -> u32 {
        self.transfers
    }

    pub fn is_held_by(&self, who: Identity) -> bool {
        self.holder == who
    }

    /// Reject anyone but the current holder
    pub fn ensure_held(&self, caller: Identity) -> Result<(), ResourceError> {
        if self.is_held_by(caller) {
            Ok(())
        } else {
            Err(ResourceError::NotOwner {
                caller,
                owner: self.holder,
            })
        }
    }

    /// Hand the capability to `to`, returning the previous holder
    pub fn transfer(&mut self, caller: Identity, to: Identity) -> Result<Identity, ResourceError> {
        self.ensure_held(caller)?;
        let previous = self.holder;
        self.holder = to;
        self.transfers = self.transfers.saturating_add(1);
        Ok(previous)
    }
}
