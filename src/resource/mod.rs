//! Protected resources
//!
//! A protected resource exposes owner-gated operations and trusts whichever
//! principal currently holds its owner capability. Executors reach it only
//! through the dispatcher.

pub mod capability;
pub mod priced_token;

pub use capability::OwnerCapability;
pub use priced_token::PricedToken;

use serde::Serialize;
use std::any::Any;
use thiserror::Error;

use crate::command::{Command, PriceProvider};
use crate::identity::Identity;

/// Errors raised by a protected resource
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("caller {caller} does not hold the owner capability (held by {owner})")]
    NotOwner { caller: Identity, owner: Identity },

    #[error("invalid payment: expected {expected}, received {received}")]
    InvalidPayment { expected: u64, received: u64 },

    #[error("insufficient token balance: {available} available, {requested} requested")]
    InsufficientBalance { available: u64, requested: u64 },

    #[error("insufficient native funds: {available} available, {requested} requested")]
    InsufficientFunds { available: u64, requested: u64 },

    #[error("arithmetic overflow")]
    Overflow,
}

/// What a successfully applied command did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandOutcome {
    PriceProviderChanged {
        previous: PriceProvider,
        current: PriceProvider,
    },
    NativeWithdrawn {
        recipient: Identity,
        amount: u64,
    },
    OwnershipTransferred {
        previous: Identity,
        current: Identity,
    },
}

/// Read-side view of a resource
#[derive(Debug, Clone, Serialize)]
pub struct ResourceSnapshot {
    pub id: Identity,
    pub kind: &'static str,
    pub owner: Identity,
    pub state: serde_json::Value,
}

/// A resource whose sensitive operations are gated on the owner capability
pub trait ProtectedResource: Send + Sync {
    fn id(&self) -> Identity;

    /// Current holder of the owner capability
    fn owner(&self) -> Identity;

    /// Move the owner capability; only the current holder may call this
    fn transfer_ownership(&mut self, caller: Identity, new_owner: Identity)
        -> Result<(), ResourceError>;

    /// Apply an owner-gated command. Implementations must leave their state
    /// untouched when returning an error.
    fn apply(
        &mut self,
        caller: Identity,
        value: u64,
        command: &Command,
    ) -> Result<CommandOutcome, ResourceError>;

    fn snapshot(&self) -> ResourceSnapshot;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
