//! Forwarding authorized calls to protected resources
//!
//! The dispatcher has no state of its own: a call either completes or fails
//! and, on failure, nothing it touched has changed.

use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

use crate::command::Call;
use crate::identity::Identity;
use crate::resource::{CommandOutcome, ProtectedResource, ResourceError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("no resource registered at {0}")]
    UnknownTarget(Identity),

    #[error("executor balance {available} cannot cover call value {required}")]
    InsufficientBalance { available: u64, required: u64 },

    #[error(transparent)]
    Rejected(#[from] ResourceError),
}

/// Result of a successful dispatch, reported in `ActionExecuted`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReceipt {
    pub target: Identity,
    pub selector: &'static str,
    pub value: u64,
    pub outcome: CommandOutcome,
}

/// Anything that can deliver a call on behalf of `sender`
pub trait Dispatcher {
    fn dispatch(&mut self, sender: Identity, call: &Call) -> Result<DispatchReceipt, DispatchError>;
}

/// Resources reachable by dispatch, keyed by their identity
#[derive(Default)]
pub struct ResourceRegistry {
    resources: HashMap<Identity, Box<dyn ProtectedResource>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource and return its identity
    pub fn register(&mut self, resource: Box<dyn ProtectedResource>) -> Identity {
        let id = resource.id();
        self.resources.insert(id, resource);
        id
    }

    pub fn contains(&self, id: Identity) -> bool {
        self.resources.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn get(&self, id: Identity) -> Option<&dyn ProtectedResource> {
        self.resources.get(&id).map(|r| &**r)
    }

    pub fn get_mut(&mut self, id: Identity) -> Option<&mut (dyn ProtectedResource + 'static)> {
        self.resources.get_mut(&id).map(|r| &mut **r)
    }

    /// Borrow a resource as its concrete type
    pub fn get_as<T: ProtectedResource + 'static>(&self, id: Identity) -> Option<&T> {
        self.resources.get(&id)?.as_any().downcast_ref::<T>()
    }

    pub fn get_as_mut<T: ProtectedResource + 'static>(&mut self, id: Identity) -> Option<&mut T> {
        self.resources.get_mut(&id)?.as_any_mut().downcast_mut::<T>()
    }
}

impl Dispatcher for ResourceRegistry {
    fn dispatch(&mut self, sender: Identity, call: &Call) -> Result<DispatchReceipt, DispatchError> {
        let resource = self
            .resources
            .get_mut(&call.target)
            .ok_or(DispatchError::UnknownTarget(call.target))?;

        let outcome = resource.apply(sender, call.value, &call.command)?;

        Ok(DispatchReceipt {
            target: call.target,
            selector: call.command.selector(),
            value: call.value,
            outcome,
        })
    }
}

/// Debit `call.value` from the executor's balance and dispatch. The balance
/// only changes if the dispatch succeeds.
pub(crate) fn forward<D: Dispatcher + ?Sized>(
    dispatcher: &mut D,
    sender: Identity,
    balance: &mut u64,
    call: &Call,
) -> Result<DispatchReceipt, DispatchError> {
    let remaining = balance
        .checked_sub(call.value)
        .ok_or(DispatchError::InsufficientBalance {
            available: *balance,
            required: call.value,
        })?;

    let receipt = dispatcher.dispatch(sender, call)?;
    *balance = remaining;
    Ok(receipt)
}
