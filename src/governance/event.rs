//! Observability events, one per successful state transition

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::action::ActionRef;
use super::dispatch::DispatchReceipt;
use crate::command::{ActionHash, Command};
use crate::identity::Identity;

/// Events emitted by the executors
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GovernanceEvent {
    /// A quorum action was proposed
    ActionSubmitted {
        executor: Identity,
        id: u64,
        proposer: Identity,
        target: Identity,
        command: Command,
    },
    /// An approver confirmed a quorum action
    ActionConfirmed {
        executor: Identity,
        id: u64,
        approver: Identity,
        confirmation_count: usize,
    },
    /// An approver withdrew a confirmation
    ActionRevoked {
        executor: Identity,
        id: u64,
        approver: Identity,
        confirmation_count: usize,
    },
    /// An action was dispatched and applied
    ActionExecuted {
        executor: Identity,
        action: ActionRef,
        target: Identity,
        dispatch_result: DispatchReceipt,
    },
    /// A delayed action was (re)queued
    ActionQueued {
        executor: Identity,
        hash: ActionHash,
        eta: DateTime<Utc>,
        target: Identity,
        command: Command,
    },
    /// A delayed action was taken off the queue
    ActionCancelled { executor: Identity, hash: ActionHash },
    /// Native funds were sent to an executor
    Deposited {
        executor: Identity,
        sender: Identity,
        amount: u64,
        balance: u64,
    },
}

impl GovernanceEvent {
    /// The executor that emitted this event
    pub fn executor(&self) -> Identity {
        match self {
            GovernanceEvent::ActionSubmitted { executor, .. }
            | GovernanceEvent::ActionConfirmed { executor, .. }
            | GovernanceEvent::ActionRevoked { executor, .. }
            | GovernanceEvent::ActionExecuted { executor, .. }
            | GovernanceEvent::ActionQueued { executor, .. }
            | GovernanceEvent::ActionCancelled { executor, .. }
            | GovernanceEvent::Deposited { executor, .. } => *executor,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            GovernanceEvent::ActionSubmitted { .. } => "action_submitted",
            GovernanceEvent::ActionConfirmed { .. } => "action_confirmed",
            GovernanceEvent::ActionRevoked { .. } => "action_revoked",
            GovernanceEvent::ActionExecuted { .. } => "action_executed",
            GovernanceEvent::ActionQueued { .. } => "action_queued",
            GovernanceEvent::ActionCancelled { .. } => "action_cancelled",
            GovernanceEvent::Deposited { .. } => "deposited",
        }
    }
}
