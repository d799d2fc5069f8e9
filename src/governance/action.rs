//! Action records tracked by the executors
//!
//! `QuorumAction` is keyed by a monotonically increasing id; `QueuedAction`
//! is keyed by the content hash of (target, value, command, eta).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::command::{ActionHash, Call};
use crate::error::GovernanceError;
use crate::identity::Identity;

/// Reference to an action in either executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionRef {
    Id(u64),
    Hash(ActionHash),
}

impl fmt::Display for ActionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionRef::Id(id) => write!(f, "#{}", id),
            ActionRef::Hash(hash) => write!(f, "{}", hash),
        }
    }
}

/// An action awaiting (or having received) quorum authorization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumAction {
    pub id: u64,
    pub proposer: Identity,
    pub call: Call,
    confirmations: BTreeSet<Identity>,
    executed: bool,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
}

impl QuorumAction {
    pub fn new(id: u64, proposer: Identity, call: Call, submitted_at: DateTime<Utc>) -> Self {
        Self {
            id,
            proposer,
            call,
            confirmations: BTreeSet::new(),
            executed: false,
            submitted_at,
            executed_at: None,
        }
    }

    pub fn executed(&self) -> bool {
        self.executed
    }

    pub fn confirmation_count(&self) -> usize {
        self.confirmations.len()
    }

    pub fn is_confirmed_by(&self, approver: Identity) -> bool {
        self.confirmations.contains(&approver)
    }

    pub fn confirmations(&self) -> impl Iterator<Item = &Identity> {
        self.confirmations.iter()
    }

    fn ensure_pending(&self) -> Result<(), GovernanceError> {
        if self.executed {
            return Err(GovernanceError::AlreadyExecuted(ActionRef::Id(self.id)));
        }
        Ok(())
    }

    /// Record a confirmation, returning the new count
    pub fn confirm(&mut self, approver: Identity) -> Result<usize, GovernanceError> {
        self.ensure_pending()?;
        if !self.confirmations.insert(approver) {
            return Err(GovernanceError::AlreadyConfirmed {
                id: self.id,
                approver,
            });
        }
        Ok(self.confirmations.len())
    }

    /// Withdraw a confirmation, returning the new count
    pub fn revoke(&mut self, approver: Identity) -> Result<usize, GovernanceError> {
        self.ensure_pending()?;
        if !self.confirmations.remove(&approver) {
            return Err(GovernanceError::NotConfirmed {
                id: self.id,
                approver,
            });
        }
        Ok(self.confirmations.len())
    }

    /// Flip `executed` ahead of dispatch once the threshold is met
    pub(crate) fn begin_execution(&mut self, required: usize) -> Result<(), GovernanceError> {
        self.ensure_pending()?;
        let count = self.confirmation_count();
        if count < required {
            return Err(GovernanceError::InsufficientConfirmations {
                id: self.id,
                confirmations: count,
                required,
            });
        }
        self.executed = true;
        Ok(())
    }

    pub(crate) fn commit_execution(&mut self, at: DateTime<Utc>) {
        self.executed_at = Some(at);
    }

    /// Undo `begin_execution` after a failed dispatch
    pub(crate) fn rollback_execution(&mut self) {
        self.executed = false;
        self.executed_at = None;
    }
}

/// Lifecycle state of a hashed action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Queued,
    Cancelled,
    Executed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Queued => "queued",
            QueueStatus::Cancelled => "cancelled",
            QueueStatus::Executed => "executed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Executed)
    }
}

/// An action accepted into the delay executor's queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedAction {
    pub hash: ActionHash,
    pub call: Call,
    pub eta: DateTime<Utc>,
    queued: bool,
    executed: bool,
    pub queued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
}

impl QueuedAction {
    pub fn new(call: Call, eta: DateTime<Utc>, queued_at: DateTime<Utc>) -> Self {
        Self {
            hash: call.action_hash(eta),
            call,
            eta,
            queued: true,
            executed: false,
            queued_at,
            cancelled_at: None,
            executed_at: None,
        }
    }

    pub fn queued(&self) -> bool {
        self.queued
    }

    pub fn executed(&self) -> bool {
        self.executed
    }

    pub fn status(&self) -> QueueStatus {
        if self.executed {
            QueueStatus::Executed
        } else if self.queued {
            QueueStatus::Queued
        } else {
            QueueStatus::Cancelled
        }
    }

    /// Re-open a record; returns false when it was already queued
    pub(crate) fn requeue(&mut self, at: DateTime<Utc>) -> Result<bool, GovernanceError> {
        if self.executed {
            return Err(GovernanceError::AlreadyExecuted(ActionRef::Hash(self.hash)));
        }
        if self.queued {
            return Ok(false);
        }
        self.queued = true;
        self.queued_at = at;
        self.cancelled_at = None;
        Ok(true)
    }

    pub(crate) fn cancel(&mut self, at: DateTime<Utc>) -> Result<(), GovernanceError> {
        if !self.queued {
            return Err(GovernanceError::NotQueued(self.hash));
        }
        self.queued = false;
        self.cancelled_at = Some(at);
        Ok(())
    }

    /// Take the record off the queue ahead of dispatch
    pub(crate) fn begin_execution(&mut self) -> Result<(), GovernanceError> {
        if !self.queued {
            return Err(GovernanceError::NotQueued(self.hash));
        }
        self.queued = false;
        self.executed = true;
        Ok(())
    }

    pub(crate) fn commit_execution(&mut self, at: DateTime<Utc>) {
        self.executed_at = Some(at);
    }

    pub(crate) fn rollback_execution(&mut self) {
        self.queued = true;
        self.executed = false;
        self.executed_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;

    fn make_call() -> Call {
        Call::new(
            Identity::new(),
            0,
            Command::WithdrawNative {
                recipient: Identity::new(),
            },
        )
    }

    #[test]
    fn test_confirm_counts_distinct_approvers() {
        let mut action = QuorumAction::new(0, Identity::new(), make_call(), Utc::now());
        let a = Identity::new();
        let b = Identity::new();

        assert_eq!(action.confirm(a).unwrap(), 1);
        assert_eq!(action.confirm(b).unwrap(), 2);
        assert_eq!(
            action.confirm(a).unwrap_err(),
            GovernanceError::AlreadyConfirmed { id: 0, approver: a }
        );
        assert_eq!(action.confirmation_count(), 2);
        assert_eq!(action.confirmations().count(), 2);
    }

    #[test]
    fn test_revoke_then_reconfirm_has_no_drift() {
        let mut action = QuorumAction::new(3, Identity::new(), make_call(), Utc::now());
        let a = Identity::new();
        let b = Identity::new();
        action.confirm(a).unwrap();
        action.confirm(b).unwrap();

        assert_eq!(action.revoke(a).unwrap(), 1);
        assert!(!action.is_confirmed_by(a));
        assert_eq!(action.confirm(a).unwrap(), 2);
        assert_eq!(action.confirmation_count(), 2);
    }

    #[test]
    fn test_revoke_without_confirmation() {
        let mut action = QuorumAction::new(1, Identity::new(), make_call(), Utc::now());
        let a = Identity::new();
        assert_eq!(
            action.revoke(a).unwrap_err(),
            GovernanceError::NotConfirmed { id: 1, approver: a }
        );
    }

    #[test]
    fn test_begin_execution_requires_threshold() {
        let mut action = QuorumAction::new(0, Identity::new(), make_call(), Utc::now());
        action.confirm(Identity::new()).unwrap();

        let err = action.begin_execution(2).unwrap_err();
        assert_eq!(
            err,
            GovernanceError::InsufficientConfirmations {
                id: 0,
                confirmations: 1,
                required: 2
            }
        );
        assert!(!action.executed());
    }

    #[test]
    fn test_executed_action_is_frozen() {
        let mut action = QuorumAction::new(0, Identity::new(), make_call(), Utc::now());
        let a = Identity::new();
        action.confirm(a).unwrap();
        action.begin_execution(1).unwrap();
        action.commit_execution(Utc::now());

        let executed = GovernanceError::AlreadyExecuted(ActionRef::Id(0));
        assert_eq!(action.confirm(Identity::new()).unwrap_err(), executed);
        assert_eq!(action.revoke(a).unwrap_err(), executed);
        assert_eq!(action.begin_execution(1).unwrap_err(), executed);
        assert_eq!(action.confirmation_count(), 1);
    }

    #[test]
    fn test_quorum_rollback_restores_pending() {
        let mut action = QuorumAction::new(0, Identity::new(), make_call(), Utc::now());
        action.confirm(Identity::new()).unwrap();
        let before = action.clone();

        action.begin_execution(1).unwrap();
        assert!(action.executed());
        action.rollback_execution();
        assert_eq!(action, before);
    }

    #[test]
    fn test_queued_action_lifecycle() {
        let eta = Utc::now();
        let mut action = QueuedAction::new(make_call(), eta, Utc::now());
        assert_eq!(action.status(), QueueStatus::Queued);
        assert_eq!(action.hash, action.call.action_hash(eta));

        action.cancel(Utc::now()).unwrap();
        assert_eq!(action.status(), QueueStatus::Cancelled);
        assert!(action.cancelled_at.is_some());
        assert_eq!(
            action.cancel(Utc::now()).unwrap_err(),
            GovernanceError::NotQueued(action.hash)
        );

        assert!(action.requeue(Utc::now()).unwrap());
        assert_eq!(action.status(), QueueStatus::Queued);
        assert!(action.cancelled_at.is_none());
        assert!(!action.requeue(Utc::now()).unwrap());

        action.begin_execution().unwrap();
        action.commit_execution(Utc::now());
        assert_eq!(action.status(), QueueStatus::Executed);
        assert!(action.status().is_terminal());
        assert_eq!(
            action.begin_execution().unwrap_err(),
            GovernanceError::NotQueued(action.hash)
        );
        assert_eq!(
            action.requeue(Utc::now()).unwrap_err(),
            GovernanceError::AlreadyExecuted(ActionRef::Hash(action.hash))
        );
    }

    #[test]
    fn test_queued_rollback_restores_queue() {
        let mut action = QueuedAction::new(make_call(), Utc::now(), Utc::now());
        let before = action.clone();

        action.begin_execution().unwrap();
        assert!(!action.queued());
        action.rollback_execution();
        assert_eq!(action, before);
    }

    #[test]
    fn test_queue_status_as_str() {
        assert_eq!(QueueStatus::Queued.as_str(), "queued");
        assert_eq!(QueueStatus::Cancelled.as_str(), "cancelled");
        assert_eq!(QueueStatus::Executed.as_str(), "executed");
    }

    #[test]
    fn test_action_ref_display() {
        assert_eq!(ActionRef::Id(7).to_string(), "#7");
        let hash = make_call().action_hash(Utc::now());
        assert_eq!(ActionRef::Hash(hash).to_string(), hash.to_string());
    }
}
