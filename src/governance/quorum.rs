//! Quorum-gated executor
//!
//! A fixed committee of owners submits, confirms and revokes actions. Once an
//! action holds at least `required_confirmations` distinct confirmations any
//! owner may execute it, exactly once.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;

use super::action::{ActionRef, QuorumAction};
use super::dispatch::{self, DispatchReceipt, Dispatcher};
use super::event::GovernanceEvent;
use crate::clock::Clock;
use crate::command::Call;
use crate::config::QuorumConfig;
use crate::error::{ConfigError, GovernanceError};
use crate::identity::Identity;

/// Read-side view of a quorum executor
#[derive(Debug, Clone, Serialize)]
pub struct QuorumSnapshot {
    pub identity: Identity,
    pub owners: Vec<Identity>,
    pub required_confirmations: usize,
    pub balance: u64,
    pub actions: Vec<QuorumAction>,
}

pub struct QuorumExecutor {
    identity: Identity,
    /// Owners in configuration order
    owners: Vec<Identity>,
    owner_set: HashSet<Identity>,
    required: usize,
    /// Append-only; an action's id is its index
    actions: Vec<QuorumAction>,
    balance: u64,
    clock: Arc<dyn Clock>,
    event_tx: broadcast::Sender<GovernanceEvent>,
}

impl QuorumExecutor {
    /// Create an executor with its own event channel
    pub fn new(config: QuorumConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        let (event_tx, _) = broadcast::channel(256);
        Self::with_events(config, clock, event_tx)
    }

    /// Create an executor publishing to an existing event channel
    pub fn with_events(
        config: QuorumConfig,
        clock: Arc<dyn Clock>,
        event_tx: broadcast::Sender<GovernanceEvent>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let owner_set = config.owners.iter().copied().collect();
        Ok(Self {
            identity: Identity::new(),
            owners: config.owners,
            owner_set,
            required: config.required_confirmations,
            actions: Vec::new(),
            balance: 0,
            clock,
            event_tx,
        })
    }

    /// Subscribe to this executor's events
    pub fn subscribe(&self) -> broadcast::Receiver<GovernanceEvent> {
        self.event_tx.subscribe()
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn owners(&self) -> &[Identity] {
        &self.owners
    }

    pub fn required_confirmations(&self) -> usize {
        self.required
    }

    pub fn is_owner(&self, who: Identity) -> bool {
        self.owner_set.contains(&who)
    }

    pub fn balance(&self) -> u64 {
        self.balance
    }

    pub fn action_count(&self) -> usize {
        self.actions.len()
    }

    pub fn action(&self, id: u64) -> Option<&QuorumAction> {
        usize::try_from(id).ok().and_then(|i| self.actions.get(i))
    }

    pub fn actions(&self) -> &[QuorumAction] {
        &self.actions
    }

    pub fn is_confirmed(&self, id: u64, approver: Identity) -> bool {
        self.action(id)
            .map(|a| a.is_confirmed_by(approver))
            .unwrap_or(false)
    }

    fn action_mut(&mut self, id: u64) -> Result<&mut QuorumAction, GovernanceError> {
        usize::try_from(id)
            .ok()
            .and_then(|i| self.actions.get_mut(i))
            .ok_or(GovernanceError::NotFound(id))
    }

    fn ensure_owner(&self, caller: Identity) -> Result<(), GovernanceError> {
        if self.is_owner(caller) {
            Ok(())
        } else {
            Err(GovernanceError::Unauthorized(caller))
        }
    }

    /// Accept native funds that later calls can forward as `value`
    pub fn deposit(&mut self, sender: Identity, amount: u64) -> u64 {
        self.balance = self.balance.saturating_add(amount);

        let _ = self.event_tx.send(GovernanceEvent::Deposited {
            executor: self.identity,
            sender,
            amount,
            balance: self.balance,
        });

        self.balance
    }

    /// Propose an action; the proposer still has to confirm it
    pub fn submit(&mut self, caller: Identity, call: Call) -> Result<u64, GovernanceError> {
        self.ensure_owner(caller)?;

        let id = self.actions.len() as u64;
        let target = call.target;
        let command = call.command.clone();
        self.actions
            .push(QuorumAction::new(id, caller, call, self.clock.now()));

        tracing::debug!(executor = %self.identity, id, proposer = %caller, "action submitted");

        let _ = self.event_tx.send(GovernanceEvent::ActionSubmitted {
            executor: self.identity,
            id,
            proposer: caller,
            target,
            command,
        });

        Ok(id)
    }

    /// Add the caller's confirmation, returning the new count
    pub fn confirm(&mut self, caller: Identity, id: u64) -> Result<usize, GovernanceError> {
        self.ensure_owner(caller)?;
        let confirmation_count = self.action_mut(id)?.confirm(caller)?;

        tracing::debug!(executor = %self.identity, id, approver = %caller, confirmation_count, "action confirmed");

        let _ = self.event_tx.send(GovernanceEvent::ActionConfirmed {
            executor: self.identity,
            id,
            approver: caller,
            confirmation_count,
        });

        Ok(confirmation_count)
    }

    /// Withdraw the caller's confirmation, returning the new count
    pub fn revoke(&mut self, caller: Identity, id: u64) -> Result<usize, GovernanceError> {
        self.ensure_owner(caller)?;
        let confirmation_count = self.action_mut(id)?.revoke(caller)?;

        tracing::debug!(executor = %self.identity, id, approver = %caller, confirmation_count, "confirmation revoked");

        let _ = self.event_tx.send(GovernanceEvent::ActionRevoked {
            executor: self.identity,
            id,
            approver: caller,
            confirmation_count,
        });

        Ok(confirmation_count)
    }

    /// Dispatch a sufficiently confirmed action.
    ///
    /// `executed` is set before the call is forwarded and restored if the
    /// dispatch fails, so a failed execution leaves the record exactly as it
    /// was.
    pub fn execute<D: Dispatcher + ?Sized>(
        &mut self,
        caller: Identity,
        id: u64,
        dispatcher: &mut D,
    ) -> Result<DispatchReceipt, GovernanceError> {
        self.ensure_owner(caller)?;

        let required = self.required;
        let call = {
            let action = self.action_mut(id)?;
            action.begin_execution(required)?;
            action.call.clone()
        };

        match dispatch::forward(dispatcher, self.identity, &mut self.balance, &call) {
            Ok(receipt) => {
                let now = self.clock.now();
                self.action_mut(id)?.commit_execution(now);

                tracing::info!(
                    executor = %self.identity,
                    id,
                    target = %call.target,
                    selector = receipt.selector,
                    "action executed"
                );

                let _ = self.event_tx.send(GovernanceEvent::ActionExecuted {
                    executor: self.identity,
                    action: ActionRef::Id(id),
                    target: call.target,
                    dispatch_result: receipt.clone(),
                });

                Ok(receipt)
            }
            Err(err) => {
                self.action_mut(id)?.rollback_execution();
                tracing::warn!(executor = %self.identity, id, error = %err, "dispatch failed, execution rolled back");
                Err(GovernanceError::DispatchFailed(err))
            }
        }
    }

    pub fn snapshot(&self) -> QuorumSnapshot {
        QuorumSnapshot {
            identity: self.identity,
            owners: self.owners.clone(),
            required_confirmations: self.required,
            balance: self.balance,
            actions: self.actions.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::command::{Command, PriceProvider};
    use crate::governance::dispatch::DispatchError;
    use crate::resource::{CommandOutcome, ResourceError};

    /// Dispatcher that records every call and can be told to fail
    #[derive(Default)]
    struct RecordingDispatcher {
        calls: Vec<(Identity, Call)>,
        fail: bool,
    }

    impl Dispatcher for RecordingDispatcher {
        fn dispatch(
            &mut self,
            sender: Identity,
            call: &Call,
        ) -> Result<DispatchReceipt, DispatchError> {
            if self.fail {
                return Err(DispatchError::Rejected(ResourceError::NotOwner {
                    caller: sender,
                    owner: Identity::new(),
                }));
            }
            self.calls.push((sender, call.clone()));
            Ok(DispatchReceipt {
                target: call.target,
                selector: call.command.selector(),
                value: call.value,
                outcome: CommandOutcome::OwnershipTransferred {
                    previous: sender,
                    current: sender,
                },
            })
        }
    }

    fn setup(n: usize, required: usize) -> (QuorumExecutor, Vec<Identity>) {
        let owners: Vec<Identity> = (0..n).map(|_| Identity::new()).collect();
        let executor = QuorumExecutor::new(
            QuorumConfig::new(owners.clone(), required),
            Arc::new(ManualClock::starting_now()),
        )
        .unwrap();
        (executor, owners)
    }

    fn price_call() -> Call {
        Call::new(
            Identity::new(),
            0,
            Command::SetPriceProvider {
                provider: PriceProvider::new(1),
            },
        )
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let result = QuorumExecutor::new(
            QuorumConfig::new(vec![Identity::new()], 2),
            Arc::new(ManualClock::starting_now()),
        );
        assert!(matches!(
            result,
            Err(ConfigError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn test_submit_assigns_sequential_ids() {
        let (mut executor, owners) = setup(2, 1);
        let mut rx = executor.subscribe();

        assert_eq!(executor.submit(owners[0], price_call()).unwrap(), 0);
        assert_eq!(executor.submit(owners[1], price_call()).unwrap(), 1);
        assert_eq!(executor.action_count(), 2);

        let action = executor.action(0).unwrap();
        assert_eq!(action.proposer, owners[0]);
        assert_eq!(action.confirmation_count(), 0);
        assert!(!action.executed());

        match rx.try_recv().unwrap() {
            GovernanceEvent::ActionSubmitted { id, proposer, .. } => {
                assert_eq!(id, 0);
                assert_eq!(proposer, owners[0]);
            }
            other => panic!("Expected ActionSubmitted event, got {:?}", other),
        }
    }

    #[test]
    fn test_non_owner_is_unauthorized_everywhere() {
        let (mut executor, owners) = setup(2, 1);
        let stranger = Identity::new();
        let id = executor.submit(owners[0], price_call()).unwrap();
        let mut dispatcher = RecordingDispatcher::default();

        let unauthorized = GovernanceError::Unauthorized(stranger);
        assert_eq!(
            executor.submit(stranger, price_call()).unwrap_err(),
            unauthorized
        );
        assert_eq!(executor.confirm(stranger, id).unwrap_err(), unauthorized);
        assert_eq!(executor.revoke(stranger, id).unwrap_err(), unauthorized);
        assert_eq!(
            executor.execute(stranger, id, &mut dispatcher).unwrap_err(),
            unauthorized
        );
        assert!(dispatcher.calls.is_empty());
    }

    #[test]
    fn test_unknown_id_not_found() {
        let (mut executor, owners) = setup(1, 1);
        let mut dispatcher = RecordingDispatcher::default();

        assert_eq!(
            executor.confirm(owners[0], 7).unwrap_err(),
            GovernanceError::NotFound(7)
        );
        assert_eq!(
            executor.revoke(owners[0], 7).unwrap_err(),
            GovernanceError::NotFound(7)
        );
        assert_eq!(
            executor.execute(owners[0], 7, &mut dispatcher).unwrap_err(),
            GovernanceError::NotFound(7)
        );
        assert_eq!(
            executor.execute(owners[0], u64::MAX, &mut dispatcher).unwrap_err(),
            GovernanceError::NotFound(u64::MAX)
        );
    }

    #[test]
    fn test_confirm_and_revoke_events() {
        let (mut executor, owners) = setup(3, 2);
        let id = executor.submit(owners[0], price_call()).unwrap();
        let mut rx = executor.subscribe();

        assert_eq!(executor.confirm(owners[1], id).unwrap(), 1);
        assert_eq!(executor.revoke(owners[1], id).unwrap(), 0);

        match rx.try_recv().unwrap() {
            GovernanceEvent::ActionConfirmed {
                approver,
                confirmation_count,
                ..
            } => {
                assert_eq!(approver, owners[1]);
                assert_eq!(confirmation_count, 1);
            }
            other => panic!("Expected ActionConfirmed event, got {:?}", other),
        }
        match rx.try_recv().unwrap() {
            GovernanceEvent::ActionRevoked { approver, .. } => assert_eq!(approver, owners[1]),
            other => panic!("Expected ActionRevoked event, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_precondition_emits_nothing() {
        let (mut executor, owners) = setup(2, 2);
        let id = executor.submit(owners[0], price_call()).unwrap();
        executor.confirm(owners[0], id).unwrap();
        let mut rx = executor.subscribe();

        assert!(executor.confirm(owners[0], id).is_err());
        assert!(executor
            .execute(owners[0], id, &mut RecordingDispatcher::default())
            .is_err());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_execute_dispatches_as_executor_once() {
        let (mut executor, owners) = setup(2, 2);
        let id = executor.submit(owners[0], price_call()).unwrap();
        executor.confirm(owners[0], id).unwrap();
        executor.confirm(owners[1], id).unwrap();
        let mut dispatcher = RecordingDispatcher::default();

        let receipt = executor.execute(owners[1], id, &mut dispatcher).unwrap();
        assert_eq!(receipt.selector, "set_price_provider");
        assert_eq!(dispatcher.calls.len(), 1);
        assert_eq!(dispatcher.calls[0].0, executor.identity());

        let action = executor.action(id).unwrap();
        assert!(action.executed());
        assert!(action.executed_at.is_some());

        assert_eq!(
            executor.execute(owners[0], id, &mut dispatcher).unwrap_err(),
            GovernanceError::AlreadyExecuted(ActionRef::Id(id))
        );
        assert_eq!(dispatcher.calls.len(), 1);
    }

    #[test]
    fn test_dispatch_failure_rolls_back() {
        let (mut executor, owners) = setup(1, 1);
        let id = executor.submit(owners[0], price_call()).unwrap();
        executor.confirm(owners[0], id).unwrap();
        let before = executor.action(id).unwrap().clone();
        let mut rx = executor.subscribe();

        let mut failing = RecordingDispatcher {
            fail: true,
            ..Default::default()
        };
        let err = executor.execute(owners[0], id, &mut failing).unwrap_err();
        assert_eq!(err.kind(), "dispatch_failed");
        assert_eq!(executor.action(id).unwrap(), &before);
        assert!(rx.try_recv().is_err());

        // Still executable once the resource accepts the call
        let mut dispatcher = RecordingDispatcher::default();
        assert!(executor.execute(owners[0], id, &mut dispatcher).is_ok());
    }

    #[test]
    fn test_value_requires_deposit() {
        let (mut executor, owners) = setup(1, 1);
        let mut call = price_call();
        call.value = 50;
        let id = executor.submit(owners[0], call).unwrap();
        executor.confirm(owners[0], id).unwrap();
        let mut dispatcher = RecordingDispatcher::default();

        let err = executor.execute(owners[0], id, &mut dispatcher).unwrap_err();
        assert_eq!(
            err,
            GovernanceError::DispatchFailed(DispatchError::InsufficientBalance {
                available: 0,
                required: 50
            })
        );
        assert!(!executor.action(id).unwrap().executed());
        assert!(dispatcher.calls.is_empty());

        assert_eq!(executor.deposit(Identity::new(), 80), 80);
        executor.execute(owners[0], id, &mut dispatcher).unwrap();
        assert_eq!(executor.balance(), 30);
    }

    #[test]
    fn test_snapshot_lists_actions() {
        let (mut executor, owners) = setup(2, 1);
        executor.submit(owners[0], price_call()).unwrap();
        let snapshot = executor.snapshot();
        assert_eq!(snapshot.owners, owners);
        assert_eq!(snapshot.required_confirmations, 1);
        assert_eq!(snapshot.actions.len(), 1);
    }
}
