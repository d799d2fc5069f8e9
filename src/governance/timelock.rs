//! Delay-gated executor
//!
//! A single admin queues calls for a future `eta`. A queued call can run in
//! the window `[eta, eta + grace]` and nowhere else.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

use super::action::{ActionRef, QueuedAction};
use super::dispatch::{self, DispatchReceipt, Dispatcher};
use super::event::GovernanceEvent;
use crate::clock::Clock;
use crate::command::{ActionHash, Call};
use crate::config::DelayConfig;
use crate::error::{ConfigError, GovernanceError};
use crate::identity::Identity;

/// Read-side view of a delay executor
#[derive(Debug, Clone, Serialize)]
pub struct DelaySnapshot {
    pub identity: Identity,
    pub admin: Identity,
    pub min_delay_secs: i64,
    pub grace_secs: i64,
    pub balance: u64,
    pub actions: Vec<QueuedAction>,
}

pub struct DelayExecutor {
    identity: Identity,
    admin: Identity,
    min_delay: Duration,
    grace: Duration,
    actions: HashMap<ActionHash, QueuedAction>,
    balance: u64,
    clock: Arc<dyn Clock>,
    event_tx: broadcast::Sender<GovernanceEvent>,
}

fn offset(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    at.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl DelayExecutor {
    pub fn new(config: DelayConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        let (event_tx, _) = broadcast::channel(256);
        Self::with_events(config, clock, event_tx)
    }

    pub fn with_events(
        config: DelayConfig,
        clock: Arc<dyn Clock>,
        event_tx: broadcast::Sender<GovernanceEvent>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            identity: Identity::new(),
            admin: config.admin,
            min_delay: config.min_delay(),
            grace: config.grace(),
            actions: HashMap::new(),
            balance: 0,
            clock,
            event_tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GovernanceEvent> {
        self.event_tx.subscribe()
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn admin(&self) -> Identity {
        self.admin
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    pub fn grace_period(&self) -> Duration {
        self.grace
    }

    pub fn balance(&self) -> u64 {
        self.balance
    }

    pub fn is_queued(&self, hash: &ActionHash) -> bool {
        self.actions.get(hash).map(|a| a.queued()).unwrap_or(false)
    }

    pub fn action(&self, hash: &ActionHash) -> Option<&QueuedAction> {
        self.actions.get(hash)
    }

    fn ensure_admin(&self, caller: Identity) -> Result<(), GovernanceError> {
        if caller == self.admin {
            Ok(())
        } else {
            Err(GovernanceError::Unauthorized(caller))
        }
    }

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

    /// Queue `call` for execution at `eta`.
    ///
    /// Queueing a tuple that is already queued changes nothing but emits
    /// `ActionQueued` again. A cancelled tuple is re-opened under the same
    /// hash.
    pub fn queue(
        &mut self,
        caller: Identity,
        call: Call,
        eta: DateTime<Utc>,
    ) -> Result<ActionHash, GovernanceError> {
        self.ensure_admin(caller)?;

        let now = self.clock.now();
        let earliest = offset(now, self.min_delay);
        if eta < earliest {
            return Err(GovernanceError::DelayTooShort { eta, earliest });
        }

        let target = call.target;
        let command = call.command.clone();
        let hash = call.action_hash(eta);

        match self.actions.entry(hash) {
            Entry::Occupied(mut entry) => {
                if entry.get_mut().requeue(now)? {
                    tracing::info!(executor = %self.identity, %hash, %eta, "cancelled action re-queued");
                } else {
                    tracing::debug!(executor = %self.identity, %hash, "action already queued");
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(QueuedAction::new(call, eta, now));
                tracing::info!(executor = %self.identity, %hash, %eta, "action queued");
            }
        }

        let _ = self.event_tx.send(GovernanceEvent::ActionQueued {
            executor: self.identity,
            hash,
            eta,
            target,
            command,
        });

        Ok(hash)
    }

    pub fn cancel(&mut self, caller: Identity, hash: ActionHash) -> Result<(), GovernanceError> {
        self.ensure_admin(caller)?;

        let now = self.clock.now();
        self.actions
            .get_mut(&hash)
            .ok_or(GovernanceError::NotQueued(hash))?
            .cancel(now)?;

        tracing::info!(executor = %self.identity, %hash, "action cancelled");

        let _ = self.event_tx.send(GovernanceEvent::ActionCancelled {
            executor: self.identity,
            hash,
        });

        Ok(())
    }

    /// Dispatch a queued call whose window is open.
    ///
    /// The record leaves the queue before the call is forwarded and returns
    /// to it if the dispatch fails.
    pub fn execute<D: Dispatcher + ?Sized>(
        &mut self,
        caller: Identity,
        call: &Call,
        eta: DateTime<Utc>,
        dispatcher: &mut D,
    ) -> Result<DispatchReceipt, GovernanceError> {
        self.ensure_admin(caller)?;

        let hash = call.action_hash(eta);
        let now = self.clock.now();
        let grace = self.grace;

        let action = self
            .actions
            .get_mut(&hash)
            .filter(|a| a.queued())
            .ok_or(GovernanceError::NotQueued(hash))?;

        if now < eta {
            return Err(GovernanceError::TimeNotReached { hash, eta });
        }
        let expired_at = offset(eta, grace);
        if now > expired_at {
            return Err(GovernanceError::GraceExpired { hash, expired_at });
        }

        action.begin_execution()?;

        match dispatch::forward(dispatcher, self.identity, &mut self.balance, call) {
            Ok(receipt) => {
                if let Some(action) = self.actions.get_mut(&hash) {
                    action.commit_execution(now);
                }

                tracing::info!(
                    executor = %self.identity,
                    %hash,
                    target = %call.target,
                    selector = receipt.selector,
                    "queued action executed"
                );

                let _ = self.event_tx.send(GovernanceEvent::ActionExecuted {
                    executor: self.identity,
                    action: ActionRef::Hash(hash),
                    target: call.target,
                    dispatch_result: receipt.clone(),
                });

                Ok(receipt)
            }
            Err(err) => {
                if let Some(action) = self.actions.get_mut(&hash) {
                    action.rollback_execution();
                }
                tracing::warn!(executor = %self.identity, %hash, error = %err, "dispatch failed, action returned to queue");
                Err(GovernanceError::DispatchFailed(err))
            }
        }
    }

    pub fn snapshot(&self) -> DelaySnapshot {
        let mut actions: Vec<QueuedAction> = self.actions.values().cloned().collect();
        actions.sort_by_key(|a| (a.queued_at, a.eta));
        DelaySnapshot {
            identity: self.identity,
            admin: self.admin,
            min_delay_secs: self.min_delay.num_seconds(),
            grace_secs: self.grace.num_seconds(),
            balance: self.balance,
            actions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::command::{Command, PriceProvider};
    use crate::governance::action::QueueStatus;
    use crate::governance::dispatch::DispatchError;
    use crate::resource::CommandOutcome;

    #[derive(Default)]
    struct CountingDispatcher {
        calls: usize,
        fail: bool,
    }

    impl Dispatcher for CountingDispatcher {
        fn dispatch(
            &mut self,
            sender: Identity,
            call: &Call,
        ) -> Result<DispatchReceipt, DispatchError> {
            if self.fail {
                return Err(DispatchError::UnknownTarget(call.target));
            }
            self.calls += 1;
            Ok(DispatchReceipt {
                target: call.target,
                selector: call.command.selector(),
                value: call.value,
                outcome: CommandOutcome::NativeWithdrawn {
                    recipient: sender,
                    amount: call.value,
                },
            })
        }
    }

    fn setup(min_delay: Duration, grace: Duration) -> (DelayExecutor, Arc<ManualClock>, Identity) {
        let admin = Identity::new();
        let clock = Arc::new(ManualClock::starting_now());
        let executor =
            DelayExecutor::new(DelayConfig::new(admin, min_delay, grace), clock.clone()).unwrap();
        (executor, clock, admin)
    }

    fn price_call() -> Call {
        Call::new(
            Identity::new(),
            0,
            Command::SetPriceProvider {
                provider: PriceProvider::new(3),
            },
        )
    }

    #[test]
    fn test_queue_requires_admin() {
        let (mut executor, clock, _) = setup(Duration::days(1), Duration::hours(1));
        let stranger = Identity::new();
        let eta = clock.now() + Duration::days(2);

        assert_eq!(
            executor.queue(stranger, price_call(), eta).unwrap_err(),
            GovernanceError::Unauthorized(stranger)
        );
    }

    #[test]
    fn test_queue_enforces_min_delay() {
        let (mut executor, clock, admin) = setup(Duration::days(7), Duration::hours(1));
        let now = clock.now();

        let err = executor
            .queue(admin, price_call(), now + Duration::days(6))
            .unwrap_err();
        assert_eq!(
            err,
            GovernanceError::DelayTooShort {
                eta: now + Duration::days(6),
                earliest: now + Duration::days(7),
            }
        );

        // Exactly the minimum is accepted
        let hash = executor
            .queue(admin, price_call(), now + Duration::days(7))
            .unwrap();
        assert!(executor.is_queued(&hash));
    }

    #[test]
    fn test_requeue_same_tuple_is_idempotent() {
        let (mut executor, clock, admin) = setup(Duration::hours(1), Duration::hours(1));
        let call = price_call();
        let eta = clock.now() + Duration::hours(2);

        let first = executor.queue(admin, call.clone(), eta).unwrap();
        let queued_at = executor.action(&first).unwrap().queued_at;
        let mut rx = executor.subscribe();

        clock.advance(Duration::minutes(5));
        let second = executor.queue(admin, call, eta).unwrap();
        assert_eq!(first, second);
        assert_eq!(executor.action(&first).unwrap().queued_at, queued_at);
        assert_eq!(executor.snapshot().actions.len(), 1);

        match rx.try_recv().unwrap() {
            GovernanceEvent::ActionQueued { hash, .. } => assert_eq!(hash, first),
            other => panic!("Expected ActionQueued event, got {:?}", other),
        }
    }

    #[test]
    fn test_cancel_and_requeue() {
        let (mut executor, clock, admin) = setup(Duration::hours(1), Duration::hours(1));
        let call = price_call();
        let eta = clock.now() + Duration::hours(2);
        let hash = executor.queue(admin, call.clone(), eta).unwrap();

        let stranger = Identity::new();
        assert_eq!(
            executor.cancel(stranger, hash).unwrap_err(),
            GovernanceError::Unauthorized(stranger)
        );

        executor.cancel(admin, hash).unwrap();
        assert!(!executor.is_queued(&hash));
        assert_eq!(
            executor.cancel(admin, hash).unwrap_err(),
            GovernanceError::NotQueued(hash)
        );

        // Same tuple, same eta: the cancelled record is re-opened
        let reopened = executor.queue(admin, call.clone(), eta).unwrap();
        assert_eq!(reopened, hash);
        assert!(executor.is_queued(&hash));
        assert!(executor.action(&hash).unwrap().cancelled_at.is_none());

        executor.cancel(admin, hash).unwrap();
        let mut dispatcher = CountingDispatcher::default();
        clock.set(eta);
        assert_eq!(
            executor.execute(admin, &call, eta, &mut dispatcher).unwrap_err(),
            GovernanceError::NotQueued(hash)
        );

        let later = executor
            .queue(admin, call, eta + Duration::hours(2))
            .unwrap();
        assert_ne!(later, hash);
        assert_eq!(dispatcher.calls, 0);
    }

    #[test]
    fn test_cancel_unknown_hash() {
        let (mut executor, _, admin) = setup(Duration::hours(1), Duration::hours(1));
        let hash = price_call().action_hash(Utc::now());
        assert_eq!(
            executor.cancel(admin, hash).unwrap_err(),
            GovernanceError::NotQueued(hash)
        );
    }

    #[test]
    fn test_execute_window_bounds() {
        let (mut executor, clock, admin) = setup(Duration::days(7), Duration::seconds(100));
        let call = price_call();
        let eta = clock.now() + Duration::days(7);
        let hash = executor.queue(admin, call.clone(), eta).unwrap();
        let mut dispatcher = CountingDispatcher::default();

        clock.set(eta - Duration::seconds(1));
        assert_eq!(
            executor.execute(admin, &call, eta, &mut dispatcher).unwrap_err(),
            GovernanceError::TimeNotReached { hash, eta }
        );

        clock.set(eta + Duration::seconds(101));
        assert_eq!(
            executor.execute(admin, &call, eta, &mut dispatcher).unwrap_err(),
            GovernanceError::GraceExpired {
                hash,
                expired_at: eta + Duration::seconds(100)
            }
        );
        assert!(executor.is_queued(&hash));

        // The last instant of the grace window still counts
        clock.set(eta + Duration::seconds(100));
        executor.execute(admin, &call, eta, &mut dispatcher).unwrap();
        assert_eq!(dispatcher.calls, 1);
        assert_eq!(
            executor.action(&hash).unwrap().status(),
            QueueStatus::Executed
        );
    }

    #[test]
    fn test_execute_twice_not_queued() {
        let (mut executor, clock, admin) = setup(Duration::hours(1), Duration::hours(1));
        let call = price_call();
        let eta = clock.now() + Duration::hours(1);
        let hash = executor.queue(admin, call.clone(), eta).unwrap();
        let mut dispatcher = CountingDispatcher::default();

        clock.set(eta);
        executor.execute(admin, &call, eta, &mut dispatcher).unwrap();
        assert_eq!(
            executor.execute(admin, &call, eta, &mut dispatcher).unwrap_err(),
            GovernanceError::NotQueued(hash)
        );
        assert_eq!(
            executor.queue(admin, call, eta).unwrap_err(),
            GovernanceError::AlreadyExecuted(ActionRef::Hash(hash))
        );
        assert_eq!(dispatcher.calls, 1);
    }

    #[test]
    fn test_dispatch_failure_keeps_action_queued() {
        let (mut executor, clock, admin) = setup(Duration::hours(1), Duration::hours(1));
        let call = price_call();
        let eta = clock.now() + Duration::hours(1);
        let hash = executor.queue(admin, call.clone(), eta).unwrap();
        let before = executor.action(&hash).unwrap().clone();

        clock.set(eta);
        let mut failing = CountingDispatcher {
            fail: true,
            ..Default::default()
        };
        let err = executor.execute(admin, &call, eta, &mut failing).unwrap_err();
        assert_eq!(err.kind(), "dispatch_failed");
        assert_eq!(executor.action(&hash).unwrap(), &before);

        let mut dispatcher = CountingDispatcher::default();
        assert!(executor.execute(admin, &call, eta, &mut dispatcher).is_ok());
    }

    #[test]
    fn test_execute_debits_deposit() {
        let (mut executor, clock, admin) = setup(Duration::hours(1), Duration::hours(1));
        let mut call = price_call();
        call.value = 40;
        let eta = clock.now() + Duration::hours(1);
        executor.queue(admin, call.clone(), eta).unwrap();
        executor.deposit(Identity::new(), 100);

        clock.set(eta);
        let mut dispatcher = CountingDispatcher::default();
        let receipt = executor.execute(admin, &call, eta, &mut dispatcher).unwrap();
        assert_eq!(receipt.value, 40);
        assert_eq!(executor.balance(), 60);
    }

    #[test]
    fn test_far_future_min_delay_saturates() {
        let (mut executor, _, admin) = setup(Duration::days(1), Duration::hours(1));
        let eta = DateTime::<Utc>::MAX_UTC;
        assert!(executor.queue(admin, price_call(), eta).is_ok());
    }
}
