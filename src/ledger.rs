//! The sequential ledger
//!
//! The ledger owns every executor and resource. Each operation takes
//! `&mut self` and runs to completion before the next one starts, so an
//! operation either lands in full or leaves no trace.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::clock::{Clock, ManualClock, SystemClock};
use crate::command::{ActionHash, Call, PriceProvider};
use crate::config::{DelayConfig, QuorumConfig};
use crate::error::LedgerError;
use crate::governance::{
    DelayExecutor, DelaySnapshot, DispatchReceipt, GovernanceEvent, QuorumExecutor,
    QuorumSnapshot, ResourceRegistry,
};
use crate::identity::Identity;
use crate::resource::{CommandOutcome, PricedToken, ResourceSnapshot};

/// An executor deployed on the ledger
pub enum Executor {
    Quorum(QuorumExecutor),
    Delay(DelayExecutor),
}

impl Executor {
    pub fn identity(&self) -> Identity {
        match self {
            Executor::Quorum(e) => e.identity(),
            Executor::Delay(e) => e.identity(),
        }
    }

    pub fn snapshot(&self) -> ExecutorSnapshot {
        match self {
            Executor::Quorum(e) => ExecutorSnapshot::Quorum(e.snapshot()),
            Executor::Delay(e) => ExecutorSnapshot::Delay(e.snapshot()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutorSnapshot {
    Quorum(QuorumSnapshot),
    Delay(DelaySnapshot),
}

pub struct Ledger {
    clock: Arc<dyn Clock>,
    /// Set when the ledger runs on simulated time
    manual_clock: Option<Arc<ManualClock>>,
    executors: HashMap<Identity, Executor>,
    resources: ResourceRegistry,
    /// Native funds of principals that are not executors
    accounts: HashMap<Identity, u64>,
    event_tx: broadcast::Sender<GovernanceEvent>,
}

fn quorum_mut(
    executors: &mut HashMap<Identity, Executor>,
    id: Identity,
) -> Result<&mut QuorumExecutor, LedgerError> {
    match executors.get_mut(&id) {
        Some(Executor::Quorum(e)) => Ok(e),
        Some(Executor::Delay(_)) => Err(LedgerError::NotQuorumExecutor(id)),
        None => Err(LedgerError::UnknownExecutor(id)),
    }
}

fn delay_mut(
    executors: &mut HashMap<Identity, Executor>,
    id: Identity,
) -> Result<&mut DelayExecutor, LedgerError> {
    match executors.get_mut(&id) {
        Some(Executor::Delay(e)) => Ok(e),
        Some(Executor::Quorum(_)) => Err(LedgerError::NotDelayExecutor(id)),
        None => Err(LedgerError::UnknownExecutor(id)),
    }
}

impl Ledger {
    /// Create a ledger reading time from `clock`
    pub fn new(clock: Arc<dyn Clock>, event_capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(event_capacity.max(1));
        Self {
            clock,
            manual_clock: None,
            executors: HashMap::new(),
            resources: ResourceRegistry::new(),
            accounts: HashMap::new(),
            event_tx,
        }
    }

    /// Create a ledger on wall-clock time
    pub fn system(event_capacity: usize) -> Self {
        Self::new(Arc::new(SystemClock), event_capacity)
    }

    /// Create a ledger whose clock only moves through `advance_time`
    pub fn simulated(event_capacity: usize) -> Self {
        let manual = Arc::new(ManualClock::starting_now());
        let mut ledger = Self::new(manual.clone(), event_capacity);
        ledger.manual_clock = Some(manual);
        ledger
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GovernanceEvent> {
        self.event_tx.subscribe()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn is_simulated(&self) -> bool {
        self.manual_clock.is_some()
    }

    pub fn advance_time(&mut self, by: Duration) -> Result<DateTime<Utc>, LedgerError> {
        let clock = self
            .manual_clock
            .as_ref()
            .ok_or(LedgerError::ClockNotSimulated)?;
        let now = clock
            .advance(by)
            .ok_or(LedgerError::TimeOverflow(by.num_seconds()))?;
        tracing::debug!(%now, seconds = by.num_seconds(), "ledger time advanced");
        Ok(now)
    }

    pub fn deploy_quorum(&mut self, config: QuorumConfig) -> Result<Identity, LedgerError> {
        let executor =
            QuorumExecutor::with_events(config, self.clock.clone(), self.event_tx.clone())?;
        let id = executor.identity();
        tracing::info!(
            executor = %id,
            owners = executor.owners().len(),
            required = executor.required_confirmations(),
            "quorum executor deployed"
        );
        self.executors.insert(id, Executor::Quorum(executor));
        Ok(id)
    }

    pub fn deploy_delay(&mut self, config: DelayConfig) -> Result<Identity, LedgerError> {
        let executor =
            DelayExecutor::with_events(config, self.clock.clone(), self.event_tx.clone())?;
        let id = executor.identity();
        tracing::info!(
            executor = %id,
            admin = %executor.admin(),
            min_delay = executor.min_delay().num_seconds(),
            grace = executor.grace_period().num_seconds(),
            "delay executor deployed"
        );
        self.executors.insert(id, Executor::Delay(executor));
        Ok(id)
    }

    /// Deploy a priced token owned by `deployer`
    pub fn deploy_token(&mut self, deployer: Identity, provider: PriceProvider) -> Identity {
        let id = self
            .resources
            .register(Box::new(PricedToken::new(deployer, provider)));
        tracing::info!(token = %id, owner = %deployer, "priced token deployed");
        id
    }

    /// Hand a resource's owner capability to someone else, typically an executor
    pub fn transfer_ownership(
        &mut self,
        caller: Identity,
        resource: Identity,
        new_owner: Identity,
    ) -> Result<(), LedgerError> {
        self.resources
            .get_mut(resource)
            .ok_or(LedgerError::UnknownResource(resource))?
            .transfer_ownership(caller, new_owner)?;
        Ok(())
    }

    pub fn deposit(
        &mut self,
        sender: Identity,
        executor: Identity,
        amount: u64,
    ) -> Result<u64, LedgerError> {
        let balance = match self.executors.get_mut(&executor) {
            Some(Executor::Quorum(e)) => e.deposit(sender, amount),
            Some(Executor::Delay(e)) => e.deposit(sender, amount),
            None => return Err(LedgerError::UnknownExecutor(executor)),
        };
        Ok(balance)
    }

    pub fn submit(
        &mut self,
        caller: Identity,
        executor: Identity,
        call: Call,
    ) -> Result<u64, LedgerError> {
        Ok(quorum_mut(&mut self.executors, executor)?.submit(caller, call)?)
    }

    pub fn confirm(
        &mut self,
        caller: Identity,
        executor: Identity,
        id: u64,
    ) -> Result<usize, LedgerError> {
        Ok(quorum_mut(&mut self.executors, executor)?.confirm(caller, id)?)
    }

    pub fn revoke(
        &mut self,
        caller: Identity,
        executor: Identity,
        id: u64,
    ) -> Result<usize, LedgerError> {
        Ok(quorum_mut(&mut self.executors, executor)?.revoke(caller, id)?)
    }

    pub fn execute_quorum(
        &mut self,
        caller: Identity,
        executor: Identity,
        id: u64,
    ) -> Result<DispatchReceipt, LedgerError> {
        let executor = quorum_mut(&mut self.executors, executor)?;
        let receipt = executor.execute(caller, id, &mut self.resources)?;
        self.settle(&receipt);
        Ok(receipt)
    }

    pub fn queue(
        &mut self,
        caller: Identity,
        executor: Identity,
        call: Call,
        eta: DateTime<Utc>,
    ) -> Result<ActionHash, LedgerError> {
        Ok(delay_mut(&mut self.executors, executor)?.queue(caller, call, eta)?)
    }

    pub fn cancel(
        &mut self,
        caller: Identity,
        executor: Identity,
        hash: ActionHash,
    ) -> Result<(), LedgerError> {
        Ok(delay_mut(&mut self.executors, executor)?.cancel(caller, hash)?)
    }

    pub fn execute_queued(
        &mut self,
        caller: Identity,
        executor: Identity,
        call: &Call,
        eta: DateTime<Utc>,
    ) -> Result<DispatchReceipt, LedgerError> {
        let executor = delay_mut(&mut self.executors, executor)?;
        let receipt = executor.execute(caller, call, eta, &mut self.resources)?;
        self.settle(&receipt);
        Ok(receipt)
    }

    /// Pay out native funds a dispatched command released
    fn settle(&mut self, receipt: &DispatchReceipt) {
        if let CommandOutcome::NativeWithdrawn { recipient, amount } = receipt.outcome {
            self.credit(receipt.target, recipient, amount);
        }
    }

    /// Credit `amount` to `recipient`: an executor's treasury if it is one,
    /// otherwise its ledger account
    fn credit(&mut self, from: Identity, recipient: Identity, amount: u64) {
        match self.executors.get_mut(&recipient) {
            Some(Executor::Quorum(e)) => {
                e.deposit(from, amount);
            }
            Some(Executor::Delay(e)) => {
                e.deposit(from, amount);
            }
            None => {
                let balance = self.accounts.entry(recipient).or_insert(0);
                *balance = balance.saturating_add(amount);
            }
        }
        tracing::debug!(%from, %recipient, amount, "native funds credited");
    }

    /// Native funds held by `who`, either as executor treasury or account
    pub fn native_balance(&self, who: Identity) -> u64 {
        match self.executors.get(&who) {
            Some(Executor::Quorum(e)) => e.balance(),
            Some(Executor::Delay(e)) => e.balance(),
            None => self.accounts.get(&who).copied().unwrap_or(0),
        }
    }

    /// Buy tokens from a priced token; returns the cost paid
    pub fn buy(
        &mut self,
        buyer: Identity,
        token: Identity,
        recipient: Identity,
        amount: u64,
        payment: u64,
    ) -> Result<u64, LedgerError> {
        let cost = self
            .resources
            .get_as_mut::<PricedToken>(token)
            .ok_or(LedgerError::UnknownResource(token))?
            .buy(recipient, amount, payment)?;
        tracing::debug!(%buyer, %token, amount, cost, "buy settled");
        Ok(cost)
    }

    /// Sell the seller's tokens back and pay the refund to `recipient`
    pub fn sell(
        &mut self,
        seller: Identity,
        token: Identity,
        recipient: Identity,
        amount: u64,
    ) -> Result<u64, LedgerError> {
        let refund = self
            .resources
            .get_as_mut::<PricedToken>(token)
            .ok_or(LedgerError::UnknownResource(token))?
            .sell(seller, amount)?;
        self.credit(token, recipient, refund);
        Ok(refund)
    }

    pub fn executor(&self, id: Identity) -> Option<&Executor> {
        self.executors.get(&id)
    }

    pub fn quorum(&self, id: Identity) -> Result<&QuorumExecutor, LedgerError> {
        match self.executors.get(&id) {
            Some(Executor::Quorum(e)) => Ok(e),
            Some(Executor::Delay(_)) => Err(LedgerError::NotQuorumExecutor(id)),
            None => Err(LedgerError::UnknownExecutor(id)),
        }
    }

    pub fn delay(&self, id: Identity) -> Result<&DelayExecutor, LedgerError> {
        match self.executors.get(&id) {
            Some(Executor::Delay(e)) => Ok(e),
            Some(Executor::Quorum(_)) => Err(LedgerError::NotDelayExecutor(id)),
            None => Err(LedgerError::UnknownExecutor(id)),
        }
    }

    pub fn token(&self, id: Identity) -> Option<&PricedToken> {
        self.resources.get_as::<PricedToken>(id)
    }

    pub fn executor_snapshot(&self, id: Identity) -> Result<ExecutorSnapshot, LedgerError> {
        self.executors
            .get(&id)
            .map(Executor::snapshot)
            .ok_or(LedgerError::UnknownExecutor(id))
    }

    pub fn resource_snapshot(&self, id: Identity) -> Result<ResourceSnapshot, LedgerError> {
        self.resources
            .get(id)
            .map(|r| r.snapshot())
            .ok_or(LedgerError::UnknownResource(id))
    }
}
