//! Reference protected resource: a token sold at an owner-controlled price
//!
//! Users buy tokens at the installed provider's unit price and can sell them
//! back for a refund out of the native balance. The owner can swap the price
//! provider, sweep the native balance or pass ownership on. Whoever holds the
//! owner capability can therefore drain user funds, which is exactly why that
//! capability should sit behind a quorum or a delay.

use serde_json::json;
use std::any::Any;
use std::collections::HashMap;

use super::capability::OwnerCapability;
use super::{CommandOutcome, ProtectedResource, ResourceError, ResourceSnapshot};
use crate::command::{Command, PriceProvider};
use crate::identity::Identity;

#[derive(Debug, Clone)]
pub struct PricedToken {
    id: Identity,
    owner: OwnerCapability,
    price_provider: PriceProvider,
    balances: HashMap<Identity, u64>,
    total_supply: u64,
    native_balance: u64,
}

impl PricedToken {
    /// Deploy a new token owned by `deployer`
    pub fn new(deployer: Identity, price_provider: PriceProvider) -> Self {
        Self {
            id: Identity::new(),
            owner: OwnerCapability::new(deployer),
            price_provider,
            balances: HashMap::new(),
            total_supply: 0,
            native_balance: 0,
        }
    }

    pub fn price_provider(&self) -> PriceProvider {
        self.price_provider
    }

    pub fn balance_of(&self, who: Identity) -> u64 {
        self.balances.get(&who).copied().unwrap_or(0)
    }

    pub fn total_supply(&self) -> u64 {
        self.total_supply
    }

    pub fn native_balance(&self) -> u64 {
        self.native_balance
    }

    /// Price of `amount` tokens at the current provider
    pub fn quote(&self, amount: u64) -> Result<u64, ResourceError> {
        self.price_provider
            .unit_price
            .checked_mul(amount)
            .ok_or(ResourceError::Overflow)
    }

    /// Mint `amount` tokens to `recipient` for exactly the quoted payment
    pub fn buy(&mut self, recipient: Identity, amount: u64, payment: u64) -> Result<u64, ResourceError> {
        let cost = self.quote(amount)?;
        if payment != cost {
            return Err(ResourceError::InvalidPayment {
                expected: cost,
                received: payment,
            });
        }

        let balance = self
            .balance_of(recipient)
            .checked_add(amount)
            .ok_or(ResourceError::Overflow)?;
        let supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(ResourceError::Overflow)?;
        let native = self
            .native_balance
            .checked_add(payment)
            .ok_or(ResourceError::Overflow)?;

        self.balances.insert(recipient, balance);
        self.total_supply = supply;
        self.native_balance = native;

        tracing::debug!(token = %self.id, %recipient, amount, cost, "tokens bought");
        Ok(cost)
    }

    /// Burn `amount` of the seller's tokens and return the refund paid out
    pub fn sell(&mut self, seller: Identity, amount: u64) -> Result<u64, ResourceError> {
        let held = self.balance_of(seller);
        if held < amount {
            return Err(ResourceError::InsufficientBalance {
                available: held,
                requested: amount,
            });
        }

        let refund = self.quote(amount)?;
        if self.native_balance < refund {
            return Err(ResourceError::InsufficientFunds {
                available: self.native_balance,
                requested: refund,
            });
        }

        self.balances.insert(seller, held - amount);
        self.total_supply -= amount;
        self.native_balance -= refund;

        tracing::debug!(token = %self.id, %seller, amount, refund, "tokens sold");
        Ok(refund)
    }
}

impl ProtectedResource for PricedToken {
    fn id(&self) -> Identity {
        self.id
    }

    fn owner(&self) -> Identity {
        self.owner.holder()
    }

    fn transfer_ownership(
        &mut self,
        caller: Identity,
        new_owner: Identity,
    ) -> Result<(), ResourceError> {
        let previous = self.owner.transfer(caller, new_owner)?;
        tracing::info!(token = %self.id, %previous, current = %new_owner, "ownership transferred");
        Ok(())
    }

    fn apply(
        &mut self,
        caller: Identity,
        value: u64,
        command: &Command,
    ) -> Result<CommandOutcome, ResourceError> {
        self.owner.ensure_held(caller)?;
        let funded = self
            .native_balance
            .checked_add(value)
            .ok_or(ResourceError::Overflow)?;

        let outcome = match command {
            Command::SetPriceProvider { provider } => {
                let previous = std::mem::replace(&mut self.price_provider, *provider);
                self.native_balance = funded;
                CommandOutcome::PriceProviderChanged {
                    previous,
                    current: *provider,
                }
            }
            Command::WithdrawNative { recipient } => {
                self.native_balance = 0;
                CommandOutcome::NativeWithdrawn {
                    recipient: *recipient,
                    amount: funded,
                }
            }
            Command::TransferOwnership { new_owner } => {
                let previous = self.owner.transfer(caller, *new_owner)?;
                self.native_balance = funded;
                CommandOutcome::OwnershipTransferred {
                    previous,
                    current: *new_owner,
                }
            }
        };

        tracing::info!(token = %self.id, selector = command.selector(), "owner command applied");
        Ok(outcome)
    }

    fn snapshot(&self) -> ResourceSnapshot {
        ResourceSnapshot {
            id: self.id,
            kind: "priced_token",
            owner: self.owner.holder(),
            state: json!({
                "price_provider": self.price_provider,
                "total_supply": self.total_supply,
                "native_balance": self.native_balance,
                "balances": self.balances,
            }),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
