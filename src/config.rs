//! Deploy-time and service configuration

use chrono::Duration;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;

use crate::error::ConfigError;
use crate::identity::Identity;

/// Upper bound for delays and grace windows (100 years)
pub const MAX_WINDOW_SECS: i64 = 100 * 365 * 24 * 60 * 60;

/// Configuration of a quorum executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumConfig {
    pub owners: Vec<Identity>,
    pub required_confirmations: usize,
}

impl QuorumConfig {
    pub fn new(owners: Vec<Identity>, required_confirmations: usize) -> Self {
        Self {
            owners,
            required_confirmations,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.owners.is_empty() {
            return Err(ConfigError::NoOwners);
        }

        let mut seen = HashSet::with_capacity(self.owners.len());
        for owner in &self.owners {
            if !seen.insert(*owner) {
                return Err(ConfigError::DuplicateOwner(*owner));
            }
        }

        if self.required_confirmations == 0 || self.required_confirmations > self.owners.len() {
            return Err(ConfigError::InvalidThreshold {
                required: self.required_confirmations,
                owners: self.owners.len(),
            });
        }

        Ok(())
    }
}

/// Configuration of a delay executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayConfig {
    pub admin: Identity,
    pub min_delay_secs: i64,
    pub grace_secs: i64,
}

impl DelayConfig {
    pub fn new(admin: Identity, min_delay: Duration, grace: Duration) -> Self {
        Self {
            admin,
            min_delay_secs: min_delay.num_seconds(),
            grace_secs: grace.num_seconds(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0..=MAX_WINDOW_SECS).contains(&self.min_delay_secs) {
            return Err(ConfigError::DelayOutOfRange(self.min_delay_secs));
        }
        if !(1..=MAX_WINDOW_SECS).contains(&self.grace_secs) {
            return Err(ConfigError::GraceOutOfRange(self.grace_secs));
        }
        Ok(())
    }

    pub fn min_delay(&self) -> Duration {
        Duration::seconds(self.min_delay_secs)
    }

    pub fn grace(&self) -> Duration {
        Duration::seconds(self.grace_secs)
    }
}

/// Command-line and environment configuration of the ledger service
#[derive(Parser, Debug, Clone)]
#[command(name = "warden")]
#[command(about = "Quorum and timelock gated executors for protected resources")]
#[command(version)]
pub struct ServerConfig {
    /// Address to listen on
    #[arg(long, env = "WARDEN_BIND", default_value = "0.0.0.0:3000")]
    pub bind: SocketAddr,

    /// Use a ledger clock that only moves on `advance_time`
    #[arg(long, env = "WARDEN_SIMULATED_CLOCK")]
    pub simulated_clock: bool,

    /// Buffered governance events per subscriber
    #[arg(long, env = "WARDEN_EVENT_CAPACITY", default_value_t = 256)]
    pub event_capacity: usize,
}
