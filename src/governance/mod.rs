//! Authorization gates in front of protected resources
//!
//! - `quorum`: M-of-N owner approval with explicit execution
//! - `timelock`: single admin with a minimum delay and a grace window
//! - `dispatch`: forwarding approved calls to the resources they target

pub mod action;
pub mod dispatch;
pub mod event;
pub mod quorum;
pub mod timelock;

pub use action::{ActionRef, QueueStatus, QueuedAction, QuorumAction};
pub use dispatch::{DispatchError, DispatchReceipt, Dispatcher, ResourceRegistry};
pub use event::GovernanceEvent;
pub use quorum::{QuorumExecutor, QuorumSnapshot};
pub use timelock::{DelayExecutor, DelaySnapshot};
