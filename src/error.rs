//! Error types for the application

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::command::ActionHash;
use crate::governance::action::ActionRef;
use crate::governance::dispatch::DispatchError;
use crate::identity::Identity;
use crate::resource::ResourceError;

/// Failures of the executor state machines
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GovernanceError {
    #[error("{0} is not authorized for this executor")]
    Unauthorized(Identity),

    #[error("action {0} not found")]
    NotFound(u64),

    #[error("action {0} is not queued")]
    NotQueued(ActionHash),

    #[error("action {0} already executed")]
    AlreadyExecuted(ActionRef),

    #[error("action {id} already confirmed by {approver}")]
    AlreadyConfirmed { id: u64, approver: Identity },

    #[error("action {id} not confirmed by {approver}")]
    NotConfirmed { id: u64, approver: Identity },

    #[error("action {id} has {confirmations} of {required} required confirmations")]
    InsufficientConfirmations {
        id: u64,
        confirmations: usize,
        required: usize,
    },

    #[error("eta {eta} is earlier than the minimum {earliest}")]
    DelayTooShort {
        eta: DateTime<Utc>,
        earliest: DateTime<Utc>,
    },

    #[error("action {hash} cannot execute before {eta}")]
    TimeNotReached { hash: ActionHash, eta: DateTime<Utc> },

    #[error("action {hash} went stale at {expired_at}")]
    GraceExpired {
        hash: ActionHash,
        expired_at: DateTime<Utc>,
    },

    #[error("dispatch failed: {0}")]
    DispatchFailed(#[from] DispatchError),
}

impl GovernanceError {
    /// Stable machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            GovernanceError::Unauthorized(_) => "unauthorized",
            GovernanceError::NotFound(_) => "not_found",
            GovernanceError::NotQueued(_) => "not_queued",
            GovernanceError::AlreadyExecuted(_) => "already_executed",
            GovernanceError::AlreadyConfirmed { .. } => "already_confirmed",
            GovernanceError::NotConfirmed { .. } => "not_confirmed",
            GovernanceError::InsufficientConfirmations { .. } => "insufficient_confirmations",
            GovernanceError::DelayTooShort { .. } => "delay_too_short",
            GovernanceError::TimeNotReached { .. } => "time_not_reached",
            GovernanceError::GraceExpired { .. } => "grace_expired",
            GovernanceError::DispatchFailed(_) => "dispatch_failed",
        }
    }
}

/// Invalid deploy-time configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("at least one owner is required")]
    NoOwners,

    #[error("owner {0} listed more than once")]
    DuplicateOwner(Identity),

    #[error("required confirmations {required} must be between 1 and {owners}")]
    InvalidThreshold { required: usize, owners: usize },

    #[error("minimum delay of {0}s is out of range")]
    DelayOutOfRange(i64),

    #[error("grace period of {0}s is out of range")]
    GraceOutOfRange(i64),
}

/// Errors raised by ledger-level routing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("unknown executor: {0}")]
    UnknownExecutor(Identity),

    #[error("executor {0} is not a quorum executor")]
    NotQuorumExecutor(Identity),

    #[error("executor {0} is not a delay executor")]
    NotDelayExecutor(Identity),

    #[error("unknown resource: {0}")]
    UnknownResource(Identity),

    #[error("ledger clock is not simulated")]
    ClockNotSimulated,

    #[error("advancing the clock by {0}s leaves the representable time range")]
    TimeOverflow(i64),

    #[error(transparent)]
    Governance(#[from] GovernanceError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resource(#[from] ResourceError),
}

impl LedgerError {
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::UnknownExecutor(_) => "unknown_executor",
            LedgerError::NotQuorumExecutor(_) => "not_quorum_executor",
            LedgerError::NotDelayExecutor(_) => "not_delay_executor",
            LedgerError::UnknownResource(_) => "unknown_resource",
            LedgerError::ClockNotSimulated => "clock_not_simulated",
            LedgerError::TimeOverflow(_) => "time_overflow",
            LedgerError::Governance(e) => e.kind(),
            LedgerError::Config(_) => "invalid_config",
            LedgerError::Resource(_) => "resource_rejected",
        }
    }
}

/// Service-level errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Ledger(e) => e.kind(),
            AppError::BadRequest(_) => "bad_request",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Ledger(LedgerError::UnknownExecutor(_))
            | AppError::Ledger(LedgerError::UnknownResource(_)) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            AppError::Ledger(LedgerError::Governance(GovernanceError::Unauthorized(_))) => {
                (StatusCode::FORBIDDEN, self.to_string())
            }
            AppError::Ledger(e) => (StatusCode::CONFLICT, e.to_string()),
            AppError::BadRequest(e) => (StatusCode::BAD_REQUEST, e.clone()),
        };

        (status, message).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
