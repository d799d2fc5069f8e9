//! WebSocket server handler
//!
//! Every client frame is applied to the ledger under its write lock and
//! answered by exactly one server frame. After `subscribe` the socket also
//! receives governance events as they happen.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use chrono::{DateTime, Duration, Utc};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::command::{ActionHash, Call, PriceProvider};
use crate::config::{DelayConfig, QuorumConfig};
use crate::error::AppError;
use crate::governance::{DispatchReceipt, GovernanceEvent};
use crate::identity::Identity;
use crate::AppState;

/// WebSocket handler
pub async fn handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events: Option<broadcast::Receiver<GovernanceEvent>> = None;

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                };

                let reply = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(msg) => handle_message(&state, msg, &mut events)
                        .await
                        .unwrap_or_else(ServerMessage::from),
                    Err(e) => ServerMessage::Error {
                        kind: "invalid_message",
                        message: format!("Invalid message: {}", e),
                    },
                };

                if let Err(e) = send(&mut sender, &reply).await {
                    tracing::error!("Failed to send reply: {}", e);
                    break;
                }
            }
            event = next_event(&mut events) => {
                match event {
                    Ok(event) => {
                        if let Err(e) = send(&mut sender, &ServerMessage::Event { event }).await {
                            tracing::error!("Failed to send event: {}", e);
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "subscriber lagged, events dropped");
                    }
                    Err(RecvError::Closed) => events = None,
                }
            }
        }
    }
}

/// Wait for the next event, or forever when not subscribed
async fn next_event(
    events: &mut Option<broadcast::Receiver<GovernanceEvent>>,
) -> Result<GovernanceEvent, RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn send(
    sender: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(msg) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!("Failed to serialize server message: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await
}

async fn handle_message(
    state: &AppState,
    msg: ClientMessage,
    events: &mut Option<broadcast::Receiver<GovernanceEvent>>,
) -> crate::error::Result<ServerMessage> {
    let reply = match msg {
        ClientMessage::NewIdentity => ServerMessage::Identity {
            identity: Identity::new(),
        },
        ClientMessage::Subscribe => {
            *events = Some(state.ledger.read().await.subscribe());
            ServerMessage::Subscribed
        }
        ClientMessage::DeployQuorum {
            owners,
            required_confirmations,
        } => {
            let id = state
                .ledger
                .write()
                .await
                .deploy_quorum(QuorumConfig::new(owners, required_confirmations))?;
            ServerMessage::Deployed { kind: "quorum", id }
        }
        ClientMessage::DeployDelay {
            admin,
            min_delay_secs,
            grace_secs,
        } => {
            let config = DelayConfig {
                admin,
                min_delay_secs,
                grace_secs,
            };
            let id = state.ledger.write().await.deploy_delay(config)?;
            ServerMessage::Deployed { kind: "delay", id }
        }
        ClientMessage::DeployToken {
            deployer,
            unit_price,
        } => {
            let id = state
                .ledger
                .write()
                .await
                .deploy_token(deployer, PriceProvider::new(unit_price));
            ServerMessage::Deployed {
                kind: "priced_token",
                id,
            }
        }
        ClientMessage::TransferOwnership {
            caller,
            resource,
            new_owner,
        } => {
            state
                .ledger
                .write()
                .await
                .transfer_ownership(caller, resource, new_owner)?;
            ServerMessage::Ok { amount: None }
        }
        ClientMessage::Deposit {
            sender,
            executor,
            amount,
        } => {
            let balance = state.ledger.write().await.deposit(sender, executor, amount)?;
            ServerMessage::Ok {
                amount: Some(balance),
            }
        }
        ClientMessage::Submit {
            caller,
            executor,
            call,
        } => {
            let id = state.ledger.write().await.submit(caller, executor, call)?;
            ServerMessage::Submitted { executor, id }
        }
        ClientMessage::Confirm {
            caller,
            executor,
            id,
        } => {
            let confirmation_count = state.ledger.write().await.confirm(caller, executor, id)?;
            ServerMessage::Confirmed {
                executor,
                id,
                confirmation_count,
            }
        }
        ClientMessage::Revoke {
            caller,
            executor,
            id,
        } => {
            let confirmation_count = state.ledger.write().await.revoke(caller, executor, id)?;
            ServerMessage::Revoked {
                executor,
                id,
                confirmation_count,
            }
        }
        ClientMessage::Execute {
            caller,
            executor,
            id,
        } => {
            let receipt = state
                .ledger
                .write()
                .await
                .execute_quorum(caller, executor, id)?;
            ServerMessage::Executed { executor, receipt }
        }
        ClientMessage::Queue {
            caller,
            executor,
            call,
            eta,
        } => {
            let hash = state.ledger.write().await.queue(caller, executor, call, eta)?;
            ServerMessage::Queued {
                executor,
                hash,
                eta,
            }
        }
        ClientMessage::Cancel {
            caller,
            executor,
            hash,
        } => {
            state.ledger.write().await.cancel(caller, executor, hash)?;
            ServerMessage::Cancelled { executor, hash }
        }
        ClientMessage::ExecuteQueued {
            caller,
            executor,
            call,
            eta,
        } => {
            let receipt = state
                .ledger
                .write()
                .await
                .execute_queued(caller, executor, &call, eta)?;
            ServerMessage::Executed { executor, receipt }
        }
        ClientMessage::Buy {
            buyer,
            token,
            recipient,
            amount,
            payment,
        } => {
            let cost = state.ledger.write().await.buy(
                buyer,
                token,
                recipient.unwrap_or(buyer),
                amount,
                payment,
            )?;
            ServerMessage::Ok { amount: Some(cost) }
        }
        ClientMessage::Sell {
            seller,
            token,
            recipient,
            amount,
        } => {
            let refund = state.ledger.write().await.sell(
                seller,
                token,
                recipient.unwrap_or(seller),
                amount,
            )?;
            ServerMessage::Ok {
                amount: Some(refund),
            }
        }
        ClientMessage::AdvanceTime { seconds } => {
            if seconds < 0 {
                return Err(AppError::BadRequest(
                    "time can only move forward".to_string(),
                ));
            }
            let by = Duration::try_seconds(seconds)
                .ok_or_else(|| AppError::BadRequest(format!("{}s is out of range", seconds)))?;
            let now = state.ledger.write().await.advance_time(by)?;
            ServerMessage::Time { now }
        }
    };

    Ok(reply)
}

/// Messages from client to server
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Mint a fresh identity for a simulated principal
    NewIdentity,
    DeployQuorum {
        owners: Vec<Identity>,
        required_confirmations: usize,
    },
    DeployDelay {
        admin: Identity,
        min_delay_secs: i64,
        grace_secs: i64,
    },
    DeployToken {
        deployer: Identity,
        unit_price: u64,
    },
    TransferOwnership {
        caller: Identity,
        resource: Identity,
        new_owner: Identity,
    },
    /// Send native funds to an executor
    Deposit {
        sender: Identity,
        executor: Identity,
        amount: u64,
    },
    Submit {
        caller: Identity,
        executor: Identity,
        call: Call,
    },
    Confirm {
        caller: Identity,
        executor: Identity,
        id: u64,
    },
    Revoke {
        caller: Identity,
        executor: Identity,
        id: u64,
    },
    /// Execute a confirmed quorum action
    Execute {
        caller: Identity,
        executor: Identity,
        id: u64,
    },
    Queue {
        caller: Identity,
        executor: Identity,
        call: Call,
        eta: DateTime<Utc>,
    },
    Cancel {
        caller: Identity,
        executor: Identity,
        hash: ActionHash,
    },
    ExecuteQueued {
        caller: Identity,
        executor: Identity,
        call: Call,
        eta: DateTime<Utc>,
    },
    /// Buy tokens; `recipient` defaults to the buyer
    Buy {
        buyer: Identity,
        token: Identity,
        recipient: Option<Identity>,
        amount: u64,
        payment: u64,
    },
    /// Sell tokens back; the refund's `recipient` defaults to the seller
    Sell {
        seller: Identity,
        token: Identity,
        recipient: Option<Identity>,
        amount: u64,
    },
    /// Move a simulated ledger clock forward
    AdvanceTime { seconds: i64 },
    /// Start receiving governance events on this socket
    Subscribe,
}

/// Messages from server to client
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Identity {
        identity: Identity,
    },
    Deployed {
        kind: &'static str,
        id: Identity,
    },
    Submitted {
        executor: Identity,
        id: u64,
    },
    Confirmed {
        executor: Identity,
        id: u64,
        confirmation_count: usize,
    },
    Revoked {
        executor: Identity,
        id: u64,
        confirmation_count: usize,
    },
    Executed {
        executor: Identity,
        receipt: DispatchReceipt,
    },
    Queued {
        executor: Identity,
        hash: ActionHash,
        eta: DateTime<Utc>,
    },
    Cancelled {
        executor: Identity,
        hash: ActionHash,
    },
    /// Operation applied; `amount` carries a balance, cost or refund
    Ok {
        #[serde(skip_serializing_if = "Option::is_none")]
        amount: Option<u64>,
    },
    Time {
        now: DateTime<Utc>,
    },
    Subscribed,
    /// A governance event pushed to a subscribed socket
    Event {
        event: GovernanceEvent,
    },
    /// Error occurred
    Error {
        kind: &'static str,
        message: String,
    },
}

impl From<AppError> for ServerMessage {
    fn from(err: AppError) -> Self {
        ServerMessage::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
