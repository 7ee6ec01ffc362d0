// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Strategy client: issues typed requests to an adapter and correlates the
//! responses.
//!
//! [`StrategyHandle`] is the public API; it mints request ids, pushes
//! commands into the client loop, and hands back [`PendingRequest`] futures.
//! Responses complete the matching future; unknown ids are dropped with a
//! warning. Subscribe/unsubscribe are never acknowledged by the adapter, so
//! their futures only resolve by timeout — stale registry entries are swept
//! when new requests are registered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::client::{Client, ClientRole, MuxLink};
use crate::error::RequestError;
use crate::packet::{now_ms, Packet};
use crate::trade::content::{RequestContent, StreamContent, TradeContent};

/// Default window a request waits for its response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Mailbox traffic for the strategy role.
pub enum StrategyCommand {
    Request {
        adapter: String,
        id: i64,
        method: &'static str,
        params: Vec<Value>,
        reply: oneshot::Sender<Value>,
    },
}

/// Assemble a strategy client. Returns the runtime, the request handle, and
/// the stream-event feed.
pub fn build_strategy(
    uid: impl Into<String>,
    uri: impl Into<String>,
    cancel: CancellationToken,
) -> (Client<StrategyRole>, StrategyHandle, mpsc::UnboundedReceiver<StreamContent>) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let role = StrategyRole {
        pending: HashMap::new(),
        events_tx,
        request_timeout: DEFAULT_REQUEST_TIMEOUT,
    };
    let client = Client::new(uid, uri, role, cancel);
    let handle = StrategyHandle {
        command_tx: client.command_sender(),
        last_id: Arc::new(AtomicI64::new(0)),
        request_timeout: DEFAULT_REQUEST_TIMEOUT,
    };
    (client, handle, events_rx)
}

/// A correlated request in flight.
pub struct PendingRequest {
    pub id: i64,
    reply_rx: oneshot::Receiver<Value>,
    timeout: Duration,
}

impl PendingRequest {
    /// Wait for the adapter's answer, bounded by the request window.
    pub async fn wait(self) -> Result<Value, RequestError> {
        match tokio::time::timeout(self.timeout, self.reply_rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(RequestError::LinkClosed),
            Err(_) => Err(RequestError::Timeout),
        }
    }
}

/// Issues requests into a running strategy client. Cheap to clone.
#[derive(Clone)]
pub struct StrategyHandle {
    command_tx: mpsc::Sender<StrategyCommand>,
    last_id: Arc<AtomicI64>,
    request_timeout: Duration,
}

impl StrategyHandle {
    /// Ask the adapter for a liveness marker.
    pub async fn check_alive(&self, adapter: &str) -> Result<PendingRequest, RequestError> {
        self.request(adapter, "check_alive", Vec::new()).await
    }

    /// Ask whether the adapter's venue link is up and drained.
    pub async fn check_initialized(&self, adapter: &str) -> Result<PendingRequest, RequestError> {
        self.request(adapter, "check_initialized", Vec::new()).await
    }

    /// Subscribe to a stream on the adapter. Not acknowledged; the returned
    /// future only resolves by timeout.
    pub async fn subscribe(
        &self,
        adapter: &str,
        stream: &str,
    ) -> Result<PendingRequest, RequestError> {
        self.request(adapter, "subscribe", vec![Value::String(stream.to_owned())]).await
    }

    /// Unsubscribe from a stream on the adapter. Not acknowledged.
    pub async fn unsubscribe(
        &self,
        adapter: &str,
        stream: &str,
    ) -> Result<PendingRequest, RequestError> {
        self.request(adapter, "unsubscribe", vec![Value::String(stream.to_owned())]).await
    }

    async fn request(
        &self,
        adapter: &str,
        method: &'static str,
        params: Vec<Value>,
    ) -> Result<PendingRequest, RequestError> {
        let id = self.mint_id();
        let (reply_tx, reply_rx) = oneshot::channel();
        let command = StrategyCommand::Request {
            adapter: adapter.to_owned(),
            id,
            method,
            params,
            reply: reply_tx,
        };
        self.command_tx.send(command).await.map_err(|_| RequestError::LinkClosed)?;
        Ok(PendingRequest { id, reply_rx, timeout: self.request_timeout })
    }

    /// Current millis, bumped past the previous id so ids stay unique even
    /// within one millisecond.
    fn mint_id(&self) -> i64 {
        let now = now_ms();
        let mut prev = self.last_id.load(Ordering::Relaxed);
        loop {
            let id = now.max(prev + 1);
            match self.last_id.compare_exchange(prev, id, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return id,
                Err(actual) => prev = actual,
            }
        }
    }
}

struct PendingEntry {
    reply: oneshot::Sender<Value>,
    registered_at: Instant,
}

/// The strategy role; runs inside the client loop.
pub struct StrategyRole {
    pending: HashMap<i64, PendingEntry>,
    events_tx: mpsc::UnboundedSender<StreamContent>,
    request_timeout: Duration,
}

impl StrategyRole {
    /// Drop entries nobody can be waiting on any more.
    fn sweep(&mut self) {
        let timeout = self.request_timeout;
        self.pending.retain(|id, entry| {
            if entry.registered_at.elapsed() <= timeout {
                return true;
            }
            tracing::debug!(id = *id, "sweeping expired request");
            false
        });
    }
}

#[async_trait]
impl ClientRole for StrategyRole {
    type Command = StrategyCommand;

    async fn react(&mut self, _link: &mut MuxLink<'_>, packet: Packet) {
        match TradeContent::decode(&packet.content) {
            Ok(TradeContent::Response(response)) => match self.pending.remove(&response.id) {
                Some(entry) => {
                    let _ = entry.reply.send(response.result);
                }
                None => {
                    tracing::warn!(id = response.id, "response for unknown request");
                }
            },
            Ok(TradeContent::Stream(stream)) => {
                let _ = self.events_tx.send(stream);
            }
            Ok(TradeContent::Request(_)) => {}
            Err(e) => tracing::warn!(err = %e, "dropping unreadable content"),
        }
    }

    async fn on_command(&mut self, link: &mut MuxLink<'_>, command: StrategyCommand) {
        let StrategyCommand::Request { adapter, id, method, params, reply } = command;
        self.sweep();
        let content = RequestContent::new(id, method, params).encode();
        let destination = [adapter];
        if link.send(&destination, &content).await.is_err() {
            // Dropping the reply surfaces as LinkClosed on the waiting side.
            tracing::warn!(id, "hub link down, request dropped");
            return;
        }
        self.pending.insert(id, PendingEntry { reply, registered_at: Instant::now() });
    }
}

#[cfg(test)]
#[path = "strategy_tests.rs"]
mod tests;
