// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Exchange adapter facade: the internal client that answers trade requests
//! and republishes venue events to subscribed clients.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::{Client, ClientRole, MuxLink};
use crate::config::AdapterConfig;
use crate::packet::{now_ms, Packet};
use crate::trade::content::{RequestContent, ResponseContent, TradeContent};
use crate::trade::upstream::{run_upstream, UpstreamShared, VenueProfile, PORTAL_CAPACITY};

/// Mailbox traffic for the exchange role.
pub enum AdapterCommand {
    /// One parsed venue frame.
    UpstreamEvent(Map<String, Value>),
}

/// Assemble an exchange adapter client for the given venue profile.
pub fn build_adapter(
    config: AdapterConfig,
    profile: Arc<dyn VenueProfile>,
    cancel: CancellationToken,
) -> Client<ExchangeRole> {
    let shared = UpstreamShared::new(profile);
    let (portal_tx, mut portal_rx) = mpsc::channel(PORTAL_CAPACITY);

    let role = ExchangeRole {
        config: config.clone(),
        shared,
        portal_tx,
        helper_cancel: cancel.child_token(),
        helper_task: None,
        packet_buffer: Vec::new(),
    };
    let client = Client::new(config.uid.clone(), config.uri.clone(), role, cancel);

    // Portal pump: venue events ride the client mailbox so the facade
    // handles them between hub frames, with backpressure on both hops.
    let command_tx = client.command_sender();
    tokio::spawn(async move {
        while let Some(event) = portal_rx.recv().await {
            if command_tx.send(AdapterCommand::UpstreamEvent(event)).await.is_err() {
                break;
            }
        }
    });

    client
}

/// The adapter facade; runs inside the client loop.
pub struct ExchangeRole {
    config: AdapterConfig,
    shared: Arc<UpstreamShared>,
    portal_tx: mpsc::Sender<Map<String, Value>>,
    helper_cancel: CancellationToken,
    helper_task: Option<JoinHandle<()>>,
    /// `(destination, content)` pairs parked while the hub link was down.
    packet_buffer: Vec<(Vec<String>, String)>,
}

impl ExchangeRole {
    pub fn shared(&self) -> &Arc<UpstreamShared> {
        &self.shared
    }

    /// Start the venue task, or restart it after it gave up.
    async fn ensure_helper(&mut self) {
        if self.helper_task.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let Some(command_rx) = self.shared.reclaim_commands().await else { return };
        tracing::info!("starting venue helper");
        self.helper_task = Some(tokio::spawn(run_upstream(
            self.config.clone(),
            Arc::clone(&self.shared),
            command_rx,
            self.portal_tx.clone(),
            self.helper_cancel.child_token(),
        )));
    }

    /// Send through the hub; park the pair for replay when the link is down.
    async fn send_or_buffer(
        &mut self,
        link: &mut MuxLink<'_>,
        destination: Vec<String>,
        content: String,
    ) {
        if link.send(&destination, &content).await.is_err() {
            tracing::warn!("hub link down, buffering packet");
            self.packet_buffer.push((destination, content));
        }
    }

    async fn respond(&mut self, link: &mut MuxLink<'_>, uid: &str, id: i64, result: Value) {
        let content = ResponseContent::new(id, result).encode();
        self.send_or_buffer(link, vec![uid.to_owned()], content).await;
    }

    async fn handle_request(
        &mut self,
        link: &mut MuxLink<'_>,
        source: &str,
        request: RequestContent,
    ) {
        match request.method.as_str() {
            "check_alive" => self.respond(link, source, request.id, json!(now_ms())).await,
            "check_initialized" => {
                let initialized = self.shared.is_initialized();
                self.respond(link, source, request.id, json!(initialized)).await;
            }
            "subscribe" | "unsubscribe" => {
                if !self.shared.is_initialized() {
                    // Deferred: the caller reissues once the venue is up.
                    tracing::debug!(method = %request.method, "venue not initialized, ignoring");
                    return;
                }
                for param in &request.params {
                    let Some(stream) = param.as_str() else {
                        tracing::warn!("non-string stream parameter");
                        continue;
                    };
                    if request.method == "subscribe" {
                        self.shared.subscribe(source, stream).await;
                    } else {
                        self.shared.unsubscribe(source, stream).await;
                    }
                }
            }
            other => tracing::warn!(method = %other, "unknown request method"),
        }
    }

    /// Fan one venue event out to the stream's subscribers.
    async fn publish(&mut self, link: &mut MuxLink<'_>, event: Map<String, Value>) {
        let Some(venue_stream) = event.get("stream").and_then(Value::as_str) else {
            tracing::debug!("venue event without stream tag");
            return;
        };
        let Some(stream) = self.shared.profile().internal_name(venue_stream) else {
            tracing::debug!(stream = %venue_stream, "event for unknown stream");
            return;
        };
        let subscribers = self.shared.subscribers(&stream).await;
        if subscribers.is_empty() {
            return;
        }
        let Some(data) = event.get("data") else {
            tracing::debug!(stream = %stream, "venue event without data");
            return;
        };
        let content = self.shared.profile().shape(&stream, data.clone());
        self.send_or_buffer(link, subscribers, content.encode()).await;
    }
}

#[async_trait]
impl ClientRole for ExchangeRole {
    type Command = AdapterCommand;

    async fn set_up(&mut self, link: &mut MuxLink<'_>) {
        self.ensure_helper().await;
        if !self.packet_buffer.is_empty() {
            tracing::info!(count = self.packet_buffer.len(), "resending buffered packets");
            for (destination, content) in std::mem::take(&mut self.packet_buffer) {
                self.send_or_buffer(link, destination, content).await;
            }
        }
    }

    async fn react(&mut self, link: &mut MuxLink<'_>, packet: Packet) {
        let content = match TradeContent::decode(&packet.content) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(err = %e, "dropping unreadable content");
                return;
            }
        };
        let TradeContent::Request(request) = content else { return };
        self.handle_request(link, &packet.source, request).await;
    }

    async fn on_command(&mut self, link: &mut MuxLink<'_>, command: AdapterCommand) {
        match command {
            AdapterCommand::UpstreamEvent(event) => self.publish(link, event).await,
        }
    }

    fn clean_up(&mut self) {
        if self.helper_task.as_ref().is_some_and(|task| !task.is_finished()) {
            tracing::info!("stopping venue helper");
        }
        self.helper_cancel.cancel();
    }

    async fn wait_clean_up(&mut self) {
        if let Some(task) = self.helper_task.take() {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
#[path = "adapter_tests.rs"]
mod tests;
