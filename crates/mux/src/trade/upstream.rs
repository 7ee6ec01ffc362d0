// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Upstream venue link: one websocket multiplexed across internal
//! subscribers.
//!
//! The venue task owns the socket; everything else talks to it through
//! [`UpstreamShared`]. On every (re)connect the task replays the full
//! subscription index in one batch, drains the buffer of failed sends, and
//! only then flips `is_initialized`. Outbound sends are paced; reconnects
//! back off linearly and give up after a configured number of attempts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use indexmap::{IndexMap, IndexSet};
use serde_json::{json, Map, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::config::AdapterConfig;
use crate::packet::now_ms;
use crate::trade::content::StreamContent;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Capacity of the portal channel from the venue task to the facade.
pub(crate) const PORTAL_CAPACITY: usize = 256;

/// Venue-specific stream naming and event shaping.
#[async_trait]
pub trait VenueProfile: Send + Sync {
    /// One-time venue discovery before connecting (symbol sets etc).
    async fn prepare(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Venue wire name for an internal stream, or `None` to reject it.
    fn venue_name(&self, stream: &str) -> Option<String>;

    /// Internal name for the stream tag on a venue event.
    fn internal_name(&self, venue_stream: &str) -> Option<String>;

    /// Shape raw event data into publishable stream content.
    fn shape(&self, stream: &str, data: Value) -> StreamContent {
        StreamContent::new(stream, data)
    }
}

/// Uses stream names verbatim on both sides.
pub struct RawVenue;

#[async_trait]
impl VenueProfile for RawVenue {
    fn venue_name(&self, stream: &str) -> Option<String> {
        Some(stream.to_owned())
    }

    fn internal_name(&self, venue_stream: &str) -> Option<String> {
        Some(venue_stream.to_owned())
    }
}

/// State shared between the venue task and the adapter facade.
pub struct UpstreamShared {
    profile: Arc<dyn VenueProfile>,
    initialized: AtomicBool,
    /// stream → subscriber uids; insertion order drives resubscribe batches.
    streams: Mutex<IndexMap<String, IndexSet<String>>>,
    /// Venue messages that failed to send, re-sent on the next connection.
    message_buffer: Mutex<Vec<String>>,
    /// Venue-bound requests from the facade.
    command_tx: mpsc::UnboundedSender<String>,
    /// Parked between venue task runs so a finished task can be restarted.
    command_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl UpstreamShared {
    pub fn new(profile: Arc<dyn VenueProfile>) -> Arc<Self> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            profile,
            initialized: AtomicBool::new(false),
            streams: Mutex::new(IndexMap::new()),
            message_buffer: Mutex::new(Vec::new()),
            command_tx,
            command_rx: Mutex::new(Some(command_rx)),
        })
    }

    pub fn profile(&self) -> &Arc<dyn VenueProfile> {
        &self.profile
    }

    /// True iff the venue socket is open and resubscribe + drain completed.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub(crate) fn set_initialized(&self, value: bool) {
        self.initialized.store(value, Ordering::Release);
    }

    pub(crate) async fn reclaim_commands(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.command_rx.lock().await.take()
    }

    async fn park_commands(&self, rx: mpsc::UnboundedReceiver<String>) {
        *self.command_rx.lock().await = Some(rx);
    }

    /// Add a subscriber; the first one turns the stream on upstream.
    /// Idempotent per `(uid, stream)`.
    pub async fn subscribe(&self, uid: &str, stream: &str) {
        let mut streams = self.streams.lock().await;
        if let Some(set) = streams.get_mut(stream) {
            set.insert(uid.to_owned());
            return;
        }
        let Some(venue_stream) = self.profile.venue_name(stream) else {
            tracing::warn!(stream = %stream, "stream rejected by venue profile");
            return;
        };
        let mut set = IndexSet::new();
        set.insert(uid.to_owned());
        streams.insert(stream.to_owned(), set);
        drop(streams);
        self.send_request("SUBSCRIBE", &[venue_stream]);
    }

    /// Drop a subscriber; the last one out turns the stream off upstream.
    /// Idempotent.
    pub async fn unsubscribe(&self, uid: &str, stream: &str) {
        let mut streams = self.streams.lock().await;
        let Some(set) = streams.get_mut(stream) else { return };
        set.shift_remove(uid);
        if !set.is_empty() {
            return;
        }
        streams.shift_remove(stream);
        drop(streams);
        if let Some(venue_stream) = self.profile.venue_name(stream) {
            self.send_request("UNSUBSCRIBE", &[venue_stream]);
        }
    }

    /// Subscribers of one stream; empty when unknown.
    pub async fn subscribers(&self, stream: &str) -> Vec<String> {
        self.streams
            .lock()
            .await
            .get(stream)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Make sure the init stream is indexed, with no subscribers.
    async fn ensure_init_stream(&self, init_stream: &str) {
        self.streams.lock().await.entry(init_stream.to_owned()).or_default();
    }

    /// One SUBSCRIBE covering everything indexed except the init stream.
    async fn resubscribe_request(&self, init_stream: &str) -> Option<String> {
        let streams = self.streams.lock().await;
        let params: Vec<String> = streams
            .keys()
            .filter(|stream| stream.as_str() != init_stream)
            .filter_map(|stream| self.profile.venue_name(stream))
            .collect();
        drop(streams);
        if params.is_empty() {
            None
        } else {
            Some(venue_request("SUBSCRIBE", &params))
        }
    }

    async fn take_buffer(&self) -> Vec<String> {
        std::mem::take(&mut *self.message_buffer.lock().await)
    }

    async fn buffer_message(&self, message: String) {
        self.message_buffer.lock().await.push(message);
    }

    fn send_request(&self, method: &str, params: &[String]) {
        let _ = self.command_tx.send(venue_request(method, params));
    }
}

/// Venue request wire form, id stamped with the current millis.
fn venue_request(method: &str, params: &[String]) -> String {
    json!({ "method": method, "params": params, "id": now_ms() }).to_string()
}

/// Enforces a minimum interval between consecutive venue sends.
struct Pacer {
    interval: Duration,
    last: Option<Instant>,
}

impl Pacer {
    fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    async fn ready(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                tokio::time::sleep(self.interval - elapsed).await;
            }
        }
        self.last = Some(Instant::now());
    }
}

enum SessionEnd {
    /// Connection lost; reconnect after backoff.
    Lost,
    /// Cancelled or the facade is gone; stop for good.
    Done,
}

/// Venue connection loop.
pub(crate) async fn run_upstream(
    config: AdapterConfig,
    shared: Arc<UpstreamShared>,
    mut command_rx: mpsc::UnboundedReceiver<String>,
    portal_tx: mpsc::Sender<Map<String, Value>>,
    cancel: CancellationToken,
) {
    let mut pacer = Pacer::new(config.send_interval());
    let mut retry_count: u32 = 0;
    let mut session = VenueSession {
        config: &config,
        shared: &shared,
        portal_tx: &portal_tx,
        cancel: &cancel,
        pacer: &mut pacer,
    };

    loop {
        if session.cancel.is_cancelled() {
            break;
        }

        match connect(session.config, session.shared).await {
            Ok(ws) => {
                let end = session.serve(ws, &mut command_rx, &mut retry_count).await;
                session.shared.set_initialized(false);
                match end {
                    SessionEnd::Done => break,
                    SessionEnd::Lost => tracing::warn!("venue connection lost"),
                }
            }
            Err(e) => tracing::warn!(err = %e, "venue connect failed"),
        }

        if session.cancel.is_cancelled() {
            break;
        }
        if retry_count > session.config.max_connect_retries {
            tracing::error!(retries = retry_count, "giving up on venue connection");
            break;
        }
        let backoff = Duration::from_secs(u64::from(retry_count) * 10);
        tokio::select! {
            _ = session.cancel.cancelled() => break,
            _ = tokio::time::sleep(backoff) => {}
        }
        retry_count += 1;
    }

    shared.set_initialized(false);
    shared.park_commands(command_rx).await;
    tracing::info!("venue task exit");
}

async fn connect(config: &AdapterConfig, shared: &UpstreamShared) -> anyhow::Result<WsStream> {
    let profile = shared.profile();
    profile.prepare().await?;
    let init_venue = profile.venue_name(&config.init_stream).ok_or_else(|| {
        anyhow::anyhow!("init stream {:?} rejected by venue profile", config.init_stream)
    })?;
    let url = format!("{}/stream?streams={}", config.ws_url, init_venue);
    tracing::info!(url = %url, "connecting to venue");
    let (ws, _) = tokio_tungstenite::connect_async(&url).await?;
    Ok(ws)
}

struct VenueSession<'a> {
    config: &'a AdapterConfig,
    shared: &'a UpstreamShared,
    portal_tx: &'a mpsc::Sender<Map<String, Value>>,
    cancel: &'a CancellationToken,
    pacer: &'a mut Pacer,
}

impl VenueSession<'_> {
    /// One connection: resubscribe, drain the buffer, pump frames into the
    /// portal and commands out to the venue.
    async fn serve(
        &mut self,
        ws: WsStream,
        command_rx: &mut mpsc::UnboundedReceiver<String>,
        retry_count: &mut u32,
    ) -> SessionEnd {
        let (mut sink, mut stream) = ws.split();

        self.shared.ensure_init_stream(&self.config.init_stream).await;

        if let Some(request) = self.shared.resubscribe_request(&self.config.init_stream).await {
            if !self.send_paced(&mut sink, request).await {
                return SessionEnd::Lost;
            }
        }
        for message in self.shared.take_buffer().await {
            if !self.send_paced(&mut sink, message).await {
                return SessionEnd::Lost;
            }
        }

        self.shared.set_initialized(true);
        *retry_count = 0;
        tracing::info!("venue link initialized");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return SessionEnd::Done;
                }

                command = command_rx.recv() => {
                    // The facade holds a sender for the life of the shared
                    // state, so recv never yields None here.
                    if let Some(message) = command {
                        if !self.send_paced(&mut sink, message).await {
                            return SessionEnd::Lost;
                        }
                    }
                }

                frame = stream.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<Value>(text.as_str()) {
                                Ok(Value::Object(event)) => {
                                    if self.portal_tx.send(event).await.is_err() {
                                        return SessionEnd::Done;
                                    }
                                }
                                _ => tracing::warn!("unparsable venue frame"),
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => return SessionEnd::Lost,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!(err = %e, "venue connection error");
                            return SessionEnd::Lost;
                        }
                    }
                }
            }
        }
    }

    /// Paced send; a failed send parks the message for the next connection.
    async fn send_paced(
        &mut self,
        sink: &mut SplitSink<WsStream, Message>,
        message: String,
    ) -> bool {
        self.pacer.ready().await;
        if let Err(e) = sink.send(Message::Text(message.clone().into())).await {
            tracing::warn!(err = %e, "venue send failed, buffering");
            self.shared.buffer_message(message).await;
            false
        } else {
            true
        }
    }
}

#[cfg(test)]
#[path = "upstream_tests.rs"]
mod tests;
