// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The central bus: accepts authenticated websocket sessions, routes packets
//! to their listed destinations, records everything it observes.
//!
//! Each connection walks `Connecting → Authenticating → Live → Terminating`;
//! only the authentication step inserts into the live set and only the
//! terminating step removes. Every session socket is written exclusively by
//! its own connection task — routing goes through per-session channels.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::HubConfig;
use crate::packet::{now_ms, Action, Packet};
use crate::recorder::Recorder;

/// Verdict of the login seam: accept flag plus diagnostic for the client.
pub type AuthFn = Arc<dyn Fn(&Packet) -> (bool, String) + Send + Sync>;

/// Accept every syntactically valid login.
pub fn allow_all() -> AuthFn {
    Arc::new(|_| (true, String::new()))
}

/// Login frames larger than this are rejected outright.
const MAX_LOGIN_FRAME: usize = 1024;

/// Capacity of the packet tap.
const TAP_CAPACITY: usize = 256;

/// A live authenticated session.
pub struct Session {
    /// The login packet the client authenticated with.
    pub auth_packet: Packet,
    outbound: mpsc::UnboundedSender<String>,
}

impl Session {
    fn new(auth_packet: Packet, outbound: mpsc::UnboundedSender<String>) -> Self {
        Self { auth_packet, outbound }
    }
}

/// Shared hub state.
pub struct HubState {
    pub config: HubConfig,
    pub auth_fn: AuthFn,
    pub recorder: Recorder,
    pub sessions: RwLock<HashMap<String, Session>>,
    /// Every routed-and-recorded packet, in hub-serialized order.
    tap: broadcast::Sender<Packet>,
    pub shutdown: CancellationToken,
}

/// The hub itself. Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct Hub {
    state: Arc<HubState>,
}

impl Hub {
    pub fn new(
        config: HubConfig,
        auth_fn: AuthFn,
        recorder: Recorder,
        shutdown: CancellationToken,
    ) -> Self {
        let (tap, _) = broadcast::channel(TAP_CAPACITY);
        Self {
            state: Arc::new(HubState {
                config,
                auth_fn,
                recorder,
                sessions: RwLock::new(HashMap::new()),
                tap,
                shutdown,
            }),
        }
    }

    /// Observe every message packet after it has been routed and recorded.
    pub fn subscribe_packets(&self) -> broadcast::Receiver<Packet> {
        self.state.tap.subscribe()
    }

    /// Bind the configured listening endpoint.
    pub async fn bind(&self) -> anyhow::Result<TcpListener> {
        let addr = format!("{}:{}", self.state.config.host, self.state.config.port);
        Ok(TcpListener::bind(&addr).await?)
    }

    /// Serve an already-bound listener until shutdown, then drain the
    /// recorder.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(%addr, "hub listening");

        let router = Router::new()
            .route("/", get(ws_handler))
            .with_state(Arc::clone(&self.state));
        let shutdown = self.state.shutdown.clone();
        axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

        self.state.recorder.drain().await;
        tracing::info!("hub stopped");
        Ok(())
    }

    /// Bind and serve until cancelled.
    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }
}

async fn ws_handler(
    State(state): State<Arc<HubState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(state, socket))
}

/// Drive one connection from handshake to logout.
async fn handle_connection(state: Arc<HubState>, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let login = tokio::time::timeout(
        state.config.auth_timeout(),
        authenticate(&state, &mut ws_rx),
    )
    .await;

    let (uid, outbound_rx) = match login {
        Ok(Ok(live)) => live,
        Ok(Err(reason)) => {
            tracing::info!(reason = %reason, "login failed");
            let reply = Packet::server_reply(reason).encode_server_message();
            let _ = ws_tx.send(Message::Text(reply.into())).await;
            return;
        }
        Err(_) => {
            tracing::info!("login timed out");
            return;
        }
    };

    // The success reply carries empty content.
    let reply = Packet::server_reply("").encode_server_message();
    if ws_tx.send(Message::Text(reply.into())).await.is_err() {
        logout(&state, &uid).await;
        return;
    }

    serve_session(&state, &uid, &mut ws_tx, &mut ws_rx, outbound_rx).await;
    logout(&state, &uid).await;
}

/// Read the login frame, admit the client, register the session.
///
/// Any failure is reported to the client as the login reply content.
async fn authenticate(
    state: &HubState,
    ws_rx: &mut SplitStream<WebSocket>,
) -> Result<(String, mpsc::UnboundedReceiver<String>), String> {
    let text = loop {
        match ws_rx.next().await {
            Some(Ok(Message::Text(text))) => break text,
            Some(Ok(Message::Close(_))) | None => {
                return Err("connection closed during login".to_owned())
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(format!("connection error during login: {e}")),
        }
    };
    if text.len() > MAX_LOGIN_FRAME {
        return Err("login frame too long".to_owned());
    }
    let packet = Packet::decode_client_login(text.as_str()).map_err(|e| e.to_string())?;

    let mut sessions = state.sessions.write().await;
    if sessions.contains_key(&packet.source) {
        return Err("source already exists".to_owned());
    }
    let (ok, diagnostic) = (state.auth_fn)(&packet);
    if !ok {
        return Err(diagnostic);
    }

    let uid = packet.source.clone();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    sessions.insert(uid.clone(), Session::new(packet, outbound_tx));
    drop(sessions);

    state.recorder.record(Packet::decorate(&uid, Action::Login));
    tracing::info!(uid = %uid, "client logged in");
    Ok((uid, outbound_rx))
}

/// The live phase: route → record → tap per inbound packet, forward routed
/// traffic from peers, bail on disconnect or shutdown.
async fn serve_session(
    state: &HubState,
    uid: &str,
    ws_tx: &mut SplitSink<WebSocket, Message>,
    ws_rx: &mut SplitStream<WebSocket>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
) {
    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => return,

            routed = outbound_rx.recv() => {
                let Some(text) = routed else { return };
                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    return;
                }
            }

            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match Packet::decode_client_message(text.as_str()) {
                            Ok(mut packet) => {
                                packet.source = uid.to_owned();
                                packet.route_time = now_ms();
                                route(state, &packet).await;
                                state.recorder.record(packet.clone());
                                let _ = state.tap.send(packet);
                            }
                            Err(e) => {
                                tracing::warn!(uid = %uid, err = %e, "dropping undecodable frame");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(uid = %uid, err = %e, "connection error");
                        return;
                    }
                }
            }
        }
    }
}

/// Deliver one packet to every reachable destination.
///
/// A full peer channel or a dying peer only surfaces through that peer's own
/// disconnect path.
async fn route(state: &HubState, packet: &Packet) {
    let sessions = state.sessions.read().await;
    let targets = select_targets(&sessions, packet);
    if targets.is_empty() {
        return;
    }
    let text = packet.encode_server_message();
    for target in targets {
        let _ = target.send(text.clone());
    }
}

/// Outbound channels that actually receive a frame: destinations present in
/// the live set, minus the source, each at most once.
fn select_targets<'a>(
    sessions: &'a HashMap<String, Session>,
    packet: &Packet,
) -> Vec<&'a mpsc::UnboundedSender<String>> {
    let mut picked: Vec<&str> = Vec::new();
    let mut targets = Vec::new();
    for dest in &packet.destination {
        if dest == &packet.source || picked.contains(&dest.as_str()) {
            continue;
        }
        if let Some(session) = sessions.get(dest.as_str()) {
            picked.push(dest);
            targets.push(&session.outbound);
        }
    }
    targets
}

/// Drop the session and record its logout.
async fn logout(state: &HubState, uid: &str) {
    if state.sessions.write().await.remove(uid).is_some() {
        state.recorder.record(Packet::decorate(uid, Action::Logout));
        tracing::info!(uid = %uid, "client logged out");
    }
}

#[cfg(test)]
#[path = "hub_tests.rs"]
mod tests;
