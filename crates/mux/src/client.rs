// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconnecting hub-side client runtime.
//!
//! [`Client::run`] drives the full lifecycle: connect, login, `set_up`,
//! handler loop, reconnect on transient failure, clean teardown on orderly
//! close or cancellation. Client behavior plugs in through [`ClientRole`];
//! roles never touch the socket directly, they speak through [`MuxLink`]
//! and receive work through the bounded command mailbox.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::packet::Packet;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Capacity of the per-client command mailbox.
const COMMAND_MAILBOX: usize = 64;

/// Factory for the login content object.
pub type AuthObjFn = Arc<dyn Fn(&str) -> serde_json::Value + Send + Sync>;

/// The stock auth object: `{"uid": uid}`.
pub fn default_auth() -> AuthObjFn {
    Arc::new(|uid| serde_json::json!({ "uid": uid }))
}

/// The current hub connection is gone. The runtime will reconnect; the
/// message was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkClosed;

impl fmt::Display for LinkClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("hub link closed")
    }
}

impl std::error::Error for LinkClosed {}

#[async_trait]
pub(crate) trait TextSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), LinkClosed>;
}

#[async_trait]
impl TextSink for SplitSink<WsStream, Message> {
    async fn send_text(&mut self, text: String) -> Result<(), LinkClosed> {
        self.send(Message::Text(text.into())).await.map_err(|_| LinkClosed)
    }
}

/// Write half of the current hub connection, handed to role hooks.
pub struct MuxLink<'a> {
    sink: &'a mut (dyn TextSink + 'a),
}

impl<'a> MuxLink<'a> {
    pub(crate) fn new(sink: &'a mut (dyn TextSink + 'a)) -> Self {
        MuxLink { sink }
    }

    /// Send `content` to every listed destination through the hub.
    pub async fn send(&mut self, destination: &[String], content: &str) -> Result<(), LinkClosed> {
        let text = Packet::message(destination.to_vec(), content).encode_client_message();
        self.sink.send_text(text).await
    }
}

/// Lifecycle hooks the runtime drives. One implementation per client kind.
#[async_trait]
pub trait ClientRole: Send {
    /// Work delivered through the client's mailbox: API calls, upstream
    /// portal events. `()` when unused.
    type Command: Send;

    /// Called after every successful login, before the handler loop.
    async fn set_up(&mut self, _link: &mut MuxLink<'_>) {}

    /// Called for every decoded server frame, strictly in arrival order.
    async fn react(&mut self, link: &mut MuxLink<'_>, packet: Packet);

    /// Called for every mailbox command.
    async fn on_command(&mut self, _link: &mut MuxLink<'_>, _command: Self::Command) {}

    /// Called once when the runtime exits, before `wait_clean_up`.
    fn clean_up(&mut self) {}

    /// Awaited after `clean_up`; last chance to join helpers.
    async fn wait_clean_up(&mut self) {}
}

enum Exit {
    /// Abnormal close or transport error: reconnect with state intact.
    Transient,
    /// Orderly close or cancellation: tear down, no reconnect.
    Terminal,
    /// The hub rejected the login; reconnecting would only repeat it.
    Rejected(String),
}

/// Close code 1000 is an orderly goodbye; anything else warrants reconnect.
fn close_exit(frame: Option<CloseFrame>) -> Exit {
    match frame {
        Some(frame) if frame.code == CloseCode::Normal => Exit::Terminal,
        _ => Exit::Transient,
    }
}

/// A reconnecting internal client with a pluggable role.
pub struct Client<R: ClientRole> {
    uid: String,
    uri: String,
    auth_fn: AuthObjFn,
    role: R,
    cancel: CancellationToken,
    command_tx: mpsc::Sender<R::Command>,
    command_rx: mpsc::Receiver<R::Command>,
}

impl<R: ClientRole> Client<R> {
    pub fn new(
        uid: impl Into<String>,
        uri: impl Into<String>,
        role: R,
        cancel: CancellationToken,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_MAILBOX);
        Self {
            uid: uid.into(),
            uri: uri.into(),
            auth_fn: default_auth(),
            role,
            cancel,
            command_tx,
            command_rx,
        }
    }

    /// Replace the stock auth object factory.
    pub fn with_auth(mut self, auth_fn: AuthObjFn) -> Self {
        self.auth_fn = auth_fn;
        self
    }

    /// Sender for the role's mailbox. Clones stay valid across reconnects.
    pub fn command_sender(&self) -> mpsc::Sender<R::Command> {
        self.command_tx.clone()
    }

    /// Run until cancelled, orderly-closed by the hub, or rejected at login.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut backoff = Duration::from_millis(100);
        let max_backoff = Duration::from_secs(5);
        let mut rejection = None;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match connect_async(&self.uri).await {
                Ok((ws, _)) => {
                    backoff = Duration::from_millis(100);
                    match self.serve(ws).await {
                        Exit::Transient => {
                            tracing::warn!(uid = %self.uid, "connection lost, reconnecting");
                        }
                        Exit::Terminal => break,
                        Exit::Rejected(reason) => {
                            rejection = Some(reason);
                            break;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(uid = %self.uid, err = %e, "hub connect failed");
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(max_backoff);
        }

        self.role.clean_up();
        self.role.wait_clean_up().await;
        tracing::info!(uid = %self.uid, "client exit");

        match rejection {
            Some(reason) => Err(anyhow::anyhow!("login rejected: {reason}")),
            None => Ok(()),
        }
    }

    /// One connection: login, set_up, handler loop.
    async fn serve(&mut self, ws: WsStream) -> Exit {
        let (mut sink, mut stream) = ws.split();

        // Login.
        let auth_obj = (self.auth_fn)(&self.uid);
        let login = Packet::login(&self.uid, auth_obj.to_string()).encode_client_login();
        if sink.send(Message::Text(login.into())).await.is_err() {
            return Exit::Transient;
        }
        let reply = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => break text,
                Some(Ok(Message::Close(frame))) => return close_exit(frame),
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::warn!(uid = %self.uid, err = %e, "login reply error");
                    return Exit::Transient;
                }
                None => return Exit::Transient,
            }
        };
        match Packet::decode_server_message(reply.as_str()) {
            Ok(packet) if packet.content.is_empty() => {
                tracing::info!(uid = %self.uid, "logged in");
            }
            Ok(packet) => {
                tracing::warn!(uid = %self.uid, reason = %packet.content, "login rejected");
                return Exit::Rejected(packet.content);
            }
            Err(e) => {
                tracing::warn!(uid = %self.uid, err = %e, "unreadable login reply");
                return Exit::Transient;
            }
        }

        self.role.set_up(&mut MuxLink::new(&mut sink)).await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Exit::Terminal,

                command = self.command_rx.recv() => {
                    // We hold a sender ourselves, so recv never yields None.
                    if let Some(command) = command {
                        self.role.on_command(&mut MuxLink::new(&mut sink), command).await;
                    }
                }

                frame = stream.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            match Packet::decode_server_message(text.as_str()) {
                                Ok(packet) => {
                                    self.role.react(&mut MuxLink::new(&mut sink), packet).await;
                                }
                                Err(e) => {
                                    tracing::warn!(uid = %self.uid, err = %e, "dropping undecodable frame");
                                }
                            }
                        }
                        Some(Ok(Message::Close(frame))) => return close_exit(frame),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!(uid = %self.uid, err = %e, "connection error");
                            return Exit::Transient;
                        }
                        None => return Exit::Transient,
                    }
                }
            }
        }
    }
}

/// Reference client: returns every payload to its sender.
pub struct EchoRole;

#[async_trait]
impl ClientRole for EchoRole {
    type Command = ();

    async fn react(&mut self, link: &mut MuxLink<'_>, packet: Packet) {
        let destination = [packet.source];
        if link.send(&destination, &packet.content).await.is_err() {
            tracing::warn!("echo send failed");
        }
    }
}
