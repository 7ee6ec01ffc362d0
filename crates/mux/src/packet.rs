// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hub envelope: one [`Packet`] entity with four wire views.
//!
//! Field keys are short codes: `st` sent_time, `rt` route_time, `ac` action,
//! `sc` source, `dt` destination, `ct` content. Clients only ever see the
//! view that concerns them; the recorder stores the full six-field form, one
//! JSON object per line. Server-originated frames carry the literal source
//! [`HUB_SOURCE`].

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Source identifier the hub signs its own frames with.
pub const HUB_SOURCE: &str = "#";

/// Tolerated clock skew on inbound timestamps, in milliseconds.
const FUTURE_SLACK_MS: i64 = 1;

/// Current epoch millis.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// What a packet is doing at the hub boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Login,
    Message,
    Logout,
}

/// The unit crossing the hub boundary, in stored form.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// Stamped by the sender, epoch millis.
    pub sent_time: i64,
    /// Stamped by the hub on ingress, epoch millis.
    pub route_time: i64,
    pub action: Action,
    pub source: String,
    pub destination: Vec<String>,
    /// Opaque to the hub; trade contents live here.
    pub content: String,
}

// Wire views. `deny_unknown_fields` plus no optional fields gives the exact
// field set each view allows.

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClientLoginWire {
    st: i64,
    sc: String,
    ct: String,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClientMessageWire {
    st: i64,
    dt: Vec<String>,
    ct: String,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServerMessageWire {
    st: i64,
    rt: i64,
    sc: String,
    ct: String,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RecordWire {
    st: i64,
    rt: i64,
    ac: Action,
    sc: String,
    dt: Vec<String>,
    ct: String,
}

/// True for identifiers matching `[A-Za-z0-9_]+`.
pub fn is_valid_uid(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

fn check_uid(sc: &str) -> Result<(), DecodeError> {
    if is_valid_uid(sc) {
        Ok(())
    } else {
        Err(DecodeError::Identifier(sc.to_owned()))
    }
}

fn check_source(sc: &str) -> Result<(), DecodeError> {
    if sc == HUB_SOURCE {
        Ok(())
    } else {
        check_uid(sc)
    }
}

fn check_fresh(field: &'static str, value: i64) -> Result<(), DecodeError> {
    if value > now_ms() + FUTURE_SLACK_MS {
        Err(DecodeError::FutureTimestamp { field, value })
    } else {
        Ok(())
    }
}

impl Packet {
    /// Client-side login packet for `uid` carrying the auth object.
    pub fn login(uid: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            sent_time: now_ms(),
            route_time: 0,
            action: Action::Login,
            source: uid.into(),
            destination: Vec::new(),
            content: content.into(),
        }
    }

    /// Client-side message packet; the hub stamps source and route time.
    pub fn message(destination: Vec<String>, content: impl Into<String>) -> Self {
        Self {
            sent_time: now_ms(),
            route_time: 0,
            action: Action::Message,
            source: String::new(),
            destination,
            content: content.into(),
        }
    }

    /// Hub-originated frame (login replies and other hub speech).
    pub fn server_reply(content: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            sent_time: now,
            route_time: now,
            action: Action::Message,
            source: HUB_SOURCE.to_owned(),
            destination: Vec::new(),
            content: content.into(),
        }
    }

    /// Hub-emitted login/logout record for a session.
    pub fn decorate(uid: &str, action: Action) -> Self {
        let now = now_ms();
        Self {
            sent_time: now,
            route_time: now,
            action,
            source: uid.to_owned(),
            destination: Vec::new(),
            content: String::new(),
        }
    }

    // -- Encoders. Infallible on well-typed packets. --------------------------

    /// Client→hub login view `{st, sc, ct}`.
    pub fn encode_client_login(&self) -> String {
        let wire = ClientLoginWire {
            st: self.sent_time,
            sc: self.source.clone(),
            ct: self.content.clone(),
        };
        serde_json::to_string(&wire).unwrap_or_default()
    }

    /// Client→hub message view `{st, dt, ct}`.
    pub fn encode_client_message(&self) -> String {
        let wire = ClientMessageWire {
            st: self.sent_time,
            dt: self.destination.clone(),
            ct: self.content.clone(),
        };
        serde_json::to_string(&wire).unwrap_or_default()
    }

    /// Hub→client message view `{st, rt, sc, ct}` — destination stripped.
    pub fn encode_server_message(&self) -> String {
        let wire = ServerMessageWire {
            st: self.sent_time,
            rt: self.route_time,
            sc: self.source.clone(),
            ct: self.content.clone(),
        };
        serde_json::to_string(&wire).unwrap_or_default()
    }

    /// Full stored view `{st, rt, ac, sc, dt, ct}`, one line per record.
    pub fn encode_record_line(&self) -> String {
        let wire = RecordWire {
            st: self.sent_time,
            rt: self.route_time,
            ac: self.action,
            sc: self.source.clone(),
            dt: self.destination.clone(),
            ct: self.content.clone(),
        };
        serde_json::to_string(&wire).unwrap_or_default()
    }

    // -- Decoders. Each validates the exact field set, declared types, the
    // -- identifier grammar, and timestamp freshness. -------------------------

    /// Decode a client→hub login frame.
    pub fn decode_client_login(text: &str) -> Result<Self, DecodeError> {
        let wire: ClientLoginWire = serde_json::from_str(text)?;
        check_uid(&wire.sc)?;
        check_fresh("st", wire.st)?;
        Ok(Self {
            sent_time: wire.st,
            route_time: 0,
            action: Action::Login,
            source: wire.sc,
            destination: Vec::new(),
            content: wire.ct,
        })
    }

    /// Decode a client→hub message frame. Source and route time are stamped
    /// by the hub afterwards.
    pub fn decode_client_message(text: &str) -> Result<Self, DecodeError> {
        let wire: ClientMessageWire = serde_json::from_str(text)?;
        check_fresh("st", wire.st)?;
        Ok(Self {
            sent_time: wire.st,
            route_time: 0,
            action: Action::Message,
            source: String::new(),
            destination: wire.dt,
            content: wire.ct,
        })
    }

    /// Decode a hub→client message frame.
    pub fn decode_server_message(text: &str) -> Result<Self, DecodeError> {
        let wire: ServerMessageWire = serde_json::from_str(text)?;
        check_source(&wire.sc)?;
        check_fresh("st", wire.st)?;
        check_fresh("rt", wire.rt)?;
        Ok(Self {
            sent_time: wire.st,
            route_time: wire.rt,
            action: Action::Message,
            source: wire.sc,
            destination: Vec::new(),
            content: wire.ct,
        })
    }

    /// Decode one stored record line.
    pub fn decode_record_line(line: &str) -> Result<Self, DecodeError> {
        let wire: RecordWire = serde_json::from_str(line)?;
        check_source(&wire.sc)?;
        Ok(Self {
            sent_time: wire.st,
            route_time: wire.rt,
            action: wire.ac,
            source: wire.sc,
            destination: wire.dt,
            content: wire.ct,
        })
    }
}

#[cfg(test)]
#[path = "packet_tests.rs"]
mod tests;
