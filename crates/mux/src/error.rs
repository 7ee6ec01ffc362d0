// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Why an inbound frame was rejected.
///
/// Scope is a single message: the offending frame is logged and dropped,
/// the connection lives on.
#[derive(Debug)]
pub enum DecodeError {
    /// Malformed JSON, wrong field type, or wrong field set for the view.
    Json(serde_json::Error),
    /// Identifier outside the `[A-Za-z0-9_]+` grammar.
    Identifier(String),
    /// A timestamp more than the tolerated slack in the future.
    FutureTimestamp { field: &'static str, value: i64 },
    /// A required payload field is missing or has the wrong shape.
    Field(&'static str),
    /// Unknown trade-content discriminator.
    Discriminator(String),
    /// Payload carries the wrong number of fields for its kind.
    FieldCount { expected: usize, actual: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(e) => write!(f, "malformed frame: {e}"),
            Self::Identifier(id) => write!(f, "invalid identifier: {id:?}"),
            Self::FutureTimestamp { field, value } => {
                write!(f, "timestamp {field}={value} is in the future")
            }
            Self::Field(name) => write!(f, "missing or malformed field: {name}"),
            Self::Discriminator(kl) => write!(f, "unknown content discriminator: {kl:?}"),
            Self::FieldCount { expected, actual } => {
                write!(f, "field count mismatch: expected {expected}, got {actual}")
            }
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

/// Why a strategy request did not produce a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestError {
    /// The client loop is gone; the request was never sent.
    LinkClosed,
    /// No response arrived within the configured window.
    Timeout,
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LinkClosed => f.write_str("hub link closed"),
            Self::Timeout => f.write_str("request timed out"),
        }
    }
}

impl std::error::Error for RequestError {}
