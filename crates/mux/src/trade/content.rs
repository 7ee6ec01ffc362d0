// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The trade sub-protocol carried in a packet's content field.
//!
//! A tagged sum discriminated by `kl`: requests `{id, mt, pr}`, responses
//! `{id, rs}`, stream events `{st, dt}`. Decoding checks the exact payload
//! field count per kind; unknown discriminators are rejected. Stream events
//! for known kinds can embed typed projections next to the raw payload.

use serde_json::{json, Map, Value};

use crate::error::DecodeError;

/// Tagged union of the trade sub-protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum TradeContent {
    Request(RequestContent),
    Response(ResponseContent),
    Stream(StreamContent),
}

/// A correlated request to an adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContent {
    pub id: i64,
    pub method: String,
    pub params: Vec<Value>,
}

/// The adapter's answer to a request.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseContent {
    pub id: i64,
    pub result: Value,
}

/// One upstream event republished to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamContent {
    pub stream: String,
    pub data: Value,
}

fn check_len(map: &Map<String, Value>, expected: usize) -> Result<(), DecodeError> {
    if map.len() == expected {
        Ok(())
    } else {
        Err(DecodeError::FieldCount { expected, actual: map.len() })
    }
}

fn take_i64(map: &mut Map<String, Value>, key: &'static str) -> Result<i64, DecodeError> {
    map.remove(key).and_then(|v| v.as_i64()).ok_or(DecodeError::Field(key))
}

fn take_string(map: &mut Map<String, Value>, key: &'static str) -> Result<String, DecodeError> {
    match map.remove(key) {
        Some(Value::String(s)) => Ok(s),
        _ => Err(DecodeError::Field(key)),
    }
}

impl TradeContent {
    /// Decode a content string into its typed variant.
    pub fn decode(content: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(content)?;
        let Value::Object(mut map) = value else {
            return Err(DecodeError::Field("kl"));
        };
        let discriminator = take_string(&mut map, "kl")?;
        match discriminator.as_str() {
            "request" => {
                check_len(&map, 3)?;
                let id = take_i64(&mut map, "id")?;
                let method = take_string(&mut map, "mt")?;
                let params = match map.remove("pr") {
                    Some(Value::Array(params)) => params,
                    _ => return Err(DecodeError::Field("pr")),
                };
                Ok(Self::Request(RequestContent { id, method, params }))
            }
            "response" => {
                check_len(&map, 2)?;
                let id = take_i64(&mut map, "id")?;
                let result = map.remove("rs").ok_or(DecodeError::Field("rs"))?;
                Ok(Self::Response(ResponseContent { id, result }))
            }
            "stream" => {
                check_len(&map, 2)?;
                let stream = take_string(&mut map, "st")?;
                let data = match map.remove("dt") {
                    Some(data @ Value::Object(_)) => data,
                    _ => return Err(DecodeError::Field("dt")),
                };
                Ok(Self::Stream(StreamContent { stream, data }))
            }
            other => Err(DecodeError::Discriminator(other.to_owned())),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Self::Request(request) => request.encode(),
            Self::Response(response) => response.encode(),
            Self::Stream(stream) => stream.encode(),
        }
    }
}

impl RequestContent {
    pub fn new(id: i64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self { id, method: method.into(), params }
    }

    pub fn encode(&self) -> String {
        json!({ "kl": "request", "id": self.id, "mt": self.method, "pr": self.params })
            .to_string()
    }
}

impl ResponseContent {
    pub fn new(id: i64, result: Value) -> Self {
        Self { id, result }
    }

    pub fn encode(&self) -> String {
        json!({ "kl": "response", "id": self.id, "rs": self.result }).to_string()
    }
}

// -- Typed stream projections -------------------------------------------------

/// One executed trade.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeData {
    pub trade_time: i64,
    pub price: f64,
    pub quantity: f64,
}

/// One price level of an order book side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookLevel {
    pub price: f64,
    pub quantity: f64,
}

/// Both sides of an order book snapshot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BookData {
    pub asks: Vec<BookLevel>,
    pub bids: Vec<BookLevel>,
}

/// One candlestick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KlineData {
    pub start_time: i64,
    pub end_time: i64,
    pub open: f64,
    pub close: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
}

fn get_i64(data: &Value, key: &'static str) -> Result<i64, DecodeError> {
    data.get(key).and_then(Value::as_i64).ok_or(DecodeError::Field(key))
}

fn get_f64(data: &Value, key: &'static str) -> Result<f64, DecodeError> {
    data.get(key).and_then(Value::as_f64).ok_or(DecodeError::Field(key))
}

impl StreamContent {
    pub fn new(stream: impl Into<String>, data: Value) -> Self {
        Self { stream: stream.into(), data }
    }

    pub fn encode(&self) -> String {
        json!({ "kl": "stream", "st": self.stream, "dt": self.data }).to_string()
    }

    /// Wrap the raw payload with normalized trade fields.
    pub fn embed_trade(&mut self, trade: TradeData) {
        let raw = self.data.take();
        self.data =
            json!({ "raw": raw, "t": trade.trade_time, "p": trade.price, "q": trade.quantity });
    }

    pub fn extract_trade(&self) -> Result<TradeData, DecodeError> {
        Ok(TradeData {
            trade_time: get_i64(&self.data, "t")?,
            price: get_f64(&self.data, "p")?,
            quantity: get_f64(&self.data, "q")?,
        })
    }

    /// Wrap the raw payload with normalized book levels.
    pub fn embed_book(&mut self, book: &BookData) {
        let raw = self.data.take();
        let level = |l: &BookLevel| json!({ "p": l.price, "q": l.quantity });
        self.data = json!({
            "raw": raw,
            "a": book.asks.iter().map(level).collect::<Vec<_>>(),
            "b": book.bids.iter().map(level).collect::<Vec<_>>(),
        });
    }

    pub fn extract_book(&self) -> Result<BookData, DecodeError> {
        let side = |key: &'static str| -> Result<Vec<BookLevel>, DecodeError> {
            let levels = self.data.get(key).and_then(Value::as_array).ok_or(DecodeError::Field(key))?;
            levels
                .iter()
                .map(|level| {
                    Ok(BookLevel { price: get_f64(level, "p")?, quantity: get_f64(level, "q")? })
                })
                .collect()
        };
        Ok(BookData { asks: side("a")?, bids: side("b")? })
    }

    /// Wrap the raw payload with normalized kline fields.
    pub fn embed_kline(&mut self, kline: KlineData) {
        let raw = self.data.take();
        self.data = json!({
            "raw": raw,
            "s": kline.start_time,
            "e": kline.end_time,
            "o": kline.open,
            "c": kline.close,
            "h": kline.high,
            "l": kline.low,
            "v": kline.volume,
        });
    }

    pub fn extract_kline(&self) -> Result<KlineData, DecodeError> {
        Ok(KlineData {
            start_time: get_i64(&self.data, "s")?,
            end_time: get_i64(&self.data, "e")?,
            open: get_f64(&self.data, "o")?,
            close: get_f64(&self.data, "c")?,
            high: get_f64(&self.data, "h")?,
            low: get_f64(&self.data, "l")?,
            volume: get_f64(&self.data, "v")?,
        })
    }
}

#[cfg(test)]
#[path = "content_tests.rs"]
mod tests;
