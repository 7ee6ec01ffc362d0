// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Binance venue profile: the internal stream grammar, symbol discovery,
//! and typed event shaping.
//!
//! Internal stream names read `<base>_<quote>@<kind>`; the venue wants
//! `<symbol>@<venue kind>` (`kline` → `kline_1m`, `book` → `depth20@100ms`).
//! Every mapped name is remembered so venue events can be routed back to the
//! internal name they were subscribed under.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::trade::content::{BookData, BookLevel, KlineData, StreamContent, TradeData};
use crate::trade::upstream::VenueProfile;

pub struct BinanceProfile {
    http_url: Option<String>,
    http: reqwest::Client,
    /// Lowercased symbols listed by the venue; `None` skips validation.
    symbols: Mutex<Option<HashSet<String>>>,
    /// venue stream name → internal stream name.
    substitute: Mutex<HashMap<String, String>>,
}

impl BinanceProfile {
    pub fn new(http_url: Option<String>) -> Self {
        Self {
            http_url,
            http: reqwest::Client::new(),
            symbols: Mutex::new(None),
            substitute: Mutex::new(HashMap::new()),
        }
    }

    /// Split `<base>_<quote>@<kind>` into the joined symbol and kind parts.
    fn parse_stream(stream: &str) -> Option<(String, Vec<&str>)> {
        let (symbol_part, kind_part) = stream.split_once('@')?;
        if symbol_part.is_empty() || kind_part.is_empty() {
            return None;
        }
        let symbol = symbol_part.split('_').collect::<String>().to_ascii_lowercase();
        Some((symbol, kind_part.split('_').collect()))
    }

    fn venue_kind(kinds: &[&str]) -> Option<&'static str> {
        if kinds.contains(&"trade") {
            Some("trade")
        } else if kinds.contains(&"kline") {
            Some("kline_1m")
        } else if kinds.contains(&"bookTicker") {
            Some("bookTicker")
        } else if kinds.contains(&"book") {
            Some("depth20@100ms")
        } else {
            None
        }
    }

    fn symbol_known(&self, symbol: &str) -> bool {
        match self.symbols.lock() {
            Ok(symbols) => symbols.as_ref().map_or(true, |set| set.contains(symbol)),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl VenueProfile for BinanceProfile {
    /// Load the venue's symbol list once, when an HTTP endpoint is
    /// configured.
    async fn prepare(&self) -> anyhow::Result<()> {
        let Some(http_url) = &self.http_url else { return Ok(()) };
        if self.symbols.lock().map(|symbols| symbols.is_some()).unwrap_or(false) {
            return Ok(());
        }

        let info: Value = self
            .http
            .get(format!("{http_url}/api/v3/exchangeInfo"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let listed = info
            .get("symbols")
            .and_then(Value::as_array)
            .ok_or_else(|| anyhow::anyhow!("exchangeInfo carries no symbols"))?;
        let set: HashSet<String> = listed
            .iter()
            .filter_map(|symbol| symbol.get("symbol").and_then(Value::as_str))
            .map(str::to_ascii_lowercase)
            .collect();
        tracing::info!(count = set.len(), "loaded venue symbols");

        if let Ok(mut symbols) = self.symbols.lock() {
            *symbols = Some(set);
        }
        Ok(())
    }

    fn venue_name(&self, stream: &str) -> Option<String> {
        let (symbol, kinds) = Self::parse_stream(stream)?;
        let kind = Self::venue_kind(&kinds)?;
        if !self.symbol_known(&symbol) {
            tracing::warn!(stream = %stream, "symbol not listed by the venue");
            return None;
        }
        let venue_stream = format!("{symbol}@{kind}");
        if let Ok(mut substitute) = self.substitute.lock() {
            substitute.insert(venue_stream.clone(), stream.to_owned());
        }
        Some(venue_stream)
    }

    fn internal_name(&self, venue_stream: &str) -> Option<String> {
        self.substitute.lock().ok()?.get(venue_stream).cloned()
    }

    /// Embed typed projections for known kinds; unknown kinds pass through
    /// untouched.
    fn shape(&self, stream: &str, data: Value) -> StreamContent {
        let mut content = StreamContent::new(stream, data);
        let Some((_, kinds)) = Self::parse_stream(stream) else {
            return content;
        };
        if kinds.contains(&"trade") {
            match trade_fields(&content.data) {
                Some(trade) => content.embed_trade(trade),
                None => tracing::warn!(stream = %stream, "trade event missing fields"),
            }
        } else if kinds.contains(&"kline") {
            match kline_fields(&content.data) {
                Some(kline) => content.embed_kline(kline),
                None => tracing::warn!(stream = %stream, "kline event missing fields"),
            }
        } else if kinds.contains(&"book") {
            match book_fields(&content.data) {
                Some(book) => content.embed_book(&book),
                None => tracing::warn!(stream = %stream, "depth event missing fields"),
            }
        }
        content
    }
}

/// The venue quotes prices and quantities as strings.
fn lenient_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn trade_fields(data: &Value) -> Option<TradeData> {
    Some(TradeData {
        trade_time: data.get("T")?.as_i64()?,
        price: lenient_f64(data.get("p")?)?,
        quantity: lenient_f64(data.get("q")?)?,
    })
}

fn kline_fields(data: &Value) -> Option<KlineData> {
    let k = data.get("k")?;
    Some(KlineData {
        start_time: k.get("t")?.as_i64()?,
        end_time: k.get("T")?.as_i64()?,
        open: lenient_f64(k.get("o")?)?,
        close: lenient_f64(k.get("c")?)?,
        high: lenient_f64(k.get("h")?)?,
        low: lenient_f64(k.get("l")?)?,
        volume: lenient_f64(k.get("v")?)?,
    })
}

fn book_fields(data: &Value) -> Option<BookData> {
    let side = |key: &str| -> Option<Vec<BookLevel>> {
        data.get(key)?
            .as_array()?
            .iter()
            .map(|level| {
                let pair = level.as_array()?;
                Some(BookLevel {
                    price: lenient_f64(pair.first()?)?,
                    quantity: lenient_f64(pair.get(1)?)?,
                })
            })
            .collect()
    };
    Some(BookData { asks: side("asks")?, bids: side("bids")? })
}

#[cfg(test)]
#[path = "binance_tests.rs"]
mod tests;
