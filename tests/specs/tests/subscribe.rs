// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Market-data scenarios: subscribe/fanout across strategies, and venue
//! reconnects that replay the subscription index.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use trademux::config::AdapterConfig;
use trademux::hub::allow_all;
use trademux::trade::adapter::build_adapter;
use trademux::trade::content::StreamContent;
use trademux::trade::strategy::{build_strategy, StrategyHandle};
use trademux::trade::upstream::RawVenue;
use trademux_specs::{FakeUpstream, RawClient, TestHub, RECV_TIMEOUT};

fn adapter_config(hub_uri: &str, ws_url: &str) -> AdapterConfig {
    AdapterConfig {
        uid: "binance".to_owned(),
        uri: hub_uri.to_owned(),
        ws_url: ws_url.to_owned(),
        http_url: None,
        init_stream: "btcusdt@kline_1m".to_owned(),
        send_interval_ms: 10,
        max_connect_retries: 10,
        raw_streams: true,
    }
}

/// Poll `check_initialized` until it reports `want`.
async fn wait_initialized(handle: &StrategyHandle, want: bool) -> bool {
    for _ in 0..40 {
        if let Ok(pending) = handle.check_initialized("binance").await {
            let answer = tokio::time::timeout(Duration::from_millis(400), pending.wait()).await;
            if let Ok(Ok(value)) = answer {
                if value.as_bool() == Some(want) {
                    return true;
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

async fn recv_event(
    events: &mut mpsc::UnboundedReceiver<StreamContent>,
) -> anyhow::Result<StreamContent> {
    tokio::time::timeout(RECV_TIMEOUT, events.recv())
        .await
        .map_err(|_| anyhow::anyhow!("timed out waiting for a stream event"))?
        .ok_or_else(|| anyhow::anyhow!("event feed closed"))
}

/// Ride a check_alive round-trip so every frame the handle sent before it is
/// known to be processed by the adapter.
async fn settle(handle: &StrategyHandle) -> anyhow::Result<()> {
    let pending = handle.check_alive("binance").await?;
    let _ = pending.wait().await?;
    Ok(())
}

struct Fabric {
    hub: TestHub,
    venue: FakeUpstream,
    cancel: CancellationToken,
    s1: StrategyHandle,
    s1_events: mpsc::UnboundedReceiver<StreamContent>,
    s2: StrategyHandle,
    s2_events: mpsc::UnboundedReceiver<StreamContent>,
}

/// Hub + adapter + two strategies, with the venue link up and drained.
async fn start_fabric() -> anyhow::Result<Fabric> {
    let hub = TestHub::start(allow_all()).await?;
    let venue = FakeUpstream::start().await?;
    let cancel = CancellationToken::new();

    let adapter = build_adapter(
        adapter_config(&hub.uri, &venue.ws_url),
        Arc::new(RawVenue),
        cancel.child_token(),
    );
    tokio::spawn(adapter.run());

    let (s1_client, s1, s1_events) = build_strategy("S1", hub.uri.clone(), cancel.child_token());
    tokio::spawn(s1_client.run());
    let (s2_client, s2, s2_events) = build_strategy("S2", hub.uri.clone(), cancel.child_token());
    tokio::spawn(s2_client.run());

    anyhow::ensure!(wait_initialized(&s1, true).await, "adapter never initialized");
    Ok(Fabric { hub, venue, cancel, s1, s1_events, s2, s2_events })
}

#[tokio::test]
async fn one_subscribe_upstream_fans_out_to_all_subscribers() -> anyhow::Result<()> {
    let mut fabric = start_fabric().await?;
    let mut bystander = RawClient::login(&fabric.hub.uri, "S3").await?;

    let _ = fabric.s1.subscribe("binance", "x@y").await?;
    let request = fabric.venue.next_request().await?;
    assert_eq!(request["method"], "SUBSCRIBE");
    assert_eq!(request["params"], json!(["x@y"]));
    assert!(request["id"].is_i64());

    let _ = fabric.s2.subscribe("binance", "x@y").await?;
    settle(&fabric.s2).await?;
    assert!(fabric.venue.no_request().await, "second subscriber adds no venue traffic");

    fabric.venue.emit("x@y", json!({"v": 1}));

    let event = recv_event(&mut fabric.s1_events).await?;
    assert_eq!(event.stream, "x@y");
    assert_eq!(event.data, json!({"v": 1}));
    let event = recv_event(&mut fabric.s2_events).await?;
    assert_eq!(event.stream, "x@y");
    assert!(bystander.silent().await, "non-subscribers hear nothing");

    fabric.cancel.cancel();
    Ok(())
}

#[tokio::test]
async fn unsubscribe_turns_the_stream_off_when_the_last_leaves() -> anyhow::Result<()> {
    let mut fabric = start_fabric().await?;

    let _ = fabric.s1.subscribe("binance", "x@y").await?;
    let _ = fabric.s2.subscribe("binance", "x@y").await?;
    let request = fabric.venue.next_request().await?;
    assert_eq!(request["method"], "SUBSCRIBE");
    settle(&fabric.s1).await?;
    settle(&fabric.s2).await?;

    let _ = fabric.s1.unsubscribe("binance", "x@y").await?;
    settle(&fabric.s1).await?;
    assert!(fabric.venue.no_request().await, "a subscriber remains");

    let _ = fabric.s2.unsubscribe("binance", "x@y").await?;
    let request = fabric.venue.next_request().await?;
    assert_eq!(request["method"], "UNSUBSCRIBE");
    assert_eq!(request["params"], json!(["x@y"]));

    // Events for the dropped stream go nowhere.
    fabric.venue.emit("x@y", json!({"v": 9}));
    assert!(
        tokio::time::timeout(Duration::from_millis(300), fabric.s1_events.recv())
            .await
            .is_err()
    );

    fabric.cancel.cancel();
    Ok(())
}

#[tokio::test]
async fn reconnect_replays_the_subscription_index() -> anyhow::Result<()> {
    let mut fabric = start_fabric().await?;

    let _ = fabric.s1.subscribe("binance", "x@y").await?;
    let _ = fabric.s2.subscribe("binance", "x@y").await?;
    let request = fabric.venue.next_request().await?;
    assert_eq!(request["method"], "SUBSCRIBE");
    settle(&fabric.s1).await?;
    settle(&fabric.s2).await?;

    // Outage: hold the listener so the adapter cannot get back in yet.
    let outage = fabric.venue.hold_connections().await;
    fabric.venue.kill_connection();
    assert!(wait_initialized(&fabric.s1, false).await, "outage never became visible");

    // Recovery: exactly one batched SUBSCRIBE for the indexed streams.
    drop(outage);
    let request = fabric.venue.next_request().await?;
    assert_eq!(request["method"], "SUBSCRIBE");
    assert_eq!(request["params"], json!(["x@y"]));
    assert!(wait_initialized(&fabric.s1, true).await, "never drained after reconnect");
    assert!(fabric.venue.connection_count() >= 2);

    fabric.venue.emit("x@y", json!({"v": 2}));
    let event = recv_event(&mut fabric.s1_events).await?;
    assert_eq!(event.data, json!({"v": 2}));
    let event = recv_event(&mut fabric.s2_events).await?;
    assert_eq!(event.data, json!({"v": 2}));

    fabric.cancel.cancel();
    Ok(())
}

#[tokio::test]
async fn check_alive_returns_a_timestamp() -> anyhow::Result<()> {
    let fabric = start_fabric().await?;

    let pending = fabric.s1.check_alive("binance").await?;
    let value = pending.wait().await?;
    let marker = value.as_i64().ok_or_else(|| anyhow::anyhow!("marker is not numeric"))?;
    assert!(marker > 0);

    fabric.cancel.cancel();
    Ok(())
}

#[tokio::test]
async fn subscribe_before_initialization_is_deferred() -> anyhow::Result<()> {
    let hub = TestHub::start(allow_all()).await?;
    let mut venue = FakeUpstream::start().await?;
    let cancel = CancellationToken::new();

    // Keep the venue unreachable while the adapter and strategy come up.
    let outage = venue.hold_connections().await;

    let adapter = build_adapter(
        adapter_config(&hub.uri, &venue.ws_url),
        Arc::new(RawVenue),
        cancel.child_token(),
    );
    tokio::spawn(adapter.run());
    let (s1_client, s1, mut s1_events) = build_strategy("S1", hub.uri.clone(), cancel.child_token());
    tokio::spawn(s1_client.run());

    anyhow::ensure!(wait_initialized(&s1, false).await, "adapter reports uninitialized");
    let _ = s1.subscribe("binance", "x@y").await?;
    settle(&s1).await?;

    // The deferred subscribe left no trace; the caller must reissue.
    drop(outage);
    anyhow::ensure!(wait_initialized(&s1, true).await, "venue never came up");
    let _ = s1.subscribe("binance", "x@y").await?;
    let request = venue.next_request().await?;
    assert_eq!(request["params"], json!(["x@y"]));

    venue.emit("x@y", json!({"v": 3}));
    let event = recv_event(&mut s1_events).await?;
    assert_eq!(event.data, json!({"v": 3}));

    cancel.cancel();
    Ok(())
}
