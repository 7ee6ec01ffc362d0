// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Routing scenarios: echo round-trip, absent destinations, self-exclusion,
//! and the recorded trace of it all.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use trademux::client::{Client, EchoRole};
use trademux::hub::allow_all;
use trademux::packet::Action;
use trademux_specs::{RawClient, TestHub};

async fn wait_for_login(hub: &TestHub, uid: &str) -> anyhow::Result<bool> {
    for _ in 0..40 {
        let logged_in = hub
            .recorded()
            .await?
            .iter()
            .any(|p| p.action == Action::Login && p.source == uid);
        if logged_in {
            return Ok(true);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    Ok(false)
}

async fn wait_for_message(hub: &TestHub, source: &str) -> anyhow::Result<bool> {
    for _ in 0..40 {
        let seen = hub
            .recorded()
            .await?
            .iter()
            .any(|p| p.action == Action::Message && p.source == source);
        if seen {
            return Ok(true);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    Ok(false)
}

#[tokio::test]
async fn echo_round_trip() -> anyhow::Result<()> {
    let hub = TestHub::start(allow_all()).await?;
    let cancel = CancellationToken::new();

    let mut alpha = RawClient::login(&hub.uri, "alpha").await?;
    let echo = Client::new("echo_client", hub.uri.clone(), EchoRole, cancel.child_token());
    tokio::spawn(echo.run());
    anyhow::ensure!(wait_for_login(&hub, "echo_client").await?, "echo never logged in");

    let mut tap = hub.hub.subscribe_packets();
    alpha.send(&["echo_client"], "hi").await?;
    let reply = alpha.recv().await?;
    assert_eq!(reply.source, "echo_client");
    assert_eq!(reply.content, "hi");
    assert!(alpha.silent().await, "exactly one frame comes back");

    anyhow::ensure!(wait_for_message(&hub, "echo_client").await?, "echo reply never recorded");
    let recorded = hub.recorded().await?;
    let summary: Vec<(Action, &str)> =
        recorded.iter().map(|p| (p.action, p.source.as_str())).collect();
    assert_eq!(
        summary,
        vec![
            (Action::Login, "alpha"),
            (Action::Login, "echo_client"),
            (Action::Message, "alpha"),
            (Action::Message, "echo_client"),
        ]
    );
    assert_eq!(recorded[2].destination, vec!["echo_client"]);
    assert_eq!(recorded[2].content, "hi");
    assert_eq!(recorded[3].destination, vec!["alpha"]);
    assert_eq!(recorded[3].content, "hi");

    // The packet tap observed both routed messages, in hub order.
    let observed = tap.recv().await?;
    assert_eq!((observed.action, observed.source.as_str()), (Action::Message, "alpha"));
    let observed = tap.recv().await?;
    assert_eq!((observed.action, observed.source.as_str()), (Action::Message, "echo_client"));

    cancel.cancel();
    Ok(())
}

#[tokio::test]
async fn absent_destination_is_recorded_but_undelivered() -> anyhow::Result<()> {
    let hub = TestHub::start(allow_all()).await?;
    let mut alpha = RawClient::login(&hub.uri, "alpha").await?;

    alpha.send(&["ghost"], "x").await?;
    assert!(alpha.silent().await, "nothing is broadcast");

    anyhow::ensure!(wait_for_message(&hub, "alpha").await?, "message never recorded");
    let recorded = hub.recorded().await?;
    let messages: Vec<_> =
        recorded.iter().filter(|p| p.action == Action::Message).collect();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].destination, vec!["ghost"]);
    assert_eq!(messages[0].content, "x");

    // The hub shrugs it off: new clients still get in.
    let _beta = RawClient::login(&hub.uri, "beta").await?;
    Ok(())
}

#[tokio::test]
async fn sender_is_excluded_from_its_own_broadcast() -> anyhow::Result<()> {
    let hub = TestHub::start(allow_all()).await?;
    let mut alpha = RawClient::login(&hub.uri, "alpha").await?;
    let mut beta = RawClient::login(&hub.uri, "beta").await?;

    alpha.send(&["alpha", "beta"], "x").await?;

    let frame = beta.recv().await?;
    assert_eq!(frame.source, "alpha");
    assert_eq!(frame.content, "x");
    assert!(beta.silent().await, "beta gets exactly one frame");
    assert!(alpha.silent().await, "alpha never hears itself");

    anyhow::ensure!(wait_for_message(&hub, "alpha").await?, "message never recorded");
    let recorded = hub.recorded().await?;
    let message = recorded
        .iter()
        .find(|p| p.action == Action::Message)
        .ok_or_else(|| anyhow::anyhow!("no message record"))?;
    // The stored form keeps the full destination list.
    assert_eq!(message.destination, vec!["alpha", "beta"]);
    Ok(())
}

#[tokio::test]
async fn disconnect_records_exactly_one_logout() -> anyhow::Result<()> {
    let hub = TestHub::start(allow_all()).await?;
    let alpha = RawClient::login(&hub.uri, "alpha").await?;
    alpha.close().await;

    for _ in 0..40 {
        let recorded = hub.recorded().await?;
        let logouts = recorded
            .iter()
            .filter(|p| p.action == Action::Logout && p.source == "alpha")
            .count();
        if logouts == 1 {
            let logins = recorded
                .iter()
                .filter(|p| p.action == Action::Login && p.source == "alpha")
                .count();
            assert_eq!(logins, 1);
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    anyhow::bail!("logout never recorded");
}
