// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authentication scenarios: rejection, duplicate uids, login timeout.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use trademux::client::{Client, EchoRole};
use trademux::hub::{allow_all, AuthFn};
use trademux_specs::{RawClient, TestHub, RECV_TIMEOUT};

fn reject_with(diagnostic: &'static str) -> AuthFn {
    Arc::new(move |_| (false, diagnostic.to_owned()))
}

#[tokio::test]
async fn rejected_login_reports_the_diagnostic_and_closes() -> anyhow::Result<()> {
    let hub = TestHub::start(reject_with("bad")).await?;

    let (mut client, reply) = RawClient::login_raw(&hub.uri, "alpha").await?;
    assert_eq!(reply, "bad");
    assert!(client.closed().await);

    // A rejected client never makes it into the record.
    assert!(hub.recorded().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn client_runtime_treats_rejection_as_terminal() -> anyhow::Result<()> {
    let hub = TestHub::start(reject_with("bad")).await?;

    let client = Client::new("alpha", hub.uri.clone(), EchoRole, CancellationToken::new());
    let outcome = tokio::time::timeout(RECV_TIMEOUT, client.run())
        .await
        .map_err(|_| anyhow::anyhow!("client kept reconnecting"))?;

    let err = outcome.err().ok_or_else(|| anyhow::anyhow!("rejection surfaced as success"))?;
    assert!(err.to_string().contains("bad"));
    Ok(())
}

#[tokio::test]
async fn second_login_under_a_live_uid_is_rejected() -> anyhow::Result<()> {
    let hub = TestHub::start(allow_all()).await?;

    let _first = RawClient::login(&hub.uri, "alpha").await?;
    let (_, reply) = RawClient::login_raw(&hub.uri, "alpha").await?;
    assert_eq!(reply, "source already exists");
    Ok(())
}

#[tokio::test]
async fn oversized_login_frame_is_rejected() -> anyhow::Result<()> {
    let hub = TestHub::start(allow_all()).await?;

    let padding = "x".repeat(2048);
    let (_, reply) = RawClient::login_raw(&hub.uri, &padding).await?;
    assert_eq!(reply, "login frame too long");
    Ok(())
}

#[tokio::test]
async fn custom_auth_objects_flow_through_the_seam() -> anyhow::Result<()> {
    let auth: AuthFn = Arc::new(|packet| {
        if packet.content.contains(r#""token":"sesame""#) {
            (true, String::new())
        } else {
            (false, "no token".to_owned())
        }
    });
    let hub = TestHub::start(auth).await?;

    // The stock auth object carries no token.
    let (_, reply) = RawClient::login_raw(&hub.uri, "alpha").await?;
    assert_eq!(reply, "no token");

    let cancel = CancellationToken::new();
    let client = Client::new("beta", hub.uri.clone(), EchoRole, cancel.child_token())
        .with_auth(Arc::new(|uid| serde_json::json!({ "uid": uid, "token": "sesame" })));
    tokio::spawn(client.run());

    for _ in 0..40 {
        let admitted = hub
            .recorded()
            .await?
            .iter()
            .any(|p| p.source == "beta");
        if admitted {
            cancel.cancel();
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    anyhow::bail!("token-bearing client never admitted");
}

#[tokio::test]
async fn slow_login_is_cut_off() -> anyhow::Result<()> {
    let hub = TestHub::start_with(allow_all(), 200).await?;

    let (mut ws, _) = tokio_tungstenite::connect_async(&hub.uri).await?;
    tokio::time::sleep(Duration::from_millis(400)).await;

    let frame = tokio::time::timeout(RECV_TIMEOUT, ws.next())
        .await
        .map_err(|_| anyhow::anyhow!("connection still open after the auth window"))?;
    assert!(matches!(frame, None | Some(Ok(Message::Close(_))) | Some(Err(_))));
    Ok(())
}
