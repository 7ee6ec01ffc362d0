// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::error;

use trademux::client::{Client, EchoRole};
use trademux::config::{AdapterConfig, EchoConfig, HubConfig};
use trademux::hub::{allow_all, Hub};
use trademux::recorder::{spawn_file_recorder, Recorder};
use trademux::trade::adapter::build_adapter;
use trademux::trade::binance::BinanceProfile;
use trademux::trade::upstream::{RawVenue, VenueProfile};

#[derive(Parser)]
#[command(name = "trademux", version, about = "Message-mux bus for trading components.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run the central hub.
    Hub(HubConfig),
    /// Run the exchange adapter bridging a market-data venue.
    Binance(AdapterConfig),
    /// Run the reference echo client.
    Echo(EchoConfig),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    let result = match cli.command {
        Commands::Hub(config) => run_hub(config, cancel).await,
        Commands::Binance(config) => {
            let profile: Arc<dyn VenueProfile> = if config.raw_streams {
                Arc::new(RawVenue)
            } else {
                Arc::new(BinanceProfile::new(config.http_url.clone()))
            };
            build_adapter(config, profile, cancel).run().await
        }
        Commands::Echo(config) => Client::new(config.uid, config.uri, EchoRole, cancel).run().await,
    };

    if let Err(e) = result {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

async fn run_hub(config: HubConfig, cancel: CancellationToken) -> anyhow::Result<()> {
    let recorder = if config.no_record {
        Recorder::disabled()
    } else {
        spawn_file_recorder(&config.record_dir, config.record_interval())?
    };
    Hub::new(config, allow_all(), recorder, cancel).run().await
}

/// Cancel the root token on INT or TERM.
fn spawn_signal_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut term = match signal(SignalKind::terminate()) {
                Ok(term) => term,
                Err(e) => {
                    tracing::warn!(err = %e, "failed to install TERM handler");
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        tracing::info!("shutdown signal received");
        cancel.cancel();
    });
}
