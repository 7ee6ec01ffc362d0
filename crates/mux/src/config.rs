// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Settings for the central hub.
#[derive(Debug, Clone, clap::Args)]
pub struct HubConfig {
    /// Host to bind on.
    #[arg(long, default_value = "0.0.0.0", env = "TRADEMUX_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8080, env = "TRADEMUX_PORT")]
    pub port: u16,

    /// Login read timeout in milliseconds.
    #[arg(long, default_value_t = 1000, env = "TRADEMUX_AUTH_TIMEOUT_MS")]
    pub auth_timeout_ms: u64,

    /// Directory for recorded packet logs.
    #[arg(long, default_value = "./record", env = "TRADEMUX_RECORD_DIR")]
    pub record_dir: std::path::PathBuf,

    /// Rotation interval for record files, in seconds.
    #[arg(long, default_value_t = 3600, env = "TRADEMUX_RECORD_INTERVAL_SECS")]
    pub record_interval_secs: u64,

    /// Disable packet recording entirely.
    #[arg(long, env = "TRADEMUX_NO_RECORD")]
    pub no_record: bool,
}

impl HubConfig {
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    pub fn record_interval(&self) -> Duration {
        Duration::from_secs(self.record_interval_secs)
    }
}

/// Settings for the exchange adapter.
#[derive(Debug, Clone, clap::Args)]
pub struct AdapterConfig {
    /// Adapter identifier on the bus.
    #[arg(long, default_value = "binance", env = "TRADEMUX_UID")]
    pub uid: String,

    /// Hub websocket URI.
    #[arg(long, default_value = "ws://localhost:8080", env = "TRADEMUX_URI")]
    pub uri: String,

    /// Venue websocket base URL.
    #[arg(long, default_value = "wss://stream.binance.com", env = "TRADEMUX_WS_URL")]
    pub ws_url: String,

    /// Venue REST base URL for symbol discovery. Unset skips symbol
    /// validation.
    #[arg(long, env = "TRADEMUX_HTTP_URL")]
    pub http_url: Option<String>,

    /// Stream the venue connection is opened with.
    #[arg(long, default_value = "btc_usdt@kline_1m", env = "TRADEMUX_INIT_STREAM")]
    pub init_stream: String,

    /// Minimum interval between venue sends, in milliseconds.
    #[arg(long, default_value_t = 200, env = "TRADEMUX_SEND_INTERVAL_MS")]
    pub send_interval_ms: u64,

    /// Venue reconnect attempts before giving up.
    #[arg(long, default_value_t = 10, env = "TRADEMUX_MAX_CONNECT_RETRIES")]
    pub max_connect_retries: u32,

    /// Pass stream names to the venue verbatim instead of the Binance
    /// grammar.
    #[arg(long, env = "TRADEMUX_RAW_STREAMS")]
    pub raw_streams: bool,
}

impl AdapterConfig {
    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }
}

/// Settings for the reference echo client.
#[derive(Debug, Clone, clap::Args)]
pub struct EchoConfig {
    /// Client identifier on the bus.
    #[arg(long, default_value = "echo_client", env = "TRADEMUX_UID")]
    pub uid: String,

    /// Hub websocket URI.
    #[arg(long, default_value = "ws://localhost:8080", env = "TRADEMUX_URI")]
    pub uri: String,
}
