// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only packet log with time-based rotation.
//!
//! [`Recorder::record`] never blocks the caller: packets go over a channel to
//! a single writer task, which drains everything available, rotates the
//! active file when its epoch has expired, and appends one JSON line per
//! record in enqueue order. Loss of records still in the channel on a crash
//! is accepted.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::TimeZone;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

use crate::packet::{now_ms, Packet};

/// Active log file name; rotated files get a timestamp infix.
const BASE_NAME: &str = "Recorder.log";

/// Max commands pulled per flush.
const FLUSH_BATCH: usize = 1024;

enum Command {
    Record(Packet),
    Drain(oneshot::Sender<()>),
}

/// Cheap cloneable handle to the writer task. A disabled recorder drops
/// everything on the floor.
#[derive(Clone)]
pub struct Recorder {
    tx: Option<mpsc::UnboundedSender<Command>>,
}

impl Recorder {
    /// A recorder that discards every packet.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Enqueue a packet for the writer. Returns immediately; the packet is
    /// owned by the recorder from here on.
    pub fn record(&self, packet: Packet) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Command::Record(packet));
        }
    }

    /// Wait until everything recorded so far has been flushed to disk.
    pub async fn drain(&self) {
        let Some(tx) = &self.tx else { return };
        let (ack_tx, ack_rx) = oneshot::channel();
        if tx.send(Command::Drain(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

/// Start the file-backed recorder. The writer task exits once every handle
/// has been dropped and the channel is empty.
pub fn spawn_file_recorder(
    record_dir: impl Into<PathBuf>,
    interval: Duration,
) -> anyhow::Result<Recorder> {
    let record_dir = record_dir.into();
    std::fs::create_dir_all(&record_dir)?;
    let base_path = record_dir.join(BASE_NAME);
    let epoch_start = initial_epoch(&base_path);

    let (tx, rx) = mpsc::unbounded_channel();
    let writer = Writer {
        record_dir,
        base_path,
        interval_ms: interval.as_millis() as i64,
        epoch_start,
    };
    tokio::spawn(writer.run(rx));

    Ok(Recorder { tx: Some(tx) })
}

/// Epoch of the open log file: the route time of its first record, or now
/// for a fresh file.
fn initial_epoch(base_path: &Path) -> i64 {
    let Ok(file) = std::fs::File::open(base_path) else {
        return now_ms();
    };
    let mut line = String::new();
    if std::io::BufReader::new(file).read_line(&mut line).is_err() {
        return now_ms();
    }
    match Packet::decode_record_line(line.trim()) {
        Ok(first) => first.route_time,
        Err(_) => now_ms(),
    }
}

struct Writer {
    record_dir: PathBuf,
    base_path: PathBuf,
    interval_ms: i64,
    epoch_start: i64,
}

impl Writer {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        let mut batch = Vec::new();
        while rx.recv_many(&mut batch, FLUSH_BATCH).await > 0 {
            self.flush(&mut batch).await;
        }
    }

    /// One flush: append every buffered record in order, then acknowledge
    /// any drain requests that arrived with them.
    async fn flush(&mut self, batch: &mut Vec<Command>) {
        let mut out = String::new();
        let mut acks = Vec::new();
        for command in batch.drain(..) {
            match command {
                Command::Record(packet) => {
                    out.push_str(&packet.encode_record_line());
                    out.push('\n');
                }
                Command::Drain(ack) => acks.push(ack),
            }
        }

        if !out.is_empty() {
            self.rotate_if_due();
            if let Err(e) = self.append(out.as_bytes()).await {
                tracing::warn!(path = %self.base_path.display(), err = %e, "record append failed");
            }
        }

        for ack in acks {
            let _ = ack.send(());
        }
    }

    /// Rename the active file when wall clock has left its epoch. The epoch
    /// advances even if the rename fails, matching a missing active file.
    fn rotate_if_due(&mut self) {
        let now = now_ms();
        if now <= self.epoch_start + self.interval_ms {
            return;
        }
        let rotated = self.record_dir.join(format!("Recorder.{}.log", self.epoch_stamp()));
        if let Err(e) = std::fs::rename(&self.base_path, &rotated) {
            tracing::warn!(path = %rotated.display(), err = %e, "record rotation failed");
        }
        self.epoch_start = now;
    }

    /// Local-time stamp of the current epoch, `YYYYMMDD_HHMMSS`.
    fn epoch_stamp(&self) -> String {
        chrono::Local
            .timestamp_millis_opt(self.epoch_start)
            .single()
            .map(|t| t.format("%Y%m%d_%H%M%S").to_string())
            .unwrap_or_else(|| self.epoch_start.to_string())
    }

    async fn append(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.base_path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await
    }
}

#[cfg(test)]
#[path = "recorder_tests.rs"]
mod tests;
