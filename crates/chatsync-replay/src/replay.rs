//! JSONL event replay.
//!
//! One inbound event per line, in the same JSON shape the realtime channel
//! delivers. Blank lines and lines starting with `#` are ignored; lines that
//! fail to parse are logged and skipped.

use std::path::Path;

use anyhow::Context;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::warn;

use chatsync_shared::InboundEvent;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    pub parsed: usize,
    pub skipped: usize,
}

/// Read the whole event log from `path`, or from stdin when `None`.
pub async fn read_input(path: Option<&Path>) -> anyhow::Result<String> {
    match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut input = String::new();
            tokio::io::stdin()
                .read_to_string(&mut input)
                .await
                .context("failed to read stdin")?;
            Ok(input)
        }
    }
}

pub fn parse_events(input: &str) -> (Vec<InboundEvent>, ReplayStats) {
    let mut stats = ReplayStats::default();
    let mut events = Vec::new();

    for (idx, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match InboundEvent::from_json(line) {
            Ok(event) => {
                stats.parsed += 1;
                events.push(event);
            }
            Err(e) => {
                warn!(line = idx + 1, error = %e, "Skipping malformed event");
                stats.skipped += 1;
            }
        }
    }
    (events, stats)
}

/// Parse `input` and push every event into the session's event pump.
pub async fn feed(input: &str, tx: &mpsc::Sender<InboundEvent>) -> anyhow::Result<ReplayStats> {
    let (events, stats) = parse_events(input);
    for event in events {
        tx.send(event)
            .await
            .context("event pump stopped before the replay finished")?;
    }
    Ok(stats)
}
