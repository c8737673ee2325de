//! # chatsync-replay
//!
//! Feeds a JSONL log of inbound realtime events through a client session
//! and prints the resulting conversation views as JSON.
//!
//! ```text
//! chatsync-replay events.jsonl
//! cat events.jsonl | chatsync-replay
//! ```
//!
//! The session runs without a backend: every outbound call fails with
//! `Transport closed`, so only inbound state is exercised.

mod replay;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use chatsync_client::{init_logging, ChannelTransport, Session, SessionConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging("warn,chatsync_replay=info");

    let config = SessionConfig::from_env();
    info!(?config, "Loaded configuration");

    let path = std::env::args().nth(1).map(PathBuf::from);
    let input = replay::read_input(path.as_deref()).await?;

    let (transport, requests) = ChannelTransport::new(1);
    drop(requests);
    let session = Arc::new(Session::new(config, Arc::new(transport)));

    let (tx, rx) = mpsc::channel(256);
    let pump = {
        let session = session.clone();
        tokio::spawn(async move { session.run(rx).await })
    };

    let stats = replay::feed(&input, &tx).await?;
    drop(tx);
    pump.await?;

    info!(parsed = stats.parsed, skipped = stats.skipped, "Replay finished");

    let views = session.with_store(|s| serde_json::to_string_pretty(&s.views()))?;
    println!("{views}");
    Ok(())
}
