//! Wirestream - tail a streaming WebSocket feed

use anyhow::Context;
use clap::Parser;
use std::io::Write;
use tokio::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wirestream::{config::Args, ConnectionManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("wirestream={},info", args.log_level).into());
    tracing_subscriber::registry()
        .with(filter)
        .with(args.log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!args.log_json).then(tracing_subscriber::fmt::layer))
        .init();

    let params = args.parameters();
    if let Err(e) = params.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let payloads = args
        .send
        .iter()
        .map(|raw| serde_json::from_str::<serde_json::Value>(raw))
        .collect::<Result<Vec<_>, _>>()
        .context("--send payloads must be valid JSON")?;

    info!("Endpoint: {}", params.url);
    info!(
        "Reconnect: {} (interval {:?}, attempts {})",
        params.auto_reconnect, params.reconnect_interval, params.reconnect_attempts
    );

    let span = tracing::info_span!("wirestream", url = %params.url);
    let manager = ConnectionManager::websocket(params, span);
    let mut inbound = manager
        .listen()
        .context("inbound stream already taken")?;
    let mut done = manager.done();

    manager.connect().await.context("failed to connect")?;

    for payload in &payloads {
        let deadline = Instant::now() + args.send_timeout();
        if let Err(e) = manager.send(deadline, payload).await {
            warn!("Failed to send {}: {}", payload, e);
        }
    }

    let mut stdout = std::io::stdout();
    loop {
        tokio::select! {
            payload = inbound.recv() => match payload {
                Some(data) => {
                    stdout.write_all(&data)?;
                    stdout.write_all(b"\n")?;
                    stdout.flush()?;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    manager.close().await;

    match done.wait().await {
        Some(err) => {
            error!("Connection ended with error: {}", err);
            Err(err.into())
        }
        None => {
            info!("Connection closed");
            Ok(())
        }
    }
}
