//! # parley-relay
//!
//! Websocket relay for Parley clients. Every connection is subscribed to
//! `chat` and `user` (or the topics in its `?topics=` query); text frames are
//! fanned out to the other `chat` subscribers and joins/leaves are announced
//! on `user`.

use tracing::info;
use tracing_subscriber::EnvFilter;

use parley_relay::RelayConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_relay=debug,tower_http=info")),
        )
        .init();

    info!("Starting Parley relay v{}", env!("CARGO_PKG_VERSION"));

    let config = RelayConfig::from_env();
    info!(?config, "Loaded configuration");

    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    parley_relay::serve(listener, config).await?;

    Ok(())
}
