use std::sync::Arc;

use bridge::{Bridge, NullChatClient};
use armorclaw_types::BridgeConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match BridgeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("armorclaw-bridge config error: {err}");
            std::process::exit(1);
        }
    };

    // The chat protocol client is pluggable through the library API;
    // the stock binary serves the Unix-socket control plane only.
    let chat = Arc::new(NullChatClient::new());
    let bridge = match Bridge::bootstrap(config, chat).await {
        Ok(bridge) => bridge,
        Err(err) => {
            eprintln!("armorclaw-bridge init error: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = bridge.run().await {
        eprintln!("armorclaw-bridge error: {err}");
        std::process::exit(2);
    }
}
