//! Main entry point for the intercepting proxy

use rust_intercept_proxy::{init_logger, ProxyConfig, ProxyServer};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ProxyConfig::from_env();

    init_logger(&config.log_level, true);

    info!("starting intercepting proxy on {}", config.listen_addr);
    info!(
        "capture store: {} (database: {})",
        config.store.uri, config.store.database
    );
    info!(
        "signing CA: {} / {}",
        config.ca_cert_path, config.ca_key_path
    );

    ProxyServer::new(config).start().await
}
