mod http;
mod server;

use anyhow::Result;
use tracing::info;

use server::StreamcastServer;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration
    let config = streamcast_sfu::load_config()?;

    // 2. Initialize logging
    streamcast_sfu::logging::init_logging(&config.logging)?;
    info!("streamcast starting...");
    info!(
        policy = ?config.webrtc.policy,
        address = %format!("{}:{}", config.server.host, config.server.port),
        "Configuration loaded"
    );

    // 3. Build the broadcaster and serve
    StreamcastServer::new(config).start().await
}
