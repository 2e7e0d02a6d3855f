//! Server lifecycle management

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use streamcast_sfu::{Broadcaster, Config};

use crate::http;

/// streamcast server - owns the broadcaster and the HTTP surface
pub struct StreamcastServer {
    config: Arc<Config>,
    broadcaster: Arc<Broadcaster>,
}

impl StreamcastServer {
    #[must_use]
    pub fn new(config: Config) -> Self {
        let broadcaster = Broadcaster::new(config.webrtc.policy);
        Self {
            config: Arc::new(config),
            broadcaster,
        }
    }

    /// Bind and serve until the listener fails.
    pub async fn start(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let router = http::create_router(self.broadcaster, Arc::clone(&self.config));

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(address = %addr, "HTTP server listening");
        axum::serve(listener, router).await?;

        Ok(())
    }
}
