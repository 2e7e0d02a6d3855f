use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::policy::DistributionPolicy;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub webrtc: WebRtcConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRtcConfig {
    /// Which tracks go to which subscriber.
    pub policy: DistributionPolicy,
    /// STUN/TURN server URLs handed to every session.
    pub ice_servers: Vec<String>,
    /// Seconds between keyframe requests to each publisher.
    pub pli_interval_seconds: u64,
    /// Seconds between keepalive pings on the subscriber data channel.
    pub keepalive_interval_seconds: u64,
    /// Deadline for one signaling-channel write.
    pub signal_deadline_seconds: u64,
    /// Outbound signaling buffer per subscriber.
    pub signal_buffer: usize,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            policy: DistributionPolicy::RoundRobin,
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            pli_interval_seconds: 3,
            keepalive_interval_seconds: 3,
            signal_deadline_seconds: 5,
            signal_buffer: 64,
        }
    }
}

impl WebRtcConfig {
    #[must_use]
    pub fn pli_interval(&self) -> Duration {
        Duration::from_secs(self.pli_interval_seconds)
    }

    #[must_use]
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_seconds)
    }

    #[must_use]
    pub fn signal_deadline(&self) -> Duration {
        Duration::from_secs(self.signal_deadline_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Load configuration from `streamcast.toml` (if present) layered with
/// `STREAMCAST_`-prefixed environment variables.
pub fn load_config() -> Result<Config, ConfigError> {
    let mut builder = ConfigBuilder::builder();

    if Path::new("streamcast.toml").exists() {
        builder = builder.add_source(File::with_name("streamcast"));
    }

    builder
        .add_source(Environment::with_prefix("STREAMCAST").separator("__"))
        .build()?
        .try_deserialize()
}
