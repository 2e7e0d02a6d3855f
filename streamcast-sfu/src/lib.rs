//! streamcast SFU core
//!
//! A selective forwarding unit for WebRTC broadcast: publishers push
//! tracks in over WHIP, subscribers receive them over sessions negotiated
//! through a signaling channel, and nothing is ever transcoded.
//!
//! ## Architecture
//!
//! - **`Broadcaster`**: registry of publishers, fan-out tracks and
//!   subscribers; schedules rebalances and reconciles subscriber sessions
//! - **`DistributionPolicy`**: pure assignment of tracks to subscribers
//! - **`PublisherTrack`**: one inbound track wrapped in a fan-out sink,
//!   fed by a dedicated forwarder task
//! - **`SignalChannel`**: transport-agnostic handle for pushing offers
//!   and candidates to a subscriber
//!
//! The transport adapters (WHIP ingest, WebSocket signaling) live in the
//! `streamcast` server crate.

pub mod broadcaster;
pub mod config;
pub mod error;
pub mod logging;
pub mod peer;
pub mod policy;
pub mod signal;
pub mod track;
pub mod types;

pub use broadcaster::{Broadcaster, Publisher, Subscriber};
pub use config::{load_config, Config};
pub use error::{Error, Result};
pub use policy::{Assignment, DistributionPolicy};
pub use signal::{SignalChannel, SignalCommand, SignalMessage};
pub use track::{PublisherTrack, TrackStats};
pub use types::{PublisherId, SubscriberId, TrackKey};
