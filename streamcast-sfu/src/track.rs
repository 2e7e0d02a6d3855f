//! Publisher track fan-out
//!
//! Each inbound publisher track is wrapped in a `TrackLocalStaticRTP`
//! fan-out sink: the forwarder task is its only writer, and any number of
//! subscriber sessions bind to it as readers. Binding and unbinding are
//! synchronised inside the sink, so attach/detach is safe against a
//! concurrent write.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};
use webrtc::track::track_remote::TrackRemote;
use webrtc::util::marshal::MarshalSize;

use crate::broadcaster::Broadcaster;
use crate::types::TrackKey;

/// MTU-sized read buffer, one per forwarder, reused across reads.
const READ_BUFFER_SIZE: usize = 1500;

/// A registered publisher track and its fan-out sink.
pub struct PublisherTrack {
    key: TrackKey,
    sink: Arc<TrackLocalStaticRTP>,
    stats: Arc<TrackStatsInner>,
}

/// Receive counters for one track, updated by its forwarder.
#[derive(Default)]
pub(crate) struct TrackStatsInner {
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
}

/// Snapshot of a track's receive counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackStats {
    pub packets_received: u64,
    pub bytes_received: u64,
}

impl PublisherTrack {
    /// Build a fan-out track with an explicit codec and identity.
    #[must_use]
    pub fn new(
        codec: RTCRtpCodecCapability,
        track_id: impl Into<String>,
        stream_id: impl Into<String>,
    ) -> Self {
        let track_id = track_id.into();
        let stream_id = stream_id.into();
        let key = TrackKey::of(&stream_id, &track_id);
        Self {
            key,
            sink: Arc::new(TrackLocalStaticRTP::new(codec, track_id, stream_id)),
            stats: Arc::new(TrackStatsInner::default()),
        }
    }

    /// Build the fan-out counterpart of an inbound remote track, keeping
    /// its codec, track id and stream id.
    #[must_use]
    pub fn from_remote(remote: &TrackRemote) -> Self {
        Self::new(
            remote.codec().capability,
            remote.id(),
            remote.stream_id(),
        )
    }

    #[must_use]
    pub fn key(&self) -> &TrackKey {
        &self.key
    }

    #[must_use]
    pub fn sink(&self) -> Arc<TrackLocalStaticRTP> {
        Arc::clone(&self.sink)
    }

    #[must_use]
    pub fn stats(&self) -> TrackStats {
        TrackStats {
            packets_received: self.stats.packets_received.load(Ordering::Relaxed),
            bytes_received: self.stats.bytes_received.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn stats_handle(&self) -> Arc<TrackStatsInner> {
        Arc::clone(&self.stats)
    }
}

/// The key a fan-out sink is registered under.
pub(crate) fn sink_key(sink: &TrackLocalStaticRTP) -> TrackKey {
    TrackKey::of(sink.stream_id(), sink.id())
}

/// Copy packets from the publisher's remote track into the fan-out sink
/// until the publisher goes away.
///
/// A read error is the signal that the publisher side died: the track is
/// deregistered and the task exits. This is the only publisher-failure
/// path that removes a track. A closed-pipe write error just means no
/// reader is bound yet or anymore and ends the task quietly; any other
/// write error is fatal to this forwarder alone.
pub(crate) fn spawn_forwarder(
    broadcaster: Arc<Broadcaster>,
    remote: Arc<TrackRemote>,
    sink: Arc<TrackLocalStaticRTP>,
    stats: Arc<TrackStatsInner>,
) {
    let key = sink_key(&sink);
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            match remote.read(&mut buf).await {
                Ok((packet, _attributes)) => {
                    let size = packet.header.marshal_size() + packet.payload.len();
                    stats.packets_received.fetch_add(1, Ordering::Relaxed);
                    stats.bytes_received.fetch_add(size as u64, Ordering::Relaxed);

                    if let Err(err) = sink.write_rtp(&packet).await {
                        if webrtc::Error::ErrClosedPipe == err {
                            debug!(track = %key, "Fan-out sink closed, stopping forwarder");
                        } else {
                            warn!(track = %key, error = %err, "Fan-out write failed, stopping forwarder");
                        }
                        return;
                    }
                }
                Err(err) => {
                    debug!(track = %key, error = %err, "Publisher track read failed");
                    info!(
                        track = %key,
                        packets = stats.packets_received.load(Ordering::Relaxed),
                        "Forwarder stopped"
                    );
                    broadcaster.remove_publisher_track(&sink).await;
                    return;
                }
            }
        }
    });
}
