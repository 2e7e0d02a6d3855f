//! Broadcaster registry
//!
//! Owns the three maps — publishers, fan-out tracks, subscribers — behind
//! a single mutex, and drives the renegotiation protocol: any membership
//! change schedules a rebalance, a rebalance applies the distribution
//! policy and reconciles every subscriber session against its target set.
//!
//! Rebalances are always spawned as independent tasks, never run inline
//! under a caller's lock; the registry mutex serialises them. The
//! reconciler runs with the lock held so one rebalance sees one
//! consistent snapshot of the world.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::policy::DistributionPolicy;
use crate::signal::{SignalChannel, CLOSE_GOING_AWAY, CLOSE_NORMAL, EVENT_OFFER};
use crate::track::{sink_key, spawn_forwarder, PublisherTrack};
use crate::types::{PublisherId, SubscriberId, TrackKey};

/// A registered publisher: its entity tag and owning session.
#[derive(Clone)]
pub struct Publisher {
    /// Entity tag returned in the ingest response, for conditional updates.
    pub etag: String,
    pub session: Arc<RTCPeerConnection>,
}

/// A registered subscriber: its session and signaling handle.
#[derive(Clone)]
pub struct Subscriber {
    pub session: Arc<RTCPeerConnection>,
    pub signal: SignalChannel,
}

/// The three registry maps. Only ever touched under the broadcaster lock.
#[derive(Default)]
struct Registry {
    publishers: HashMap<PublisherId, Publisher>,
    tracks: HashMap<TrackKey, PublisherTrack>,
    subscribers: HashMap<SubscriberId, Subscriber>,
}

/// Concurrency-safe hub between publishers and subscribers.
pub struct Broadcaster {
    registry: Mutex<Registry>,
    policy: DistributionPolicy,
}

impl Broadcaster {
    #[must_use]
    pub fn new(policy: DistributionPolicy) -> Arc<Self> {
        info!(policy = ?policy, "Broadcaster initialized");
        Arc::new(Self {
            registry: Mutex::new(Registry::default()),
            policy,
        })
    }

    /// Register a publisher, returning its fresh id.
    pub async fn add_publisher(&self, publisher: Publisher) -> PublisherId {
        let id = PublisherId::new();
        self.registry.lock().await.publishers.insert(id, publisher);
        info!(publisher = %id, "Publisher registered");
        id
    }

    /// Delete a publisher record. Unknown ids are a no-op.
    ///
    /// Only the publisher map is touched here; the publisher's fan-out
    /// tracks are torn down by their forwarders once the session dies.
    pub async fn remove_publisher(&self, id: &PublisherId) {
        if self.registry.lock().await.publishers.remove(id).is_some() {
            info!(publisher = %id, "Publisher removed");
        }
    }

    /// Snapshot lookup of a publisher.
    pub async fn get_publisher(&self, id: &PublisherId) -> Option<Publisher> {
        self.registry.lock().await.publishers.get(id).cloned()
    }

    /// Wrap an inbound remote track in a fan-out sink, register it, start
    /// its forwarder and schedule a rebalance. Returns the sink.
    pub async fn add_publisher_track(
        self: &Arc<Self>,
        remote: Arc<TrackRemote>,
    ) -> Arc<TrackLocalStaticRTP> {
        let track = PublisherTrack::from_remote(&remote);
        let sink = track.sink();
        let stats = track.stats_handle();
        debug!(
            track = %track.key(),
            codec = %remote.codec().capability.mime_type,
            "Adding publisher track"
        );
        self.register_track(track).await;
        spawn_forwarder(Arc::clone(self), remote, Arc::clone(&sink), stats);
        sink
    }

    /// Register an already-built fan-out track and schedule a rebalance.
    pub async fn register_track(self: &Arc<Self>, track: PublisherTrack) {
        {
            let mut registry = self.registry.lock().await;
            registry.tracks.insert(track.key().clone(), track);
        }
        self.schedule_rebalance();
    }

    /// Deregister the track behind a fan-out sink and schedule a
    /// rebalance. An unregistered sink is a strict no-op: no state change,
    /// no rebalance.
    pub async fn remove_publisher_track(self: &Arc<Self>, sink: &TrackLocalStaticRTP) {
        let key = sink_key(sink);
        {
            let mut registry = self.registry.lock().await;
            if registry.tracks.remove(&key).is_none() {
                return;
            }
            debug!(track = %key, "Publisher track removed");
        }
        self.schedule_rebalance();
    }

    /// Register a subscriber, returning its fresh id, and schedule a
    /// rebalance so it receives its first offer.
    pub async fn add_subscriber(self: &Arc<Self>, subscriber: Subscriber) -> SubscriberId {
        let id = SubscriberId::new();
        self.registry.lock().await.subscribers.insert(id, subscriber);
        info!(subscriber = %id, "Subscriber registered");
        self.schedule_rebalance();
        id
    }

    /// Close a subscriber's signaling channel and session, drop it from
    /// the registry and schedule a rebalance. Unknown ids are a no-op.
    pub async fn remove_subscriber(self: &Arc<Self>, id: &SubscriberId) {
        let removed = self.registry.lock().await.subscribers.remove(id);
        let Some(subscriber) = removed else {
            return;
        };

        subscriber.signal.close(CLOSE_NORMAL, "Ending operation");
        if let Err(err) = subscriber.session.close().await {
            warn!(subscriber = %id, error = %err, "Failed to close subscriber session");
        }
        info!(subscriber = %id, "Subscriber removed");
        self.schedule_rebalance();
    }

    pub async fn publisher_count(&self) -> usize {
        self.registry.lock().await.publishers.len()
    }

    pub async fn track_count(&self) -> usize {
        self.registry.lock().await.tracks.len()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.registry.lock().await.subscribers.len()
    }

    /// Queue a rebalance as its own task. Callers may hold nothing; the
    /// registry mutex serialises queued rebalances.
    fn schedule_rebalance(self: &Arc<Self>) {
        let broadcaster = Arc::clone(self);
        tokio::spawn(async move {
            broadcaster.rebalance().await;
        });
    }

    /// Recompute every subscriber's target set and bring its session in
    /// line, pushing a fresh offer down each signaling channel.
    pub async fn rebalance(&self) {
        let mut registry = self.registry.lock().await;

        prune_closed(&mut registry);

        let mut tracks: Vec<TrackKey> = registry.tracks.keys().cloned().collect();
        tracks.sort();
        let mut subscribers: Vec<SubscriberId> = registry.subscribers.keys().copied().collect();
        subscribers.sort();

        let assignment = self.policy.assign(&tracks, &subscribers);
        debug!(
            tracks = tracks.len(),
            subscribers = subscribers.len(),
            "Rebalancing"
        );

        let Registry {
            subscribers: subscriber_map,
            tracks: track_map,
            ..
        } = &*registry;

        for id in &subscribers {
            let Some(target) = assignment.get(id) else {
                continue;
            };
            let Some(subscriber) = subscriber_map.get(id) else {
                continue;
            };
            reconcile_subscriber(*id, subscriber, target, track_map).await;
        }
    }
}

/// Drop subscribers whose session already reached the terminal closed
/// state, telling the client side why.
fn prune_closed(registry: &mut Registry) {
    let closed: Vec<SubscriberId> = registry
        .subscribers
        .iter()
        .filter(|(_, s)| s.session.connection_state() == RTCPeerConnectionState::Closed)
        .map(|(id, _)| *id)
        .collect();

    for id in closed {
        if let Some(subscriber) = registry.subscribers.remove(&id) {
            subscriber
                .signal
                .close(CLOSE_GOING_AWAY, "WebRTC connection closed");
            info!(subscriber = %id, "Pruned closed subscriber");
        }
    }
}

/// Bring one subscriber session in line with its target set and send the
/// resulting offer.
///
/// Every failure here is logged and skipped so one bad session never
/// aborts the rebalance for the others.
async fn reconcile_subscriber(
    id: SubscriberId,
    subscriber: &Subscriber,
    target: &HashSet<TrackKey>,
    tracks: &HashMap<TrackKey, PublisherTrack>,
) {
    let mut attached: HashSet<TrackKey> = HashSet::new();
    for sender in subscriber.session.get_senders().await {
        let Some(current) = sender.track().await else {
            continue;
        };
        let key = TrackKey::of(current.stream_id(), current.id());
        if target.contains(&key) {
            attached.insert(key);
        } else if let Err(err) = subscriber.session.remove_track(&sender).await {
            warn!(subscriber = %id, track = %key, error = %err, "Failed to detach track");
        }
    }

    for key in target {
        if attached.contains(key) {
            continue;
        }
        let Some(track) = tracks.get(key) else {
            continue;
        };
        let sink: Arc<dyn TrackLocal + Send + Sync> = track.sink();
        if let Err(err) = subscriber.session.add_track(sink).await {
            warn!(subscriber = %id, track = %key, error = %err, "Failed to attach track");
        }
    }

    // A fresh offer goes out every reconcile, even on an empty diff, so
    // the client can observe liveness.
    let offer = match subscriber.session.create_offer(None).await {
        Ok(offer) => offer,
        Err(err) => {
            warn!(subscriber = %id, error = %err, "Unable to create offer");
            return;
        }
    };

    if let Err(err) = subscriber.session.set_local_description(offer.clone()).await {
        warn!(subscriber = %id, error = %err, "Unable to install local description");
    }

    let payload = match serde_json::to_string(&offer) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(subscriber = %id, error = %err, "Unable to serialize offer");
            return;
        }
    };

    debug!(subscriber = %id, targets = target.len(), "Sending offer");
    if let Err(err) = subscriber.signal.send_event(EVENT_OFFER, payload).await {
        warn!(subscriber = %id, error = %err, "Unable to send offer");
    }
}
