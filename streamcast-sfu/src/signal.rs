//! Subscriber signaling channel
//!
//! The broadcaster never holds the socket for a subscriber; it talks to a
//! `SignalChannel`, a bounded command queue the transport adapter drains.
//! This keeps the session-callback → registry lifecycle one-directional:
//! callbacks and the reconciler enqueue, the adapter owns the socket.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;

/// WebSocket subprotocol spoken on the signaling channel.
pub const SUBPROTOCOL: &str = "webRTCBroadcast";

/// Server-to-client renegotiation offer.
pub const EVENT_OFFER: &str = "offer";
/// Client-to-server answer to an offer.
pub const EVENT_ANSWER: &str = "answer";
/// Trickle ICE candidate, both directions.
pub const EVENT_CANDIDATE: &str = "candidate";

/// Label of the keepalive data channel.
pub const PING_CHANNEL: &str = "ping";

/// Normal closure, sent on explicit subscriber removal.
pub const CLOSE_NORMAL: u16 = 1000;
/// Going away, sent when a dead session is pruned.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// One signaling frame. `data` carries the JSON-encoded payload for the
/// event, as a string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalMessage {
    pub event: String,
    pub data: String,
}

/// Command for the transport adapter draining this subscriber's queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalCommand {
    /// Send one text frame.
    Text(String),
    /// Close the channel and stop draining.
    Close { code: u16, reason: &'static str },
}

/// Write handle for one subscriber's signaling channel.
#[derive(Clone)]
pub struct SignalChannel {
    tx: mpsc::Sender<SignalCommand>,
    deadline: Duration,
}

impl SignalChannel {
    /// Create a channel with the given buffer and per-write deadline.
    /// The receiver side belongs to the transport adapter.
    #[must_use]
    pub fn new(buffer: usize, deadline: Duration) -> (Self, mpsc::Receiver<SignalCommand>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx, deadline }, rx)
    }

    /// Serialize and enqueue one event frame.
    ///
    /// `data` must already be the JSON-encoded payload. Enqueueing blocks
    /// for at most the configured deadline; on expiry the frame is
    /// abandoned.
    pub async fn send_event(&self, event: &str, data: String) -> Result<()> {
        let frame = serde_json::to_string(&SignalMessage {
            event: event.to_string(),
            data,
        })?;

        match timeout(self.deadline, self.tx.send(SignalCommand::Text(frame))).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(Error::SignalClosed("channel closed".to_string())),
            Err(_) => Err(Error::SignalClosed(format!(
                "write deadline of {:?} elapsed",
                self.deadline
            ))),
        }
    }

    /// Request channel closure. Best-effort: a closed or saturated queue
    /// only gets a debug line, the subscriber is going away regardless.
    pub fn close(&self, code: u16, reason: &'static str) {
        if let Err(err) = self.tx.try_send(SignalCommand::Close { code, reason }) {
            debug!(code, reason, error = %err, "Could not enqueue close frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let msg = SignalMessage {
            event: EVENT_OFFER.to_string(),
            data: "{\"type\":\"offer\",\"sdp\":\"v=0\"}".to_string(),
        };
        let frame = serde_json::to_string(&msg).unwrap();
        assert!(frame.starts_with("{\"event\":\"offer\",\"data\":"));

        let back: SignalMessage = serde_json::from_str(&frame).unwrap();
        assert_eq!(back.event, "offer");
        assert_eq!(back.data, msg.data);
    }

    #[tokio::test]
    async fn test_send_event_is_received() {
        let (channel, mut rx) = SignalChannel::new(4, Duration::from_secs(5));
        channel
            .send_event(EVENT_OFFER, "{}".to_string())
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            SignalCommand::Text(frame) => {
                let msg: SignalMessage = serde_json::from_str(&frame).unwrap();
                assert_eq!(msg.event, EVENT_OFFER);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_deadline_elapses_when_full() {
        let (channel, _rx) = SignalChannel::new(1, Duration::from_millis(20));
        channel
            .send_event(EVENT_OFFER, "{}".to_string())
            .await
            .unwrap();

        // Queue is full and nobody drains it.
        let err = channel
            .send_event(EVENT_OFFER, "{}".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SignalClosed(_)));
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped() {
        let (channel, rx) = SignalChannel::new(4, Duration::from_secs(1));
        drop(rx);

        let err = channel
            .send_event(EVENT_OFFER, "{}".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SignalClosed(_)));
    }

    #[tokio::test]
    async fn test_close_command() {
        let (channel, mut rx) = SignalChannel::new(4, Duration::from_secs(5));
        channel.close(CLOSE_NORMAL, "Ending operation");

        assert_eq!(
            rx.recv().await.unwrap(),
            SignalCommand::Close {
                code: CLOSE_NORMAL,
                reason: "Ending operation"
            }
        );
    }
}
