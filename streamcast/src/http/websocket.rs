//! Subscriber signaling channel
//!
//! One WebSocket per subscriber. The broadcaster pushes offers and
//! candidates through the subscriber's `SignalChannel`; a writer task
//! here is the only owner of the socket's send half. The read loop
//! forwards answers and client candidates into the session.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use streamcast_sfu::peer::new_peer_connection;
use streamcast_sfu::signal::{
    SignalChannel, SignalCommand, SignalMessage, EVENT_ANSWER, EVENT_CANDIDATE, PING_CHANNEL,
    SUBPROTOCOL,
};
use streamcast_sfu::Subscriber;

use super::AppState;

pub async fn websocket_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.protocols([SUBPROTOCOL])
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let peer = match new_peer_connection(&state.config.webrtc).await {
        Ok(peer) => peer,
        Err(err) => {
            error!(error = %err, "Failed to create subscriber session");
            return;
        }
    };

    let (signal, mut commands) = SignalChannel::new(
        state.config.webrtc.signal_buffer,
        state.config.webrtc.signal_deadline(),
    );
    let (mut ws_sink, mut ws_stream) = socket.split();

    // Writer task: drains the signaling queue into the socket. A close
    // command ends it after the close frame goes out.
    tokio::spawn(async move {
        while let Some(command) = commands.recv().await {
            match command {
                SignalCommand::Text(frame) => {
                    if ws_sink.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                SignalCommand::Close { code, reason } => {
                    let _ = ws_sink
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    // Application-level keepalive on a dedicated data channel. The loop
    // starts from on_open: the channel is not writable until the client
    // has answered, and a failed send would end the keepalive for good.
    match peer.create_data_channel(PING_CHANNEL, None).await {
        Ok(channel) => {
            let interval = state.config.webrtc.keepalive_interval();
            let sender = Arc::clone(&channel);
            channel.on_open(Box::new(move || {
                Box::pin(async move {
                    loop {
                        tokio::time::sleep(interval).await;
                        if sender.send_text("ping").await.is_err() {
                            return;
                        }
                    }
                })
            }));
        }
        Err(err) => warn!(error = %err, "Failed to create keepalive channel"),
    }

    // Trickle ICE: relay server candidates to the client.
    {
        let signal = signal.clone();
        peer.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let signal = signal.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                let init = match candidate.to_json() {
                    Ok(init) => init,
                    Err(err) => {
                        warn!(error = %err, "Unable to convert candidate");
                        return;
                    }
                };
                let payload = match serde_json::to_string(&init) {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(error = %err, "Unable to serialize candidate");
                        return;
                    }
                };
                if let Err(err) = signal.send_event(EVENT_CANDIDATE, payload).await {
                    debug!(error = %err, "Unable to send candidate");
                }
            })
        }));
    }

    let subscriber_id = state
        .broadcaster
        .add_subscriber(Subscriber {
            session: Arc::clone(&peer),
            signal,
        })
        .await;

    // A session reaching a terminal state loses its registry entry; the
    // registry owns the lifecycle, this callback only reports.
    {
        let broadcaster = Arc::clone(&state.broadcaster);
        peer.on_peer_connection_state_change(Box::new(move |conn_state| {
            let broadcaster = Arc::clone(&broadcaster);
            Box::pin(async move {
                if matches!(
                    conn_state,
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
                ) {
                    broadcaster.remove_subscriber(&subscriber_id).await;
                }
            })
        }));
    }

    // Read loop: answers and client candidates.
    while let Some(message) = ws_stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                debug!(subscriber = %subscriber_id, error = %err, "Signaling read failed");
                break;
            }
        };

        match message {
            Message::Text(text) => {
                let msg: SignalMessage = match serde_json::from_str(&text) {
                    Ok(msg) => msg,
                    Err(err) => {
                        warn!(subscriber = %subscriber_id, error = %err, "Malformed signaling frame");
                        break;
                    }
                };

                match msg.event.as_str() {
                    EVENT_CANDIDATE => {
                        let candidate: RTCIceCandidateInit = match serde_json::from_str(&msg.data)
                        {
                            Ok(candidate) => candidate,
                            Err(err) => {
                                warn!(subscriber = %subscriber_id, error = %err, "Malformed candidate");
                                break;
                            }
                        };
                        if let Err(err) = peer.add_ice_candidate(candidate).await {
                            warn!(subscriber = %subscriber_id, error = %err, "Unable to add candidate");
                            break;
                        }
                    }
                    EVENT_ANSWER => {
                        let answer: RTCSessionDescription = match serde_json::from_str(&msg.data) {
                            Ok(answer) => answer,
                            Err(err) => {
                                warn!(subscriber = %subscriber_id, error = %err, "Malformed answer");
                                break;
                            }
                        };
                        if let Err(err) = peer.set_remote_description(answer).await {
                            // The first answer can arrive before the client
                            // learned its ufrag; that one is harmless.
                            if err != webrtc::Error::ErrSessionDescriptionMissingIceUfrag {
                                warn!(subscriber = %subscriber_id, error = %err, "Unable to apply answer");
                                break;
                            }
                        }
                    }
                    other => {
                        debug!(subscriber = %subscriber_id, event = other, "Ignoring unknown event");
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Channel gone: the registry tears the session down. The writer task
    // exits once the close command flows through.
    state.broadcaster.remove_subscriber(&subscriber_id).await;
    info!(subscriber = %subscriber_id, "Signaling channel closed");
}
