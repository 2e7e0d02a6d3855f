//! WHIP publisher ingest
//!
//! `POST /whip` admits a publisher through one SDP offer/answer exchange;
//! `DELETE /whip/{id}` removes it. Inbound tracks are handed to the
//! broadcaster as they arrive and the publisher is asked for a keyframe
//! on a fixed cadence for the lifetime of the session.

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

use streamcast_sfu::peer::new_peer_connection;
use streamcast_sfu::{Publisher, PublisherId};

use super::{AppError, AppResult, AppState};

const SDP_CONTENT_TYPE: &str = "application/sdp";

/// Admit a publisher: offer in, answer out.
pub async fn whip_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> AppResult<Response> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if content_type != SDP_CONTENT_TYPE {
        return Err(AppError::not_acceptable("Unsupported content type"));
    }

    let offer = RTCSessionDescription::offer(body)
        .map_err(|err| AppError::bad_request(format!("Invalid SDP offer: {err}")))?;

    let peer = new_peer_connection(&state.config.webrtc).await?;
    peer.add_transceiver_from_kind(RTPCodecType::Video, None)
        .await
        .map_err(|err| {
            warn!(error = %err, "Unable to add video transceiver");
            AppError::internal_server_error("Unable to prepare session")
        })?;

    // Hand each inbound track to the broadcaster and keep the publisher
    // emitting keyframes while the session lives.
    {
        let broadcaster = Arc::clone(&state.broadcaster);
        let pli_interval = state.config.webrtc.pli_interval();
        let peer_weak = Arc::downgrade(&peer);
        peer.on_track(Box::new(move |remote, _receiver, _transceiver| {
            let broadcaster = Arc::clone(&broadcaster);
            let peer_weak = peer_weak.clone();
            Box::pin(async move {
                if let Some(peer) = peer_weak.upgrade() {
                    let ssrc = remote.ssrc();
                    tokio::spawn(async move {
                        let mut ticker = tokio::time::interval(pli_interval);
                        loop {
                            ticker.tick().await;
                            let pli = PictureLossIndication {
                                sender_ssrc: 0,
                                media_ssrc: ssrc,
                            };
                            if let Err(err) = peer.write_rtcp(&[Box::new(pli)]).await {
                                debug!(error = %err, "Stopping keyframe requests");
                                return;
                            }
                        }
                    });
                }

                broadcaster.add_publisher_track(remote).await;
            })
        }));
    }

    peer.set_remote_description(offer).await.map_err(|err| {
        warn!(error = %err, "Unable to apply publisher offer");
        AppError::internal_server_error("Unable to apply offer")
    })?;

    let answer = peer.create_answer(None).await.map_err(|err| {
        warn!(error = %err, "Unable to create answer");
        AppError::internal_server_error("Unable to create answer")
    })?;

    // The answer is returned only after ICE gathering finishes, so it
    // carries every candidate and the client needs no trickle leg.
    let mut gather_complete = peer.gathering_complete_promise().await;
    peer.set_local_description(answer).await.map_err(|err| {
        warn!(error = %err, "Unable to install answer");
        AppError::internal_server_error("Unable to install answer")
    })?;
    let _ = gather_complete.recv().await;

    let sdp = peer
        .local_description()
        .await
        .ok_or_else(|| AppError::internal_server_error("Local description unavailable"))?
        .sdp;

    let publisher = Publisher {
        etag: Uuid::new_v4().to_string(),
        session: Arc::clone(&peer),
    };
    let etag = publisher.etag.clone();
    let id = state.broadcaster.add_publisher(publisher).await;

    // A session that dies without an explicit delete still loses its
    // record; the fan-out tracks are cleaned up by their forwarders.
    {
        let broadcaster = Arc::clone(&state.broadcaster);
        peer.on_peer_connection_state_change(Box::new(move |conn_state| {
            let broadcaster = Arc::clone(&broadcaster);
            Box::pin(async move {
                if matches!(
                    conn_state,
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
                ) {
                    broadcaster.remove_publisher(&id).await;
                }
            })
        }));
    }

    info!(publisher = %id, "Publisher admitted");

    let response_headers = [
        (header::CONTENT_TYPE, SDP_CONTENT_TYPE.to_string()),
        (header::LOCATION, format!("/whip/{id}")),
        (header::ETAG, format!("\"{etag}\"")),
        (
            HeaderName::from_static("accept-patch"),
            "application/trickle-ice-sdpfrag".to_string(),
        ),
    ];
    Ok((StatusCode::CREATED, response_headers, sdp).into_response())
}

/// Tear down a publisher session.
pub async fn whip_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let Some(id) = PublisherId::parse(&id) else {
        return Err(AppError::not_found("Not Found"));
    };
    let Some(publisher) = state.broadcaster.get_publisher(&id).await else {
        return Err(AppError::not_found("Not Found"));
    };

    if let Err(err) = publisher.session.close().await {
        warn!(publisher = %id, error = %err, "Unable to close publisher session");
        return Err(AppError::internal_server_error(
            "Error closing peer connection",
        ));
    }

    state.broadcaster.remove_publisher(&id).await;
    Ok(StatusCode::OK)
}
