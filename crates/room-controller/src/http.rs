//! HTTP and WebSocket surface of the room controller.
//!
//! Routes:
//!
//! - `GET  /rooms/{room}/ws` — per-room signaling channel
//! - `POST /sessions/new` — alternate join path, issues the identity token
//! - `POST /tracks/new` — publish local or pull remote tracks
//! - `PUT  /sessions/renegotiate` — complete a renegotiation
//! - `PUT  /tracks/close` — close tracks by mid
//! - `GET  /local_tracks` — the other sessions' publications, with version
//! - `GET  /healthz`
//!
//! Everything except `sessions/new` and the WebSocket upgrade requires the
//! `x-session-identity-token` header; the token carries the room, so no
//! route is room-scoped beyond the WebSocket.

use crate::actors::Track;
use crate::errors::{ConflictError, SignalError};
use crate::hub::{Hub, OUTBOUND_CHANNEL_BUFFER};
use crate::sfu::{LocalTrackBinding, RemoteTrackRef};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use common::identity::{AuthError, IdentityTokenPayload};
use futures::{SinkExt, StreamExt};
use signaling_protocol::{
    CloseTracksRequest, CloseTracksResponse, GrantedTrack, LocalTracksResponse, NewSessionRequest,
    NewSessionResponse, RenegotiateRequest, SessionDescription, TracksNewRequest,
    TracksNewResponse, SESSION_IDENTITY_HEADER,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Build the signaling router.
pub fn router(hub: Arc<Hub>) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/rooms/:room/ws", get(ws_handler))
        .route("/sessions/new", post(new_session))
        .route("/tracks/new", post(tracks_new))
        .route("/sessions/renegotiate", put(renegotiate))
        .route("/tracks/close", put(tracks_close))
        .route("/local_tracks", get(local_tracks))
        .layer(TraceLayer::new_for_http())
        .with_state(hub)
}

async fn health() -> &'static str {
    "ok"
}

// ----------------------------------------------------------------------------
// WebSocket pump
// ----------------------------------------------------------------------------

async fn ws_handler(
    Path(room): Path<String>,
    State(hub): State<Arc<Hub>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| pump_connection(socket, hub, room))
}

/// Pump one WebSocket: inbound text frames into the hub, hub frames out.
async fn pump_connection(socket: WebSocket, hub: Arc<Hub>, room: String) {
    let connection_id = Uuid::new_v4().to_string();
    let (outbound_tx, mut outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_BUFFER);

    if let Err(e) = hub.connect(&room, &connection_id, outbound_tx).await {
        warn!(target: "rc.http", error = %e, "connection registration failed");
        return;
    }

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                let Some(message) = outbound else { break };
                match serde_json::to_string(&message) {
                    Ok(text) => {
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(target: "rc.http", error = %e, "failed to encode frame");
                    }
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        hub.on_message(&room, &connection_id, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {
                        // Binary, ping, pong: no state mutation.
                        debug!(
                            target: "rc.http",
                            connection_id = %connection_id,
                            "ignoring non-text frame"
                        );
                    }
                }
            }
        }
    }

    hub.on_close(&room, &connection_id).await;
    info!(
        target: "rc.http",
        room = %room,
        connection_id = %connection_id,
        "websocket closed"
    );
}

// ----------------------------------------------------------------------------
// HTTP handlers
// ----------------------------------------------------------------------------

fn authenticated(hub: &Hub, headers: &HeaderMap) -> Result<IdentityTokenPayload, SignalError> {
    let token = headers
        .get(SESSION_IDENTITY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(SignalError::Auth(AuthError::Malformed))?;
    hub.verify_token(token)
}

async fn new_session(
    State(hub): State<Arc<Hub>>,
    Json(request): Json<NewSessionRequest>,
) -> Result<Json<NewSessionResponse>, SignalError> {
    if request.user_session_id.is_empty() || request.room.is_empty() {
        return Err(SignalError::Validation(
            "userSessionId and room are required".to_string(),
        ));
    }

    let token = hub
        .create_http_session(&request.user_session_id, &request.room)
        .await?;
    Ok(Json(NewSessionResponse {
        session_identity_token: token,
    }))
}

async fn tracks_new(
    State(hub): State<Arc<Hub>>,
    headers: HeaderMap,
    Json(request): Json<TracksNewRequest>,
) -> Result<Json<TracksNewResponse>, SignalError> {
    let payload = authenticated(&hub, &headers)?;
    let session = hub
        .sessions
        .get(&payload.room, &payload.sub)
        .await
        .ok_or(SignalError::Conflict(ConflictError::NotInitialized))?;
    let room_handle = hub.rooms.get_or_spawn(&payload.room).await;

    match request {
        TracksNewRequest::Local {
            session_description,
            tracks,
        } => {
            let bindings: Vec<LocalTrackBinding> = tracks
                .iter()
                .map(|t| LocalTrackBinding {
                    mid: t.mid.clone(),
                    name: t.track_name.clone(),
                })
                .collect();

            let answer_sdp = session
                .add_local_tracks(session_description.sdp, bindings.clone())
                .await?;

            let rows = bindings
                .iter()
                .map(|b| Track::local(b.name.clone(), payload.session_id.clone(), b.mid.clone()))
                .collect();
            room_handle.add_tracks(rows).await?;

            Ok(Json(TracksNewResponse {
                session_description: Some(SessionDescription::answer(answer_sdp)),
                tracks: None,
            }))
        }
        TracksNewRequest::Remote { tracks } => {
            let refs: Vec<RemoteTrackRef> = tracks
                .iter()
                .map(|t| RemoteTrackRef {
                    session_id: t.session_id.clone(),
                    name: t.track_name.clone(),
                })
                .collect();

            let outcome = session.push_remote_tracks(refs).await?;

            if !outcome.granted.is_empty() {
                let rows = outcome
                    .granted
                    .iter()
                    .map(|g| {
                        Track::remote(
                            g.name.clone(),
                            payload.session_id.clone(),
                            g.mid.clone(),
                            g.session_id.clone(),
                        )
                    })
                    .collect();
                if let Err(e) = room_handle.add_tracks(rows).await {
                    warn!(target: "rc.http", error = %e, "failed to record mirror rows");
                }
            }

            Ok(Json(TracksNewResponse {
                session_description: outcome.offer_sdp.map(SessionDescription::offer),
                tracks: Some(
                    outcome
                        .granted
                        .into_iter()
                        .map(|g| GrantedTrack {
                            mid: g.mid,
                            name: g.name,
                            session_id: g.session_id,
                        })
                        .collect(),
                ),
            }))
        }
    }
}

async fn renegotiate(
    State(hub): State<Arc<Hub>>,
    headers: HeaderMap,
    Json(request): Json<RenegotiateRequest>,
) -> Result<Json<serde_json::Value>, SignalError> {
    let payload = authenticated(&hub, &headers)?;
    let session = hub
        .sessions
        .get(&payload.room, &payload.sub)
        .await
        .ok_or(SignalError::Conflict(ConflictError::NotInitialized))?;

    session.renegotiate(request.session_description.sdp).await?;
    Ok(Json(serde_json::json!({})))
}

async fn tracks_close(
    State(hub): State<Arc<Hub>>,
    headers: HeaderMap,
    Json(request): Json<CloseTracksRequest>,
) -> Result<Json<CloseTracksResponse>, SignalError> {
    let payload = authenticated(&hub, &headers)?;
    let session = hub
        .sessions
        .get(&payload.room, &payload.sub)
        .await
        .ok_or(SignalError::Conflict(ConflictError::NotInitialized))?;

    let mids: Vec<String> = request.tracks.iter().map(|t| t.mid.clone()).collect();
    let answer_sdp = session
        .close_tracks(Some(request.session_description.sdp), mids.clone())
        .await?;

    let room_handle = hub.rooms.get_or_spawn(&payload.room).await;
    room_handle
        .remove_by_mids(payload.session_id.clone(), mids)
        .await?;

    Ok(Json(CloseTracksResponse {
        session_description: answer_sdp.map(SessionDescription::answer),
    }))
}

async fn local_tracks(
    State(hub): State<Arc<Hub>>,
    headers: HeaderMap,
) -> Result<Json<LocalTracksResponse>, SignalError> {
    let payload = authenticated(&hub, &headers)?;
    let room_handle = hub.rooms.get_or_spawn(&payload.room).await;

    let listing = room_handle.list_except(payload.session_id).await?;
    Ok(Json(LocalTracksResponse {
        tracks: listing.tracks,
        version: listing.version,
    }))
}
