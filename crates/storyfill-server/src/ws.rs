//! WebSocket hub: one socket per client per room. Sockets authenticate from
//! query params, get a snapshot immediately on connect, then pump the room's
//! event channel. Socket lifetime drives presence (and with it, prompt
//! reassignment after the disconnect grace).

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use storyfill_core::room::{Room, RoomState};
use storyfill_core::snapshot::RoomEvent;

use crate::state::{AppState, ConnectionGuard};

pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_BAD_REQUEST: u16 = 4400;
pub const CLOSE_AUTH: u16 = 4403;
pub const CLOSE_NOT_FOUND: u16 = 4404;
pub const CLOSE_EXPIRED: u16 = 4410;
pub const CLOSE_TRY_AGAIN: u16 = 4429;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WsParams {
    room_code: String,
    token: String,
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, params: WsParams) {
    let _guard = ConnectionGuard::new(Arc::clone(&state.ws_connection_count));

    let room_code = params.room_code.trim().to_ascii_uppercase();
    let token = params.token.trim().to_string();
    if room_code.is_empty() || token.is_empty() {
        close_with(socket, CLOSE_BAD_REQUEST, "room_code and token are required").await;
        return;
    }

    let Some(handle) = state.store.get_by_code(&room_code).await else {
        close_with(socket, CLOSE_NOT_FOUND, "room not found").await;
        return;
    };

    // Authenticate, mark presence, and subscribe under the room lock, so no
    // event published after our snapshot can be missed.
    let (player_id, mut events, first_snapshot) = {
        let mut room = handle.lock().await;
        if room.state == RoomState::Expired || room.is_idle_expired(state.config.room_ttl()) {
            drop(room);
            close_with(socket, CLOSE_EXPIRED, "room expired").await;
            return;
        }
        let resolved = if room.is_host_token(&token) {
            room.host_player_id.clone()
        } else {
            room.player_by_token(&token).map(|p| p.id.clone())
        };
        let Some(player_id) = resolved else {
            drop(room);
            close_with(socket, CLOSE_AUTH, "unauthorized").await;
            return;
        };
        room.mark_socket_connected(&player_id);
        let events = state.bus.subscribe(&room.id);
        let snapshot = RoomEvent::Snapshot {
            room_snapshot: room.snapshot(),
            progress: room.progress(),
        };
        state.bus.publish(&room.id, snapshot.clone());
        (player_id, events, snapshot)
    };

    tracing::debug!(room_code = %room_code, player_id = %player_id, "Socket connected");

    // The connecting client gets state immediately, ahead of the pump.
    let first_version = first_snapshot.state_version().unwrap_or(0);
    let end = if send_event(&mut socket, &first_snapshot).await.is_err() {
        SessionEnd::ClientGone
    } else {
        run_session(
            &mut socket,
            &state,
            &handle,
            &player_id,
            &mut events,
            first_version,
        )
        .await
    };

    // Presence teardown happens regardless of how the session ended.
    let flipped_disconnected = {
        let mut room = handle.lock().await;
        room.mark_socket_disconnected(&player_id);
        let gone = room.player(&player_id).is_some_and(|p| !p.connected);
        if room.state != RoomState::Expired {
            state.bus.publish(
                &room.id,
                RoomEvent::Snapshot {
                    room_snapshot: room.snapshot(),
                    progress: room.progress(),
                },
            );
        }
        gone
    };
    if flipped_disconnected {
        arm_disconnect_grace(state.clone(), Arc::clone(&handle), player_id.clone());
    }

    tracing::info!(room_code = %room_code, player_id = %player_id, reason = ?end, "Socket closed");

    match end {
        SessionEnd::ClientGone => {},
        SessionEnd::Idle => close_with(socket, CLOSE_NORMAL, "idle timeout").await,
        SessionEnd::Overflow => close_with(socket, CLOSE_TRY_AGAIN, "try again").await,
        SessionEnd::Kicked => close_with(socket, CLOSE_AUTH, "removed from room").await,
        SessionEnd::RoomExpired => close_with(socket, CLOSE_EXPIRED, "room expired").await,
        SessionEnd::RoomGone => close_with(socket, CLOSE_NORMAL, "room closed").await,
    }
}

#[derive(Debug)]
enum SessionEnd {
    ClientGone,
    Idle,
    Overflow,
    Kicked,
    RoomExpired,
    RoomGone,
}

async fn run_session(
    socket: &mut WebSocket,
    state: &AppState,
    handle: &Arc<Mutex<Room>>,
    player_id: &str,
    events: &mut broadcast::Receiver<RoomEvent>,
    mut last_version: u64,
) -> SessionEnd {
    let idle_timeout = state.config.socket_idle_timeout();
    let mut deadline = tokio::time::Instant::now() + idle_timeout;

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return SessionEnd::Idle,

            incoming = socket.recv() => match incoming {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => {
                    return SessionEnd::ClientGone;
                },
                Some(Ok(Message::Text(text))) => {
                    deadline = tokio::time::Instant::now() + idle_timeout;
                    if is_heartbeat(&text) {
                        handle.lock().await.touch();
                    }
                    // All other client frames are ignored.
                },
                Some(Ok(_)) => {
                    deadline = tokio::time::Instant::now() + idle_timeout;
                },
            },

            event = events.recv() => match event {
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(player_id, skipped, "Subscriber overflowed, dropping socket");
                    return SessionEnd::Overflow;
                },
                Err(RecvError::Closed) => return SessionEnd::RoomGone,
                Ok(event) => {
                    if let Some(end) =
                        pump_events(socket, events, event, player_id, &mut last_version).await
                    {
                        return end;
                    }
                },
            },
        }
    }
}

/// Deliver the received event plus anything else already queued. Snapshots
/// coalesce: only the newest queued one goes out, and anything at or below
/// the version already sent to this socket is dropped as stale.
async fn pump_events(
    socket: &mut WebSocket,
    events: &mut broadcast::Receiver<RoomEvent>,
    first: RoomEvent,
    player_id: &str,
    last_version: &mut u64,
) -> Option<SessionEnd> {
    let mut batch = vec![first];
    loop {
        match events.try_recv() {
            Ok(event) => batch.push(event),
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Lagged(_)) => return Some(SessionEnd::Overflow),
            Err(TryRecvError::Closed) => break,
        }
    }

    let newest_snapshot = batch
        .iter()
        .rposition(|e| matches!(e, RoomEvent::Snapshot { .. }));

    for (i, event) in batch.iter().enumerate() {
        match event {
            RoomEvent::Snapshot { room_snapshot, .. } => {
                if Some(i) != newest_snapshot || room_snapshot.state_version <= *last_version {
                    continue; // superseded while queued, or already delivered
                }
                if send_event(socket, event).await.is_err() {
                    return Some(SessionEnd::ClientGone);
                }
                *last_version = room_snapshot.state_version;
                if !room_snapshot.players.iter().any(|p| p.id == player_id) {
                    return Some(SessionEnd::Kicked);
                }
            },
            RoomEvent::Expired {} => {
                let _ = send_event(socket, event).await;
                return Some(SessionEnd::RoomExpired);
            },
        }
    }
    None
}

async fn send_event(socket: &mut WebSocket, event: &RoomEvent) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(text) => socket.send(Message::Text(text.into())).await,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode room event");
            Ok(())
        },
    }
}

fn is_heartbeat(text: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(String::from))
        .is_some_and(|t| t == "client.heartbeat")
}

/// After the grace elapses, a player who never came back loses their
/// unsubmitted prompts to the connected players. Reconnecting in time makes
/// this a no-op.
fn arm_disconnect_grace(state: AppState, handle: Arc<Mutex<Room>>, player_id: String) {
    let grace = state.config.disconnect_grace();
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        let mut room = handle.lock().await;
        if room.state != RoomState::Prompting {
            return;
        }
        let still_gone = room.player(&player_id).is_some_and(|p| !p.connected);
        if !still_gone {
            return;
        }
        if room.reassign_overdue(grace) {
            tracing::info!(room_code = %room.code, player_id = %player_id, "Prompts reassigned after grace");
            state.bus.publish(
                &room.id,
                RoomEvent::Snapshot {
                    room_snapshot: room.snapshot(),
                    progress: room.progress(),
                },
            );
        }
    });
}

async fn close_with(mut socket: WebSocket, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}
