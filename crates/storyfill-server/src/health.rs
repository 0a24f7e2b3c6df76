use std::sync::atomic::Ordering;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::state::AppState;
use crate::store::RoomStats;

/// What the process is holding right now: sockets, rooms by lifecycle
/// state, narration jobs, and live share tokens.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub websocket_connections: usize,
    pub rooms: RoomsHealth,
    pub narration: NarrationHealth,
    pub shares: SharesHealth,
}

#[derive(Serialize)]
pub struct RoomsHealth {
    /// Rooms still playable (everything except expiry tombstones).
    pub active: usize,
    pub players: usize,
    pub lobby_open: usize,
    pub prompting: usize,
    pub awaiting_reveal: usize,
    pub revealed: usize,
    /// Expired rooms waiting out the sweeper's removal grace.
    pub expiring: usize,
}

impl From<RoomStats> for RoomsHealth {
    fn from(stats: RoomStats) -> Self {
        Self {
            active: stats.rooms.saturating_sub(stats.expiring),
            players: stats.players,
            lobby_open: stats.lobby_open,
            prompting: stats.prompting,
            awaiting_reveal: stats.awaiting_reveal,
            revealed: stats.revealed,
            expiring: stats.expiring,
        }
    }
}

#[derive(Serialize)]
pub struct NarrationHealth {
    pub jobs_active: usize,
    pub jobs_ready: usize,
    pub jobs_blocked: usize,
    pub jobs_failed: usize,
    pub cached_stories: usize,
}

#[derive(Serialize)]
pub struct SharesHealth {
    pub active: usize,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let narration = state.narration.metrics();
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        websocket_connections: state.ws_connection_count.load(Ordering::Relaxed),
        rooms: state.store.stats().await.into(),
        narration: NarrationHealth {
            jobs_active: narration.jobs_active,
            jobs_ready: narration.jobs_ready,
            jobs_blocked: narration.jobs_blocked,
            jobs_failed: narration.jobs_failed,
            cached_stories: narration.cached_stories,
        },
        shares: SharesHealth {
            active: state.shares.active_count(),
        },
    })
}
