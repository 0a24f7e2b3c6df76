pub mod api;
pub mod bus;
pub mod config;
pub mod error;
pub mod health;
pub mod narration;
pub mod rate_limit;
pub mod share;
pub mod state;
pub mod store;
pub mod ws;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tokio::sync::Mutex;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;

use storyfill_core::room::Room;
use storyfill_core::snapshot::RoomEvent;

use config::ServerConfig;
use narration::NarrationProvider;
use state::AppState;

/// Build the Axum router and application state from a config.
pub fn build_app(config: ServerConfig) -> (Router<()>, AppState) {
    build_router(AppState::new(config))
}

/// Same, but with a custom narration collaborator (tests use a stub).
pub fn build_app_with_provider(
    config: ServerConfig,
    provider: Arc<dyn NarrationProvider>,
) -> (Router<()>, AppState) {
    build_router(AppState::with_provider(config, provider))
}

fn build_router(state: AppState) -> (Router<()>, AppState) {
    // Command + query surface; the WS route stays outside the request
    // timeout since sockets are long-lived.
    let api_routes = Router::new()
        .route("/rooms", post(api::create_room))
        .route("/rooms/{code}/join", post(api::join_room))
        .route("/rooms/{code}/leave", post(api::leave_room))
        .route("/rooms/{code}/start", post(api::start_room))
        .route("/rooms/{code}/end", post(api::end_room))
        .route("/rooms/{code}/reveal", post(api::reveal_room))
        .route("/rooms/{code}/replay", post(api::replay_room))
        .route("/rooms/{code}:lock", post(api::lock_room))
        .route("/rooms/{code}:unlock", post(api::unlock_room))
        .route("/rooms/{code}:template", post(api::set_template))
        .route("/rooms/{code}:snapshot", get(api::room_snapshot))
        .route(
            "/rooms/{code}/players/{player_id}:kick",
            post(api::kick_player),
        )
        .route(
            "/rooms/{code}/players/{player_id}:reconnect",
            post(api::reconnect_player),
        )
        .route(
            "/rooms/{code}/rounds/{round_id}/prompts",
            get(api::list_prompts),
        )
        .route(
            "/rooms/{code}/rounds/{round_id}/prompts/{prompt_id}:submit",
            post(api::submit_prompt),
        )
        .route("/rooms/{code}/rounds/{round_id}/story", get(api::round_story))
        .route(
            "/rooms/{code}/rounds/{round_id}/progress",
            get(api::round_progress),
        )
        .route(
            "/rooms/{code}/rounds/{round_id}/tts",
            get(api::narration_status),
        )
        .route(
            "/rooms/{code}/rounds/{round_id}:tts",
            post(api::request_narration),
        )
        .route(
            "/rooms/{code}/rounds/{round_id}:share",
            post(api::create_share),
        )
        .route("/tts/jobs/{job_id}:playback", post(api::narration_playback))
        .route("/shares/{token}", get(api::get_share))
        .route("/templates", get(api::list_templates))
        .route("/templates/{id}", get(api::get_template))
        .layer(ServiceBuilder::new().layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        )));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .nest("/v1", api_routes)
        .route("/v1/ws", get(ws::ws_handler))
        .route("/health", get(health::health_check))
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state.clone());

    (app, state)
}

/// Expire a room: terminal transition, one `room.expired` event, narration
/// purge, then removal after a short grace so subscribers can hang up with a
/// defined close code. Safe to call on an already-expired room (no-op).
pub async fn expire_room(state: &AppState, handle: &Arc<Mutex<Room>>, reason: &'static str) {
    let (room_id, code) = {
        let mut room = handle.lock().await;
        if room.expire().is_err() {
            return; // already terminal; the event fired exactly once
        }
        state.bus.publish(&room.id, RoomEvent::Expired {});
        tracing::info!(room_code = %room.code, reason, "Room expired");
        (room.id.clone(), room.code.clone())
    };
    state.narration.purge_room(&code);

    let state = state.clone();
    let grace = Duration::from_secs(state.config.rooms.removal_grace_secs);
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        state.store.remove(&room_id, &code).await;
        state.bus.remove(&room_id);
    });
}

/// Background task that expires rooms idle past the TTL.
pub fn spawn_room_sweeper(state: AppState) {
    let interval_secs = state.config.rooms.sweep_interval_secs;
    let ttl = state.config.room_ttl();
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Room sweeper shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let mut swept = 0usize;
                    for handle in state.store.all().await {
                        let expirable = {
                            let room = handle.lock().await;
                            store::is_expirable(&room, ttl)
                        };
                        if expirable {
                            expire_room(&state, &handle, "expired").await;
                            swept += 1;
                        }
                    }
                    if swept > 0 {
                        tracing::info!(swept, "Swept idle rooms");
                    }
                }
            }
        }
    });
}

/// Background task that trims stale rate limiter windows.
pub fn spawn_rate_limit_cleanup(state: AppState) {
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Rate limiter cleanup shutting down");
                    break;
                }
                _ = interval.tick() => {
                    state.limiter.cleanup();
                }
            }
        }
    });
}
