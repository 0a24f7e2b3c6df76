//! The HTTP command surface. Each handler authenticates, resolves the room,
//! takes the room's exclusive lock, validates against the state machine,
//! mutates, publishes a snapshot, and responds. Rate limiting happens before
//! the lock is acquired.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use storyfill_core::moderation::moderation_block_reason;
use storyfill_core::render::render_story;
use storyfill_core::room::{Player, Room, RoomState};
use storyfill_core::snapshot::{PromptSummary, RoomEvent, RoomProgress, RoomSnapshot};
use storyfill_core::template::{
    TemplateDefinition, TemplateSummary, slot_limits, template_definition, template_summaries,
};

use crate::error::ApiError;
use crate::narration::NarrationJob;
use crate::share::ShareLookupError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateRoomRequest {
    pub template_id: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateRoomResponse {
    pub room_code: String,
    pub room_id: String,
    pub round_id: String,
    pub player_id: String,
    pub player_token: String,
    pub player_display_name: String,
    pub host_token: String,
    pub ws_url: String,
    pub template_id: Option<String>,
    pub room_snapshot: RoomSnapshot,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct JoinRoomRequest {
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JoinRoomResponse {
    pub player_id: String,
    pub player_token: String,
    pub player_display_name: String,
    pub room_snapshot: RoomSnapshot,
}

#[derive(Debug, Deserialize)]
pub struct LeaveRoomRequest {
    pub player_id: String,
    #[serde(default)]
    pub player_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HostActionRequest {
    pub host_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetTemplateRequest {
    #[serde(default)]
    pub host_token: Option<String>,
    pub template_id: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct PromptListQuery {
    pub player_id: String,
    #[serde(default)]
    pub player_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PromptListResponse {
    pub prompts: Vec<PromptSummary>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitPromptRequest {
    pub player_id: String,
    #[serde(default)]
    pub player_token: Option<String>,
    pub value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ReconnectRequest {
    pub player_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReconnectResponse {
    pub player_id: String,
    pub player_token: String,
    pub player_display_name: String,
    pub room_snapshot: RoomSnapshot,
    pub prompts: Vec<PromptSummary>,
}

#[derive(Debug, Serialize)]
pub struct RevealResponse {
    pub room_id: String,
    pub round_id: String,
    pub rendered_story: String,
}

#[derive(Debug, Serialize)]
pub struct ReplayResponse {
    pub room_id: String,
    pub round_id: String,
}

#[derive(Debug, Serialize)]
pub struct StoryResponse {
    pub room_id: String,
    pub round_id: String,
    pub rendered_story: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NarrationRequest {
    pub host_token: Option<String>,
    pub model: Option<String>,
    pub voice_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NarrationStatusResponse {
    pub job_id: Option<String>,
    pub status: String,
    pub playback_state: Option<String>,
    pub audio_url: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub from_cache: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct PlaybackRequest {
    pub action: String,
}

#[derive(Debug, Serialize)]
pub struct ShareResponse {
    pub share_token: String,
    pub share_url: String,
    pub expires_at: String,
}

#[derive(Debug, Serialize)]
pub struct ShareArtifactResponse {
    pub share_token: String,
    pub room_code: String,
    pub round_id: String,
    pub rendered_story: String,
    pub expires_at: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SnapshotQuery {
    pub host_token: Option<String>,
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Token from the body (legacy) or the Authorization header.
fn token_from(provided: Option<String>, headers: &HeaderMap) -> Result<String, ApiError> {
    provided
        .filter(|t| !t.is_empty())
        .or_else(|| bearer_token(headers))
        .ok_or_else(|| ApiError::Auth("Auth token required.".to_string()))
}

async fn room_or_404(state: &AppState, code: &str) -> Result<Arc<Mutex<Room>>, ApiError> {
    state
        .store
        .get_by_code(code)
        .await
        .ok_or_else(|| ApiError::NotFound("Room not found.".to_string()))
}

/// Expired rooms (terminal state, or idle past TTL awaiting the sweeper)
/// answer every command with 410.
fn ensure_live(room: &Room, ttl: Duration) -> Result<(), ApiError> {
    if room.state == RoomState::Expired || room.is_idle_expired(ttl) {
        return Err(ApiError::Expired("Room expired.".to_string()));
    }
    Ok(())
}

fn require_host(room: &Room, token: &str) -> Result<(), ApiError> {
    if room.is_host_token(token) {
        Ok(())
    } else {
        Err(ApiError::Auth("Host token required.".to_string()))
    }
}

fn require_player<'a>(
    room: &'a Room,
    player_id: &str,
    token: &str,
) -> Result<&'a Player, ApiError> {
    let player = room
        .player(player_id)
        .ok_or_else(|| ApiError::NotFound("Player not found.".to_string()))?;
    if storyfill_core::ident::constant_time_token_eq(&player.token, token) {
        Ok(player)
    } else {
        Err(ApiError::Auth("Player token required.".to_string()))
    }
}

fn require_round(room: &Room, round_id: &str) -> Result<(), ApiError> {
    if room.round_id == round_id {
        Ok(())
    } else {
        Err(ApiError::NotFound("Room or round not found.".to_string()))
    }
}

fn require_template(room: &Room) -> Result<&'static TemplateDefinition, ApiError> {
    let id = room
        .template_id
        .as_deref()
        .ok_or_else(|| ApiError::Validation("Pick a story template before starting.".to_string()))?;
    template_definition(id)
        .ok_or_else(|| ApiError::Internal(format!("Room references unknown template {id}")))
}

/// Published under the room lock, so per-room event order matches
/// `state_version` order.
fn publish_snapshot(state: &AppState, room: &Room) {
    state.bus.publish(
        &room.id,
        RoomEvent::Snapshot {
            room_snapshot: room.snapshot(),
            progress: room.progress(),
        },
    );
}

fn rate_limit(
    state: &AppState,
    bucket: String,
    (limit, window_secs): (u32, u64),
    message: &str,
) -> Result<(), ApiError> {
    let result = state
        .limiter
        .check(&bucket, limit, Duration::from_secs(window_secs));
    if result.allowed {
        Ok(())
    } else {
        Err(ApiError::RateLimited {
            detail: message.to_string(),
            retry_after: result.retry_after,
        })
    }
}

/// Reject a prompt value before it touches the round.
fn prompt_rejection_reason(value: &str, slot_type: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Some("Please add a response before submitting.".to_string());
    }
    if trimmed.chars().any(|c| !(' '..='~').contains(&c)) {
        return Some(
            "That response includes characters we can't read yet. Use letters, numbers, \
             and common punctuation only, and remove emoji or control characters."
                .to_string(),
        );
    }
    let (min_len, max_len) = slot_limits(slot_type);
    if trimmed.len() < min_len {
        return Some("That response is too short. Please add a little more detail.".to_string());
    }
    if trimmed.len() > max_len {
        return Some(format!(
            "That response is too long. Please keep it under {max_len} characters."
        ));
    }
    moderation_block_reason(trimmed)
}

fn narration_response(job: Option<NarrationJob>) -> NarrationStatusResponse {
    match job {
        None => NarrationStatusResponse {
            job_id: None,
            status: "idle".to_string(),
            playback_state: None,
            audio_url: None,
            error_code: None,
            error_message: None,
            from_cache: None,
        },
        Some(job) => {
            let status = if job.from_cache && job.status == crate::narration::NarrationStatus::Ready
            {
                "from_cache".to_string()
            } else {
                job.status.as_str().to_string()
            };
            NarrationStatusResponse {
                job_id: Some(job.id),
                status,
                playback_state: Some(job.playback_state.as_str().to_string()),
                audio_url: job.audio_url,
                error_code: job.error_code,
                error_message: job.error_message,
                from_cache: Some(job.from_cache),
            }
        },
    }
}

// ---------------------------------------------------------------------------
// Room lifecycle
// ---------------------------------------------------------------------------

/// POST /v1/rooms
pub async fn create_room(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(payload): Json<CreateRoomRequest>,
) -> Result<Json<CreateRoomResponse>, ApiError> {
    rate_limit(
        &state,
        format!("ip:{}:create_room", addr.ip()),
        state.config.limits.create_room,
        "Too many rooms created. Please wait a moment and try again.",
    )?;

    if let Some(ref template_id) = payload.template_id
        && template_definition(template_id).is_none()
    {
        return Err(ApiError::Validation("Unknown template.".to_string()));
    }

    let handle = state
        .store
        .create(payload.template_id.clone())
        .await
        .map_err(|_| ApiError::Internal("Could not allocate a room code".to_string()))?;

    let mut room = handle.lock().await;
    let host = room
        .add_player(payload.display_name.clone(), state.config.rooms.max_players)
        .map_err(ApiError::from)?;
    let (player_id, player_token, player_display_name) =
        (host.id.clone(), host.token.clone(), host.display_name.clone());
    publish_snapshot(&state, &room);

    tracing::info!(room_code = %room.code, "Room created");

    Ok(Json(CreateRoomResponse {
        room_code: room.code.clone(),
        room_id: room.id.clone(),
        round_id: room.round_id.clone(),
        player_id,
        player_token,
        player_display_name,
        host_token: room.host_token.clone(),
        ws_url: "/v1/ws".to_string(),
        template_id: room.template_id.clone(),
        room_snapshot: room.snapshot(),
    }))
}

/// POST /v1/rooms/{code}/join
pub async fn join_room(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(code): Path<String>,
    Json(payload): Json<JoinRoomRequest>,
) -> Result<Json<JoinRoomResponse>, ApiError> {
    rate_limit(
        &state,
        format!("ip:{}:join_room", addr.ip()),
        state.config.limits.join_room,
        "Too many join attempts. Please wait a moment and try again.",
    )?;

    let handle = room_or_404(&state, &code).await?;
    let mut room = handle.lock().await;
    ensure_live(&room, state.config.room_ttl())?;
    if room.state != RoomState::LobbyOpen {
        return Err(ApiError::StateConflict("Game already started.".to_string()));
    }
    if room.locked {
        return Err(ApiError::Locked("Room locked.".to_string()));
    }
    let player = room
        .add_player(payload.display_name.clone(), state.config.rooms.max_players)
        .map_err(ApiError::from)?;
    let (player_id, player_token, player_display_name) = (
        player.id.clone(),
        player.token.clone(),
        player.display_name.clone(),
    );
    let response = JoinRoomResponse {
        player_id,
        player_token,
        player_display_name,
        room_snapshot: room.snapshot(),
    };
    publish_snapshot(&state, &room);
    tracing::info!(room_code = %room.code, player_id = %response.player_id, "Player joined");
    Ok(Json(response))
}

/// POST /v1/rooms/{code}/leave
pub async fn leave_room(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<LeaveRoomRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let handle = room_or_404(&state, &code).await?;
    let mut room = handle.lock().await;
    ensure_live(&room, state.config.room_ttl())?;
    let token = token_from(payload.player_token.clone(), &headers)?;
    require_player(&room, &payload.player_id, &token)?;
    room.remove_player(&payload.player_id).map_err(ApiError::from)?;
    publish_snapshot(&state, &room);
    Ok(Json(StatusResponse { status: "ok" }))
}

/// POST /v1/rooms/{code}/start
pub async fn start_room(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<HostActionRequest>,
) -> Result<Json<RoomSnapshot>, ApiError> {
    let handle = room_or_404(&state, &code).await?;
    let mut room = handle.lock().await;
    ensure_live(&room, state.config.room_ttl())?;
    let token = token_from(payload.host_token.clone(), &headers)?;
    require_host(&room, &token)?;
    if room.state != RoomState::LobbyOpen {
        return Err(ApiError::StateConflict("Game already started.".to_string()));
    }
    let template = require_template(&room)?;
    room.start_round(
        template,
        state.config.rooms.prompts_per_player,
        state.config.rooms.min_players_to_start,
    )
    .map_err(ApiError::from)?;
    publish_snapshot(&state, &room);
    tracing::info!(room_code = %room.code, round_id = %room.round_id, "Round started");
    Ok(Json(room.snapshot()))
}

/// POST /v1/rooms/{code}/end
pub async fn end_room(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<HostActionRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let handle = room_or_404(&state, &code).await?;
    {
        let room = handle.lock().await;
        ensure_live(&room, state.config.room_ttl())?;
        let token = token_from(payload.host_token.clone(), &headers)?;
        require_host(&room, &token)?;
    }
    crate::expire_room(&state, &handle, "ended").await;
    Ok(Json(StatusResponse { status: "ok" }))
}

/// POST /v1/rooms/{code}:lock and :unlock
pub async fn lock_room(
    state: State<AppState>,
    path: Path<String>,
    headers: HeaderMap,
    payload: Json<HostActionRequest>,
) -> Result<Json<RoomSnapshot>, ApiError> {
    set_locked(state, path, headers, payload, true).await
}

pub async fn unlock_room(
    state: State<AppState>,
    path: Path<String>,
    headers: HeaderMap,
    payload: Json<HostActionRequest>,
) -> Result<Json<RoomSnapshot>, ApiError> {
    set_locked(state, path, headers, payload, false).await
}

async fn set_locked(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<HostActionRequest>,
    locked: bool,
) -> Result<Json<RoomSnapshot>, ApiError> {
    let handle = room_or_404(&state, &code).await?;
    let mut room = handle.lock().await;
    ensure_live(&room, state.config.room_ttl())?;
    let token = token_from(payload.host_token.clone(), &headers)?;
    require_host(&room, &token)?;
    if room.state != RoomState::LobbyOpen {
        return Err(ApiError::StateConflict(
            "Room can only be locked in the lobby.".to_string(),
        ));
    }
    if room.locked != locked {
        room.locked = locked;
        room.record_mutation();
        publish_snapshot(&state, &room);
    }
    Ok(Json(room.snapshot()))
}

/// POST /v1/rooms/{code}:template
pub async fn set_template(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<SetTemplateRequest>,
) -> Result<Json<RoomSnapshot>, ApiError> {
    let handle = room_or_404(&state, &code).await?;
    let mut room = handle.lock().await;
    ensure_live(&room, state.config.room_ttl())?;
    let token = token_from(payload.host_token.clone(), &headers)?;
    require_host(&room, &token)?;
    if room.state != RoomState::LobbyOpen {
        return Err(ApiError::StateConflict("Game already started.".to_string()));
    }
    if template_definition(&payload.template_id).is_none() {
        return Err(ApiError::Validation("Unknown template.".to_string()));
    }
    if room.template_id.as_deref() != Some(payload.template_id.as_str()) {
        room.template_id = Some(payload.template_id.clone());
        room.record_mutation();
        publish_snapshot(&state, &room);
    }
    Ok(Json(room.snapshot()))
}

/// GET /v1/rooms/{code}:snapshot
pub async fn room_snapshot(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
    Query(query): Query<SnapshotQuery>,
) -> Result<Json<RoomSnapshot>, ApiError> {
    let handle = room_or_404(&state, &code).await?;
    let mut room = handle.lock().await;
    ensure_live(&room, state.config.room_ttl())?;
    let token = token_from(query.host_token.clone(), &headers)?;
    require_host(&room, &token)?;
    room.touch();
    Ok(Json(room.snapshot()))
}

/// POST /v1/rooms/{code}/players/{player_id}:kick
pub async fn kick_player(
    State(state): State<AppState>,
    Path((code, player_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(payload): Json<HostActionRequest>,
) -> Result<Json<RoomSnapshot>, ApiError> {
    let handle = room_or_404(&state, &code).await?;
    let mut room = handle.lock().await;
    ensure_live(&room, state.config.room_ttl())?;
    let token = token_from(payload.host_token.clone(), &headers)?;
    require_host(&room, &token)?;
    room.remove_player(&player_id).map_err(ApiError::from)?;
    publish_snapshot(&state, &room);
    tracing::info!(room_code = %room.code, player_id = %player_id, "Player kicked");
    Ok(Json(room.snapshot()))
}

/// POST /v1/rooms/{code}/players/{player_id}:reconnect
pub async fn reconnect_player(
    State(state): State<AppState>,
    Path((code, player_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(payload): Json<ReconnectRequest>,
) -> Result<Json<ReconnectResponse>, ApiError> {
    let handle = room_or_404(&state, &code).await?;
    let mut room = handle.lock().await;
    ensure_live(&room, state.config.room_ttl())?;
    let token = token_from(payload.player_token.clone(), &headers)?;
    let player = require_player(&room, &player_id, &token)?;
    let (player_token, player_display_name) = (player.token.clone(), player.display_name.clone());
    room.mark_connected(&player_id);
    publish_snapshot(&state, &room);
    let prompts = room
        .prompts_for(&player_id)
        .into_iter()
        .map(PromptSummary::from)
        .collect();
    Ok(Json(ReconnectResponse {
        player_id,
        player_token,
        player_display_name,
        room_snapshot: room.snapshot(),
        prompts,
    }))
}

// ---------------------------------------------------------------------------
// Round queries & submission
// ---------------------------------------------------------------------------

/// GET /v1/rooms/{code}/rounds/{round_id}/prompts
pub async fn list_prompts(
    State(state): State<AppState>,
    Path((code, round_id)): Path<(String, String)>,
    headers: HeaderMap,
    Query(query): Query<PromptListQuery>,
) -> Result<Json<PromptListResponse>, ApiError> {
    let handle = room_or_404(&state, &code).await?;
    let mut room = handle.lock().await;
    ensure_live(&room, state.config.room_ttl())?;
    require_round(&room, &round_id)?;
    let token = token_from(query.player_token.clone(), &headers)?;
    require_player(&room, &query.player_id, &token)?;
    if room.state != RoomState::Prompting {
        return Err(ApiError::StateConflict(
            "Prompts are only dealt while the round is collecting.".to_string(),
        ));
    }
    room.touch();
    if room.reassign_overdue(state.config.disconnect_grace()) {
        publish_snapshot(&state, &room);
    }
    let prompts = room
        .prompts_for(&query.player_id)
        .into_iter()
        .map(PromptSummary::from)
        .collect();
    Ok(Json(PromptListResponse { prompts }))
}

/// POST /v1/rooms/{code}/rounds/{round_id}/prompts/{prompt_id}:submit
pub async fn submit_prompt(
    State(state): State<AppState>,
    Path((code, round_id, prompt_id)): Path<(String, String, String)>,
    headers: HeaderMap,
    Json(payload): Json<SubmitPromptRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    // Both windows are counted before the room lock is touched.
    let bucket = format!("room:{}:player:{}:submit_prompt", code, payload.player_id);
    rate_limit(
        &state,
        format!("{bucket}:burst"),
        state.config.limits.submit_prompt_burst,
        "You're submitting too quickly. Please wait a moment and try again.",
    )?;
    rate_limit(
        &state,
        bucket,
        state.config.limits.submit_prompt_sustained,
        "You're submitting too quickly. Please wait a moment and try again.",
    )?;

    let handle = room_or_404(&state, &code).await?;
    let mut room = handle.lock().await;
    ensure_live(&room, state.config.room_ttl())?;
    require_round(&room, &round_id)?;
    let token = token_from(payload.player_token.clone(), &headers)?;
    require_player(&room, &payload.player_id, &token)?;
    if room.state != RoomState::Prompting {
        return Err(ApiError::StateConflict(
            "Prompt collection is closed.".to_string(),
        ));
    }
    room.reassign_overdue(state.config.disconnect_grace());

    let slot_type = room
        .prompts
        .iter()
        .find(|p| p.id == prompt_id && p.assigned_player_id.as_deref() == Some(&payload.player_id))
        .map(|p| p.slot_type.clone())
        .ok_or_else(|| ApiError::NotFound("Prompt not found for player.".to_string()))?;
    if let Some(reason) = prompt_rejection_reason(&payload.value, &slot_type) {
        return Err(ApiError::Validation(reason));
    }

    room.submit_value(&payload.player_id, &prompt_id, &payload.value)
        .map_err(ApiError::from)?;
    publish_snapshot(&state, &room);
    Ok(Json(StatusResponse { status: "ok" }))
}

/// GET /v1/rooms/{code}/rounds/{round_id}/progress
pub async fn round_progress(
    State(state): State<AppState>,
    Path((code, round_id)): Path<(String, String)>,
) -> Result<Json<RoomProgress>, ApiError> {
    let handle = room_or_404(&state, &code).await?;
    let mut room = handle.lock().await;
    ensure_live(&room, state.config.room_ttl())?;
    require_round(&room, &round_id)?;
    room.touch();
    if room.reassign_overdue(state.config.disconnect_grace()) {
        publish_snapshot(&state, &room);
    }
    Ok(Json(room.progress()))
}

/// POST /v1/rooms/{code}/reveal
pub async fn reveal_room(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<HostActionRequest>,
) -> Result<Json<RevealResponse>, ApiError> {
    let handle = room_or_404(&state, &code).await?;
    let mut room = handle.lock().await;
    ensure_live(&room, state.config.room_ttl())?;
    let token = token_from(payload.host_token.clone(), &headers)?;
    require_host(&room, &token)?;
    match room.state {
        RoomState::AwaitingReveal => {},
        RoomState::Prompting => {
            return Err(ApiError::StateConflict(
                "All prompts must be submitted before reveal.".to_string(),
            ));
        },
        _ => {
            return Err(ApiError::StateConflict(
                "Reveal is only available once everyone has submitted.".to_string(),
            ));
        },
    }

    let template = require_template(&room)?;
    let story = render_story(template, &room.values_by_slot());
    if moderation_block_reason(&story).is_some() {
        return Err(ApiError::Validation(
            "We couldn't reveal this story because it includes language we can't accept. \
             Please replay and try different responses."
                .to_string(),
        ));
    }
    room.set_revealed(story.clone()).map_err(ApiError::from)?;
    publish_snapshot(&state, &room);
    tracing::info!(room_code = %room.code, round_id = %room.round_id, "Story revealed");
    Ok(Json(RevealResponse {
        room_id: room.id.clone(),
        round_id: room.round_id.clone(),
        rendered_story: story,
    }))
}

/// GET /v1/rooms/{code}/rounds/{round_id}/story
pub async fn round_story(
    State(state): State<AppState>,
    Path((code, round_id)): Path<(String, String)>,
) -> Result<Json<StoryResponse>, ApiError> {
    let handle = room_or_404(&state, &code).await?;
    let mut room = handle.lock().await;
    ensure_live(&room, state.config.room_ttl())?;
    require_round(&room, &round_id)?;
    let story = room
        .revealed_story
        .clone()
        .ok_or_else(|| ApiError::StateConflict("Story not revealed yet.".to_string()))?;
    room.touch();
    Ok(Json(StoryResponse {
        room_id: room.id.clone(),
        round_id: room.round_id.clone(),
        rendered_story: story,
    }))
}

/// POST /v1/rooms/{code}/replay
pub async fn replay_room(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<HostActionRequest>,
) -> Result<Json<ReplayResponse>, ApiError> {
    let handle = room_or_404(&state, &code).await?;
    let mut room = handle.lock().await;
    ensure_live(&room, state.config.room_ttl())?;
    let token = token_from(payload.host_token.clone(), &headers)?;
    require_host(&room, &token)?;
    if room.state != RoomState::Revealed {
        return Err(ApiError::StateConflict(
            "Replay is only available after the reveal.".to_string(),
        ));
    }
    let template = require_template(&room)?;
    let previous_round = room
        .rotate_round(template, state.config.rooms.prompts_per_player)
        .map_err(ApiError::from)?;
    state.narration.clear_round(&room.code, &previous_round);
    state.shares.detach_round(&room.code, &previous_round);
    publish_snapshot(&state, &room);
    tracing::info!(room_code = %room.code, round_id = %room.round_id, "Round replayed");
    Ok(Json(ReplayResponse {
        room_id: room.id.clone(),
        round_id: room.round_id.clone(),
    }))
}

// ---------------------------------------------------------------------------
// Narration
// ---------------------------------------------------------------------------

/// POST /v1/rooms/{code}/rounds/{round_id}:tts
pub async fn request_narration(
    State(state): State<AppState>,
    Path((code, round_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(payload): Json<NarrationRequest>,
) -> Result<Json<NarrationStatusResponse>, ApiError> {
    rate_limit(
        &state,
        format!("room:{code}:request_narration"),
        state.config.limits.request_narration,
        "Narration requests are rate limited. Please wait a moment and try again.",
    )?;

    let handle = room_or_404(&state, &code).await?;
    let mut room = handle.lock().await;
    ensure_live(&room, state.config.room_ttl())?;
    require_round(&room, &round_id)?;
    let token = token_from(payload.host_token.clone(), &headers)?;
    require_host(&room, &token)?;
    let story = room
        .revealed_story
        .clone()
        .ok_or_else(|| ApiError::StateConflict("Story not revealed yet.".to_string()))?;
    room.touch();
    // The provider call happens on a worker task, never under the room lock;
    // only the handle is written back here.
    let job = state.narration.request(
        &room.code,
        &room.round_id,
        &story,
        payload.model.clone(),
        payload.voice_id.clone(),
    );
    room.narration_job_id = Some(job.id.clone());
    Ok(Json(narration_response(Some(job))))
}

/// GET /v1/rooms/{code}/rounds/{round_id}/tts
pub async fn narration_status(
    State(state): State<AppState>,
    Path((code, round_id)): Path<(String, String)>,
) -> Result<Json<NarrationStatusResponse>, ApiError> {
    let handle = room_or_404(&state, &code).await?;
    let mut room = handle.lock().await;
    ensure_live(&room, state.config.room_ttl())?;
    require_round(&room, &round_id)?;
    room.touch();
    let job = state.narration.room_job(&room.code, &room.round_id);
    Ok(Json(narration_response(job)))
}

/// POST /v1/tts/jobs/{job_id}:playback
pub async fn narration_playback(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(payload): Json<PlaybackRequest>,
) -> Result<Json<NarrationStatusResponse>, ApiError> {
    state
        .narration
        .job(&job_id)
        .ok_or_else(|| ApiError::NotFound("Narration job not found.".to_string()))?;
    let job = state
        .narration
        .update_playback(&job_id, &payload.action)
        .ok_or_else(|| ApiError::Validation("Unknown playback action.".to_string()))?;
    Ok(Json(narration_response(Some(job))))
}

// ---------------------------------------------------------------------------
// Shares
// ---------------------------------------------------------------------------

/// POST /v1/rooms/{code}/rounds/{round_id}:share
pub async fn create_share(
    State(state): State<AppState>,
    Path((code, round_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(payload): Json<HostActionRequest>,
) -> Result<Json<ShareResponse>, ApiError> {
    let handle = room_or_404(&state, &code).await?;
    let mut room = handle.lock().await;
    ensure_live(&room, state.config.room_ttl())?;
    require_round(&room, &round_id)?;
    let token = token_from(payload.host_token.clone(), &headers)?;
    require_host(&room, &token)?;
    let story = room
        .revealed_story
        .clone()
        .ok_or_else(|| ApiError::StateConflict("Story not revealed yet.".to_string()))?;
    room.touch();
    let artifact = state.shares.create_or_get(&room.code, &room.round_id, &story);
    let share_url = format!(
        "{}/s/{}",
        state.config.web_base_url.trim_end_matches('/'),
        artifact.token
    );
    Ok(Json(ShareResponse {
        share_token: artifact.token,
        share_url,
        expires_at: artifact.expires_at,
    }))
}

/// GET /v1/shares/{token}
pub async fn get_share(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<ShareArtifactResponse>, ApiError> {
    let artifact = state.shares.get(&token).map_err(|e| match e {
        ShareLookupError::NotFound => ApiError::NotFound("Share link not found.".to_string()),
        ShareLookupError::Expired => ApiError::Expired("Share link expired.".to_string()),
    })?;
    Ok(Json(ShareArtifactResponse {
        share_token: artifact.token,
        room_code: artifact.room_code,
        round_id: artifact.round_id,
        rendered_story: artifact.rendered_story,
        expires_at: artifact.expires_at,
    }))
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// GET /v1/templates
pub async fn list_templates() -> Json<Vec<TemplateSummary>> {
    Json(template_summaries())
}

/// GET /v1/templates/{id}
pub async fn get_template(
    Path(id): Path<String>,
) -> Result<Json<&'static TemplateDefinition>, ApiError> {
    template_definition(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Template not found.".to_string()))
}
