//! The authoritative room model: players, lifecycle states, and the
//! transition rules every command is validated against.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::RoomError;
use crate::ident::{constant_time_token_eq, new_id, new_token};
use crate::prompt::{self, Prompt};
use crate::snapshot::{PlayerSnapshot, RoomProgress, RoomSnapshot};
use crate::template::TemplateDefinition;

/// Room-code alphabet. `I`, `O`, `0`, `1` are excluded on purpose: codes get
/// dictated over voice.
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub const ROOM_CODE_LEN: usize = 6;

pub const MAX_DISPLAY_NAME_LENGTH: usize = 30;

/// Generate a random 6-character room code.
pub fn generate_room_code() -> String {
    let mut rng = rand::thread_rng();
    (0..ROOM_CODE_LEN)
        .map(|_| ROOM_CODE_ALPHABET[rng.gen_range(0..ROOM_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Validates that a code is 6 characters from the unambiguous alphabet.
pub fn is_valid_room_code(code: &str) -> bool {
    code.len() == ROOM_CODE_LEN
        && code.bytes().all(|b| ROOM_CODE_ALPHABET.contains(&b))
}

/// Lifecycle state of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomState {
    LobbyOpen,
    Prompting,
    AwaitingReveal,
    Revealed,
    Expired,
}

/// The allowed transition table. Everything may expire; nothing leaves
/// Expired.
pub fn can_transition(from: RoomState, to: RoomState) -> bool {
    use RoomState::*;
    matches!(
        (from, to),
        (LobbyOpen, Prompting)
            | (Prompting, AwaitingReveal)
            | (AwaitingReveal, Revealed)
            | (Revealed, Prompting)
            | (LobbyOpen, Expired)
            | (Prompting, Expired)
            | (AwaitingReveal, Expired)
            | (Revealed, Expired)
    )
}

/// A participant. The host is an ordinary player with `is_host` set; the
/// privileged host token lives on the room, not here.
#[derive(Debug, Clone)]
pub struct Player {
    pub id: String,
    pub token: String,
    pub display_name: String,
    pub is_host: bool,
    pub connected: bool,
    /// Open sockets for this player (two tabs are two sockets). Presence
    /// flips to disconnected only when the last one closes.
    pub sockets: u32,
    pub disconnected_at: Option<Instant>,
    pub joined_at: Instant,
}

/// Outcome of a submit: fresh acceptance or an idempotent repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    AlreadySubmitted,
}

#[derive(Debug)]
pub struct Room {
    pub id: String,
    pub code: String,
    pub state: RoomState,
    pub locked: bool,
    pub template_id: Option<String>,
    pub round_index: u32,
    pub round_id: String,
    pub state_version: u64,
    pub host_token: String,
    pub host_player_id: Option<String>,
    pub players: Vec<Player>,
    pub prompts: Vec<Prompt>,
    pub revealed_story: Option<String>,
    pub narration_job_id: Option<String>,
    pub created_at: Instant,
    pub last_activity: Instant,
}

impl Room {
    pub fn new(id: String, code: String, host_token: String, template_id: Option<String>) -> Self {
        let now = Instant::now();
        Self {
            id,
            code,
            state: RoomState::LobbyOpen,
            locked: false,
            template_id,
            round_index: 0,
            round_id: new_id("round"),
            state_version: 1,
            host_token,
            host_player_id: None,
            players: Vec::new(),
            prompts: Vec::new(),
            revealed_story: None,
            narration_job_id: None,
            created_at: now,
            last_activity: now,
        }
    }

    /// Refresh the activity clock without a state change (read paths).
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Every state-affecting mutation funnels through here: bump the version
    /// and refresh activity. Snapshots observed by clients are therefore
    /// strictly ordered.
    pub fn record_mutation(&mut self) {
        self.state_version += 1;
        self.touch();
    }

    pub fn transition(&mut self, to: RoomState) -> Result<(), RoomError> {
        if !can_transition(self.state, to) {
            return Err(RoomError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    pub fn is_idle_expired(&self, ttl: Duration) -> bool {
        self.last_activity.elapsed() > ttl
    }

    // -- players ------------------------------------------------------------

    pub fn player(&self, player_id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == player_id)
    }

    pub fn player_mut(&mut self, player_id: &str) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == player_id)
    }

    /// Authenticate a player by secret token.
    pub fn player_by_token(&self, token: &str) -> Option<&Player> {
        self.players
            .iter()
            .find(|p| constant_time_token_eq(&p.token, token))
    }

    /// Authenticate the host secret.
    pub fn is_host_token(&self, token: &str) -> bool {
        constant_time_token_eq(&self.host_token, token)
    }

    /// Add a player. The first player in becomes the host.
    pub fn add_player(
        &mut self,
        display_name: Option<String>,
        max_players: usize,
    ) -> Result<&Player, RoomError> {
        if self.players.len() >= max_players {
            return Err(RoomError::RoomFull { max: max_players });
        }
        let name = sanitize_display_name(display_name.as_deref())
            .unwrap_or_else(|| format!("Player {}", self.players.len() + 1));
        let is_host = self.players.is_empty();
        let player = Player {
            id: new_id("player"),
            token: new_token(),
            display_name: name,
            is_host,
            connected: true,
            sockets: 0,
            disconnected_at: None,
            joined_at: Instant::now(),
        };
        if is_host {
            self.host_player_id = Some(player.id.clone());
        }
        self.players.push(player);
        self.record_mutation();
        Ok(self.players.last().expect("just pushed"))
    }

    /// Remove a player (leave or kick). Their unsubmitted prompts are redealt
    /// immediately; if the host leaves, the flag migrates to the earliest
    /// remaining joiner.
    pub fn remove_player(&mut self, player_id: &str) -> Result<(), RoomError> {
        let idx = self
            .players
            .iter()
            .position(|p| p.id == player_id)
            .ok_or(RoomError::PlayerNotFound)?;
        let removed = self.players.remove(idx);

        if !self.prompts.is_empty() {
            prompt::redistribute_from_removed(
                &mut self.prompts,
                &removed.id,
                &self.players,
                Instant::now(),
            );
        }

        if removed.is_host
            && let Some(next) = self.players.first()
        {
            self.host_player_id = Some(next.id.clone());
            let next_id = next.id.clone();
            for p in &mut self.players {
                p.is_host = p.id == next_id;
            }
        }

        self.record_mutation();
        Ok(())
    }

    /// A socket opened for this player.
    pub fn mark_socket_connected(&mut self, player_id: &str) {
        if let Some(p) = self.player_mut(player_id) {
            p.sockets += 1;
            p.connected = true;
            p.disconnected_at = None;
            self.record_mutation();
        }
    }

    /// A socket closed. Presence flips only when the last socket is gone.
    pub fn mark_socket_disconnected(&mut self, player_id: &str) {
        if let Some(p) = self.player_mut(player_id) {
            p.sockets = p.sockets.saturating_sub(1);
            if p.sockets == 0 {
                p.connected = false;
                p.disconnected_at = Some(Instant::now());
            }
            self.record_mutation();
        }
    }

    /// HTTP reconnect: presence without a socket (the client will open one).
    pub fn mark_connected(&mut self, player_id: &str) {
        if let Some(p) = self.player_mut(player_id) {
            p.connected = true;
            p.disconnected_at = None;
            self.record_mutation();
        }
    }

    // -- rounds -------------------------------------------------------------

    /// Host command: deal prompts and open the round.
    pub fn start_round(
        &mut self,
        template: &TemplateDefinition,
        prompts_per_player: usize,
        min_players: usize,
    ) -> Result<(), RoomError> {
        if self.template_id.is_none() {
            return Err(RoomError::TemplateRequired);
        }
        if self.players.len() < min_players {
            return Err(RoomError::NotEnoughPlayers { min: min_players });
        }
        self.transition(RoomState::Prompting)?;
        self.prompts = prompt::deal(template, &self.players, prompts_per_player, self.round_index);
        self.record_mutation();
        Ok(())
    }

    /// Player command: fill in one blank. Accepts an identical repeat
    /// silently; a different value for a submitted prompt is a conflict.
    pub fn submit_value(
        &mut self,
        player_id: &str,
        prompt_id: &str,
        value: &str,
    ) -> Result<SubmitOutcome, RoomError> {
        let trimmed = value.trim().to_string();
        let prompt = self
            .prompts
            .iter_mut()
            .find(|p| p.id == prompt_id && p.assigned_player_id.as_deref() == Some(player_id))
            .ok_or(RoomError::PromptNotFound)?;

        if prompt.submitted {
            return if prompt.value.as_deref() == Some(trimmed.as_str()) {
                self.touch();
                Ok(SubmitOutcome::AlreadySubmitted)
            } else {
                Err(RoomError::SubmissionConflict)
            };
        }

        prompt.value = Some(trimmed);
        prompt.submitted = true;
        prompt.submitted_at = Some(Instant::now());

        if self.ready_to_reveal() {
            self.transition(RoomState::AwaitingReveal)?;
        }
        self.record_mutation();
        Ok(SubmitOutcome::Accepted)
    }

    /// Move prompts off players whose disconnect grace has elapsed. Only
    /// meaningful while prompting.
    pub fn reassign_overdue(&mut self, grace: Duration) -> bool {
        if self.state != RoomState::Prompting {
            return false;
        }
        let changed = prompt::reassign_from_disconnected(
            &mut self.prompts,
            &self.players,
            grace,
            Instant::now(),
        );
        if changed {
            self.record_mutation();
        }
        changed
    }

    pub fn prompts_for(&self, player_id: &str) -> Vec<&Prompt> {
        self.prompts
            .iter()
            .filter(|p| p.assigned_player_id.as_deref() == Some(player_id))
            .collect()
    }

    pub fn ready_to_reveal(&self) -> bool {
        !self.prompts.is_empty() && self.prompts.iter().all(|p| p.submitted)
    }

    /// First submitted value per slot id, for the renderer.
    pub fn values_by_slot(&self) -> HashMap<String, String> {
        let mut values = HashMap::new();
        for prompt in &self.prompts {
            if let Some(ref value) = prompt.value
                && !value.trim().is_empty()
            {
                values
                    .entry(prompt.slot_id.clone())
                    .or_insert_with(|| value.trim().to_string());
            }
        }
        values
    }

    /// Host command: publish the rendered story.
    pub fn set_revealed(&mut self, story: String) -> Result<(), RoomError> {
        if !self.ready_to_reveal() {
            return Err(RoomError::NotReadyToReveal);
        }
        self.transition(RoomState::Revealed)?;
        self.revealed_story = Some(story);
        self.record_mutation();
        Ok(())
    }

    /// Host command: rotate into a fresh round with new prompts. Narration
    /// and share handles for the old round are cleared by the caller.
    pub fn rotate_round(
        &mut self,
        template: &TemplateDefinition,
        prompts_per_player: usize,
    ) -> Result<String, RoomError> {
        self.transition(RoomState::Prompting)?;
        let previous_round = std::mem::replace(&mut self.round_id, new_id("round"));
        self.round_index += 1;
        self.revealed_story = None;
        self.narration_job_id = None;
        self.prompts = prompt::deal(template, &self.players, prompts_per_player, self.round_index);
        self.record_mutation();
        Ok(previous_round)
    }

    /// Terminal transition; fires at most once.
    pub fn expire(&mut self) -> Result<(), RoomError> {
        self.transition(RoomState::Expired)?;
        self.record_mutation();
        Ok(())
    }

    // -- views --------------------------------------------------------------

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.id.clone(),
            room_code: self.code.clone(),
            round_id: self.round_id.clone(),
            round_index: self.round_index,
            state_version: self.state_version,
            room_state: self.state,
            locked: self.locked,
            template_id: self.template_id.clone(),
            players: self
                .players
                .iter()
                .map(|p| PlayerSnapshot {
                    id: p.id.clone(),
                    display_name: p.display_name.clone(),
                    is_host: p.is_host,
                    connected: p.connected,
                })
                .collect(),
        }
    }

    pub fn progress(&self) -> RoomProgress {
        let assigned_total = self.prompts.len();
        let submitted_total = self.prompts.iter().filter(|p| p.submitted).count();
        RoomProgress {
            assigned_total,
            submitted_total,
            connected_total: self.players.iter().filter(|p| p.connected).count(),
            disconnected_total: self.players.iter().filter(|p| !p.connected).count(),
            ready_to_reveal: assigned_total > 0 && submitted_total >= assigned_total,
        }
    }
}

/// Trim, keep printable ASCII only, cap the length. Empty results fall back
/// to the caller's default.
fn sanitize_display_name(name: Option<&str>) -> Option<String> {
    let cleaned: String = name?
        .chars()
        .filter(|c| (' '..='~').contains(c))
        .collect::<String>()
        .trim()
        .chars()
        .take(MAX_DISPLAY_NAME_LENGTH)
        .collect();
    if cleaned.is_empty() { None } else { Some(cleaned) }
}
