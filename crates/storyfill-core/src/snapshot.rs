//! Wire types: the canonical room snapshot envelope clients consume, and the
//! events fanned out over the per-room channel.

use serde::{Deserialize, Serialize};

use crate::prompt::Prompt;
use crate::room::RoomState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub id: String,
    pub display_name: String,
    pub is_host: bool,
    pub connected: bool,
}

/// Full room state as seen by clients. Clients key every update off
/// `state_version` and may treat any snapshot as a complete replacement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub room_id: String,
    pub room_code: String,
    pub round_id: String,
    pub round_index: u32,
    pub state_version: u64,
    pub room_state: RoomState,
    pub locked: bool,
    pub template_id: Option<String>,
    pub players: Vec<PlayerSnapshot>,
}

/// Round progress counters attached to every snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomProgress {
    pub assigned_total: usize,
    pub submitted_total: usize,
    pub connected_total: usize,
    pub disconnected_total: usize,
    pub ready_to_reveal: bool,
}

/// A prompt as shown to its assigned player. Values stay server-side until
/// the reveal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptSummary {
    pub id: String,
    pub slot_id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub slot_type: String,
    pub submitted: bool,
}

impl From<&Prompt> for PromptSummary {
    fn from(p: &Prompt) -> Self {
        Self {
            id: p.id.clone(),
            slot_id: p.slot_id.clone(),
            label: p.label.clone(),
            slot_type: p.slot_type.clone(),
            submitted: p.submitted,
        }
    }
}

/// Events published on a room's channel. `room.snapshot` is the canonical
/// message; anything finer-grained must be derivable from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum RoomEvent {
    #[serde(rename = "room.snapshot")]
    Snapshot {
        room_snapshot: RoomSnapshot,
        progress: RoomProgress,
    },
    #[serde(rename = "room.expired")]
    Expired {},
}

impl RoomEvent {
    /// Version carried by snapshot events, used for coalescing stale ones.
    pub fn state_version(&self) -> Option<u64> {
        match self {
            RoomEvent::Snapshot { room_snapshot, .. } => Some(room_snapshot.state_version),
            RoomEvent::Expired {} => None,
        }
    }
}
