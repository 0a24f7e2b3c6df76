use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};

use storyfill_core::ident::{new_id, new_token};
use storyfill_core::room::{Room, RoomState, generate_room_code};

/// Attempts at drawing an unclaimed room code before giving up.
const CODE_ATTEMPTS: usize = 8;

/// The code space is effectively exhausted (or the RNG is very unlucky).
#[derive(Debug)]
pub struct CodeSpaceExhausted;

/// Owns the authoritative room records.
///
/// Each room sits behind its own `tokio::sync::Mutex`; the maps themselves
/// are only write-locked for insert/remove. The whole command path for a
/// room runs under that room's lock, and no room operation ever waits on a
/// different room.
pub struct RoomStore {
    rooms: RwLock<HashMap<String, Arc<Mutex<Room>>>>,
    codes: RwLock<HashMap<String, String>>,
}

impl Default for RoomStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomStore {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            codes: RwLock::new(HashMap::new()),
        }
    }

    /// Create a room with a fresh unique code, id, and host secret.
    pub async fn create(
        &self,
        template_id: Option<String>,
    ) -> Result<Arc<Mutex<Room>>, CodeSpaceExhausted> {
        let mut codes = self.codes.write().await;
        let mut rooms = self.rooms.write().await;
        for _ in 0..CODE_ATTEMPTS {
            let code = generate_room_code();
            if codes.contains_key(&code) {
                continue;
            }
            let room = Room::new(
                new_id("room"),
                code.clone(),
                new_token(),
                template_id.clone(),
            );
            let room_id = room.id.clone();
            let handle = Arc::new(Mutex::new(room));
            codes.insert(code, room_id.clone());
            rooms.insert(room_id, Arc::clone(&handle));
            return Ok(handle);
        }
        Err(CodeSpaceExhausted)
    }

    /// Look up by room code (case-insensitive).
    pub async fn get_by_code(&self, code: &str) -> Option<Arc<Mutex<Room>>> {
        let normalized = code.trim().to_ascii_uppercase();
        let room_id = self.codes.read().await.get(&normalized).cloned()?;
        self.get_by_id(&room_id).await
    }

    pub async fn get_by_id(&self, room_id: &str) -> Option<Arc<Mutex<Room>>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    /// Atomic removal including the code index entry.
    pub async fn remove(&self, room_id: &str, code: &str) {
        let mut codes = self.codes.write().await;
        let mut rooms = self.rooms.write().await;
        rooms.remove(room_id);
        codes.remove(code);
    }

    /// All live room handles, for the TTL sweeper.
    pub async fn all(&self) -> Vec<Arc<Mutex<Room>>> {
        self.rooms.read().await.values().cloned().collect()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Aggregate counts for the health endpoint. Rooms whose lock is busy
    /// are counted in `rooms` but skipped in the breakdown rather than
    /// waited on.
    pub async fn stats(&self) -> RoomStats {
        let rooms = self.rooms.read().await;
        let mut stats = RoomStats {
            rooms: rooms.len(),
            ..RoomStats::default()
        };
        for handle in rooms.values() {
            let Ok(room) = handle.try_lock() else {
                continue;
            };
            stats.players += room.players.len();
            match room.state {
                RoomState::LobbyOpen => stats.lobby_open += 1,
                RoomState::Prompting => stats.prompting += 1,
                RoomState::AwaitingReveal => stats.awaiting_reveal += 1,
                RoomState::Revealed => stats.revealed += 1,
                RoomState::Expired => stats.expiring += 1,
            }
        }
        stats
    }
}

/// Store-wide counters, rooms broken down by lifecycle state. `expiring`
/// rooms are tombstones waiting out the sweeper's removal grace.
#[derive(Debug, Clone, Default)]
pub struct RoomStats {
    pub rooms: usize,
    pub players: usize,
    pub lobby_open: usize,
    pub prompting: usize,
    pub awaiting_reveal: usize,
    pub revealed: usize,
    pub expiring: usize,
}

/// True when the room has been idle past `ttl` and is not yet expired.
pub fn is_expirable(room: &Room, ttl: Duration) -> bool {
    room.state != storyfill_core::room::RoomState::Expired && room.is_idle_expired(ttl)
}
