use std::time::Duration;

use serde::Deserialize;

/// Top-level server configuration, loaded from `storyfill.toml` with
/// environment variable overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Base URL the frontend is served from; share links point here.
    pub web_base_url: String,
    pub rooms: RoomSettings,
    pub sockets: SocketSettings,
    pub share: ShareSettings,
    pub narration: NarrationSettings,
    pub limits: RateLimitSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            web_base_url: "http://localhost:5173".to_string(),
            rooms: RoomSettings::default(),
            sockets: SocketSettings::default(),
            share: ShareSettings::default(),
            narration: NarrationSettings::default(),
            limits: RateLimitSettings::default(),
        }
    }
}

/// Room lifecycle knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoomSettings {
    pub ttl_secs: u64,
    pub disconnect_grace_secs: u64,
    pub prompts_per_player: usize,
    pub min_players_to_start: usize,
    pub max_players: usize,
    pub sweep_interval_secs: u64,
    /// How long an Expired room stays visible before the sweeper purges it,
    /// so subscribers can disconnect with a defined close code.
    pub removal_grace_secs: u64,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            disconnect_grace_secs: 30,
            prompts_per_player: 3,
            min_players_to_start: 2,
            max_players: 12,
            sweep_interval_secs: 30,
            removal_grace_secs: 5,
        }
    }
}

/// WebSocket hub knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SocketSettings {
    pub idle_timeout_secs: u64,
    /// Bounded per-subscriber event buffer; overflow drops the socket.
    pub event_buffer: usize,
}

impl Default for SocketSettings {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 60,
            event_buffer: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShareSettings {
    pub ttl_secs: u64,
}

impl Default for ShareSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 7 * 24 * 3600,
        }
    }
}

/// Narration collaborator settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NarrationSettings {
    pub service_url: String,
    pub model: String,
    pub voice_id: String,
}

impl Default for NarrationSettings {
    fn default() -> Self {
        Self {
            service_url: "http://localhost:8880".to_string(),
            model: "kokoro".to_string(),
            voice_id: "af_heart".to_string(),
        }
    }
}

/// Fixed-window limits as (count, window seconds) pairs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub create_room: (u32, u64),
    pub join_room: (u32, u64),
    pub submit_prompt_burst: (u32, u64),
    pub submit_prompt_sustained: (u32, u64),
    pub request_narration: (u32, u64),
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            create_room: (10, 60),
            join_room: (30, 60),
            submit_prompt_burst: (1, 1),
            submit_prompt_sustained: (60, 60),
            request_narration: (3, 600),
        }
    }
}

impl ServerConfig {
    pub fn room_ttl(&self) -> Duration {
        Duration::from_secs(self.rooms.ttl_secs)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_secs(self.rooms.disconnect_grace_secs)
    }

    pub fn share_ttl(&self) -> Duration {
        Duration::from_secs(self.share.ttl_secs)
    }

    pub fn socket_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.sockets.idle_timeout_secs)
    }

    /// Validate configuration; exits on unusable values.
    pub fn validate(&self) {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            tracing::error!(addr = %self.listen_addr, "listen_addr is not a valid socket address");
            std::process::exit(1);
        }
        if self.rooms.min_players_to_start < 1 || self.rooms.max_players < self.rooms.min_players_to_start {
            tracing::error!(
                min = self.rooms.min_players_to_start,
                max = self.rooms.max_players,
                "Player bounds are inconsistent"
            );
            std::process::exit(1);
        }
        if self.rooms.prompts_per_player == 0 {
            tracing::error!("prompts_per_player must be > 0");
            std::process::exit(1);
        }
    }

    /// Load config from `storyfill.toml` if present, then apply env overrides.
    pub fn load() -> Self {
        let mut config = match std::fs::read_to_string("storyfill.toml") {
            Ok(content) => match toml::from_str::<ServerConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!("Loaded configuration from storyfill.toml");
                    cfg
                },
                Err(e) => {
                    tracing::warn!("Failed to parse storyfill.toml: {e}, using defaults");
                    ServerConfig::default()
                },
            },
            Err(_) => {
                tracing::info!("No storyfill.toml found, using defaults");
                ServerConfig::default()
            },
        };

        if let Ok(addr) = std::env::var("STORYFILL_LISTEN_ADDR")
            && !addr.is_empty()
        {
            config.listen_addr = addr;
        }
        if let Ok(url) = std::env::var("STORYFILL_WEB_BASE_URL")
            && !url.is_empty()
        {
            config.web_base_url = url;
        }
        if let Ok(url) = std::env::var("STORYFILL_TTS_URL")
            && !url.is_empty()
        {
            config.narration.service_url = url;
        }
        env_u64("ROOM_TTL", &mut config.rooms.ttl_secs);
        env_u64("DISCONNECT_GRACE", &mut config.rooms.disconnect_grace_secs);
        env_usize("PROMPTS_PER_PLAYER", &mut config.rooms.prompts_per_player);
        env_usize("MIN_PLAYERS_TO_START", &mut config.rooms.min_players_to_start);
        env_usize("MAX_PLAYERS_PER_ROOM", &mut config.rooms.max_players);
        env_u64("SHARE_TTL", &mut config.share.ttl_secs);
        env_u64("SOCKET_IDLE_TIMEOUT", &mut config.sockets.idle_timeout_secs);

        config
    }
}

fn env_u64(name: &str, slot: &mut u64) {
    if let Ok(raw) = std::env::var(name)
        && let Ok(value) = raw.parse::<u64>()
    {
        *slot = value;
    }
}

fn env_usize(name: &str, slot: &mut usize) {
    if let Ok(raw) = std::env::var(name)
        && let Ok(value) = raw.parse::<usize>()
    {
        *slot = value;
    }
}
