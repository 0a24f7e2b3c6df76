use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use storyfill_core::ident::new_token;
use storyfill_core::time::timestamp_in;

/// Read-only public artifact for one revealed round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareArtifact {
    pub token: String,
    pub room_code: String,
    pub round_id: String,
    pub rendered_story: String,
    /// Wire label (epoch seconds) returned to clients.
    pub expires_at: String,
    deadline: Instant,
}

impl ShareArtifact {
    fn expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

/// Lookup failure kinds, mapped to 404/410 by the handler.
#[derive(Debug, PartialEq, Eq)]
pub enum ShareLookupError {
    NotFound,
    Expired,
}

struct ShareInner {
    by_token: HashMap<String, ShareArtifact>,
    by_round: HashMap<(String, String), String>,
}

/// In-memory share-token store with lazy TTL purge.
pub struct ShareStore {
    inner: Mutex<ShareInner>,
    ttl: Duration,
}

impl ShareStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(ShareInner {
                by_token: HashMap::new(),
                by_round: HashMap::new(),
            }),
            ttl,
        }
    }

    /// Create a share for a round, or return the existing one. Idempotent
    /// per (room, round) until the artifact expires, after which a fresh
    /// token is issued.
    pub fn create_or_get(
        &self,
        room_code: &str,
        round_id: &str,
        rendered_story: &str,
    ) -> ShareArtifact {
        let now = Instant::now();
        let key = (room_code.to_string(), round_id.to_string());
        let mut inner = self.inner.lock().expect("share lock poisoned");

        if let Some(token) = inner.by_round.get(&key).cloned() {
            match inner.by_token.get(&token) {
                Some(existing) if !existing.expired(now) => return existing.clone(),
                _ => {
                    inner.by_token.remove(&token);
                    inner.by_round.remove(&key);
                },
            }
        }

        let artifact = ShareArtifact {
            token: new_token(),
            room_code: room_code.to_string(),
            round_id: round_id.to_string(),
            rendered_story: rendered_story.to_string(),
            expires_at: timestamp_in(self.ttl),
            deadline: now + self.ttl,
        };
        inner
            .by_round
            .insert(key, artifact.token.clone());
        inner
            .by_token
            .insert(artifact.token.clone(), artifact.clone());
        artifact
    }

    /// Resolve a token, purging it lazily if past its TTL.
    pub fn get(&self, token: &str) -> Result<ShareArtifact, ShareLookupError> {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("share lock poisoned");
        match inner.by_token.get(token) {
            None => Err(ShareLookupError::NotFound),
            Some(artifact) if artifact.expired(now) => {
                let key = (artifact.room_code.clone(), artifact.round_id.clone());
                inner.by_token.remove(token);
                inner.by_round.remove(&key);
                Err(ShareLookupError::Expired)
            },
            Some(artifact) => Ok(artifact.clone()),
        }
    }

    /// Tokens still within their TTL, for the health endpoint.
    pub fn active_count(&self) -> usize {
        let now = Instant::now();
        let inner = self.inner.lock().expect("share lock poisoned");
        inner.by_token.values().filter(|a| !a.expired(now)).count()
    }

    /// Drop the room's handle on a round's share (replay rotation). Tokens
    /// already handed out keep resolving until their own TTL.
    pub fn detach_round(&self, room_code: &str, round_id: &str) {
        let key = (room_code.to_string(), round_id.to_string());
        let mut inner = self.inner.lock().expect("share lock poisoned");
        inner.by_round.remove(&key);
    }
}
