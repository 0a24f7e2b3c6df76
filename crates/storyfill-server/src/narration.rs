//! Facade over the external narration (TTS) pipeline.
//!
//! The pipeline itself is a collaborator behind [`NarrationProvider`]; this
//! module owns the part the room cares about: at-most-one active job per
//! (room, round), a story-fingerprint cache so identical replays skip the
//! provider, and advisory playback state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use storyfill_core::ident::new_id;
use storyfill_core::moderation::moderation_block_reason;
use storyfill_core::time::timestamp_now;

/// Bumped when synthesis output would change for identical inputs,
/// invalidating the fingerprint cache.
const FINGERPRINT_VERSION: &str = "v2";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NarrationStatus {
    Queued,
    Generating,
    Ready,
    Blocked,
    Error,
}

impl NarrationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Generating => "generating",
            Self::Ready => "ready",
            Self::Blocked => "blocked",
            Self::Error => "error",
        }
    }

    /// Active jobs absorb repeat requests; only `error` is retryable.
    fn is_active(self) -> bool {
        !matches!(self, Self::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
    Stopped,
    Complete,
}

impl PlaybackState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Complete => "complete",
        }
    }

    fn from_action(action: &str) -> Option<Self> {
        match action {
            "play" | "resume" => Some(Self::Playing),
            "pause" => Some(Self::Paused),
            "stop" => Some(Self::Stopped),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }
}

/// The narration handle a round holds.
#[derive(Debug, Clone)]
pub struct NarrationJob {
    pub id: String,
    pub room_code: String,
    pub round_id: String,
    pub status: NarrationStatus,
    pub model: String,
    pub voice_id: String,
    pub cache_key: String,
    pub audio_url: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub from_cache: bool,
    pub playback_state: PlaybackState,
    pub created_at: String,
    pub updated_at: String,
}

/// What the provider hands back on success.
#[derive(Debug, Clone)]
pub struct NarrationAudio {
    pub audio_url: String,
}

/// Kinds of provider failure. `Declined` becomes a terminal `blocked` job;
/// `Failed` is a retryable `error`.
#[derive(Debug)]
pub enum ProviderError {
    Declined(String),
    Failed(String),
}

/// The external synthesis collaborator.
pub trait NarrationProvider: Send + Sync + 'static {
    fn synthesize(
        &self,
        story: String,
        model: String,
        voice_id: String,
    ) -> BoxFuture<'static, Result<NarrationAudio, ProviderError>>;
}

/// HTTP-backed provider speaking the TTS sidecar's speech endpoint.
pub struct HttpNarrationProvider {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SpeechResponse {
    audio_url: String,
}

impl HttpNarrationProvider {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

impl NarrationProvider for HttpNarrationProvider {
    fn synthesize(
        &self,
        story: String,
        model: String,
        voice_id: String,
    ) -> BoxFuture<'static, Result<NarrationAudio, ProviderError>> {
        let client = self.client.clone();
        let url = format!("{}/v1/audio/speech", self.base_url.trim_end_matches('/'));
        Box::pin(async move {
            let response = client
                .post(&url)
                .json(&serde_json::json!({
                    "model": model,
                    "input": story,
                    "voice": voice_id,
                    "response_format": "mp3",
                }))
                .send()
                .await
                .map_err(|e| ProviderError::Failed(e.to_string()))?;

            let status = response.status();
            if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
                let body = response.text().await.unwrap_or_default();
                return Err(ProviderError::Declined(body));
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ProviderError::Failed(format!("{status}: {body}")));
            }
            let speech: SpeechResponse = response
                .json()
                .await
                .map_err(|e| ProviderError::Failed(e.to_string()))?;
            Ok(NarrationAudio {
                audio_url: speech.audio_url,
            })
        })
    }
}

/// Provider that resolves immediately with a fixed URL. Used by tests and
/// local development runs without a TTS sidecar.
pub struct StaticNarrationProvider {
    audio_url: String,
}

impl StaticNarrationProvider {
    pub fn new(audio_url: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            audio_url: audio_url.into(),
        })
    }
}

impl NarrationProvider for StaticNarrationProvider {
    fn synthesize(
        &self,
        _story: String,
        _model: String,
        _voice_id: String,
    ) -> BoxFuture<'static, Result<NarrationAudio, ProviderError>> {
        let audio_url = self.audio_url.clone();
        Box::pin(async move { Ok(NarrationAudio { audio_url }) })
    }
}

struct Inner {
    jobs: HashMap<String, NarrationJob>,
    by_round: HashMap<(String, String), String>,
    /// story fingerprint -> audio url
    cache: HashMap<String, String>,
}

/// Aggregate job counts, bucketed the way operators ask about them: still
/// working, done, refused, or broken.
#[derive(Debug, Clone, Default)]
pub struct NarrationMetrics {
    pub jobs_active: usize,
    pub jobs_ready: usize,
    pub jobs_blocked: usize,
    pub jobs_failed: usize,
    pub cached_stories: usize,
}

/// Process-wide narration job registry.
pub struct NarrationService {
    inner: Mutex<Inner>,
    provider: Arc<dyn NarrationProvider>,
    default_model: String,
    default_voice: String,
}

impl NarrationService {
    pub fn new(
        provider: Arc<dyn NarrationProvider>,
        default_model: String,
        default_voice: String,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                jobs: HashMap::new(),
                by_round: HashMap::new(),
                cache: HashMap::new(),
            }),
            provider,
            default_model,
            default_voice,
        }
    }

    fn fingerprint(story: &str, model: &str, voice_id: &str) -> String {
        let payload = format!("{story}|{model}|{voice_id}|{FINGERPRINT_VERSION}");
        hex::encode(Sha256::digest(payload.as_bytes()))
    }

    /// Request narration for a round. Repeat requests for a round with an
    /// active job return the existing handle; identical stories hit the
    /// fingerprint cache and come back `ready` with `from_cache` set.
    pub fn request(
        self: &Arc<Self>,
        room_code: &str,
        round_id: &str,
        story: &str,
        model: Option<String>,
        voice_id: Option<String>,
    ) -> NarrationJob {
        let model = model.unwrap_or_else(|| self.default_model.clone());
        let voice_id = voice_id.unwrap_or_else(|| self.default_voice.clone());
        let cache_key = Self::fingerprint(story, &model, &voice_id);
        let round_key = (room_code.to_string(), round_id.to_string());

        let mut inner = self.inner.lock().expect("narration lock poisoned");
        if let Some(job_id) = inner.by_round.get(&round_key)
            && let Some(existing) = inner.jobs.get(job_id)
            && existing.status.is_active()
        {
            return existing.clone();
        }

        let now = timestamp_now();
        let mut job = NarrationJob {
            id: new_id("tts"),
            room_code: room_code.to_string(),
            round_id: round_id.to_string(),
            status: NarrationStatus::Queued,
            model,
            voice_id,
            cache_key: cache_key.clone(),
            audio_url: None,
            error_code: None,
            error_message: None,
            from_cache: false,
            playback_state: PlaybackState::Idle,
            created_at: now.clone(),
            updated_at: now,
        };

        if let Some(reason) = moderation_block_reason(story) {
            job.status = NarrationStatus::Blocked;
            job.error_code = Some("safety_blocked".to_string());
            job.error_message = Some(format!("{reason} Narration is disabled for this round."));
        } else if let Some(audio_url) = inner.cache.get(&cache_key).cloned() {
            job.status = NarrationStatus::Ready;
            job.audio_url = Some(audio_url);
            job.from_cache = true;
        }

        inner.by_round.insert(round_key, job.id.clone());
        inner.jobs.insert(job.id.clone(), job.clone());
        let needs_synthesis = job.status == NarrationStatus::Queued;
        drop(inner);

        if needs_synthesis {
            self.spawn_worker(job.clone(), story.to_string());
        }
        job
    }

    fn spawn_worker(self: &Arc<Self>, job: NarrationJob, story: String) {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            service.update_job(&job.id, |j| j.status = NarrationStatus::Generating);
            // The provider call runs outside every lock.
            let result = service
                .provider
                .synthesize(story, job.model.clone(), job.voice_id.clone())
                .await;
            match result {
                Ok(audio) => {
                    let mut inner = service.inner.lock().expect("narration lock poisoned");
                    inner
                        .cache
                        .insert(job.cache_key.clone(), audio.audio_url.clone());
                    if let Some(j) = inner.jobs.get_mut(&job.id) {
                        j.status = NarrationStatus::Ready;
                        j.audio_url = Some(audio.audio_url);
                        j.updated_at = timestamp_now();
                    }
                },
                Err(ProviderError::Declined(message)) => {
                    tracing::warn!(job_id = %job.id, "Narration declined by provider");
                    service.update_job(&job.id, |j| {
                        j.status = NarrationStatus::Blocked;
                        j.error_code = Some("provider_declined".to_string());
                        j.error_message = Some(message.clone());
                    });
                },
                Err(ProviderError::Failed(message)) => {
                    tracing::warn!(job_id = %job.id, error = %message, "Narration failed");
                    service.update_job(&job.id, |j| {
                        j.status = NarrationStatus::Error;
                        j.error_code = Some("generation_failed".to_string());
                        j.error_message = Some(message.clone());
                    });
                },
            }
        });
    }

    fn update_job(&self, job_id: &str, apply: impl FnOnce(&mut NarrationJob)) {
        let mut inner = self.inner.lock().expect("narration lock poisoned");
        if let Some(job) = inner.jobs.get_mut(job_id) {
            apply(job);
            job.updated_at = timestamp_now();
        }
    }

    pub fn room_job(&self, room_code: &str, round_id: &str) -> Option<NarrationJob> {
        let inner = self.inner.lock().expect("narration lock poisoned");
        let job_id = inner
            .by_round
            .get(&(room_code.to_string(), round_id.to_string()))?;
        inner.jobs.get(job_id).cloned()
    }

    pub fn job(&self, job_id: &str) -> Option<NarrationJob> {
        self.inner
            .lock()
            .expect("narration lock poisoned")
            .jobs
            .get(job_id)
            .cloned()
    }

    /// Advisory playback update. Returns the updated job, or None for an
    /// unknown job or action.
    pub fn update_playback(&self, job_id: &str, action: &str) -> Option<NarrationJob> {
        let state = PlaybackState::from_action(action)?;
        let mut inner = self.inner.lock().expect("narration lock poisoned");
        let job = inner.jobs.get_mut(job_id)?;
        job.playback_state = state;
        job.updated_at = timestamp_now();
        Some(job.clone())
    }

    /// Drop a round's handle (replay rotation). The fingerprint cache is
    /// kept: identical future stories still come back `from_cache`.
    pub fn clear_round(&self, room_code: &str, round_id: &str) {
        let mut inner = self.inner.lock().expect("narration lock poisoned");
        if let Some(job_id) = inner
            .by_round
            .remove(&(room_code.to_string(), round_id.to_string()))
        {
            inner.jobs.remove(&job_id);
        }
    }

    /// Job counters for the health endpoint.
    pub fn metrics(&self) -> NarrationMetrics {
        let inner = self.inner.lock().expect("narration lock poisoned");
        let mut metrics = NarrationMetrics {
            cached_stories: inner.cache.len(),
            ..NarrationMetrics::default()
        };
        for job in inner.jobs.values() {
            match job.status {
                NarrationStatus::Queued | NarrationStatus::Generating => {
                    metrics.jobs_active += 1;
                },
                NarrationStatus::Ready => metrics.jobs_ready += 1,
                NarrationStatus::Blocked => metrics.jobs_blocked += 1,
                NarrationStatus::Error => metrics.jobs_failed += 1,
            }
        }
        metrics
    }

    /// Forget everything about a room (room purge).
    pub fn purge_room(&self, room_code: &str) {
        let mut inner = self.inner.lock().expect("narration lock poisoned");
        let job_ids: Vec<String> = inner
            .jobs
            .values()
            .filter(|j| j.room_code == room_code)
            .map(|j| j.id.clone())
            .collect();
        for id in job_ids {
            inner.jobs.remove(&id);
        }
        inner.by_round.retain(|(code, _), _| code != room_code);
    }
}
