use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::config::ServerConfig;
use crate::narration::{HttpNarrationProvider, NarrationProvider, NarrationService};
use crate::rate_limit::FixedWindowLimiter;
use crate::share::ShareStore;
use crate::store::RoomStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RoomStore>,
    pub bus: Arc<EventBus>,
    pub narration: Arc<NarrationService>,
    pub shares: Arc<ShareStore>,
    pub limiter: Arc<FixedWindowLimiter>,
    pub config: Arc<ServerConfig>,
    pub ws_connection_count: Arc<AtomicUsize>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let provider = Arc::new(HttpNarrationProvider::new(
            config.narration.service_url.clone(),
        ));
        Self::with_provider(config, provider)
    }

    /// Wire a custom narration collaborator (tests swap in a stub).
    pub fn with_provider(config: ServerConfig, provider: Arc<dyn NarrationProvider>) -> Self {
        let narration = NarrationService::new(
            provider,
            config.narration.model.clone(),
            config.narration.voice_id.clone(),
        );
        let shares = ShareStore::new(config.share_ttl());
        Self {
            store: Arc::new(RoomStore::new()),
            bus: Arc::new(EventBus::new(config.sockets.event_buffer)),
            narration: Arc::new(narration),
            shares: Arc::new(shares),
            limiter: Arc::new(FixedWindowLimiter::new()),
            config: Arc::new(config),
            ws_connection_count: Arc::new(AtomicUsize::new(0)),
            shutdown: CancellationToken::new(),
        }
    }
}

/// RAII guard that decrements a counter on drop.
pub struct ConnectionGuard {
    counter: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    pub fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self { counter }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}
