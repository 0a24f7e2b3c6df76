use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;

use storyfill_core::snapshot::RoomEvent;

/// Process-wide pub/sub with one logical channel per room.
///
/// Publishing never blocks: each channel is a bounded `broadcast` ring, and a
/// subscriber that falls behind observes `Lagged` on its receiver — the hub
/// treats that as backpressure overflow and drops the socket. Events for one
/// room are published under that room's lock, so subscribers see them in
/// `state_version` order; across rooms there is no ordering.
pub struct EventBus {
    channels: Mutex<HashMap<String, broadcast::Sender<RoomEvent>>>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Publish an event to a room's channel. A room with no subscribers is
    /// not an error; the event is simply dropped.
    pub fn publish(&self, room_id: &str, event: RoomEvent) {
        let mut channels = self.channels.lock().expect("bus lock poisoned");
        let sender = channels
            .entry(room_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        let _ = sender.send(event);
    }

    /// Subscribe to a room's channel, creating it if needed.
    pub fn subscribe(&self, room_id: &str) -> broadcast::Receiver<RoomEvent> {
        let mut channels = self.channels.lock().expect("bus lock poisoned");
        channels
            .entry(room_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Drop a room's channel once the room is purged. Live receivers observe
    /// `Closed` and hang up.
    pub fn remove(&self, room_id: &str) {
        let mut channels = self.channels.lock().expect("bus lock poisoned");
        channels.remove(room_id);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.lock().expect("bus lock poisoned").len()
    }
}
