use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Outcome of a limiter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    /// Seconds until the window resets, set when the check was denied.
    pub retry_after: Option<u64>,
}

struct Window {
    count: u32,
    reset_at: Instant,
}

/// Fixed-window counters keyed by bucket string, e.g.
/// `ip:203.0.113.9:create_room` or `room:BQJKXW:request_narration`.
///
/// State is process-local; the bucket-string keying means a shared counter
/// store could back this later without changing any call site.
pub struct FixedWindowLimiter {
    buckets: Mutex<HashMap<String, Window>>,
}

impl Default for FixedWindowLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl FixedWindowLimiter {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Count a hit against `bucket`. Allows up to `limit` hits per `window`.
    pub fn check(&self, bucket: &str, limit: u32, window: Duration) -> RateLimitResult {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect("limiter lock poisoned");
        let entry = buckets.entry(bucket.to_string()).or_insert(Window {
            count: 0,
            reset_at: now + window,
        });
        if now >= entry.reset_at {
            entry.count = 0;
            entry.reset_at = now + window;
        }
        entry.count += 1;
        if entry.count > limit {
            let retry_after = entry.reset_at.saturating_duration_since(now).as_secs().max(1);
            RateLimitResult {
                allowed: false,
                retry_after: Some(retry_after),
            }
        } else {
            RateLimitResult {
                allowed: true,
                retry_after: None,
            }
        }
    }

    /// Drop windows that have already reset; counters are short-lived.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect("limiter lock poisoned");
        buckets.retain(|_, w| now < w.reset_at);
    }

    #[cfg(test)]
    fn bucket_count(&self) -> usize {
        self.buckets.lock().unwrap().len()
    }
}
