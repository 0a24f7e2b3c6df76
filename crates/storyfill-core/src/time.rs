use std::time::Duration;

/// Returns a simple ISO-8601-ish timestamp (Unix epoch seconds with Z suffix).
pub fn timestamp_now() -> String {
    format!("{}Z", epoch_secs())
}

/// Timestamp `offset` in the future, same format as [`timestamp_now`].
pub fn timestamp_in(offset: Duration) -> String {
    format!("{}Z", epoch_secs() + offset.as_secs())
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
