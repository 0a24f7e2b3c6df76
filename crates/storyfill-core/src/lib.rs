pub mod error;
pub mod ident;
pub mod moderation;
pub mod prompt;
pub mod render;
pub mod room;
pub mod snapshot;
pub mod template;
pub mod time;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use crate::ident::{new_id, new_token};
    use crate::room::Room;

    /// Create a room with a fixed code and `n` players, the first being the host.
    pub fn make_room(n: usize) -> Room {
        let mut room = Room::new(
            new_id("room"),
            "BQJKXW".to_string(),
            new_token(),
            Some("t-forest-mishap".to_string()),
        );
        for i in 0..n {
            room.add_player(Some(format!("Player{}", i + 1)), 12)
                .expect("room under capacity");
        }
        room
    }
}
