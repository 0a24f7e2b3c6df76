use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// Bytes of entropy in a secret token (128 bits).
const TOKEN_BYTES: usize = 16;

/// New opaque identifier: `<prefix>_<32 hex chars>` (uuid v4, 122 bits).
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}

/// New secret token: 32 hex chars drawn from the OS RNG.
pub fn new_token() -> String {
    let mut buf = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Compare two secrets without leaking their content through timing.
/// Both sides are hashed first, so the byte-wise comparison runs over
/// fixed-length digests unrelated to the secret prefix.
pub fn constant_time_token_eq(a: &str, b: &str) -> bool {
    let da = Sha256::digest(a.as_bytes());
    let db = Sha256::digest(b.as_bytes());
    da.iter().zip(db.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
