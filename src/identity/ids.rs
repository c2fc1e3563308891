use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const SUFFIX_LEN: usize = 9;

/// `user_<millis>_<9 base36 chars>`.
#[must_use]
pub fn new_user_id() -> String {
    prefixed_id("user")
}

/// `session_<millis>_<9 base36 chars>`; one per conversation.
#[must_use]
pub fn new_session_id() -> String {
    prefixed_id("session")
}

fn prefixed_id(prefix: &str) -> String {
    let mut id = String::with_capacity(prefix.len() + 15 + SUFFIX_LEN);
    id.push_str(prefix);
    id.push('_');
    id.push_str(&unix_millis().to_string());
    id.push('_');
    id.extend((0..SUFFIX_LEN).map(|_| char::from(BASE36[fastrand::usize(..BASE36.len())])));
    id
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis())
}

/// Message ids: a random 128-bit seed xor'd with a per-client sequence.
#[derive(Debug)]
pub struct MessageIdGenerator {
    seed: u128,
    counter: AtomicU64,
}

impl MessageIdGenerator {
    #[must_use]
    pub fn new() -> Self {
        let seed_hi = u128::from(fastrand::u64(..));
        let seed_lo = u128::from(fastrand::u64(..));
        Self {
            seed: (seed_hi << 64) | seed_lo,
            counter: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        uuid::Uuid::from_u128(self.seed ^ u128::from(seq))
            .hyphenated()
            .to_string()
    }
}

impl Default for MessageIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
