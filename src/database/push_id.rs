//! Chronologically ordered record identifiers
//!
//! A push ID is 20 characters: 8 encode the creation time in milliseconds,
//! 12 are random. IDs created in the same millisecond reuse the random part
//! incremented by one, so lexicographic order always matches creation order.

use rand::Rng;
use std::sync::Mutex;

/// Alphabet in ascending ASCII order
const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

/// Length of a generated ID
pub const PUSH_ID_LEN: usize = 20;

/// Generates push IDs; one generator per keyspace keeps them monotonic
#[derive(Debug, Default)]
pub struct PushIdGenerator {
    state: Mutex<PushIdState>,
}

#[derive(Debug, Default)]
struct PushIdState {
    last_time: i64,
    last_random: [u8; 12],
}

impl PushIdGenerator {
    /// Create a generator
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate an ID for the current time
    pub fn next_id(&self) -> String {
        self.next_id_at(chrono::Utc::now().timestamp_millis())
    }

    /// Generate an ID for `now` (milliseconds since the Unix epoch)
    pub fn next_id_at(&self, now: i64) -> String {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if now == state.last_time {
            increment(&mut state.last_random);
        } else {
            let mut rng = rand::thread_rng();
            for slot in state.last_random.iter_mut() {
                *slot = rng.gen_range(0..64);
            }
            state.last_time = now;
        }

        let mut id = Vec::with_capacity(PUSH_ID_LEN);
        let mut time = now;
        let mut time_chars = [0u8; 8];
        for slot in time_chars.iter_mut().rev() {
            *slot = PUSH_CHARS[(time % 64) as usize];
            time /= 64;
        }
        id.extend_from_slice(&time_chars);
        id.extend(state.last_random.iter().map(|&i| PUSH_CHARS[i as usize]));

        String::from_utf8(id).unwrap_or_default()
    }
}

/// Add one to the random part, carrying into higher positions
fn increment(random: &mut [u8; 12]) {
    for slot in random.iter_mut().rev() {
        if *slot == 63 {
            *slot = 0;
        } else {
            *slot += 1;
            return;
        }
    }
}
