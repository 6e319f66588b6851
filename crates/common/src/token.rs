//! Uniqueness tokens
//!
//! Scenarios share one backing store, so every generated identifying field
//! embeds a fresh token instead of relying on cleanup between runs.

use rand::Rng;

/// A probably-unique token: millisecond timestamp plus a random suffix
pub fn fresh() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: u16 = rand::thread_rng().gen_range(0..10_000);
    format!("{}{:04}", millis, suffix)
}

/// `base` with a fresh token appended, e.g. `AutoOwner_17290000000001234`
pub fn tokenized(base: &str) -> String {
    format!("{}{}", base, fresh())
}
