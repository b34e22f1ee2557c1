// Timing helpers for logging and frame pacing

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch, for log timestamps
pub fn get_current_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_millis()
}
