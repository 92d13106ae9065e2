//! Deferred UI effects.
//!
//! Typing completion, evidence reveal, and upload-row expiry are
//! scheduled state transitions, not network events. Controllers return
//! [`UiTask`] values instead of arming bare timers so the driver owns
//! scheduling and stale tasks for an inactive planet can be dropped.

use std::time::Duration;

pub const TYPING_MS_PER_CHAR: u64 = 15;
pub const TYPING_MAX_MS: u64 = 3_000;
/// Evidence lands a beat after the answer so it never flashes in first.
pub const EVIDENCE_REVEAL_MS: u64 = 300;
/// Terminal upload rows linger briefly, success or failure alike.
pub const UPLOAD_EXPIRY_MS: u64 = 2_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiTask {
    /// Planet the effect belongs to; fired tasks for any other planet
    /// are no-ops.
    pub planet_id: String,
    pub delay: Duration,
    pub effect: UiEffect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEffect {
    /// Flip `is_typing` off on this message, matched by id, never by
    /// position.
    TypingDone { message_id: String },
    /// Materialize the evidence bundle held back for this query.
    RevealEvidence { query_id: String },
    /// Drop a terminal upload row from the active view.
    ExpireUpload { file_id: String },
}

pub fn typing_delay(content_len: usize) -> Duration {
    Duration::from_millis((content_len as u64 * TYPING_MS_PER_CHAR).min(TYPING_MAX_MS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typing_delay_scales_with_content_and_caps_at_three_seconds() {
        assert_eq!(typing_delay(10), Duration::from_millis(150));
        assert_eq!(typing_delay(200), Duration::from_millis(3_000));
        assert_eq!(typing_delay(0), Duration::from_millis(0));
    }
}
