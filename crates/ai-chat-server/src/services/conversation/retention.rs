//! Retention rules applied to a history on every read and before every write.
//!
//! Rules run in a fixed order: age filter, count cap, image redaction.
//! Every rule returns a new sequence and never mutates its input.

use crate::config::HistoryConfig;

use super::types::{History, Role, Turn};

pub const DEFAULT_EXPIRATION_MS: i64 = 48 * 60 * 60 * 1000;
pub const DEFAULT_MAX_TURNS: usize = 30;
pub const DEFAULT_MAX_IMAGE_TURNS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub expiration_ms: i64,
    pub max_turns: usize,
    pub max_image_turns: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            expiration_ms: DEFAULT_EXPIRATION_MS,
            max_turns: DEFAULT_MAX_TURNS,
            max_image_turns: DEFAULT_MAX_IMAGE_TURNS,
        }
    }
}

impl From<&HistoryConfig> for RetentionPolicy {
    fn from(config: &HistoryConfig) -> Self {
        Self {
            expiration_ms: config.expiration_ms(),
            max_turns: config.max_turns,
            max_image_turns: config.max_image_turns,
        }
    }
}

/// What a prune pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub expired: usize,
    pub capped: usize,
    pub redacted_turns: usize,
    pub redacted_images: usize,
}

impl PruneReport {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

/// Note appended to a turn whose images were stripped
pub fn redaction_note(image_count: usize) -> String {
    format!("\n[{} image(s) removed from this message to save space]", image_count)
}

impl RetentionPolicy {
    pub fn prune(&self, history: &History, now: i64) -> History {
        self.prune_with_report(history, now).0
    }

    pub fn prune_with_report(&self, history: &History, now: i64) -> (History, PruneReport) {
        let mut report = PruneReport::default();

        let fresh = self.drop_expired(history.turns(), now);
        report.expired = history.len() - fresh.len();

        let capped = self.cap_count(fresh);
        report.capped = history.len() - report.expired - capped.len();

        let (turns, redacted_turns, redacted_images) = self.redact_old_images(capped);
        report.redacted_turns = redacted_turns;
        report.redacted_images = redacted_images;

        (History::new(turns), report)
    }

    fn drop_expired(&self, turns: &[Turn], now: i64) -> Vec<Turn> {
        turns
            .iter()
            .filter(|turn| now - turn.timestamp <= self.expiration_ms)
            .cloned()
            .collect()
    }

    fn cap_count(&self, mut turns: Vec<Turn>) -> Vec<Turn> {
        if turns.len() > self.max_turns {
            let excess = turns.len() - self.max_turns;
            turns.drain(..excess);
        }
        turns
    }

    /// Strips images from the oldest image-bearing user turns beyond the threshold
    fn redact_old_images(&self, turns: Vec<Turn>) -> (Vec<Turn>, usize, usize) {
        let image_turns = turns
            .iter()
            .filter(|turn| turn.role == Role::User && turn.has_images())
            .count();

        if image_turns <= self.max_image_turns {
            return (turns, 0, 0);
        }

        let mut to_redact = image_turns - self.max_image_turns;
        let mut redacted_images = 0;
        let redacted_turns = to_redact;

        let turns = turns
            .into_iter()
            .map(|turn| {
                if to_redact == 0 || turn.role != Role::User || !turn.has_images() {
                    return turn;
                }
                to_redact -= 1;

                let image_count = turn.image_count();
                redacted_images += image_count;

                Turn {
                    content: format!("{}{}", turn.content, redaction_note(image_count)),
                    attachments: turn
                        .attachments
                        .into_iter()
                        .filter(|a| !a.is_image())
                        .collect(),
                    ..turn
                }
            })
            .collect();

        (turns, redacted_turns, redacted_images)
    }
}
