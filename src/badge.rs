use tracing::info;

use crate::consts::NAVBAR_BADGE_MAX;

/// Surface the client pushes unread counts onto.
///
/// Implementations stand in for the DOM badges of the web inbox: one badge
/// per conversation plus a single aggregate badge in the navigation bar.
/// Calls must be idempotent; the client may redeliver identical values. An
/// implementation that has no surface for a given conversation should log a
/// warning and skip the update rather than fail.
pub trait BadgeSink: Send + Sync + 'static {
    fn render_conversation(&self, conversation_id: &str, count: u64);
    fn render_total(&self, total: u64);
}

/// Text shown on the aggregate navigation badge, or `None` when the badge is
/// hidden entirely.
pub fn navbar_label(total: u64) -> Option<String> {
    if total == 0 {
        None
    } else if total > NAVBAR_BADGE_MAX {
        Some(format!("{NAVBAR_BADGE_MAX}+"))
    } else {
        Some(total.to_string())
    }
}

/// Default sink for the headless daemon: badge updates become log lines.
#[derive(Debug, Default)]
pub struct LogBadgeSink;

impl BadgeSink for LogBadgeSink {
    fn render_conversation(&self, conversation_id: &str, count: u64) {
        info!(conversation_id, count, "conversation badge");
    }

    fn render_total(&self, total: u64) {
        match navbar_label(total) {
            Some(label) => info!(%label, "navigation badge"),
            None => info!("navigation badge hidden"),
        }
    }
}
