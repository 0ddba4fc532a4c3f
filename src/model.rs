use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use tokio::sync::watch;

use crate::consts::{MAX_RECONNECT_ATTEMPTS, RECONNECT_BASE_DELAY_MS, RECONNECT_MAX_DELAY_MS};

/// Delivery mode of the client.
///
/// Exactly one mechanism drives badge updates at any time: the push channel
/// while `Connected`, the poller while `FallbackPolling`, neither otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    FallbackPolling,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::FallbackPolling => "FallbackPolling",
        };
        f.write_str(label)
    }
}

/// Capped exponential backoff between reconnect attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySchedule {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self {
            base_delay_ms: RECONNECT_BASE_DELAY_MS,
            max_delay_ms: RECONNECT_MAX_DELAY_MS,
            max_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl RetrySchedule {
    /// `min(base * 2^attempt, cap)` in milliseconds.
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }
}

/// The client's current belief about per-conversation and total unread counts.
///
/// The backend delivers the total independently of the per-conversation map
/// and is trusted as authoritative; once a push update touches a single
/// conversation the stored total no longer matches and the sum takes over.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnreadSnapshot {
    counts: HashMap<String, u64>,
    authoritative_total: Option<u64>,
}

impl UnreadSnapshot {
    /// Last-write-wins update for a single conversation.
    pub fn apply_update(&mut self, conversation_id: &str, count: u64) {
        self.counts.insert(conversation_id.to_string(), count);
        self.authoritative_total = None;
    }

    /// Wholesale replacement from a polling response.
    pub fn replace(&mut self, counts: HashMap<String, u64>, total: u64) {
        self.counts = counts;
        self.authoritative_total = Some(total);
    }

    /// Zero every conversation, as after marking everything read.
    pub fn clear(&mut self) {
        for count in self.counts.values_mut() {
            *count = 0;
        }
        self.authoritative_total = Some(0);
    }

    pub fn count_for(&self, conversation_id: &str) -> Option<u64> {
        self.counts.get(conversation_id).copied()
    }

    pub fn counts(&self) -> &HashMap<String, u64> {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.authoritative_total
            .unwrap_or_else(|| self.counts.values().sum())
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

pub(crate) struct RuntimeState {
    pub(crate) stop_tx: Option<watch::Sender<bool>>,
    /// Incremented every time a new stream task is spawned. Tasks capture
    /// their epoch at spawn time and only write cleanup state if it still
    /// matches, so a late-exiting old task cannot clobber a freshly started
    /// replacement task's state.
    pub(crate) task_epoch: u64,
    /// Incremented whenever the poller is (re)started or stopped. A poll
    /// response whose generation no longer matches is discarded, so a stale
    /// pull can never overwrite fresher push-delivered data.
    pub(crate) poll_generation: u64,
    pub(crate) connection_state: ConnectionState,
    pub(crate) should_run: bool,
    pub(crate) last_connected_at: Option<u64>,
    pub(crate) last_event_at: Option<u64>,
    pub(crate) last_error: Option<String>,
    pub(crate) backoff_ms: u64,
    pub(crate) reconnect_attempts: u32,
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self {
            stop_tx: None,
            task_epoch: 0,
            poll_generation: 0,
            connection_state: ConnectionState::Disconnected,
            should_run: false,
            last_connected_at: None,
            last_event_at: None,
            last_error: None,
            backoff_ms: 0,
            reconnect_attempts: 0,
        }
    }
}

/// Inbound push-channel event. Unknown `type` values deserialize as `Other`
/// and are ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub(crate) enum PushEvent {
    #[serde(rename = "unread_update")]
    UnreadUpdate {
        #[serde(deserialize_with = "conversation_id_from_any")]
        conversation_id: String,
        count: u64,
    },
    #[serde(other)]
    Other,
}

/// Polling response body.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct UnreadCountsWire {
    #[serde(default)]
    pub(crate) total_unread: u64,
    #[serde(default)]
    pub(crate) by_conversation: HashMap<String, u64>,
}

// The push channel carries conversation ids as integers while the polling
// endpoint keys its map with strings; normalize both to strings.
fn conversation_id_from_any<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IdRepr {
        Number(i64),
        Text(String),
    }

    match IdRepr::deserialize(deserializer)? {
        IdRepr::Number(id) => Ok(id.to_string()),
        IdRepr::Text(id) => Ok(id),
    }
}
