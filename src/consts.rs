pub(crate) const WS_CONNECT_TIMEOUT_SECS: u64 = 10;
pub(crate) const HTTP_REQUEST_TIMEOUT_SECS: u64 = 15;

pub(crate) const RECONNECT_BASE_DELAY_MS: u64 = 1_000;
pub(crate) const RECONNECT_MAX_DELAY_MS: u64 = 30_000;
pub(crate) const MAX_RECONNECT_ATTEMPTS: u32 = 5;

pub(crate) const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

pub(crate) const DEFAULT_UNREAD_PATH: &str = "/conversation/api/unread-count/";
pub(crate) const DEFAULT_MARK_READ_PATH: &str = "/conversation/api/mark-all-read/";

/// Aggregate counts above this render as "9+" on the navigation badge.
pub(crate) const NAVBAR_BADGE_MAX: u64 = 9;

pub(crate) const ERROR_SNIPPET_MAX_CHARS: usize = 200;
