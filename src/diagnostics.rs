use serde::Serialize;

use crate::{client::ClientInner, core::unix_now_secs, error::ClientError, model::ConnectionState};

/// Point-in-time view of the client runtime, for logging or status surfaces.
#[derive(Debug, Serialize, Clone)]
pub struct RuntimeDiagnostics {
    pub connection_state: ConnectionState,
    pub should_run: bool,
    pub last_connected_at: Option<u64>,
    pub last_event_at: Option<u64>,
    pub stale_for_seconds: Option<u64>,
    pub last_error: Option<String>,
    pub backoff_ms: u64,
    pub reconnect_attempts: u32,
}

pub(crate) fn snapshot_runtime(inner: &ClientInner) -> Result<RuntimeDiagnostics, ClientError> {
    let runtime = inner.runtime.lock().map_err(|_| ClientError::LockPoisoned)?;

    let now = unix_now_secs();
    let stale_for_seconds = runtime.last_event_at.map(|last| now.saturating_sub(last));

    Ok(RuntimeDiagnostics {
        connection_state: runtime.connection_state,
        should_run: runtime.should_run,
        last_connected_at: runtime.last_connected_at,
        last_event_at: runtime.last_event_at,
        stale_for_seconds,
        last_error: runtime.last_error.clone(),
        backoff_ms: runtime.backoff_ms,
        reconnect_attempts: runtime.reconnect_attempts,
    })
}
