use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::{
    badge::BadgeSink,
    config::{self, ClientConfig},
    consts::HTTP_REQUEST_TIMEOUT_SECS,
    diagnostics::{snapshot_runtime, RuntimeDiagnostics},
    error::ClientError,
    model::{ConnectionState, RuntimeState, UnreadSnapshot},
    poll, stream, unread,
};

pub(crate) struct ClientInner {
    pub(crate) config: ClientConfig,
    pub(crate) http: reqwest::Client,
    pub(crate) sink: Arc<dyn BadgeSink>,
    pub(crate) runtime: Mutex<RuntimeState>,
    pub(crate) snapshot: Mutex<UnreadSnapshot>,
}

/// Notification delivery client.
///
/// Keeps the per-user unread indicator current: push channel first, capped
/// exponential reconnect on failure, permanent polling fallback once the
/// reconnect budget is spent. Constructed once per session; `start` and
/// `stop` bound the lifecycle, and all state is discarded on drop.
pub struct NotifyClient {
    inner: Arc<ClientInner>,
}

impl NotifyClient {
    pub fn new(config: ClientConfig, sink: Arc<dyn BadgeSink>) -> Result<Self, ClientError> {
        let mut config = config;
        config.base_url = config::normalize_base_url(&config.base_url)?;

        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(cookie) = config.session_cookie.as_deref() {
            let value = reqwest::header::HeaderValue::from_str(cookie.trim())
                .map_err(|error| ClientError::Config(format!("invalid session cookie: {error}")))?;
            headers.insert(reqwest::header::COOKIE, value);
        }
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
            .default_headers(headers)
            .build()
            .map_err(ClientError::Http)?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                http,
                sink,
                runtime: Mutex::new(RuntimeState::default()),
                snapshot: Mutex::new(UnreadSnapshot::default()),
            }),
        })
    }

    /// Begin delivering updates. Idempotent: a second call while the client
    /// is connecting, connected, or polling is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), ClientError> {
        let user_id = self
            .inner
            .config
            .user_id
            .ok_or_else(|| ClientError::Config("no user id configured".to_string()))?;
        let ws_url = config::build_notifications_ws_url(&self.inner.config.base_url, user_id)?;

        let (stop_rx, task_epoch) = {
            let mut runtime = self
                .inner
                .runtime
                .lock()
                .map_err(|_| ClientError::LockPoisoned)?;

            if runtime.stop_tx.is_some() {
                debug!("start ignored: client already running");
                return Ok(());
            }

            let (tx, rx) = watch::channel(false);
            runtime.stop_tx = Some(tx);
            runtime.task_epoch = runtime.task_epoch.wrapping_add(1);
            runtime.should_run = true;
            runtime.last_error = None;
            runtime.backoff_ms = 0;
            runtime.reconnect_attempts = 0;
            (rx, runtime.task_epoch)
        };

        debug!(%ws_url, "spawning stream task");
        let inner = Arc::clone(&self.inner);
        let inner_for_prefetch = Arc::clone(&self.inner);
        tokio::spawn(async move {
            // Populate badges before the first push arrives, like the inbox
            // page's load-time fetch. Discarded if anything else painted the
            // snapshot first.
            tokio::spawn(async move {
                match unread::fetch_unread_counts(&inner_for_prefetch).await {
                    Ok(wire) => unread::apply_if_unpopulated(&inner_for_prefetch, wire),
                    Err(error) => debug!("initial unread fetch failed: {error}"),
                }
            });
            stream::run_stream_loop(inner, ws_url, stop_rx, task_epoch).await;
        });

        Ok(())
    }

    /// Tear down the stream task and any active poller.
    pub fn stop(&self) {
        let mut runtime = match self.inner.runtime.lock() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("stop skipped: runtime lock poisoned");
                return;
            }
        };

        if let Some(stop_tx) = runtime.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        runtime.should_run = false;
        runtime.backoff_ms = 0;
        runtime.poll_generation = runtime.poll_generation.wrapping_add(1);
        runtime.connection_state = ConnectionState::Disconnected;
    }

    pub fn connection_state(&self) -> Result<ConnectionState, ClientError> {
        let runtime = self
            .inner
            .runtime
            .lock()
            .map_err(|_| ClientError::LockPoisoned)?;
        Ok(runtime.connection_state)
    }

    pub fn diagnostics(&self) -> Result<RuntimeDiagnostics, ClientError> {
        snapshot_runtime(&self.inner)
    }

    pub fn unread_snapshot(&self) -> Result<UnreadSnapshot, ClientError> {
        let snapshot = self
            .inner
            .snapshot
            .lock()
            .map_err(|_| ClientError::LockPoisoned)?;
        Ok(snapshot.clone())
    }

    /// Opportunistic pull, for moments like window focus or visibility
    /// regain. Only meaningful in polling mode; the result is discarded if
    /// the delivery mode changed while the request was in flight.
    pub async fn refresh_now(&self) -> Result<(), ClientError> {
        let generation = {
            let runtime = self
                .inner
                .runtime
                .lock()
                .map_err(|_| ClientError::LockPoisoned)?;
            if runtime.connection_state != ConnectionState::FallbackPolling {
                debug!("refresh skipped: push channel is the active updater");
                return Ok(());
            }
            runtime.poll_generation
        };

        let wire = unread::fetch_unread_counts(&self.inner).await?;
        if poll::generation_current(&self.inner, generation) {
            unread::apply_unread_counts(&self.inner, wire);
        } else {
            debug!("refresh result discarded: delivery mode changed mid-flight");
        }
        Ok(())
    }

    /// POST the mark-all-read endpoint and zero every badge on success.
    pub async fn mark_all_read(&self) -> Result<(), ClientError> {
        unread::mark_all_read(&self.inner).await
    }
}

impl Drop for NotifyClient {
    fn drop(&mut self) {
        self.stop();
    }
}
