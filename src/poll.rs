use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{client::ClientInner, model::ConnectionState, unread};

/// Enter polling mode and spawn the poll task.
///
/// Idempotent in effect: bumping the generation retires any previous poll
/// task, so repeated calls restart the schedule instead of stacking timers.
pub(crate) fn start_polling(inner: &Arc<ClientInner>, stop_rx: watch::Receiver<bool>) {
    let generation = match inner.runtime.lock() {
        Ok(mut runtime) => {
            runtime.poll_generation = runtime.poll_generation.wrapping_add(1);
            if runtime.connection_state != ConnectionState::FallbackPolling {
                info!(
                    from = %runtime.connection_state,
                    to = %ConnectionState::FallbackPolling,
                    "connection state changed"
                );
            }
            runtime.connection_state = ConnectionState::FallbackPolling;
            runtime.poll_generation
        }
        Err(_) => {
            warn!("runtime lock poisoned; polling not started");
            return;
        }
    };

    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        run_poll_loop(inner, stop_rx, generation).await;
    });
}

/// Retire the active poll task, if any. Called whenever the push channel
/// reaches `Connected`, and cheap enough to call unconditionally.
pub(crate) fn stop_polling(inner: &ClientInner) {
    if let Ok(mut runtime) = inner.runtime.lock() {
        runtime.poll_generation = runtime.poll_generation.wrapping_add(1);
    }
}

/// True while `generation` still names the active poller. An in-flight pull
/// whose generation went stale must discard its response rather than
/// overwrite fresher push-delivered data.
pub(crate) fn generation_current(inner: &ClientInner, generation: u64) -> bool {
    inner
        .runtime
        .lock()
        .map(|runtime| {
            runtime.poll_generation == generation
                && runtime.connection_state == ConnectionState::FallbackPolling
        })
        .unwrap_or(false)
}

async fn run_poll_loop(
    inner: Arc<ClientInner>,
    mut stop_rx: watch::Receiver<bool>,
    generation: u64,
) {
    let period = std::time::Duration::from_millis(inner.config.poll_interval_ms.max(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    debug!(period_ms = period.as_millis() as u64, "poll task started");

    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                if *stop_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if !generation_current(&inner, generation) {
                    break;
                }
                match unread::fetch_unread_counts(&inner).await {
                    Ok(wire) => {
                        if !generation_current(&inner, generation) {
                            debug!("poll result discarded: poller retired mid-flight");
                            break;
                        }
                        unread::apply_unread_counts(&inner, wire);
                    }
                    // Stale-but-available: keep the previous snapshot until
                    // the next tick.
                    Err(error) => debug!("unread poll failed: {error}"),
                }
            }
        }
    }
    debug!("poll task ended");
}
