use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::header::COOKIE, http::HeaderValue, Message},
};
use tracing::{debug, info, warn};

use crate::{
    client::ClientInner,
    consts::{ERROR_SNIPPET_MAX_CHARS, WS_CONNECT_TIMEOUT_SECS},
    core::{truncate_message, unix_now_secs},
    error::ClientError,
    model::ConnectionState,
    poll, unread,
};

/// Drive the push channel for the lifetime of one `start` call.
///
/// Each failed session consumes one reconnect attempt; once the schedule's
/// budget is spent the task hands over to the poller and exits. The poller is
/// never handed over to twice because this task is the only writer of the
/// attempt counter.
pub(crate) async fn run_stream_loop(
    inner: Arc<ClientInner>,
    ws_url: String,
    mut stop_rx: watch::Receiver<bool>,
    task_epoch: u64,
) {
    debug!("stream task started");

    loop {
        if *stop_rx.borrow() {
            break;
        }

        set_connection_state(&inner, ConnectionState::Connecting);
        debug!("attempting stream connection");
        match stream_once(&inner, &ws_url, &mut stop_rx).await {
            Ok(()) => {
                // Only a stop request ends a session cleanly.
                break;
            }
            Err(error) => {
                if *stop_rx.borrow() {
                    break;
                }

                warn!("stream session failed: {error}");
                let attempts = match inner.runtime.lock() {
                    Ok(mut runtime) => {
                        runtime.last_error =
                            Some(truncate_message(&error.to_string(), ERROR_SNIPPET_MAX_CHARS));
                        runtime.reconnect_attempts
                    }
                    Err(_) => {
                        warn!("runtime lock poisoned; abandoning stream task");
                        return;
                    }
                };

                if attempts >= inner.config.retry.max_attempts {
                    info!(
                        attempts,
                        "reconnect attempts exhausted, switching to polling fallback"
                    );
                    poll::start_polling(&inner, stop_rx.clone());
                    return;
                }

                let delay_ms = inner.config.retry.delay_ms(attempts);
                if let Ok(mut runtime) = inner.runtime.lock() {
                    runtime.backoff_ms = delay_ms;
                    runtime.reconnect_attempts = runtime.reconnect_attempts.saturating_add(1);
                }
                debug!(delay_ms, "reconnecting after backoff");

                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_millis(delay_ms)) => {}
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        }
    }

    // The state write stays inside the epoch guard: a late-exiting old task
    // must not report Disconnected over a replacement task's live session.
    if let Ok(mut runtime) = inner.runtime.lock() {
        if runtime.task_epoch == task_epoch {
            runtime.stop_tx = None;
            runtime.should_run = false;
            runtime.backoff_ms = 0;
            if runtime.connection_state != ConnectionState::Disconnected {
                info!(
                    from = %runtime.connection_state,
                    to = %ConnectionState::Disconnected,
                    "connection state changed"
                );
            }
            runtime.connection_state = ConnectionState::Disconnected;
        }
    }
    debug!("stream task ended");
}

async fn stream_once(
    inner: &Arc<ClientInner>,
    ws_url: &str,
    stop_rx: &mut watch::Receiver<bool>,
) -> Result<(), ClientError> {
    let mut ws_request = ws_url
        .into_client_request()
        .map_err(ClientError::Transport)?;
    if let Some(cookie) = inner.config.session_cookie.as_deref() {
        let value = HeaderValue::from_str(cookie.trim())
            .map_err(|error| ClientError::Config(format!("invalid session cookie: {error}")))?;
        ws_request.headers_mut().insert(COOKIE, value);
    }

    let (mut ws_stream, _) = tokio::time::timeout(
        std::time::Duration::from_secs(WS_CONNECT_TIMEOUT_SECS),
        connect_async(ws_request),
    )
    .await
    .map_err(|_| ClientError::ConnectTimeout(WS_CONNECT_TIMEOUT_SECS))??;

    debug!("push channel connected");
    let now = unix_now_secs();
    if let Ok(mut runtime) = inner.runtime.lock() {
        runtime.last_connected_at = Some(now);
        runtime.last_event_at = Some(now);
        runtime.last_error = None;
        runtime.backoff_ms = 0;
        runtime.reconnect_attempts = 0;
    }
    set_connection_state(inner, ConnectionState::Connected);
    // Single-active-updater: the channel owns badge updates from here on.
    poll::stop_polling(inner);

    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                if *stop_rx.borrow() {
                    let _ = ws_stream.close(None).await;
                    return Ok(());
                }
            }
            incoming = ws_stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        mark_stream_activity(inner);
                        debug!("push frame bytes={}", text.len());
                        if let Some((conversation_id, count)) =
                            unread::parse_stream_event(text.as_ref())
                        {
                            unread::apply_push_update(inner, &conversation_id, count);
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        mark_stream_activity(inner);
                        ws_stream.send(Message::Pong(payload)).await?;
                    }
                    Some(Ok(Message::Close(_))) => {
                        return Err(ClientError::ChannelClosed);
                    }
                    Some(Ok(_)) => {
                        mark_stream_activity(inner);
                    }
                    Some(Err(error)) => return Err(error.into()),
                    None => return Err(ClientError::ChannelEnded),
                }
            }
        }
    }
}

pub(crate) fn set_connection_state(inner: &ClientInner, state: ConnectionState) {
    if let Ok(mut runtime) = inner.runtime.lock() {
        if runtime.connection_state != state {
            info!(from = %runtime.connection_state, to = %state, "connection state changed");
        }
        runtime.connection_state = state;
    }
}

fn mark_stream_activity(inner: &ClientInner) {
    if let Ok(mut runtime) = inner.runtime.lock() {
        runtime.last_event_at = Some(unix_now_secs());
    }
}
