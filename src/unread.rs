use tracing::{debug, warn};

use crate::{
    client::ClientInner,
    consts::ERROR_SNIPPET_MAX_CHARS,
    core::truncate_message,
    error::ClientError,
    model::{PushEvent, UnreadCountsWire},
};

/// One pull of the unread-counts endpoint.
pub(crate) async fn fetch_unread_counts(
    inner: &ClientInner,
) -> Result<UnreadCountsWire, ClientError> {
    let endpoint = inner.config.unread_url()?;
    let response = inner.http.get(endpoint).send().await?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unable to read response body>".to_string());
        return Err(ClientError::Status {
            status,
            body: truncate_message(&body, ERROR_SNIPPET_MAX_CHARS),
        });
    }

    Ok(response.json::<UnreadCountsWire>().await?)
}

/// Replace the whole snapshot from a polling response and repaint every
/// badge plus the aggregate.
pub(crate) fn apply_unread_counts(inner: &ClientInner, wire: UnreadCountsWire) {
    let (counts, total) = {
        let mut snapshot = match inner.snapshot.lock() {
            Ok(snapshot) => snapshot,
            Err(_) => {
                warn!("unread snapshot lock poisoned; dropping poll result");
                return;
            }
        };
        snapshot.replace(wire.by_conversation, wire.total_unread);
        (snapshot.counts().clone(), snapshot.total())
    };

    for (conversation_id, count) in &counts {
        inner.sink.render_conversation(conversation_id, *count);
    }
    inner.sink.render_total(total);
}

/// Apply the startup prefetch only while the snapshot is still unpopulated.
///
/// The prefetch exists to paint initial badges; once anything else has
/// written the snapshot its response is stale by definition. The check and
/// the replace happen under one lock so the prefetch can never overwrite a
/// push update that raced it.
pub(crate) fn apply_if_unpopulated(inner: &ClientInner, wire: UnreadCountsWire) {
    let applied = {
        let mut snapshot = match inner.snapshot.lock() {
            Ok(snapshot) => snapshot,
            Err(_) => {
                warn!("unread snapshot lock poisoned; dropping prefetch result");
                return;
            }
        };
        if !snapshot.is_empty() {
            None
        } else {
            snapshot.replace(wire.by_conversation, wire.total_unread);
            Some((snapshot.counts().clone(), snapshot.total()))
        }
    };

    let Some((counts, total)) = applied else {
        debug!("prefetch result discarded: snapshot already populated");
        return;
    };
    for (conversation_id, count) in &counts {
        inner.sink.render_conversation(conversation_id, *count);
    }
    inner.sink.render_total(total);
}

/// Apply a single push-delivered `(conversation, count)` update and repaint
/// that conversation's badge plus the aggregate.
pub(crate) fn apply_push_update(inner: &ClientInner, conversation_id: &str, count: u64) {
    let total = {
        let mut snapshot = match inner.snapshot.lock() {
            Ok(snapshot) => snapshot,
            Err(_) => {
                warn!("unread snapshot lock poisoned; dropping push update");
                return;
            }
        };
        snapshot.apply_update(conversation_id, count);
        snapshot.total()
    };

    inner.sink.render_conversation(conversation_id, count);
    inner.sink.render_total(total);
}

/// Decode one push-channel frame. Malformed payloads are logged and dropped;
/// event kinds other than `unread_update` yield `None`.
pub(crate) fn parse_stream_event(text: &str) -> Option<(String, u64)> {
    match serde_json::from_str::<PushEvent>(text) {
        Ok(PushEvent::UnreadUpdate {
            conversation_id,
            count,
        }) => Some((conversation_id, count)),
        Ok(PushEvent::Other) => {
            debug!(
                "ignoring push event of unhandled type: {}",
                truncate_message(text, 140)
            );
            None
        }
        Err(error) => {
            warn!(
                "push payload decode failed: {error} payload={}",
                truncate_message(text, 140)
            );
            None
        }
    }
}

/// POST the mark-all-read endpoint; on success zero the snapshot and every
/// visible badge, like the inbox page does on load.
pub(crate) async fn mark_all_read(inner: &ClientInner) -> Result<(), ClientError> {
    let endpoint = inner.config.mark_read_url()?;
    let mut request = inner.http.post(endpoint);
    if let Some(token) = inner.config.csrf_token.as_deref() {
        request = request.header("X-CSRFToken", token);
    }
    let response = request.send().await?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unable to read response body>".to_string());
        return Err(ClientError::Status {
            status,
            body: truncate_message(&body, ERROR_SNIPPET_MAX_CHARS),
        });
    }

    let conversations = {
        let mut snapshot = inner
            .snapshot
            .lock()
            .map_err(|_| ClientError::LockPoisoned)?;
        snapshot.clear();
        snapshot.counts().keys().cloned().collect::<Vec<_>>()
    };
    for conversation_id in &conversations {
        inner.sink.render_conversation(conversation_id, 0);
    }
    inner.sink.render_total(0);
    debug!("all conversations marked read");

    Ok(())
}
