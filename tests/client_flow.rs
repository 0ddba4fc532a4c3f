use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use futures_util::{SinkExt, StreamExt};
use inbox_notify::{BadgeSink, ClientConfig, ConnectionState, NotifyClient, RetrySchedule};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};
use tokio_tungstenite::tungstenite::Message;

/// Badge surface that remembers what was rendered.
#[derive(Default)]
struct RecordingSink {
    conversations: Mutex<HashMap<String, u64>>,
    totals: Mutex<Vec<u64>>,
}

impl RecordingSink {
    fn count_for(&self, conversation_id: &str) -> Option<u64> {
        self.conversations
            .lock()
            .unwrap()
            .get(conversation_id)
            .copied()
    }

    fn last_total(&self) -> Option<u64> {
        self.totals.lock().unwrap().last().copied()
    }
}

impl BadgeSink for RecordingSink {
    fn render_conversation(&self, conversation_id: &str, count: u64) {
        self.conversations
            .lock()
            .unwrap()
            .insert(conversation_id.to_string(), count);
    }

    fn render_total(&self, total: u64) {
        self.totals.lock().unwrap().push(total);
    }
}

async fn wait_for(mut cond: impl FnMut() -> bool, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {timeout:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// WebSocket server that plays the scripted frames to every accepted
/// channel, then keeps the session open. Plain HTTP requests (for example
/// the client's startup prefetch) fail the handshake and are counted.
async fn spawn_push_server(
    frames: &'static [&'static str],
    rejected_http: Arc<AtomicUsize>,
) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            let rejected_http = Arc::clone(&rejected_http);
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(socket).await else {
                    rejected_http.fetch_add(1, Ordering::SeqCst);
                    return;
                };
                for frame in frames {
                    if ws.send(Message::text(frame.to_string())).await.is_err() {
                        return;
                    }
                }
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });
    addr
}

/// Plain-HTTP server: every request gets `body` back as JSON. WebSocket
/// handshakes therefore fail (no 101), which makes this double as an
/// unreachable push channel. Request heads are recorded for assertions.
async fn spawn_http_server(body: &'static str, heads: Arc<Mutex<Vec<String>>>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let heads = Arc::clone(&heads);
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                heads
                    .lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(&buf[..n]).to_string());
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

fn fast_retry() -> RetrySchedule {
    RetrySchedule {
        base_delay_ms: 5,
        max_delay_ms: 40,
        max_attempts: 5,
    }
}

#[tokio::test]
async fn push_updates_drive_badges_and_poller_never_starts() {
    let rejected_http = Arc::new(AtomicUsize::new(0));
    let addr = spawn_push_server(
        &[
            r#"{"type":"unread_update","conversation_id":7,"count":3}"#,
            "definitely not json",
            r#"{"type":"chat","message":"hi","sender":"ana"}"#,
            r#"{"type":"unread_update","conversation_id":"7","count":5}"#,
        ],
        Arc::clone(&rejected_http),
    )
    .await;

    let sink = Arc::new(RecordingSink::default());
    let config = ClientConfig {
        base_url: format!("http://{addr}"),
        user_id: Some(1),
        poll_interval_ms: 30,
        ..ClientConfig::default()
    };
    let client = NotifyClient::new(config, sink.clone()).unwrap();
    client.start().unwrap();

    // Last-write-wins: the badge ends on 5, with the malformed and
    // unrelated frames dropped in between.
    wait_for(|| sink.count_for("7") == Some(5), Duration::from_secs(5)).await;
    assert_eq!(
        client.connection_state().unwrap(),
        ConnectionState::Connected
    );
    assert_eq!(sink.last_total(), Some(5));

    // With the channel connected, nothing else talks HTTP: at most the
    // startup prefetch reached the server, and no poll ticks follow.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let http_requests = rejected_http.load(Ordering::SeqCst);
    assert!(http_requests <= 1);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(rejected_http.load(Ordering::SeqCst), http_requests);

    client.stop();
    wait_for(
        || {
            client.connection_state().unwrap() == ConnectionState::Disconnected
        },
        Duration::from_secs(5),
    )
    .await;
}

#[tokio::test]
async fn start_is_idempotent_while_running() {
    let rejected_http = Arc::new(AtomicUsize::new(0));
    let addr = spawn_push_server(
        &[r#"{"type":"unread_update","conversation_id":1,"count":1}"#],
        rejected_http,
    )
    .await;

    let sink = Arc::new(RecordingSink::default());
    let config = ClientConfig {
        base_url: format!("http://{addr}"),
        user_id: Some(1),
        ..ClientConfig::default()
    };
    let client = NotifyClient::new(config, sink.clone()).unwrap();
    client.start().unwrap();
    wait_for(|| sink.count_for("1") == Some(1), Duration::from_secs(5)).await;

    // Second start is a no-op: still connected, no duplicate stream task.
    client.start().unwrap();
    assert_eq!(
        client.connection_state().unwrap(),
        ConnectionState::Connected
    );
    client.stop();
}

#[tokio::test]
async fn restart_after_stop_begins_a_fresh_connected_lifecycle() {
    let rejected_http = Arc::new(AtomicUsize::new(0));
    let addr = spawn_push_server(
        &[r#"{"type":"unread_update","conversation_id":4,"count":2}"#],
        rejected_http,
    )
    .await;

    let sink = Arc::new(RecordingSink::default());
    let config = ClientConfig {
        base_url: format!("http://{addr}"),
        user_id: Some(4),
        ..ClientConfig::default()
    };
    let client = NotifyClient::new(config, sink.clone()).unwrap();

    client.start().unwrap();
    wait_for(|| sink.count_for("4") == Some(2), Duration::from_secs(5)).await;
    client.stop();
    assert_eq!(
        client.connection_state().unwrap(),
        ConnectionState::Disconnected
    );

    // Fresh lifecycle: the client reconnects and the server replays its
    // script on the new session.
    let renders_before = sink.totals.lock().unwrap().len();
    client.start().unwrap();
    wait_for(
        || sink.totals.lock().unwrap().len() > renders_before,
        Duration::from_secs(5),
    )
    .await;
    assert_eq!(
        client.connection_state().unwrap(),
        ConnectionState::Connected
    );
    assert_eq!(client.diagnostics().unwrap().reconnect_attempts, 0);

    // The first session's task exits late, after the new session is live;
    // its cleanup must not clobber the new session's Connected state.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        client.connection_state().unwrap(),
        ConnectionState::Connected
    );

    client.stop();
}

#[tokio::test]
async fn exhausted_reconnects_fall_back_to_polling_permanently() {
    let heads = Arc::new(Mutex::new(Vec::new()));
    let addr = spawn_http_server(
        r#"{"total_unread":12,"by_conversation":{"3":12}}"#,
        Arc::clone(&heads),
    )
    .await;

    let sink = Arc::new(RecordingSink::default());
    let config = ClientConfig {
        base_url: format!("http://{addr}"),
        user_id: Some(9),
        poll_interval_ms: 50,
        retry: fast_retry(),
        ..ClientConfig::default()
    };
    let client = NotifyClient::new(config, sink.clone()).unwrap();
    client.start().unwrap();

    wait_for(
        || {
            client.connection_state().unwrap() == ConnectionState::FallbackPolling
        },
        Duration::from_secs(5),
    )
    .await;

    let poll_count = |heads: &Arc<Mutex<Vec<String>>>| {
        heads
            .lock()
            .unwrap()
            .iter()
            .filter(|head| head.contains("GET /conversation/api/unread-count/"))
            .count()
    };
    wait_for(|| poll_count(&heads) >= 2, Duration::from_secs(5)).await;

    assert_eq!(sink.count_for("3"), Some(12));
    assert_eq!(sink.last_total(), Some(12));

    // One initial dial plus five reconnects, and not a sixth: the fallback
    // is terminal for the session.
    let dials = |heads: &Arc<Mutex<Vec<String>>>| {
        heads
            .lock()
            .unwrap()
            .iter()
            .filter(|head| head.contains("GET /ws/user/9/notifications/"))
            .count()
    };
    wait_for(|| dials(&heads) == 6, Duration::from_secs(5)).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(dials(&heads), 6);

    // Polling kept going the whole time.
    let polls_before = poll_count(&heads);
    wait_for(
        || poll_count(&heads) > polls_before,
        Duration::from_secs(5),
    )
    .await;

    client.stop();
}

#[tokio::test]
async fn refresh_now_applies_only_in_polling_mode() {
    let heads = Arc::new(Mutex::new(Vec::new()));
    let addr = spawn_http_server(
        r#"{"total_unread":4,"by_conversation":{"2":4}}"#,
        Arc::clone(&heads),
    )
    .await;

    let sink = Arc::new(RecordingSink::default());
    let config = ClientConfig {
        base_url: format!("http://{addr}"),
        user_id: Some(2),
        // Interval long enough that only refresh_now and the poller's
        // immediate first tick can fetch during the test window.
        poll_interval_ms: 60_000,
        retry: fast_retry(),
        ..ClientConfig::default()
    };
    let client = NotifyClient::new(config, sink.clone()).unwrap();

    // Before start the client is Disconnected; a focus-triggered refresh
    // must be a silent no-op.
    client.refresh_now().await.unwrap();
    assert_eq!(sink.last_total(), None);

    client.start().unwrap();
    wait_for(
        || {
            client.connection_state().unwrap() == ConnectionState::FallbackPolling
        },
        Duration::from_secs(5),
    )
    .await;
    wait_for(|| sink.count_for("2") == Some(4), Duration::from_secs(5)).await;

    let totals_before = sink.totals.lock().unwrap().len();
    client.refresh_now().await.unwrap();
    assert!(sink.totals.lock().unwrap().len() > totals_before);

    client.stop();
}

#[tokio::test]
async fn mark_all_read_posts_csrf_token_and_clears_badges() {
    let heads = Arc::new(Mutex::new(Vec::new()));
    let addr = spawn_http_server(
        r#"{"status":"success","message":"All messages marked as read"}"#,
        Arc::clone(&heads),
    )
    .await;

    let sink = Arc::new(RecordingSink::default());
    let config = ClientConfig {
        base_url: format!("http://{addr}"),
        user_id: Some(5),
        csrf_token: Some("tok123".to_string()),
        session_cookie: Some("sessionid=abc".to_string()),
        ..ClientConfig::default()
    };
    let client = NotifyClient::new(config, sink.clone()).unwrap();

    client.mark_all_read().await.unwrap();

    let heads = heads.lock().unwrap();
    let post = heads
        .iter()
        .find(|head| head.starts_with("POST /conversation/api/mark-all-read/"))
        .expect("mark-all-read request not seen");
    let post_lower = post.to_lowercase();
    assert!(
        post_lower.contains("x-csrftoken: tok123"),
        "missing CSRF header"
    );
    assert!(post_lower.contains("sessionid=abc"), "missing session cookie");

    assert_eq!(sink.last_total(), Some(0));
    assert_eq!(client.unread_snapshot().unwrap().total(), 0);
}
