use thiserror::Error;

/// Failures surfaced by the notification client.
///
/// Nothing here is fatal to the host application: transport errors are
/// retried or left stale until the next poll tick, decode errors drop the
/// offending payload only.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("websocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("stream connection timed out after {0} seconds")]
    ConnectTimeout(u64),

    #[error("push channel closed by server")]
    ChannelClosed,

    #[error("push channel ended unexpectedly")]
    ChannelEnded,

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request failed with HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("runtime lock poisoned")]
    LockPoisoned,
}
