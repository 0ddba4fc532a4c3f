use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use inbox_notify::{ClientConfig, LogBadgeSink, NotifyClient};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "inbox-notify",
    version,
    about = "Watch a marketplace inbox for unread messages: push channel with polling fallback"
)]
struct Cli {
    /// Path to the JSON config file.
    #[arg(long, default_value = "inbox-notify.json")]
    config: PathBuf,

    /// Backend origin, e.g. https://market.example (overrides the config file).
    #[arg(long)]
    base_url: Option<String>,

    /// User whose notification channel to subscribe to.
    #[arg(long)]
    user_id: Option<u64>,

    /// Session cookie, e.g. "sessionid=abc123".
    #[arg(long, env = "INBOX_SESSION_COOKIE")]
    session_cookie: Option<String>,

    /// CSRF token for mutating requests.
    #[arg(long, env = "INBOX_CSRF_TOKEN")]
    csrf_token: Option<String>,

    /// Mark every conversation read at startup, like opening the inbox page.
    #[arg(long)]
    mark_read_on_start: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,inbox_notify=debug")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = ClientConfig::load(&cli.config)
        .with_context(|| format!("loading config file {}", cli.config.display()))?;
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }
    if let Some(user_id) = cli.user_id {
        config.user_id = Some(user_id);
    }
    if let Some(cookie) = cli.session_cookie {
        config.session_cookie = Some(cookie);
    }
    if let Some(token) = cli.csrf_token {
        config.csrf_token = Some(token);
    }
    if cli.mark_read_on_start {
        config.mark_read_on_start = true;
    }

    let mark_read_on_start = config.mark_read_on_start;
    let client = NotifyClient::new(config, Arc::new(LogBadgeSink))?;
    client.start()?;

    if mark_read_on_start {
        if let Err(error) = client.mark_all_read().await {
            warn!("mark-all-read at startup failed: {error}");
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    info!("shutting down");
    client.stop();
    Ok(())
}
