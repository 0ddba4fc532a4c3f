//! Headless unread-inbox notification client.
//!
//! Keeps a per-user unread-message indicator current in near-real-time:
//! a WebSocket push channel when available, reconnect with capped
//! exponential backoff on failure, and a permanent fall back to periodic
//! HTTP polling once the reconnect budget is spent. Badge rendering is
//! abstracted behind [`BadgeSink`] so hosts decide what an "unread badge"
//! looks like.

mod badge;
mod client;
mod config;
mod consts;
mod core;
mod diagnostics;
mod error;
mod model;
mod poll;
mod stream;
mod unread;

pub use badge::{navbar_label, BadgeSink, LogBadgeSink};
pub use client::NotifyClient;
pub use config::ClientConfig;
pub use diagnostics::RuntimeDiagnostics;
pub use error::ClientError;
pub use model::{ConnectionState, RetrySchedule, UnreadSnapshot};
