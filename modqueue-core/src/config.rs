//! Moderation configuration.

use anyhow::{Context, Result};
use chrono::Duration;
use std::env;

use crate::change::WindowBoundary;

/// Tunables for the queue and approval engine.
#[derive(Debug, Clone)]
pub struct ModerationConfig {
    /// How long a rejected change remains re-approvable.
    pub reapproval_window: Duration,
    /// Whether a rejection exactly at the window edge is still admitted.
    pub window_boundary: WindowBoundary,
    /// Address for reviewer notifications. `None` disables them.
    pub notify_address: Option<String>,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            reapproval_window: Duration::days(14),
            window_boundary: WindowBoundary::Inclusive,
            notify_address: None,
        }
    }
}

impl ModerationConfig {
    pub fn from_env() -> Result<Self> {
        let reapproval_window = match env::var("MODQUEUE_REAPPROVAL_WINDOW_SECS") {
            Ok(raw) => parse_window_secs(&raw)
                .context("MODQUEUE_REAPPROVAL_WINDOW_SECS must be a positive number of seconds")?,
            Err(_) => Duration::days(14),
        };

        let window_boundary = match env::var("MODQUEUE_WINDOW_INCLUSIVE") {
            Ok(raw) => parse_boundary(&raw)
                .context("MODQUEUE_WINDOW_INCLUSIVE must be 'true' or 'false'")?,
            Err(_) => WindowBoundary::Inclusive,
        };

        let notify_address = parse_notify_address(env::var("MODQUEUE_NOTIFY_ADDRESS").ok());

        Ok(Self {
            reapproval_window,
            window_boundary,
            notify_address,
        })
    }
}

/// Parse a positive seconds count into a window duration.
pub fn parse_window_secs(raw: &str) -> Result<Duration> {
    let secs: i64 = raw.trim().parse().context("not a number")?;
    anyhow::ensure!(secs > 0, "window must be positive");
    Ok(Duration::seconds(secs))
}

/// Parse the boundary flag.
pub fn parse_boundary(raw: &str) -> Result<WindowBoundary> {
    match raw.trim() {
        "true" => Ok(WindowBoundary::Inclusive),
        "false" => Ok(WindowBoundary::Exclusive),
        other => anyhow::bail!("unrecognised value '{}'", other),
    }
}

/// Treat missing, empty, or whitespace-only addresses as unset.
pub fn parse_notify_address(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
