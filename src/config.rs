//! Client configuration, loaded from the environment

use anyhow::{Context, Result};
use std::time::Duration;

pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8000";

/// Polling cadence and ceiling for a single job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl PollerConfig {
    /// A zero interval would make the ticker spin
    pub fn validate(&self) -> Result<(), String> {
        if self.interval.is_zero() {
            return Err("poll interval must be greater than zero".to_string());
        }
        Ok(())
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_wait: Duration::from_secs(30 * 60),
        }
    }
}

/// Geometry constants for the virtualized grid (pixels)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridConfig {
    pub gap: f64,
    pub horizontal_padding: f64,
    pub base_row_height: f64,
    pub expanded_row_height: f64,
    pub overscan_rows: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            gap: 16.0,
            horizontal_padding: 0.0,
            base_row_height: 240.0,
            expanded_row_height: 620.0,
            overscan_rows: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub backend_url: String,
    pub request_timeout: Duration,
    pub poller: PollerConfig,
    pub grid: GridConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            request_timeout: Duration::from_secs(30),
            poller: PollerConfig::default(),
            grid: GridConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Build from `RISKVIEW_*` environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = lookup("RISKVIEW_BACKEND_URL") {
            config.backend_url = url.trim_end_matches('/').to_string();
        }
        if let Some(secs) = read_secs(&lookup, "RISKVIEW_POLL_INTERVAL_SECS")? {
            config.poller.interval = secs;
        }
        if let Some(secs) = read_secs(&lookup, "RISKVIEW_MAX_WAIT_SECS")? {
            config.poller.max_wait = secs;
        }
        if let Some(secs) = read_secs(&lookup, "RISKVIEW_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = secs;
        }

        config
            .poller
            .validate()
            .map_err(|e| anyhow::anyhow!("RISKVIEW_POLL_INTERVAL_SECS: {}", e))?;

        Ok(config)
    }
}

fn read_secs(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<Duration>> {
    match lookup(key) {
        Some(raw) => {
            let secs: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("{} must be a whole number of seconds, got '{}'", key, raw))?;
            Ok(Some(Duration::from_secs(secs)))
        }
        None => Ok(None),
    }
}
