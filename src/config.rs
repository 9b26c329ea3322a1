use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::collect::CollectSettings;
use crate::detector::{CONNECT_TIMEOUT, REQUEST_TIMEOUT};
use crate::poll::PollSettings;

/// Timing defaults loaded from an optional TOML file.
///
/// Every value can be overridden per-invocation on the command line; the
/// precedence is CLI flag, then file, then built-in default.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub max_wait_ms: Option<u64>,
    #[serde(default)]
    pub idle_gap_ms: Option<u64>,
    #[serde(default)]
    pub empty_backoff_ms: Option<u64>,
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
}

impl Config {
    /// Load from a TOML file. A missing or malformed file is an error,
    /// since the caller named it explicitly; defaults apply only when no
    /// file is given at all.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("failed to parse config: {}", path.display()))
    }

    pub fn poll_settings(
        &self,
        cli_poll_interval_ms: Option<u64>,
        cli_max_wait_ms: Option<u64>,
    ) -> PollSettings {
        let defaults = PollSettings::default();
        PollSettings {
            poll_interval: pick_ms(cli_poll_interval_ms, self.poll_interval_ms)
                .unwrap_or(defaults.poll_interval),
            max_wait: pick_ms(cli_max_wait_ms, self.max_wait_ms).or(defaults.max_wait),
        }
    }

    pub fn collect_settings(
        &self,
        cli_idle_gap_ms: Option<u64>,
        cli_empty_backoff_ms: Option<u64>,
    ) -> CollectSettings {
        let defaults = CollectSettings::default();
        CollectSettings {
            idle_gap: pick_ms(cli_idle_gap_ms, self.idle_gap_ms).unwrap_or(defaults.idle_gap),
            empty_backoff: pick_ms(cli_empty_backoff_ms, self.empty_backoff_ms)
                .unwrap_or(defaults.empty_backoff),
            read_chunk: defaults.read_chunk,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(CONNECT_TIMEOUT)
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(REQUEST_TIMEOUT)
    }
}

fn pick_ms(cli: Option<u64>, file: Option<u64>) -> Option<Duration> {
    cli.or(file).map(Duration::from_millis)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
