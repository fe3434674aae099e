//! Runtime configuration loaded from `.env`/environment.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::persistence;

/// Lower bound for the rename-detection poll.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub const DEFAULT_UPDATE_MANIFEST_URL: &str =
    "https://raw.githubusercontent.com/saving3899/SillyTavern-Highlighter/master/manifest.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighlighterConfig {
    pub settings_path: PathBuf,
    pub save_debounce: Duration,
    pub poll_interval: Duration,
    pub update: UpdateCheckConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateCheckConfig {
    pub enabled: bool,
    pub manifest_url: String,
    pub timeout: Duration,
    pub check_interval: Duration,
}

impl Default for UpdateCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            manifest_url: DEFAULT_UPDATE_MANIFEST_URL.to_string(),
            timeout: Duration::from_millis(5_000),
            check_interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl Default for HighlighterConfig {
    fn default() -> Self {
        Self {
            settings_path: persistence::default_settings_path(),
            save_debounce: Duration::from_millis(350),
            poll_interval: Duration::from_millis(1_000),
            update: UpdateCheckConfig::default(),
        }
    }
}

impl HighlighterConfig {
    /// Load configuration from `.env`/environment.
    ///
    /// Reads:
    /// - `HIGHLIGHTER_SETTINGS_PATH`
    /// - `HIGHLIGHTER_SAVE_DEBOUNCE_MS`, `HIGHLIGHTER_POLL_INTERVAL_MS`
    /// - `HIGHLIGHTER_UPDATE_CHECK`, `HIGHLIGHTER_UPDATE_MANIFEST_URL`,
    ///   `HIGHLIGHTER_UPDATE_TIMEOUT_MS`, `HIGHLIGHTER_UPDATE_CHECK_INTERVAL_HOURS`
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let settings_path = std::env::var("HIGHLIGHTER_SETTINGS_PATH")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(persistence::default_settings_path);

        let save_debounce =
            Duration::from_millis(env_u64("HIGHLIGHTER_SAVE_DEBOUNCE_MS", 350).clamp(0, 60_000));
        let poll_interval = Duration::from_millis(env_u64("HIGHLIGHTER_POLL_INTERVAL_MS", 1_000))
            .clamp(MIN_POLL_INTERVAL, Duration::from_secs(60));

        let update = UpdateCheckConfig {
            enabled: env_flag("HIGHLIGHTER_UPDATE_CHECK", true),
            manifest_url: std::env::var("HIGHLIGHTER_UPDATE_MANIFEST_URL")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_UPDATE_MANIFEST_URL.to_string()),
            timeout: Duration::from_millis(
                env_u64("HIGHLIGHTER_UPDATE_TIMEOUT_MS", 5_000).clamp(500, 120_000),
            ),
            check_interval: Duration::from_secs(
                env_u64("HIGHLIGHTER_UPDATE_CHECK_INTERVAL_HOURS", 24).clamp(1, 24 * 30) * 60 * 60,
            ),
        };

        Self {
            settings_path,
            save_debounce,
            poll_interval,
            update,
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => parse_flag(&v).unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
