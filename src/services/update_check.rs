//! Remote version check. Never fails loudly: every error is logged and yields `None`.

use std::cmp::Ordering;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::config::UpdateCheckConfig;
use crate::plugins::highlights::store::now_ms;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteManifest {
    version: Option<String>,
    #[serde(default)]
    update_message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateCache {
    timestamp: u64,
    latest_version: String,
    #[serde(default)]
    update_message: String,
    has_update: bool,
}

#[cfg_attr(feature = "typegen", derive(specta::Type))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInfo {
    /// Newer version, if one is available.
    pub version: Option<String>,
    pub update_message: String,
}

#[derive(Debug)]
enum UpdateCheckError {
    Request(String),
    Status(u16),
    Manifest(String),
}

impl std::fmt::Display for UpdateCheckError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request(message) => write!(f, "Request: {}", message),
            Self::Status(status) => write!(f, "Status: HTTP {}", status),
            Self::Manifest(message) => write!(f, "Manifest: {}", message),
        }
    }
}

/// Compare dotted versions numerically over three components; missing parts count as 0.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parts = |v: &str| -> [u64; 3] {
        let mut out = [0u64; 3];
        for (slot, part) in out.iter_mut().zip(v.trim().split('.')) {
            *slot = part.trim().parse().unwrap_or(0);
        }
        out
    };
    parts(a).cmp(&parts(b))
}

pub struct UpdateChecker {
    http_client: reqwest::Client,
    config: UpdateCheckConfig,
    cache_path: PathBuf,
    current_version: String,
}

impl UpdateChecker {
    pub fn new(config: UpdateCheckConfig, cache_path: impl Into<PathBuf>) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http_client,
            config,
            cache_path: cache_path.into(),
            current_version: crate::VERSION.to_string(),
        }
    }

    pub fn with_current_version(mut self, version: impl Into<String>) -> Self {
        self.current_version = version.into();
        self
    }

    /// Check for a newer version, reusing a fresh cache unless `force` is set.
    pub async fn check(&self, force: bool) -> Option<UpdateInfo> {
        if !self.config.enabled {
            return None;
        }
        if !force {
            if let Some(cached) = self.fresh_cache() {
                log::debug!("Highlighter: using cached update check");
                return Some(self.info_for(&cached.latest_version, cached.update_message));
            }
        }

        let manifest = match self.fetch_manifest().await {
            Ok(manifest) => manifest,
            Err(err) => {
                log::warn!("Highlighter: update check failed: {}", err);
                return None;
            }
        };
        let Some(latest) = manifest.version.filter(|v| !v.trim().is_empty()) else {
            log::warn!("Highlighter: update manifest has no version");
            return None;
        };

        let info = self.info_for(&latest, manifest.update_message.clone());
        self.write_cache(&UpdateCache {
            timestamp: now_ms(),
            latest_version: latest.clone(),
            update_message: manifest.update_message,
            has_update: info.version.is_some(),
        });
        log::info!(
            "Highlighter: current {}, latest {}",
            self.current_version,
            latest
        );
        Some(info)
    }

    fn info_for(&self, latest: &str, update_message: String) -> UpdateInfo {
        let newer = compare_versions(latest, &self.current_version) == Ordering::Greater;
        UpdateInfo {
            version: newer.then(|| latest.to_string()),
            update_message,
        }
    }

    async fn fetch_manifest(&self) -> Result<RemoteManifest, UpdateCheckError> {
        let response = self
            .http_client
            .get(&self.config.manifest_url)
            .query(&[("t", now_ms().to_string())])
            .send()
            .await
            .map_err(|e| UpdateCheckError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpdateCheckError::Status(status.as_u16()));
        }

        response
            .json::<RemoteManifest>()
            .await
            .map_err(|e| UpdateCheckError::Manifest(e.to_string()))
    }

    fn fresh_cache(&self) -> Option<UpdateCache> {
        let contents = fs::read_to_string(&self.cache_path).ok()?;
        let cache: UpdateCache = serde_json::from_str(&contents).ok()?;
        let age = now_ms().saturating_sub(cache.timestamp);
        (age < self.config.check_interval.as_millis() as u64).then_some(cache)
    }

    fn write_cache(&self, cache: &UpdateCache) {
        let Ok(serialized) = serde_json::to_string(cache) else {
            return;
        };
        if let Some(parent) = self.cache_path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Err(err) = fs::write(&self.cache_path, serialized) {
            log::warn!("Highlighter: failed to write update cache: {}", err);
        }
    }

    /// Forget the cached result (next `check` goes to the network).
    pub fn clear_cache(&self) {
        let _ = fs::remove_file(&self.cache_path);
    }
}
