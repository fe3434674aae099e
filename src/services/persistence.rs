//! Settings document on disk plus a debounced writer.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use serde_json::Value;
use tokio::sync::Notify;

use crate::plugins::highlights::{HighlightError, Settings, SettingsSink, repair_settings};

const SAVEDATA_DIR_NAME: &str = "savedata";
pub const SETTINGS_FILE_NAME: &str = "highlighter.json";
pub const UPDATE_CACHE_FILE_NAME: &str = "highlighter_update.json";

/// `<exe_dir>/savedata/highlighter.json`. Falls back to a relative `savedata/` when the
/// executable path is unknown. The directory is created on first save.
pub fn default_settings_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_default()
        .join(SAVEDATA_DIR_NAME)
        .join(SETTINGS_FILE_NAME)
}

/// JSON settings document at a fixed path.
#[derive(Debug, Clone)]
pub struct SettingsFile {
    path: PathBuf,
}

impl SettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Update-check cache, kept next to the settings document.
    pub fn update_cache_path(&self) -> PathBuf {
        self.path.with_file_name(UPDATE_CACHE_FILE_NAME)
    }

    /// Read and repair the document. A missing file yields defaults; an unreadable one is
    /// copied aside to `*.json.bak` before defaults are used.
    pub fn load(&self) -> Settings {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::info!("Highlighter: no settings at {}, using defaults", self.path.display());
                return Settings::default();
            }
            Err(err) => {
                log::warn!("Highlighter: failed to read {}: {}", self.path.display(), err);
                return Settings::default();
            }
        };

        match serde_json::from_str::<Value>(&contents) {
            Ok(value) => {
                let settings = repair_settings(value);
                log::info!(
                    "Highlighter: settings loaded, {} annotations",
                    settings.highlights.annotation_count()
                );
                settings
            }
            Err(err) => {
                let backup = self.path.with_extension("json.bak");
                log::warn!(
                    "Highlighter: settings are not valid JSON ({}), keeping a copy at {}",
                    err,
                    backup.display()
                );
                if let Err(err) = fs::copy(&self.path, &backup) {
                    log::warn!("Highlighter: failed to back up settings: {}", err);
                }
                Settings::default()
            }
        }
    }

    /// Write atomically: `*.json.tmp` first, then rename over the document.
    pub fn save(&self, settings: &Settings) -> Result<(), HighlightError> {
        let serialized = serde_json::to_string_pretty(settings)
            .map_err(|e| HighlightError::storage(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, serialized)?;
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

/// Debounced persistence: the newest scheduled snapshot wins, written after a quiet period.
#[derive(Clone)]
pub struct PersistQueue {
    inner: Arc<PersistQueueInner>,
}

struct PersistQueueInner {
    file: SettingsFile,
    debounce: Duration,
    pending: ArcSwapOption<Settings>,
    notify: Notify,
    io_lock: Mutex<()>,
    writes: AtomicU64,
}

impl PersistQueue {
    pub fn new(file: SettingsFile, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(PersistQueueInner {
                file,
                debounce,
                pending: ArcSwapOption::empty(),
                notify: Notify::new(),
                io_lock: Mutex::new(()),
                writes: AtomicU64::new(0),
            }),
        }
    }

    pub fn file(&self) -> &SettingsFile {
        &self.inner.file
    }

    pub fn has_pending(&self) -> bool {
        self.inner.pending.load().is_some()
    }

    /// Number of snapshots written so far.
    pub fn writes(&self) -> u64 {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Start the background writer on the current tokio runtime.
    pub fn spawn(&self) -> tokio::task::JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            loop {
                queue.inner.notify.notified().await;

                // Debounce: wait for a quiet period after the last update.
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(queue.inner.debounce) => break,
                        _ = queue.inner.notify.notified() => continue,
                    }
                }

                if let Err(err) = queue.flush_now() {
                    log::warn!("Highlighter: failed to save settings: {}", err);
                }
            }
        })
    }

    /// Write the pending snapshot, if any, right away.
    pub fn flush_now(&self) -> Result<bool, HighlightError> {
        let Some(snapshot) = self.inner.pending.swap(None) else {
            return Ok(false);
        };

        let _guard = self
            .inner
            .io_lock
            .lock()
            .map_err(|_| HighlightError::storage("settings writer lock poisoned"))?;
        if let Err(err) = self.inner.file.save(&snapshot) {
            // Keep it for the next attempt unless something newer arrived.
            let _ = self
                .inner
                .pending
                .compare_and_swap(&None::<Arc<Settings>>, Some(snapshot));
            return Err(err);
        }
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

impl SettingsSink for PersistQueue {
    fn schedule(&self, settings: &Settings) {
        self.inner.pending.store(Some(Arc::new(settings.clone())));
        self.inner.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::highlights::HighlightStore;

    fn temp_file(dir: &tempfile::TempDir) -> SettingsFile {
        SettingsFile::new(dir.path().join("savedata").join("highlighter.json"))
    }

    #[test]
    fn test_update_cache_sits_next_to_settings() {
        let file = SettingsFile::new("/data/savedata/custom.json");
        assert_eq!(
            file.update_cache_path(),
            PathBuf::from("/data/savedata/highlighter_update.json")
        );
        let default = default_settings_path();
        assert!(default.ends_with("savedata/highlighter.json"));
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = temp_file(&dir).load();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let file = temp_file(&dir);
        let mut settings = Settings::default();
        settings.character_memos.insert("alice.png".to_string(), "brave".to_string());

        file.save(&settings).unwrap();
        assert!(!file.path().with_extension("json.tmp").exists());
        let loaded = file.load();
        assert_eq!(loaded.character_memos.get("alice.png").map(String::as_str), Some("brave"));
    }

    #[test]
    fn test_corrupt_file_is_backed_up() {
        let dir = tempfile::tempdir().unwrap();
        let file = temp_file(&dir);
        fs::create_dir_all(file.path().parent().unwrap()).unwrap();
        fs::write(file.path(), "{ not json").unwrap();

        let settings = file.load();
        assert_eq!(settings, Settings::default());
        let backup = fs::read_to_string(file.path().with_extension("json.bak")).unwrap();
        assert_eq!(backup, "{ not json");
    }

    #[test]
    fn test_flush_now_writes_latest_snapshot_once() {
        let dir = tempfile::tempdir().unwrap();
        let queue = PersistQueue::new(temp_file(&dir), Duration::from_millis(50));

        let mut first = Settings::default();
        first.chat_memos.insert("a_b".to_string(), "one".to_string());
        let mut second = first.clone();
        second.chat_memos.insert("a_b".to_string(), "two".to_string());
        queue.schedule(&first);
        queue.schedule(&second);

        assert!(queue.flush_now().unwrap());
        assert!(!queue.flush_now().unwrap());
        assert_eq!(queue.writes(), 1);
        let loaded = queue.file().load();
        assert_eq!(loaded.chat_memos.get("a_b").map(String::as_str), Some("two"));
    }

    #[tokio::test]
    async fn test_background_writer_coalesces_bursts() {
        let dir = tempfile::tempdir().unwrap();
        let queue = PersistQueue::new(temp_file(&dir), Duration::from_millis(50));
        let handle = queue.spawn();

        let mut store = HighlightStore::new(Settings::default()).with_sink(Arc::new(queue.clone()));
        for i in 0..5 {
            store.set_character_memo("alice.png", &format!("memo {}", i));
        }

        tokio::time::sleep(Duration::from_millis(400)).await;
        handle.abort();

        assert_eq!(queue.writes(), 1);
        assert!(!queue.has_pending());
        let loaded = queue.file().load();
        assert_eq!(loaded.character_memos.get("alice.png").map(String::as_str), Some("memo 4"));
    }
}
