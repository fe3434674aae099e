use std::sync::Arc;

use tokio::time::MissedTickBehavior;

pub mod plugins;
pub mod services;

pub use plugins::anchoring::{ContentTree, NodeId, SelectionBoundary, SelectionRange};
pub use plugins::highlights::{
    Annotation, BucketKey, ExportScope, HighlightError, HighlightStore, ImportMode, Settings,
};
pub use services::config::HighlighterConfig;
pub use services::host::{ChatHost, HostMessage, Notice, NoticeLevel, Notifier, RenderedMessage};
pub use services::session::{Highlighter, HostEvent, JumpOutcome};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// A session shared between the host's event handlers and the poll task.
pub type SharedSession<H, N> = Arc<tokio::sync::Mutex<Highlighter<H, N>>>;

/// Process-level wiring: settings on disk, the debounced writer, the poll cycle and the update
/// checker.
pub struct Runtime {
    config: HighlighterConfig,
    settings: Settings,
    queue: services::persistence::PersistQueue,
    updates: services::update_check::UpdateChecker,
}

impl Runtime {
    pub fn open(config: HighlighterConfig) -> Self {
        let file = services::persistence::SettingsFile::new(&config.settings_path);
        let settings = file.load();
        log::info!(
            "Highlighter: loaded {} highlights from {}",
            settings.highlights.annotation_count(),
            config.settings_path.display()
        );
        let updates =
            services::update_check::UpdateChecker::new(config.update.clone(), file.update_cache_path());
        let queue = services::persistence::PersistQueue::new(file, config.save_debounce);

        Self {
            config,
            settings,
            queue,
            updates,
        }
    }

    pub fn from_env() -> Self {
        Self::open(HighlighterConfig::from_env())
    }

    pub fn config(&self) -> &HighlighterConfig {
        &self.config
    }

    pub fn updates(&self) -> &services::update_check::UpdateChecker {
        &self.updates
    }

    /// Build a session over the loaded settings; its mutations go through the debounced writer.
    pub fn session<H: ChatHost, N: Notifier>(&self, host: H, notifier: N) -> Highlighter<H, N> {
        Highlighter::new(host, notifier, self.settings.clone()).with_sink(Arc::new(self.queue.clone()))
    }

    /// Start the background writer. Must be called from within a tokio runtime.
    pub fn spawn_writer(&self) -> tokio::task::JoinHandle<()> {
        self.queue.spawn()
    }

    /// Run `Highlighter::poll` every `poll_interval` until the session is dropped.
    /// `on_render` is called whenever the open browse view must re-render.
    pub fn spawn_poller<H, N, F>(
        &self,
        session: &SharedSession<H, N>,
        on_render: F,
    ) -> tokio::task::JoinHandle<()>
    where
        H: ChatHost + Send + 'static,
        N: Notifier + Send + 'static,
        F: Fn() + Send + 'static,
    {
        let session = Arc::downgrade(session);
        let period = self
            .config
            .poll_interval
            .max(services::config::MIN_POLL_INTERVAL);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(session) = session.upgrade() else {
                    log::debug!("Highlighter: session dropped, poll stopped");
                    break;
                };
                let render = session.lock().await.poll();
                if render {
                    on_render();
                }
            }
        })
    }

    /// Write pending changes immediately (e.g. on shutdown).
    pub fn flush(&self) -> Result<bool, HighlightError> {
        self.queue.flush_now()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::plugins::highlights::NewAnnotation;
    use crate::services::host::testing::{FakeHost, RecordingNotifier};

    fn config_in(dir: &tempfile::TempDir) -> HighlighterConfig {
        HighlighterConfig {
            settings_path: dir.path().join("highlighter.json"),
            ..HighlighterConfig::default()
        }
    }

    #[test]
    fn test_session_changes_reach_disk() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Runtime::open(config_in(&dir));

        let mut host = FakeHost::new("charX.png", "chatA");
        host.push("Alice", "<p>Well, Hello, world and goodbye.</p>");
        let mut session = runtime.session(host, RecordingNotifier::confirming());
        session
            .store_mut()
            .update_preferences(|p| p.dark_mode = true);
        assert!(runtime.flush().unwrap());

        let reopened = Runtime::open(config_in(&dir));
        assert!(reopened.settings.preferences.dark_mode);
        assert!(!runtime.flush().unwrap());
    }

    #[tokio::test]
    async fn test_poller_migrates_renamed_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Runtime::open(HighlighterConfig {
            poll_interval: Duration::from_millis(100),
            ..config_in(&dir)
        });

        let mut host = FakeHost::new("charX.png", "chatA");
        host.push("Alice", "<p>Well, Hello, world and goodbye.</p>");
        let mut session = runtime.session(host, RecordingNotifier::confirming());
        session.start();
        session
            .store_mut()
            .create(
                "charX.png",
                "chatA",
                NewAnnotation {
                    message_index: 0,
                    variant_index: 0,
                    normalized_text: "Hello, world".to_string(),
                    text_offset: 6,
                    color_slot: 0,
                    label: "Alice#0".to_string(),
                },
            )
            .unwrap();
        session.view_mut().open();
        session.take_render_request();

        let session: SharedSession<_, _> = Arc::new(tokio::sync::Mutex::new(session));
        let renders = Arc::new(AtomicUsize::new(0));
        let counter = renders.clone();
        let poller = runtime.spawn_poller(&session, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        session.lock().await.host_mut().rename("chatB");
        tokio::time::sleep(Duration::from_millis(350)).await;
        {
            let session = session.lock().await;
            assert!(session.store().bucket("charX.png", "chatA").is_none());
            assert_eq!(
                session.store().bucket("charX.png", "chatB").unwrap().highlights.len(),
                1
            );
        }
        assert!(renders.load(Ordering::SeqCst) >= 1);

        drop(session);
        tokio::time::timeout(Duration::from_secs(2), poller)
            .await
            .unwrap()
            .unwrap();
    }
}
