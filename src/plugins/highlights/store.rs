//! In-memory annotation store over the settings document.
//!
//! Every mutation stamps the bucket's `lastModified`, hands a snapshot to the configured
//! `SettingsSink` (debounced persistence) and queues a `StoreEvent` for subscribers. The store
//! never renders anything itself.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use super::palette::{PaletteSettings, SLOT_COUNT};
use super::types::{
    Annotation, Bucket, BucketKey, DeleteMode, HighlightIndex, Preferences, Settings,
    chat_memo_key,
};
use super::HighlightError;

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub(crate) fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4())
}

/// Receives a snapshot after every mutation. Implementations coalesce writes.
pub trait SettingsSink: Send + Sync {
    fn schedule(&self, settings: &Settings);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Created { key: BucketKey, id: String },
    Updated { key: BucketKey, id: String },
    Deleted { key: BucketKey, id: String },
    BucketDeleted { key: BucketKey },
    OwnerCleared { owner: String },
    BucketMoved { owner: String, from: String, to: String },
    NotesChanged,
    PaletteChanged,
    PreferencesChanged,
    Replaced,
}

type EventQueue = Mutex<VecDeque<StoreEvent>>;

/// Receiving end of store notifications. Dropping it unsubscribes.
#[derive(Debug, Clone)]
pub struct StoreSubscription {
    queue: Arc<EventQueue>,
}

impl StoreSubscription {
    pub fn drain(&self) -> Vec<StoreEvent> {
        match self.queue.lock() {
            Ok(mut queue) => queue.drain(..).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().map(|q| q.is_empty()).unwrap_or(true)
    }
}

/// Data for a new annotation; id, color and timestamp are filled in by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAnnotation {
    pub message_index: usize,
    pub variant_index: u32,
    pub normalized_text: String,
    pub text_offset: usize,
    pub color_slot: usize,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationPatch {
    pub color_slot: Option<usize>,
    pub note: Option<String>,
}

/// Buckets to try before a full scan when resolving an id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LookupHints {
    pub browsed: Option<BucketKey>,
    pub live: Option<BucketKey>,
}

impl LookupHints {
    pub fn none() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved,
    DestinationOccupied,
    SourceMissing,
}

/// Tab counts of a bucket's annotation list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TabCounts {
    pub all: usize,
    pub notes: usize,
}

pub struct HighlightStore {
    settings: Settings,
    sink: Option<Arc<dyn SettingsSink>>,
    subscribers: Vec<Weak<EventQueue>>,
}

impl HighlightStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            sink: None,
            subscribers: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn SettingsSink>) -> Self {
        self.set_sink(sink);
        self
    }

    pub fn set_sink(&mut self, sink: Arc<dyn SettingsSink>) {
        self.sink = Some(sink);
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn index(&self) -> &HighlightIndex {
        &self.settings.highlights
    }

    pub fn palette(&self) -> &PaletteSettings {
        &self.settings.palette
    }

    pub fn preferences(&self) -> &Preferences {
        &self.settings.preferences
    }

    pub fn subscribe(&mut self) -> StoreSubscription {
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        self.subscribers.push(Arc::downgrade(&queue));
        StoreSubscription { queue }
    }

    pub fn bucket(&self, owner: &str, transcript: &str) -> Option<&Bucket> {
        self.settings.highlights.bucket(owner, transcript)
    }

    /// Resolve an id: browsed bucket, then live bucket, then every bucket.
    pub fn find(&self, id: &str, hints: &LookupHints) -> Option<(BucketKey, &Annotation)> {
        let index = &self.settings.highlights;
        for key in [hints.browsed.as_ref(), hints.live.as_ref()].into_iter().flatten() {
            if let Some(hl) = index
                .bucket(&key.owner, &key.transcript)
                .and_then(|bucket| bucket.highlights.iter().find(|hl| hl.id == id))
            {
                return Some((key.clone(), hl));
            }
        }
        index.buckets().find_map(|(owner, chat, bucket)| {
            bucket
                .highlights
                .iter()
                .find(|hl| hl.id == id)
                .map(|hl| (BucketKey::new(owner, chat), hl))
        })
    }

    pub fn create(
        &mut self,
        owner: &str,
        transcript: &str,
        data: NewAnnotation,
    ) -> Result<Annotation, HighlightError> {
        if owner.is_empty() || transcript.is_empty() {
            return Err(HighlightError::invalid_input("no owner or transcript is open"));
        }
        if data.normalized_text.trim().is_empty() {
            return Err(HighlightError::empty_selection("annotation text is empty"));
        }
        let color = self
            .settings
            .palette
            .color_at(data.color_slot)
            .map(|c| c.bg.clone())
            .ok_or_else(|| {
                HighlightError::invalid_input(format!("color slot {} out of range", data.color_slot))
            })?;

        let mut id = new_id("hl");
        while self.settings.highlights.contains_id(&id) {
            id = new_id("hl");
        }

        for dropped in self.settings.highlights.take_preserved(owner, transcript) {
            log::warn!(
                "Highlighter: replacing unreadable entry {}/{} with new highlights: {}",
                dropped.owner,
                dropped.transcript.as_deref().unwrap_or("*"),
                dropped.value
            );
        }

        let now = now_ms();
        let annotation = Annotation {
            id,
            message_index: data.message_index,
            variant_index: data.variant_index,
            normalized_text: data.normalized_text,
            text_offset: data.text_offset,
            color,
            color_slot: data.color_slot,
            note: String::new(),
            label: data.label,
            created_at: now,
        };

        let bucket = self
            .settings
            .highlights
            .owners
            .entry(owner.to_string())
            .or_default()
            .entry(transcript.to_string())
            .or_insert_with(|| Bucket::new(now));
        bucket.highlights.push(annotation.clone());
        bucket.last_modified = now;

        self.emit(StoreEvent::Created {
            key: BucketKey::new(owner, transcript),
            id: annotation.id.clone(),
        });
        self.persist();
        Ok(annotation)
    }

    pub fn update(
        &mut self,
        id: &str,
        patch: AnnotationPatch,
        hints: &LookupHints,
    ) -> Result<Annotation, HighlightError> {
        let color = match patch.color_slot {
            Some(slot) if slot < SLOT_COUNT => self.settings.palette.color_at(slot).map(|c| c.bg.clone()),
            Some(slot) => {
                return Err(HighlightError::invalid_input(format!(
                    "color slot {} out of range",
                    slot
                )));
            }
            None => None,
        };

        let key = self.locate(id, hints)?;
        let bucket = self.bucket_mut(&key)?;
        let hl = bucket
            .highlights
            .iter_mut()
            .find(|hl| hl.id == id)
            .ok_or_else(|| HighlightError::not_found(format!("highlight {} not found", id)))?;

        if let (Some(slot), Some(color)) = (patch.color_slot, color) {
            hl.color_slot = slot;
            hl.color = color;
        }
        if let Some(note) = patch.note {
            hl.note = note;
        }
        let updated = hl.clone();
        bucket.last_modified = now_ms();

        self.emit(StoreEvent::Updated {
            key,
            id: id.to_string(),
        });
        self.persist();
        Ok(updated)
    }

    pub fn delete(&mut self, id: &str, hints: &LookupHints) -> Result<Annotation, HighlightError> {
        let key = self.locate(id, hints)?;
        let bucket = self.bucket_mut(&key)?;
        let position = bucket
            .highlights
            .iter()
            .position(|hl| hl.id == id)
            .ok_or_else(|| HighlightError::not_found(format!("highlight {} not found", id)))?;
        let removed = bucket.highlights.remove(position);
        bucket.last_modified = now_ms();

        self.emit(StoreEvent::Deleted {
            key,
            id: id.to_string(),
        });
        self.persist();
        Ok(removed)
    }

    /// Remove a whole bucket. Returns the removed annotations.
    pub fn delete_bucket(
        &mut self,
        owner: &str,
        transcript: &str,
    ) -> Result<Vec<Annotation>, HighlightError> {
        let index = &mut self.settings.highlights;
        let chats = index.owners.get_mut(owner).ok_or_else(|| {
            HighlightError::not_found(format!("no highlights for {}/{}", owner, transcript))
        })?;
        let bucket = chats.remove(transcript).ok_or_else(|| {
            HighlightError::not_found(format!("no highlights for {}/{}", owner, transcript))
        })?;
        if chats.is_empty() {
            index.owners.remove(owner);
        }

        self.emit(StoreEvent::BucketDeleted {
            key: BucketKey::new(owner, transcript),
        });
        self.persist();
        Ok(bucket.highlights)
    }

    /// Remove every bucket of an owner. Returns the removed annotations.
    pub fn delete_all_for_owner(&mut self, owner: &str) -> Vec<Annotation> {
        let index = &mut self.settings.highlights;
        let removed: Vec<Annotation> = index
            .owners
            .remove(owner)
            .map(|chats| {
                chats
                    .into_values()
                    .flat_map(|bucket| bucket.highlights)
                    .collect()
            })
            .unwrap_or_default();
        index.preserved.retain(|entry| entry.owner != owner);

        self.emit(StoreEvent::OwnerCleared {
            owner: owner.to_string(),
        });
        self.persist();
        removed
    }

    /// Rename a bucket key. Never overwrites an existing destination bucket; the transcript note
    /// moves along with it.
    pub fn move_bucket(&mut self, owner: &str, from: &str, to: &str) -> MoveOutcome {
        if from == to {
            return MoveOutcome::DestinationOccupied;
        }
        let Some(chats) = self.settings.highlights.owners.get_mut(owner) else {
            return MoveOutcome::SourceMissing;
        };
        if !chats.contains_key(from) {
            return MoveOutcome::SourceMissing;
        }
        if chats.contains_key(to) || self.settings.highlights.is_preserved(owner, to) {
            return MoveOutcome::DestinationOccupied;
        }
        let Some(chats) = self.settings.highlights.owners.get_mut(owner) else {
            return MoveOutcome::SourceMissing;
        };
        let Some(bucket) = chats.remove(from) else {
            return MoveOutcome::SourceMissing;
        };
        chats.insert(to.to_string(), bucket);

        let memos = &mut self.settings.chat_memos;
        if let Some(memo) = memos.remove(&chat_memo_key(owner, from)) {
            memos.entry(chat_memo_key(owner, to)).or_insert(memo);
        }

        log::info!(
            "Highlighter: moved highlights of {} from '{}' to '{}'",
            owner,
            from,
            to
        );
        self.emit(StoreEvent::BucketMoved {
            owner: owner.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        });
        self.persist();
        MoveOutcome::Moved
    }

    /// Host deleted a transcript: drop or keep its bucket per the delete-mode preference.
    pub fn on_transcript_deleted(&mut self, owner: &str, transcript: &str) -> Option<DeleteMode> {
        self.bucket(owner, transcript)?;
        let mode = self.settings.preferences.delete_mode;
        if mode == DeleteMode::Delete {
            if let Err(err) = self.delete_bucket(owner, transcript) {
                log::warn!("Highlighter: failed to drop deleted transcript: {}", err);
            }
        }
        Some(mode)
    }

    pub fn character_memo(&self, owner: &str) -> Option<&str> {
        self.settings.character_memos.get(owner).map(String::as_str)
    }

    pub fn chat_memo(&self, owner: &str, transcript: &str) -> Option<&str> {
        self.settings
            .chat_memos
            .get(&chat_memo_key(owner, transcript))
            .map(String::as_str)
    }

    /// Set an owner note; blank text clears it.
    pub fn set_character_memo(&mut self, owner: &str, memo: &str) {
        let memo = memo.trim();
        if memo.is_empty() {
            self.settings.character_memos.remove(owner);
        } else {
            self.settings
                .character_memos
                .insert(owner.to_string(), memo.to_string());
        }
        self.emit(StoreEvent::NotesChanged);
        self.persist();
    }

    /// Set a transcript note; blank text clears it.
    pub fn set_chat_memo(&mut self, owner: &str, transcript: &str, memo: &str) {
        let key = chat_memo_key(owner, transcript);
        let memo = memo.trim();
        if memo.is_empty() {
            self.settings.chat_memos.remove(&key);
        } else {
            self.settings.chat_memos.insert(key, memo.to_string());
        }
        self.emit(StoreEvent::NotesChanged);
        self.persist();
    }

    pub fn owner_total(&self, owner: &str) -> usize {
        self.settings.highlights.owner_count(owner)
    }

    pub fn tab_counts(&self, owner: &str, transcript: &str) -> TabCounts {
        self.bucket(owner, transcript)
            .map(|bucket| TabCounts {
                all: bucket.highlights.len(),
                notes: bucket.note_count(),
            })
            .unwrap_or_default()
    }

    pub fn update_preferences(&mut self, update: impl FnOnce(&mut Preferences)) {
        update(&mut self.settings.preferences);
        self.emit(StoreEvent::PreferencesChanged);
        self.persist();
    }

    /// Run a palette operation that may remap stored annotations.
    pub fn edit_palette<T>(
        &mut self,
        edit: impl FnOnce(&mut PaletteSettings, &mut HighlightIndex) -> Result<T, HighlightError>,
    ) -> Result<T, HighlightError> {
        let result = edit(&mut self.settings.palette, &mut self.settings.highlights)?;
        self.emit(StoreEvent::PaletteChanged);
        self.persist();
        Ok(result)
    }

    /// Swap in a whole new index (import).
    pub fn replace_index(&mut self, index: HighlightIndex) {
        self.settings.highlights = index;
        self.emit(StoreEvent::Replaced);
        self.persist();
    }

    /// Push the current snapshot to the sink without mutating anything.
    pub fn persist(&self) {
        if let Some(sink) = &self.sink {
            sink.schedule(&self.settings);
        }
    }

    fn locate(&self, id: &str, hints: &LookupHints) -> Result<BucketKey, HighlightError> {
        self.find(id, hints)
            .map(|(key, _)| key)
            .ok_or_else(|| HighlightError::not_found(format!("highlight {} not found", id)))
    }

    fn bucket_mut(&mut self, key: &BucketKey) -> Result<&mut Bucket, HighlightError> {
        self.settings
            .highlights
            .bucket_mut(&key.owner, &key.transcript)
            .ok_or_else(|| {
                HighlightError::not_found(format!(
                    "no highlights for {}/{}",
                    key.owner, key.transcript
                ))
            })
    }

    fn emit(&mut self, event: StoreEvent) {
        self.subscribers.retain(|weak| {
            let Some(queue) = weak.upgrade() else {
                return false;
            };
            if let Ok(mut queue) = queue.lock() {
                queue.push_back(event.clone());
            }
            true
        });
    }
}
