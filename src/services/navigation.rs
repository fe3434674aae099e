//! Browse view state: owner list -> transcript list -> annotation list.
//!
//! The controller owns only selection state and caches; rows are computed from the store on
//! demand. Store notifications arrive through a subscription and are applied by `pump`.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::host::ChatHost;
use crate::plugins::highlights::ordering::{
    bucket_preview, owner_name, sort_annotations, sorted_owners, sorted_transcripts,
};
use crate::plugins::highlights::{
    AnnotationSort, BucketKey, HighlightError, HighlightStore, ListSort, LookupHints, StoreEvent,
    StoreSubscription,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ViewLevel {
    Owners,
    Transcripts,
    Annotations,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AnnotationFilter {
    #[default]
    All,
    WithNotes,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerRow {
    pub owner: String,
    pub name: String,
    pub avatar: Option<String>,
    pub count: usize,
    pub note: Option<String>,
    pub last_modified: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptRow {
    pub transcript: String,
    pub count: usize,
    pub note: Option<String>,
    pub preview: String,
    pub last_modified: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationRow {
    pub id: String,
    pub message_index: usize,
    pub label: String,
    pub text: String,
    pub note: String,
    pub color: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breadcrumb {
    pub owner: Option<String>,
    pub transcript: Option<String>,
}

impl fmt::Display for Breadcrumb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.owner, &self.transcript) {
            (None, _) => write!(f, "All"),
            (Some(owner), None) => write!(f, "{}", owner),
            (Some(owner), Some(transcript)) => write!(f, "{} > {}", owner, transcript),
        }
    }
}

#[derive(Debug, Default)]
pub struct NavigationController {
    owner: Option<String>,
    transcript: Option<String>,
    filter: AnnotationFilter,
    open: bool,
    render_requested: bool,
    subscription: Option<StoreSubscription>,
    profile_cache: HashMap<String, String>,
}

impl NavigationController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to store changes.
    pub fn attach(&mut self, store: &mut HighlightStore) {
        self.subscription = Some(store.subscribe());
    }

    pub fn level(&self) -> ViewLevel {
        match (&self.owner, &self.transcript) {
            (None, _) => ViewLevel::Owners,
            (Some(_), None) => ViewLevel::Transcripts,
            (Some(_), Some(_)) => ViewLevel::Annotations,
        }
    }

    pub fn selected_owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn selected_transcript(&self) -> Option<&str> {
        self.transcript.as_deref()
    }

    pub fn selected_bucket(&self) -> Option<BucketKey> {
        match (&self.owner, &self.transcript) {
            (Some(owner), Some(transcript)) => Some(BucketKey::new(owner, transcript)),
            _ => None,
        }
    }

    pub fn filter(&self) -> AnnotationFilter {
        self.filter
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Open the panel at the level it was left at.
    pub fn open(&mut self) {
        self.open = true;
        self.request_render();
    }

    /// Close the panel. Selection is kept for the next open.
    pub fn close(&mut self) {
        self.open = false;
        self.render_requested = false;
    }

    pub fn show_owners(&mut self) {
        self.owner = None;
        self.transcript = None;
        self.request_render();
    }

    pub fn show_transcripts(&mut self, owner: &str) {
        self.owner = Some(owner.to_string());
        self.transcript = None;
        self.request_render();
    }

    pub fn show_annotations(&mut self, owner: &str, transcript: &str) {
        self.owner = Some(owner.to_string());
        self.transcript = Some(transcript.to_string());
        self.filter = AnnotationFilter::All;
        self.request_render();
    }

    /// One level up.
    pub fn back(&mut self) {
        if self.transcript.take().is_none() {
            self.owner = None;
        }
        self.request_render();
    }

    /// Jump to the live transcript's annotation list.
    pub fn navigate_to_current(
        &mut self,
        live_owner: Option<&str>,
        live_transcript: Option<&str>,
    ) -> Result<(), HighlightError> {
        match (live_owner, live_transcript) {
            (Some(owner), Some(transcript)) => {
                self.show_annotations(owner, transcript);
                Ok(())
            }
            _ => Err(HighlightError::invalid_input("no chat is open")),
        }
    }

    pub fn set_filter(&mut self, filter: AnnotationFilter) {
        if self.filter != filter {
            self.filter = filter;
            self.request_render();
        }
    }

    /// Change the sort order of the current level (persisted in preferences).
    pub fn set_list_sort(&mut self, store: &mut HighlightStore, sort: ListSort) {
        let level = self.level();
        store.update_preferences(|prefs| match level {
            ViewLevel::Owners => prefs.sort_options.characters = sort,
            ViewLevel::Transcripts | ViewLevel::Annotations => prefs.sort_options.chats = sort,
        });
    }

    pub fn set_annotation_sort(&mut self, store: &mut HighlightStore, sort: AnnotationSort) {
        store.update_preferences(|prefs| prefs.sort_options.highlights = sort);
    }

    /// Lookup order for id-only operations: browsed bucket, then the live one.
    pub fn lookup_hints(&self, live: Option<BucketKey>) -> LookupHints {
        LookupHints {
            browsed: self.selected_bucket(),
            live,
        }
    }

    pub fn owner_rows(&self, store: &HighlightStore, host: &impl ChatHost) -> Vec<OwnerRow> {
        let index = store.index();
        let sort = store.preferences().sort_options.characters;
        sorted_owners(index, sort, host)
            .into_iter()
            .map(|owner| {
                let profile = host.owner_profile(owner);
                let last_modified = index
                    .owners
                    .get(owner)
                    .and_then(|chats| chats.values().map(|b| b.last_modified).max())
                    .unwrap_or(0);
                OwnerRow {
                    owner: owner.to_string(),
                    name: owner_name(host, owner),
                    avatar: profile.and_then(|p| p.avatar),
                    count: store.owner_total(owner),
                    note: store.character_memo(owner).map(str::to_string),
                    last_modified,
                }
            })
            .collect()
    }

    pub fn transcript_rows(&self, store: &HighlightStore) -> Vec<TranscriptRow> {
        let Some(owner) = self.owner.as_deref() else {
            return Vec::new();
        };
        let sort = store.preferences().sort_options.chats;
        sorted_transcripts(store.index(), owner, sort)
            .into_iter()
            .map(|(transcript, bucket)| TranscriptRow {
                transcript: transcript.to_string(),
                count: bucket.highlights.len(),
                note: store.chat_memo(owner, transcript).map(str::to_string),
                preview: bucket_preview(bucket),
                last_modified: bucket.last_modified,
            })
            .collect()
    }

    pub fn annotation_rows(&self, store: &HighlightStore) -> Vec<AnnotationRow> {
        let Some(key) = self.selected_bucket() else {
            return Vec::new();
        };
        let Some(bucket) = store.bucket(&key.owner, &key.transcript) else {
            return Vec::new();
        };
        let mut annotations: Vec<_> = bucket
            .highlights
            .iter()
            .filter(|hl| self.filter == AnnotationFilter::All || hl.has_note())
            .collect();
        sort_annotations(&mut annotations, store.preferences().sort_options.highlights);

        annotations
            .into_iter()
            .map(|hl| AnnotationRow {
                id: hl.id.clone(),
                message_index: hl.message_index,
                label: if hl.label.is_empty() {
                    format!("Message #{}", hl.message_index)
                } else {
                    hl.label.clone()
                },
                text: hl.normalized_text.clone(),
                note: hl.note.clone(),
                color: hl.color.clone(),
                created_at: hl.created_at,
            })
            .collect()
    }

    pub fn breadcrumb(&self, host: &impl ChatHost) -> Breadcrumb {
        Breadcrumb {
            owner: self.owner.as_deref().map(|owner| owner_name(host, owner)),
            transcript: self.transcript.clone(),
        }
    }

    /// Apply pending store notifications. Returns whether the open view must re-render.
    pub fn pump(&mut self, store: &HighlightStore) -> bool {
        let events = match &self.subscription {
            Some(subscription) => subscription.drain(),
            None => Vec::new(),
        };
        for event in events {
            self.apply(event, store);
        }
        self.take_render_request()
    }

    fn apply(&mut self, event: StoreEvent, store: &HighlightStore) {
        match event {
            StoreEvent::BucketMoved { owner, from, to } => {
                if self.owner.as_deref() == Some(owner.as_str())
                    && self.transcript.as_deref() == Some(from.as_str())
                {
                    self.transcript = Some(to);
                }
            }
            StoreEvent::BucketDeleted { key } => {
                if self.selected_bucket().as_ref() == Some(&key) {
                    self.transcript = None;
                    if store.owner_total(&key.owner) == 0 {
                        self.owner = None;
                    }
                }
            }
            StoreEvent::OwnerCleared { owner } => {
                if self.owner.as_deref() == Some(owner.as_str()) {
                    self.owner = None;
                    self.transcript = None;
                }
            }
            StoreEvent::Replaced => {
                if let Some(owner) = self.owner.as_deref() {
                    if store.owner_total(owner) == 0 {
                        self.owner = None;
                        self.transcript = None;
                    }
                }
            }
            _ => {}
        }
        self.request_render();
    }

    /// Seed the `name|avatar` cache with the owners currently known.
    pub fn prime_profiles(&mut self, store: &HighlightStore, host: &impl ChatHost) {
        self.profile_cache.clear();
        for owner in store.index().owners.keys() {
            if let Some(profile) = host.owner_profile(owner) {
                self.profile_cache.insert(owner.clone(), profile.cache_key());
            }
        }
    }

    /// Check visible owners for profile edits; requests a re-render when one changed.
    pub fn refresh_profiles(&mut self, store: &HighlightStore, host: &impl ChatHost) -> bool {
        if !self.open {
            return false;
        }
        let visible: Vec<String> = match &self.owner {
            None => store.index().owners.keys().cloned().collect(),
            Some(owner) => vec![owner.clone()],
        };

        let mut changed = false;
        for owner in visible {
            let Some(profile) = host.owner_profile(&owner) else {
                continue;
            };
            let key = profile.cache_key();
            if self.profile_cache.get(&owner) != Some(&key) {
                self.profile_cache.insert(owner, key);
                changed = true;
            }
        }
        if changed {
            self.request_render();
        }
        changed
    }

    pub fn take_render_request(&mut self) -> bool {
        std::mem::take(&mut self.render_requested)
    }

    fn request_render(&mut self) {
        if self.open {
            self.render_requested = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::highlights::{AnnotationPatch, NewAnnotation, Settings};
    use crate::services::host::testing::FakeHost;

    fn add(store: &mut HighlightStore, owner: &str, transcript: &str, message: usize, offset: usize) -> String {
        store
            .create(
                owner,
                transcript,
                NewAnnotation {
                    message_index: message,
                    variant_index: 0,
                    normalized_text: format!("text at {}:{}", message, offset),
                    text_offset: offset,
                    color_slot: 0,
                    label: String::new(),
                },
            )
            .unwrap()
            .id
    }

    fn setup() -> (HighlightStore, NavigationController, FakeHost) {
        let mut store = HighlightStore::new(Settings::default());
        let mut view = NavigationController::new();
        view.attach(&mut store);
        let mut host = FakeHost::new("alice.png", "chat1");
        host.add_owner("bob.png", "Bob");
        (store, view, host)
    }

    #[test]
    fn test_drill_down_and_back() {
        let (_, mut view, _) = setup();
        assert_eq!(view.level(), ViewLevel::Owners);
        view.show_transcripts("alice.png");
        assert_eq!(view.level(), ViewLevel::Transcripts);
        view.show_annotations("alice.png", "chat1");
        assert_eq!(view.level(), ViewLevel::Annotations);
        view.back();
        assert_eq!(view.level(), ViewLevel::Transcripts);
        view.back();
        assert_eq!(view.level(), ViewLevel::Owners);
    }

    #[test]
    fn test_close_preserves_level() {
        let (_, mut view, _) = setup();
        view.open();
        view.show_annotations("alice.png", "chat1");
        view.close();
        view.open();
        assert_eq!(view.level(), ViewLevel::Annotations);
        assert!(view.take_render_request());
    }

    #[test]
    fn test_navigate_to_current_requires_open_chat() {
        let (_, mut view, _) = setup();
        assert!(view.navigate_to_current(Some("alice.png"), None).is_err());
        view.navigate_to_current(Some("alice.png"), Some("chat1")).unwrap();
        assert_eq!(view.selected_bucket(), Some(BucketKey::new("alice.png", "chat1")));
    }

    #[test]
    fn test_rows_and_breadcrumb() {
        let (mut store, mut view, host) = setup();
        add(&mut store, "alice.png", "chat1", 4, 10);
        add(&mut store, "alice.png", "chat1", 2, 0);
        add(&mut store, "bob.png", "x", 0, 0);
        store.set_character_memo("alice.png", "protagonist");

        let owners = view.owner_rows(&store, &host);
        assert_eq!(owners.len(), 2);
        let alice = owners.iter().find(|r| r.owner == "alice.png").unwrap();
        assert_eq!(alice.name, "alice");
        assert_eq!(alice.count, 2);
        assert_eq!(alice.note.as_deref(), Some("protagonist"));

        view.show_transcripts("alice.png");
        let transcripts = view.transcript_rows(&store);
        assert_eq!(transcripts.len(), 1);
        assert_eq!(transcripts[0].count, 2);

        view.set_annotation_sort(&mut store, AnnotationSort::Message);
        view.show_annotations("alice.png", "chat1");
        let rows = view.annotation_rows(&store);
        assert_eq!(rows[0].message_index, 2);
        assert_eq!(rows[0].label, "Message #2");
        assert_eq!(view.breadcrumb(&host).to_string(), "alice > chat1");
    }

    #[test]
    fn test_notes_filter() {
        let (mut store, mut view, _) = setup();
        let id = add(&mut store, "alice.png", "chat1", 0, 0);
        add(&mut store, "alice.png", "chat1", 1, 0);
        store
            .update(
                &id,
                AnnotationPatch {
                    color_slot: None,
                    note: Some("why".to_string()),
                },
                &LookupHints::none(),
            )
            .unwrap();

        view.show_annotations("alice.png", "chat1");
        view.set_filter(AnnotationFilter::WithNotes);
        let rows = view.annotation_rows(&store);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, id);
    }

    #[test]
    fn test_selection_follows_rename() {
        let (mut store, mut view, _) = setup();
        add(&mut store, "alice.png", "chat1", 0, 0);
        view.open();
        view.show_annotations("alice.png", "chat1");
        view.take_render_request();

        store.move_bucket("alice.png", "chat1", "chat2");
        assert!(view.pump(&store));
        assert_eq!(view.selected_transcript(), Some("chat2"));
    }

    #[test]
    fn test_deleted_bucket_pops_selection() {
        let (mut store, mut view, _) = setup();
        add(&mut store, "alice.png", "chat1", 0, 0);
        view.show_annotations("alice.png", "chat1");
        store.delete_bucket("alice.png", "chat1").unwrap();
        view.pump(&store);
        assert_eq!(view.level(), ViewLevel::Owners);
    }

    #[test]
    fn test_closed_view_does_not_request_render() {
        let (mut store, mut view, _) = setup();
        add(&mut store, "alice.png", "chat1", 0, 0);
        assert!(!view.pump(&store));
    }

    #[test]
    fn test_profile_edit_requests_render() {
        let (mut store, mut view, mut host) = setup();
        add(&mut store, "alice.png", "chat1", 0, 0);
        view.prime_profiles(&store, &host);
        view.open();
        view.take_render_request();

        assert!(!view.refresh_profiles(&store, &host));
        host.add_owner("alice.png", "Alicia");
        assert!(view.refresh_profiles(&store, &host));
        assert!(view.take_render_request());
        assert_eq!(view.breadcrumb(&host).to_string(), "All");
    }
}
