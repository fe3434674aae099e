//! Session orchestration: host events in, decorations and store mutations out.
//!
//! `Highlighter` owns the store, the browse view and the reconciliation state, and drives the
//! anchoring engine against the host's rendered messages. All handlers run to completion on the
//! caller's thread.

use std::sync::Arc;

use chrono::{DateTime, Local};

use super::host::{ChatHost, Notice, Notifier};
use super::navigation::NavigationController;
use super::reconcile::{ReconcileOutcome, Reconciler, Snapshot};
use crate::plugins::anchoring::{
    Decoration, FlatText, RelocateOutcome, SelectionRange, capture_selection, contains_anchor,
    decorate_range, relocate, remove_decorations, restyle,
};
use crate::plugins::highlights::ordering::owner_name;
use crate::plugins::highlights::transfer::{self, ExportScope, ImportMode, ImportReport};
use crate::plugins::highlights::{
    Annotation, AnnotationPatch, BucketKey, DeleteMode, HighlightError, HighlightStore,
    LookupHints, NewAnnotation, PaletteSettings, HighlightIndex, Settings, SettingsSink,
};

/// Ambient per-session state that is not persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub highlight_mode: bool,
}

/// Lifecycle notifications from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    OwnerChanged,
    TranscriptChanged,
    /// A message was received, sent, edited or switched to another variant.
    MessageRendered { index: usize },
    /// Previously unseen message nodes appeared (lazy loading).
    MessagesAppeared,
    OwnerProfileEdited,
    TranscriptDeleted { transcript: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JumpOutcome {
    Revealed,
    /// Stored text no longer occurs in the message; the caller may offer deletion.
    Stale { id: String },
    /// The owner no longer exists on the host.
    OwnerDeleted,
    /// The host could not switch; the user has to switch manually.
    SwitchFailed,
    MessageUnavailable,
}

/// A rendered export, ready to be written by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFile {
    pub file_name: String,
    pub contents: String,
}

pub struct Highlighter<H: ChatHost, N: Notifier> {
    host: H,
    notifier: N,
    store: HighlightStore,
    view: NavigationController,
    reconciler: Reconciler,
    context: SessionContext,
    render_pending: bool,
}

impl<H: ChatHost, N: Notifier> Highlighter<H, N> {
    pub fn new(host: H, notifier: N, settings: Settings) -> Self {
        let mut store = HighlightStore::new(settings);
        let mut view = NavigationController::new();
        view.attach(&mut store);
        let context = SessionContext {
            highlight_mode: store.preferences().always_highlight_mode,
        };
        Self {
            host,
            notifier,
            store,
            view,
            reconciler: Reconciler::new(),
            context,
            render_pending: false,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn SettingsSink>) -> Self {
        self.store.set_sink(sink);
        self
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn store(&self) -> &HighlightStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut HighlightStore {
        &mut self.store
    }

    pub fn view(&self) -> &NavigationController {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut NavigationController {
        &mut self.view
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Whether the open browse view must re-render since the last call.
    pub fn take_render_request(&mut self) -> bool {
        self.sync_view();
        std::mem::take(&mut self.render_pending)
    }

    /// Let the browse view follow pending store changes.
    fn sync_view(&mut self) {
        if self.view.pump(&self.store) {
            self.render_pending = true;
        }
    }

    /// Take the first snapshot and decorate what is already rendered.
    pub fn start(&mut self) -> usize {
        self.reconciler.prime(Snapshot::observe(&self.host));
        self.view.prime_profiles(&self.store, &self.host);
        self.restore_all()
    }

    pub fn toggle_highlight_mode(&mut self) -> bool {
        self.context.highlight_mode = !self.context.highlight_mode;
        self.context.highlight_mode
    }

    pub fn live_key(&self) -> Option<BucketKey> {
        match (self.host.current_owner(), self.host.current_transcript()) {
            (Some(owner), Some(transcript)) => Some(BucketKey::new(owner, transcript)),
            _ => None,
        }
    }

    fn hints(&self) -> LookupHints {
        self.view.lookup_hints(self.live_key())
    }

    fn decoration_for(&self, annotation: &Annotation) -> Decoration {
        Decoration::new(&annotation.id, &annotation.color)
            .with_style(self.store.palette().decoration_style(&annotation.color))
    }

    fn message_label(&self, index: usize) -> String {
        let Some(message) = self.host.messages().get(index) else {
            return format!("Message #{}", index);
        };
        if message.is_system {
            return "System".to_string();
        }
        let name = if !message.name.is_empty() {
            message.name.clone()
        } else if message.is_user {
            "Me".to_string()
        } else {
            self.host
                .current_owner()
                .map(|owner| owner_name(&self.host, &owner))
                .unwrap_or_default()
        };
        format!("{}#{}", name, index)
    }

    /// Create an annotation from a selection inside message `index` and decorate exactly the
    /// selected characters.
    pub fn create_from_selection(
        &mut self,
        index: usize,
        selection: &SelectionRange,
        color_slot: usize,
    ) -> Result<Annotation, HighlightError> {
        if !self.store.preferences().enabled {
            return Err(HighlightError::conflict("highlighting is disabled"));
        }
        let Some(key) = self.live_key() else {
            self.notifier.notify(Notice::error("Could not read chat info"));
            return Err(HighlightError::host("no chat is open"));
        };
        let rendered = self
            .host
            .rendered(index)
            .ok_or_else(|| HighlightError::host(format!("message {} is not rendered", index)))?;

        let captured = match capture_selection(&rendered.tree, rendered.container, selection) {
            Ok(captured) => captured,
            Err(err) => {
                let err = HighlightError::from(err);
                if matches!(err, HighlightError::EmptySelection { .. }) {
                    self.notifier.notify(Notice::warning(
                        "Select text only (images and code are excluded)",
                    ));
                }
                return Err(err);
            }
        };

        let variant_index = self
            .host
            .messages()
            .get(index)
            .map(|m| m.active_variant)
            .unwrap_or(0);
        let label = self.message_label(index);
        let annotation = self.store.create(
            &key.owner,
            &key.transcript,
            NewAnnotation {
                message_index: index,
                variant_index,
                normalized_text: captured.text,
                text_offset: captured.text_offset,
                color_slot,
                label,
            },
        )?;

        let decoration = self.decoration_for(&annotation);
        if let Some(rendered) = self.host.rendered_mut(index) {
            let flat = FlatText::build(&rendered.tree, rendered.container);
            if let Err(err) = decorate_range(&mut rendered.tree, &flat, captured.range, &decoration) {
                log::warn!("Highlighter: failed to decorate new highlight: {}", err);
            }
        }
        self.sync_view();
        self.notifier.notify(Notice::success("Highlight added"));
        Ok(annotation)
    }

    /// Decorate the live bucket's annotations of one rendered message.
    pub fn restore_message(&mut self, index: usize) -> usize {
        let Some(key) = self.live_key() else {
            return 0;
        };
        let Some(active_variant) = self.host.messages().get(index).map(|m| m.active_variant) else {
            return 0;
        };
        let pending: Vec<(String, Decoration)> = match self.store.bucket(&key.owner, &key.transcript) {
            Some(bucket) => bucket
                .highlights
                .iter()
                .filter(|hl| hl.message_index == index && hl.variant_index == active_variant)
                .map(|hl| (hl.normalized_text.clone(), self.decoration_for(hl)))
                .collect(),
            None => return 0,
        };
        let Some(rendered) = self.host.rendered_mut(index) else {
            return 0;
        };

        let mut decorated = 0;
        for (text, decoration) in pending {
            match relocate(&mut rendered.tree, rendered.container, &text, &decoration) {
                Ok(RelocateOutcome::Decorated { .. }) => decorated += 1,
                Ok(RelocateOutcome::AlreadyDecorated) => {}
                Ok(RelocateOutcome::NotFound) => log::trace!(
                    "Highlighter: {} not found in message {}, will retry",
                    decoration.annotation_id,
                    index
                ),
                Err(err) => log::warn!(
                    "Highlighter: failed to restore {}: {}",
                    decoration.annotation_id,
                    err
                ),
            }
        }
        decorated
    }

    pub fn restore_all(&mut self) -> usize {
        self.host
            .rendered_indices()
            .into_iter()
            .map(|index| self.restore_message(index))
            .sum()
    }

    /// Remove every decoration (optionally of one annotation) from rendered messages.
    fn strip_decorations(&mut self, annotation_id: Option<&str>) {
        for index in self.host.rendered_indices() {
            if let Some(rendered) = self.host.rendered_mut(index) {
                if let Err(err) = remove_decorations(&mut rendered.tree, rendered.container, annotation_id) {
                    log::warn!("Highlighter: failed to remove decorations: {}", err);
                }
            }
        }
    }

    /// Apply a host notification. Returns whether the open browse view should re-render.
    pub fn handle(&mut self, event: HostEvent) -> bool {
        match event {
            HostEvent::OwnerChanged => {
                self.reconciler.prime(Snapshot::observe(&self.host));
                self.restore_all();
            }
            HostEvent::TranscriptChanged => {
                self.reconcile();
                self.restore_all();
            }
            HostEvent::MessageRendered { index } => {
                self.restore_message(index);
            }
            HostEvent::MessagesAppeared => {
                self.restore_all();
            }
            HostEvent::OwnerProfileEdited => {
                self.view.refresh_profiles(&self.store, &self.host);
            }
            HostEvent::TranscriptDeleted { transcript } => {
                if let Some(owner) = self.host.current_owner() {
                    match self.store.on_transcript_deleted(&owner, &transcript) {
                        Some(DeleteMode::Delete) => {
                            self.notifier.notify(Notice::info("Highlights deleted"))
                        }
                        Some(DeleteMode::Keep) => {
                            self.notifier.notify(Notice::info("Highlights kept"))
                        }
                        None => {}
                    }
                }
            }
        }
        self.take_render_request()
    }

    /// Poll cycle: rename detection plus profile edits of visible owners.
    pub fn poll(&mut self) -> bool {
        if self.live_key().is_some() {
            self.reconcile();
        }
        self.view.refresh_profiles(&self.store, &self.host);
        self.take_render_request()
    }

    fn reconcile(&mut self) -> ReconcileOutcome {
        let outcome = self
            .reconciler
            .reconcile(Snapshot::observe(&self.host), &mut self.store);
        if matches!(outcome, ReconcileOutcome::Migrated(_)) {
            self.notifier
                .notify(Notice::success("Highlights synced with the renamed chat"));
        }
        outcome
    }

    pub fn change_color(&mut self, id: &str, color_slot: usize) -> Result<Annotation, HighlightError> {
        let hints = self.hints();
        let updated = self.store.update(
            id,
            AnnotationPatch {
                color_slot: Some(color_slot),
                note: None,
            },
            &hints,
        )?;
        let decoration = self.decoration_for(&updated);
        for index in self.host.rendered_indices() {
            if let Some(rendered) = self.host.rendered_mut(index) {
                restyle(&mut rendered.tree, rendered.container, &decoration);
            }
        }
        self.sync_view();
        self.notifier.notify(Notice::success("Color changed"));
        Ok(updated)
    }

    pub fn set_note(&mut self, id: &str, note: &str) -> Result<Annotation, HighlightError> {
        let hints = self.hints();
        let updated = self.store.update(
            id,
            AnnotationPatch {
                color_slot: None,
                note: Some(note.to_string()),
            },
            &hints,
        )?;
        self.sync_view();
        self.notifier.notify(Notice::success("Note saved"));
        Ok(updated)
    }

    /// Delete one annotation after confirmation. Returns `false` when the user declined.
    pub fn delete_annotation(&mut self, id: &str) -> Result<bool, HighlightError> {
        let hints = self.hints();
        if self.store.find(id, &hints).is_none() {
            return Err(HighlightError::not_found(format!("highlight {} not found", id)));
        }
        if !self.notifier.confirm("Delete this highlight?") {
            return Ok(false);
        }
        self.store.delete(id, &hints)?;
        self.strip_decorations(Some(id));
        self.sync_view();
        self.notifier.notify(Notice::success("Deleted"));
        Ok(true)
    }

    pub fn delete_bucket(&mut self, owner: &str, transcript: &str) -> Result<bool, HighlightError> {
        let count = self
            .store
            .bucket(owner, transcript)
            .map(|b| b.highlights.len())
            .ok_or_else(|| HighlightError::not_found(format!("no highlights for {}/{}", owner, transcript)))?;
        let prompt = format!("Delete all {} highlights of chat \"{}\"?", count, transcript);
        if !self.notifier.confirm(&prompt) {
            return Ok(false);
        }
        let removed = self.store.delete_bucket(owner, transcript)?;
        for hl in &removed {
            self.strip_decorations(Some(&hl.id));
        }
        self.sync_view();
        self.notifier
            .notify(Notice::success("All highlights of the chat deleted"));
        Ok(true)
    }

    pub fn delete_owner(&mut self, owner: &str) -> Result<bool, HighlightError> {
        let count = self.store.owner_total(owner);
        if count == 0 && !self.store.index().owners.contains_key(owner) {
            return Err(HighlightError::not_found(format!("no highlights for {}", owner)));
        }
        let name = owner_name(&self.host, owner);
        let prompt = format!("Delete all {} highlights of \"{}\"?", count, name);
        if !self.notifier.confirm(&prompt) {
            return Ok(false);
        }
        let removed = self.store.delete_all_for_owner(owner);
        for hl in &removed {
            self.strip_decorations(Some(&hl.id));
        }
        self.sync_view();
        self.notifier
            .notify(Notice::success("All highlights of the character deleted"));
        Ok(true)
    }

    /// Run a palette edit, then redraw live decorations with the new colors.
    pub fn edit_palette<T>(
        &mut self,
        edit: impl FnOnce(&mut PaletteSettings, &mut HighlightIndex) -> Result<T, HighlightError>,
    ) -> Result<T, HighlightError> {
        let result = self.store.edit_palette(edit)?;
        self.redraw();
        self.sync_view();
        Ok(result)
    }

    pub fn switch_preset(&mut self, preset_index: usize) -> Result<(), HighlightError> {
        self.edit_palette(|palette, index| palette.switch_preset(preset_index, index))?;
        let name = self.store.palette().active().name.clone();
        self.notifier
            .notify(Notice::success(format!("Switched to {}", name)));
        Ok(())
    }

    fn redraw(&mut self) {
        self.strip_decorations(None);
        self.restore_all();
    }

    /// Navigate the host to an annotation and reveal it.
    pub fn jump_to(&mut self, id: &str) -> Result<JumpOutcome, HighlightError> {
        let (key, annotation) = self
            .store
            .find(id, &self.hints())
            .map(|(key, hl)| (key, hl.clone()))
            .ok_or_else(|| HighlightError::not_found(format!("highlight {} not found", id)))?;

        if self.host.current_owner().as_deref() != Some(key.owner.as_str()) {
            let Some(name) = self.host.display_name(&key.owner) else {
                self.notifier.notify(
                    Notice::warning(
                        "The character of this highlight was deleted. The highlight stays in the panel.",
                    )
                    .titled("Deleted owner"),
                );
                return Ok(JumpOutcome::OwnerDeleted);
            };
            let same_name = self.host.owners_named(&name);
            if same_name.len() > 1 {
                let message = format!(
                    "{} characters are named \"{}\". Select the right one manually, then click the highlight again.",
                    same_name.len(),
                    name
                );
                self.notifier
                    .notify(Notice::error(message.clone()).titled("Cannot switch automatically"));
                return Err(HighlightError::ambiguous(message));
            }
            if let Err(err) = self.host.switch_owner(&key.owner) {
                log::warn!("Highlighter: owner switch failed: {}", err);
                self.notifier
                    .notify(Notice::error(format!("Character switch failed: {}", err.message())));
                return Ok(JumpOutcome::SwitchFailed);
            }
            self.render_pending |= self.handle(HostEvent::OwnerChanged);
        }

        if self.host.current_transcript().as_deref() != Some(key.transcript.as_str()) {
            if let Err(err) = self.host.switch_transcript(&key.transcript) {
                log::warn!("Highlighter: transcript switch failed: {}", err);
                self.notifier.notify(
                    Notice::warning(format!(
                        "This highlight belongs to another chat. Switch to \"{}\" manually and try again.",
                        key.transcript
                    ))
                    .titled("Chat switch failed"),
                );
                return Ok(JumpOutcome::SwitchFailed);
            }
            self.render_pending |= self.handle(HostEvent::TranscriptChanged);
        }

        let index = annotation.message_index;
        if self.host.rendered(index).is_none() {
            self.notifier.notify(Notice::info("Loading message..."));
            if let Err(err) = self.host.load_message(index) {
                log::warn!("Highlighter: could not load message {}: {}", index, err);
                self.notifier.notify(Notice::warning("Message not found"));
                return Ok(JumpOutcome::MessageUnavailable);
            }
            self.restore_message(index);
        }
        let Some(rendered) = self.host.rendered(index) else {
            self.notifier.notify(Notice::warning("Message not found"));
            return Ok(JumpOutcome::MessageUnavailable);
        };

        if !contains_anchor(&rendered.tree, rendered.container, &annotation.normalized_text) {
            log::warn!("Highlighter: {} no longer matches message {}", id, index);
            self.notifier.notify(
                Notice::warning(
                    "The message of this highlight was deleted or changed. Deleting the highlight is recommended.",
                )
                .titled("Highlight mismatch"),
            );
            self.host.reveal(index, None);
            return Ok(JumpOutcome::Stale { id: id.to_string() });
        }

        self.host.reveal(index, Some(id));
        self.notifier.notify(Notice::info("Moved to message"));
        Ok(JumpOutcome::Revealed)
    }

    pub fn export_json(&self, scope: &ExportScope) -> Result<ExportFile, HighlightError> {
        let now = Local::now();
        let contents = transfer::export_json(
            self.store.index(),
            scope,
            now.timestamp_millis().max(0) as u64,
        )?;
        Ok(ExportFile {
            file_name: self.export_file_name(scope, "json", &now),
            contents,
        })
    }

    pub fn export_text(&self, scope: &ExportScope) -> Result<ExportFile, HighlightError> {
        let now = Local::now();
        let contents = transfer::export_text(
            self.store.index(),
            scope,
            &self.store.preferences().sort_options,
            &self.host,
            &now,
        )?;
        Ok(ExportFile {
            file_name: self.export_file_name(scope, "txt", &now),
            contents,
        })
    }

    fn export_file_name(&self, scope: &ExportScope, extension: &str, now: &DateTime<Local>) -> String {
        let title = match scope {
            ExportScope::Chat(key) => format!("{}_{}", owner_name(&self.host, &key.owner), key.transcript),
            other => other.title(&self.host),
        };
        transfer::export_file_name(&title, extension, now)
    }

    pub fn import(&mut self, json: &str, mode: ImportMode) -> Result<ImportReport, HighlightError> {
        match transfer::import_highlights(&mut self.store, json, mode) {
            Ok(report) => {
                self.redraw();
                self.sync_view();
                self.notifier.notify(Notice::success("Import complete"));
                Ok(report)
            }
            Err(err) => {
                self.notifier
                    .notify(Notice::error(format!("File error: {}", err.message())));
                Err(err)
            }
        }
    }
}
