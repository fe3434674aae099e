//! Transcript rename detection.
//!
//! The host gives no rename signal, so a rename is inferred: same owner, new transcript name,
//! same message count and identical boundary messages. Both the poll cycle and the
//! transcript-changed event run `Reconciler::reconcile`; the move is skipped whenever the
//! destination bucket already exists, which makes a second run for the same transition a no-op.

use smallvec::SmallVec;

use super::host::{ChatHost, HostMessage};
use crate::plugins::highlights::{HighlightStore, MoveOutcome};

pub const BRANCH_KEYWORDS: [&str; 4] = ["branch", "checkpoint", "fork", "split"];
pub const PREFIX_CHARS: usize = 100;
pub const BOUNDARY_MESSAGES: usize = 3;

type Prefixes = SmallVec<[String; BOUNDARY_MESSAGES]>;

/// Prefixes of the first and last few messages of a transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    first: Prefixes,
    last: Prefixes,
}

impl Fingerprint {
    pub fn of(messages: &[HostMessage]) -> Option<Self> {
        if messages.is_empty() {
            return None;
        }
        let prefix = |m: &HostMessage| m.text.chars().take(PREFIX_CHARS).collect::<String>();
        let tail_start = messages.len().saturating_sub(BOUNDARY_MESSAGES);
        Some(Self {
            first: messages.iter().take(BOUNDARY_MESSAGES).map(prefix).collect(),
            last: messages[tail_start..].iter().map(prefix).collect(),
        })
    }
}

/// What was last observed of the live transcript.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub owner: Option<String>,
    pub transcript: Option<String>,
    pub message_count: usize,
    pub fingerprint: Option<Fingerprint>,
}

impl Snapshot {
    pub fn observe(host: &impl ChatHost) -> Self {
        let messages = host.messages();
        Self {
            owner: host.current_owner(),
            transcript: host.current_transcript(),
            message_count: messages.len(),
            fingerprint: Fingerprint::of(messages),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub owner: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing to compare against, or same transcript as before.
    Unchanged,
    /// Transcript changed but it is not a rename (switch, branch, edit).
    NotRename,
    Migrated(Rename),
    /// Rename detected but nothing to move (no source bucket or already moved).
    NothingToMove(Rename),
    /// Rename detected but the new name already has annotations; both buckets kept.
    DestinationOccupied(Rename),
}

fn introduces_branch_keyword(from: &str, to: &str) -> bool {
    let from = from.to_lowercase();
    let to = to.to_lowercase();
    BRANCH_KEYWORDS
        .iter()
        .any(|keyword| to.contains(keyword) && !from.contains(keyword))
}

/// Decide whether `current` is `previous` under a new name.
pub fn detect_rename(previous: &Snapshot, current: &Snapshot) -> Option<Rename> {
    let owner = current.owner.as_ref()?;
    let from = previous.transcript.as_ref()?;
    let to = current.transcript.as_ref()?;

    if previous.owner.as_ref() != Some(owner) || from == to {
        return None;
    }
    if current.message_count < 1 || current.message_count != previous.message_count {
        return None;
    }
    match (&previous.fingerprint, &current.fingerprint) {
        (Some(before), Some(after)) if before == after => {}
        _ => return None,
    }
    if introduces_branch_keyword(from, to) {
        return None;
    }
    Some(Rename {
        owner: owner.clone(),
        from: from.clone(),
        to: to.clone(),
    })
}

#[derive(Debug, Default)]
pub struct Reconciler {
    last: Option<Snapshot>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<&Snapshot> {
        self.last.as_ref()
    }

    /// Record a snapshot without evaluating it (owner switch, startup).
    pub fn prime(&mut self, snapshot: Snapshot) {
        self.last = Some(snapshot);
    }

    /// Compare `current` with the last snapshot and move the bucket on a rename.
    /// The snapshot is replaced by `current` in every case.
    pub fn reconcile(&mut self, current: Snapshot, store: &mut HighlightStore) -> ReconcileOutcome {
        let previous = self.last.replace(current.clone());
        let Some(previous) = previous else {
            return ReconcileOutcome::Unchanged;
        };
        if previous.owner == current.owner && previous.transcript == current.transcript {
            return ReconcileOutcome::Unchanged;
        }

        let Some(rename) = detect_rename(&previous, &current) else {
            log::debug!(
                "Highlighter: transcript changed {:?} -> {:?}, not a rename",
                previous.transcript,
                current.transcript
            );
            return ReconcileOutcome::NotRename;
        };

        match store.move_bucket(&rename.owner, &rename.from, &rename.to) {
            MoveOutcome::Moved => {
                log::info!(
                    "Highlighter: transcript renamed '{}' -> '{}', highlights migrated",
                    rename.from,
                    rename.to
                );
                ReconcileOutcome::Migrated(rename)
            }
            MoveOutcome::SourceMissing => ReconcileOutcome::NothingToMove(rename),
            MoveOutcome::DestinationOccupied => {
                log::warn!(
                    "Highlighter: '{}' already has highlights, '{}' left in place",
                    rename.to,
                    rename.from
                );
                ReconcileOutcome::DestinationOccupied(rename)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::highlights::{NewAnnotation, Settings};
    use crate::services::host::testing::FakeHost;

    fn chat(owner: &str, transcript: &str, messages: &[&str]) -> FakeHost {
        let mut host = FakeHost::new(owner, transcript);
        for text in messages {
            host.push("Alice", text);
        }
        host
    }

    fn store_with(owner: &str, transcript: &str, count: usize) -> HighlightStore {
        let mut store = HighlightStore::new(Settings::default());
        for i in 0..count {
            store
                .create(
                    owner,
                    transcript,
                    NewAnnotation {
                        message_index: i,
                        variant_index: 0,
                        normalized_text: format!("line {}", i),
                        text_offset: 0,
                        color_slot: 0,
                        label: String::new(),
                    },
                )
                .unwrap();
        }
        store
    }

    const MESSAGES: [&str; 5] = ["one", "two", "three", "four", "five"];

    #[test]
    fn test_rename_migrates_bucket() {
        let mut host = chat("O", "chat1", &MESSAGES);
        let mut store = store_with("O", "chat1", 3);
        store.set_chat_memo("O", "chat1", "memo");
        let mut reconciler = Reconciler::new();
        reconciler.prime(Snapshot::observe(&host));

        host.rename("chat2");
        let outcome = reconciler.reconcile(Snapshot::observe(&host), &mut store);

        assert!(matches!(outcome, ReconcileOutcome::Migrated(_)));
        assert!(store.bucket("O", "chat1").is_none());
        assert_eq!(store.bucket("O", "chat2").unwrap().highlights.len(), 3);
        assert_eq!(store.chat_memo("O", "chat2"), Some("memo"));
    }

    #[test]
    fn test_second_trigger_is_a_no_op() {
        let mut host = chat("O", "chat1", &MESSAGES);
        let mut store = store_with("O", "chat1", 2);
        let before = Snapshot::observe(&host);
        host.rename("chat2");
        let after = Snapshot::observe(&host);

        // Poll and event both evaluate the same transition from the same old snapshot.
        let mut poll = Reconciler::new();
        poll.prime(before.clone());
        let mut event = Reconciler::new();
        event.prime(before);

        assert!(matches!(
            poll.reconcile(after.clone(), &mut store),
            ReconcileOutcome::Migrated(_)
        ));
        assert!(matches!(
            event.reconcile(after.clone(), &mut store),
            ReconcileOutcome::NothingToMove(_)
        ));
        assert_eq!(store.bucket("O", "chat2").unwrap().highlights.len(), 2);
        assert_eq!(poll.reconcile(after, &mut store), ReconcileOutcome::Unchanged);
    }

    #[test]
    fn test_existing_destination_is_not_overwritten() {
        let mut host = chat("O", "chat1", &MESSAGES);
        let mut store = store_with("O", "chat1", 2);
        store
            .create(
                "O",
                "chat2",
                NewAnnotation {
                    message_index: 0,
                    variant_index: 0,
                    normalized_text: "other".to_string(),
                    text_offset: 0,
                    color_slot: 1,
                    label: String::new(),
                },
            )
            .unwrap();
        let mut reconciler = Reconciler::new();
        reconciler.prime(Snapshot::observe(&host));
        host.rename("chat2");

        let outcome = reconciler.reconcile(Snapshot::observe(&host), &mut store);
        assert!(matches!(outcome, ReconcileOutcome::DestinationOccupied(_)));
        assert_eq!(store.bucket("O", "chat1").unwrap().highlights.len(), 2);
        assert_eq!(store.bucket("O", "chat2").unwrap().highlights.len(), 1);
    }

    #[test]
    fn test_count_change_is_not_rename() {
        let host = chat("O", "chat1", &MESSAGES);
        let other = chat("O", "chat2", &MESSAGES[..4]);
        let mut store = store_with("O", "chat1", 1);
        let mut reconciler = Reconciler::new();
        reconciler.prime(Snapshot::observe(&host));

        let outcome = reconciler.reconcile(Snapshot::observe(&other), &mut store);
        assert_eq!(outcome, ReconcileOutcome::NotRename);
        assert!(store.bucket("O", "chat1").is_some());
        assert_eq!(reconciler.last().unwrap().transcript.as_deref(), Some("chat2"));
    }

    #[test]
    fn test_content_change_is_not_rename() {
        let host = chat("O", "chat1", &MESSAGES);
        let other = chat("O", "chat2", &["one", "two", "three", "four", "FIVE"]);
        let mut store = store_with("O", "chat1", 1);
        let mut reconciler = Reconciler::new();
        reconciler.prime(Snapshot::observe(&host));

        assert_eq!(
            reconciler.reconcile(Snapshot::observe(&other), &mut store),
            ReconcileOutcome::NotRename
        );
        assert!(store.bucket("O", "chat2").is_none());
    }

    #[test]
    fn test_branch_keyword_blocks_rename() {
        let mut host = chat("O", "chat1", &MESSAGES);
        let mut store = store_with("O", "chat1", 1);
        let mut reconciler = Reconciler::new();
        reconciler.prime(Snapshot::observe(&host));
        host.rename("Branch #3 - chat1");

        assert_eq!(
            reconciler.reconcile(Snapshot::observe(&host), &mut store),
            ReconcileOutcome::NotRename
        );
        assert!(store.bucket("O", "chat1").is_some());
    }

    #[test]
    fn test_keyword_already_in_old_name_is_allowed() {
        let previous = chat("O", "fork of story", &MESSAGES);
        let current = chat("O", "fork of story (edited)", &MESSAGES);
        assert!(detect_rename(&Snapshot::observe(&previous), &Snapshot::observe(&current)).is_some());
    }

    #[test]
    fn test_empty_transcript_and_owner_change_are_not_renames() {
        let empty_a = chat("O", "a", &[]);
        let empty_b = chat("O", "b", &[]);
        assert!(detect_rename(&Snapshot::observe(&empty_a), &Snapshot::observe(&empty_b)).is_none());

        let mine = chat("O", "a", &MESSAGES);
        let theirs = chat("P", "b", &MESSAGES);
        assert!(detect_rename(&Snapshot::observe(&mine), &Snapshot::observe(&theirs)).is_none());
    }

    #[test]
    fn test_fingerprint_uses_prefixes() {
        let long = "x".repeat(150);
        let mut host = chat("O", "a", &[]);
        host.push("Alice", &format!("{}tail-a", long));
        let fp_a = Fingerprint::of(host.messages()).unwrap();
        host.rerender(0, &format!("{}tail-b", long));
        let fp_b = Fingerprint::of(host.messages()).unwrap();
        assert_eq!(fp_a, fp_b);
        assert!(Fingerprint::of(&[]).is_none());
    }
}
