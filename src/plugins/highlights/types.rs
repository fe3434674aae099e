use std::collections::BTreeMap;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use super::palette::PaletteSettings;

/// One highlighted span. Field names follow the persisted settings document.
#[cfg_attr(feature = "typegen", derive(specta::Type))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub id: String,
    #[serde(rename = "mesId")]
    pub message_index: usize,
    #[serde(rename = "swipeId", default)]
    pub variant_index: u32,
    #[serde(rename = "text")]
    pub normalized_text: String,
    #[serde(default)]
    pub text_offset: usize,
    pub color: String,
    #[serde(rename = "colorIndex", default)]
    pub color_slot: usize,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "timestamp")]
    pub created_at: u64,
}

impl Annotation {
    pub fn has_note(&self) -> bool {
        !self.note.trim().is_empty()
    }
}

/// All annotations of one (owner, transcript) pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bucket {
    pub last_modified: u64,
    pub highlights: Vec<Annotation>,
    /// Annotation records that failed to parse; written back untouched.
    pub preserved: Vec<Value>,
    /// Unknown bucket fields.
    pub extra: Map<String, Value>,
}

impl Bucket {
    pub fn new(last_modified: u64) -> Self {
        Self {
            last_modified,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.highlights.is_empty()
    }

    pub fn note_count(&self) -> usize {
        self.highlights.iter().filter(|hl| hl.has_note()).count()
    }
}

struct HighlightSeq<'a>(&'a Bucket);

impl Serialize for HighlightSeq<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let bucket = self.0;
        let mut seq =
            serializer.serialize_seq(Some(bucket.highlights.len() + bucket.preserved.len()))?;
        for hl in &bucket.highlights {
            seq.serialize_element(hl)?;
        }
        for raw in &bucket.preserved {
            seq.serialize_element(raw)?;
        }
        seq.end()
    }
}

impl Serialize for Bucket {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2 + self.extra.len()))?;
        for (key, value) in &self.extra {
            map.serialize_entry(key, value)?;
        }
        map.serialize_entry("lastModified", &self.last_modified)?;
        map.serialize_entry("highlights", &HighlightSeq(self))?;
        map.end()
    }
}

/// A record that failed validation, kept at its original position in the document.
#[derive(Debug, Clone, PartialEq)]
pub struct PreservedEntry {
    pub owner: String,
    /// `None` when the owner entry itself is malformed.
    pub transcript: Option<String>,
    pub value: Value,
}

/// `highlights` section of the settings: owner id -> transcript name -> bucket.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HighlightIndex {
    pub owners: BTreeMap<String, BTreeMap<String, Bucket>>,
    pub preserved: Vec<PreservedEntry>,
}

impl HighlightIndex {
    pub fn bucket(&self, owner: &str, transcript: &str) -> Option<&Bucket> {
        self.owners.get(owner).and_then(|chats| chats.get(transcript))
    }

    pub fn bucket_mut(&mut self, owner: &str, transcript: &str) -> Option<&mut Bucket> {
        self.owners
            .get_mut(owner)
            .and_then(|chats| chats.get_mut(transcript))
    }

    pub fn buckets(&self) -> impl Iterator<Item = (&str, &str, &Bucket)> {
        self.owners.iter().flat_map(|(owner, chats)| {
            chats
                .iter()
                .map(move |(chat, bucket)| (owner.as_str(), chat.as_str(), bucket))
        })
    }

    pub fn annotation_count(&self) -> usize {
        self.buckets().map(|(_, _, bucket)| bucket.highlights.len()).sum()
    }

    pub fn owner_count(&self, owner: &str) -> usize {
        self.owners
            .get(owner)
            .map(|chats| chats.values().map(|b| b.highlights.len()).sum())
            .unwrap_or(0)
    }

    /// Whether a raw entry is kept at `owner/transcript` (or for the whole owner).
    pub fn is_preserved(&self, owner: &str, transcript: &str) -> bool {
        self.preserved.iter().any(|p| {
            p.owner == owner && p.transcript.as_deref().is_none_or(|chat| chat == transcript)
        })
    }

    /// Drop raw entries that would be written over a real bucket at `owner/transcript`.
    pub fn take_preserved(&mut self, owner: &str, transcript: &str) -> Vec<PreservedEntry> {
        let (taken, kept) = std::mem::take(&mut self.preserved)
            .into_iter()
            .partition(|p: &PreservedEntry| {
                p.owner == owner && p.transcript.as_deref().is_none_or(|chat| chat == transcript)
            });
        self.preserved = kept;
        taken
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.buckets()
            .any(|(_, _, bucket)| bucket.highlights.iter().any(|hl| hl.id == id))
    }
}

impl Serialize for HighlightIndex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut owners: BTreeMap<&str, Value> = BTreeMap::new();
        for (owner, chats) in &self.owners {
            let mut entry = Map::new();
            for (chat, bucket) in chats {
                let value = serde_json::to_value(bucket).map_err(serde::ser::Error::custom)?;
                entry.insert(chat.clone(), value);
            }
            owners.insert(owner.as_str(), Value::Object(entry));
        }
        for preserved in &self.preserved {
            match &preserved.transcript {
                None => {
                    owners.insert(preserved.owner.as_str(), preserved.value.clone());
                }
                Some(chat) => {
                    let entry = owners
                        .entry(preserved.owner.as_str())
                        .or_insert_with(|| Value::Object(Map::new()));
                    if let Value::Object(entry) = entry {
                        entry.insert(chat.clone(), preserved.value.clone());
                    }
                }
            }
        }
        owners.serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    pub owner: String,
    pub transcript: String,
}

impl BucketKey {
    pub fn new(owner: impl Into<String>, transcript: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            transcript: transcript.into(),
        }
    }

    /// Key of the per-transcript note in `chatMemos`.
    pub fn memo_key(&self) -> String {
        chat_memo_key(&self.owner, &self.transcript)
    }
}

pub fn chat_memo_key(owner: &str, transcript: &str) -> String {
    format!("{}_{}", owner, transcript)
}

#[cfg_attr(feature = "typegen", derive(specta::Type))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteMode {
    #[default]
    Keep,
    Delete,
}

/// Owner and transcript list ordering.
#[cfg_attr(feature = "typegen", derive(specta::Type))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListSort {
    #[default]
    Modified,
    Name,
}

/// Annotation list ordering: newest first, or reading order.
#[cfg_attr(feature = "typegen", derive(specta::Type))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationSort {
    #[default]
    Created,
    Message,
}

#[cfg_attr(feature = "typegen", derive(specta::Type))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SortOptions {
    pub characters: ListSort,
    pub chats: ListSort,
    pub highlights: AnnotationSort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub enabled: bool,
    pub delete_mode: DeleteMode,
    pub dark_mode: bool,
    pub button_position: String,
    pub show_floating_btn: bool,
    pub show_wand_button: bool,
    pub always_highlight_mode: bool,
    /// Opaque `{top, left}` of the panel, owned by the host UI.
    pub panel_position: Option<Value>,
    pub sort_options: SortOptions,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            enabled: true,
            delete_mode: DeleteMode::Keep,
            dark_mode: false,
            button_position: "bottom-right".to_string(),
            show_floating_btn: true,
            show_wand_button: true,
            always_highlight_mode: false,
            panel_position: None,
            sort_options: SortOptions::default(),
        }
    }
}

/// The whole persisted settings document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub version: String,
    #[serde(flatten)]
    pub preferences: Preferences,
    pub highlights: HighlightIndex,
    pub character_memos: BTreeMap<String, String>,
    pub chat_memos: BTreeMap<String, String>,
    #[serde(flatten)]
    pub palette: PaletteSettings,
    /// Unknown top-level keys.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: crate::VERSION.to_string(),
            preferences: Preferences::default(),
            highlights: HighlightIndex::default(),
            character_memos: BTreeMap::new(),
            chat_memos: BTreeMap::new(),
            palette: PaletteSettings::default(),
            extra: Map::new(),
        }
    }
}
