//! Backup export (JSON envelope, readable text) and import.

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ordering::{OwnerDirectory, owner_name, sort_annotations, sorted_owners, sorted_transcripts};
use super::repair::repair_index;
use super::store::HighlightStore;
use super::types::{Bucket, BucketKey, HighlightIndex, SortOptions};
use super::HighlightError;

pub const EXPORT_FORMAT_VERSION: &str = "1.0.0";

const RULE_HEAVY: &str = "===========================================";
const RULE_BANNER: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";
const RULE_ITEM: &str = "──────────────────────────────────────────";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportScope {
    All,
    Character(String),
    Chat(BucketKey),
}

impl ExportScope {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Character(_) => "character",
            Self::Chat(_) => "chat",
        }
    }

    /// Human-readable scope, as shown in the text export header.
    pub fn title(&self, directory: &dyn OwnerDirectory) -> String {
        match self {
            Self::All => "All".to_string(),
            Self::Character(owner) => owner_name(directory, owner),
            Self::Chat(key) => format!("{} > {}", owner_name(directory, &key.owner), key.transcript),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    Merge,
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportReport {
    pub owners: usize,
    pub annotations: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportEnvelope {
    pub version: String,
    pub export_date: u64,
    pub scope: String,
    pub highlights: Value,
}

/// The part of the index covered by `scope`.
pub fn scoped_index(index: &HighlightIndex, scope: &ExportScope) -> Result<HighlightIndex, HighlightError> {
    match scope {
        ExportScope::All => Ok(index.clone()),
        ExportScope::Character(owner) => {
            let chats = index
                .owners
                .get(owner)
                .ok_or_else(|| HighlightError::not_found(format!("no highlights for {}", owner)))?;
            let mut scoped = HighlightIndex::default();
            scoped.owners.insert(owner.clone(), chats.clone());
            scoped.preserved = index
                .preserved
                .iter()
                .filter(|entry| &entry.owner == owner)
                .cloned()
                .collect();
            Ok(scoped)
        }
        ExportScope::Chat(key) => {
            let bucket = index.bucket(&key.owner, &key.transcript).ok_or_else(|| {
                HighlightError::not_found(format!(
                    "no highlights for {}/{}",
                    key.owner, key.transcript
                ))
            })?;
            let mut scoped = HighlightIndex::default();
            scoped
                .owners
                .entry(key.owner.clone())
                .or_default()
                .insert(key.transcript.clone(), bucket.clone());
            Ok(scoped)
        }
    }
}

/// Pretty-printed JSON backup.
pub fn export_json(
    index: &HighlightIndex,
    scope: &ExportScope,
    export_date: u64,
) -> Result<String, HighlightError> {
    let scoped = scoped_index(index, scope)?;
    let envelope = ExportEnvelope {
        version: EXPORT_FORMAT_VERSION.to_string(),
        export_date,
        scope: scope.kind().to_string(),
        highlights: serde_json::to_value(&scoped)?,
    };
    Ok(serde_json::to_string_pretty(&envelope)?)
}

/// Readable backup grouped by owner and transcript.
pub fn export_text<Tz>(
    index: &HighlightIndex,
    scope: &ExportScope,
    sort: &SortOptions,
    directory: &dyn OwnerDirectory,
    generated_at: &DateTime<Tz>,
) -> Result<String, HighlightError>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let scoped = scoped_index(index, scope)?;
    let mut content = String::new();
    let mut total_highlights = 0usize;
    let mut total_owners = 0usize;
    let mut total_chats = 0usize;

    content.push_str(RULE_HEAVY);
    content.push('\n');
    content.push_str("Reading Notes Highlights\n");
    content.push_str(&format!(
        "Generated: {}\n",
        generated_at.format("%Y-%m-%d %H:%M:%S")
    ));
    content.push_str(&format!("Scope: {}\n", scope.title(directory)));
    content.push_str(RULE_HEAVY);
    content.push_str("\n\n");

    for owner in sorted_owners(&scoped, sort.characters, directory) {
        let name = owner_name(directory, owner);
        let transcripts = sorted_transcripts(&scoped, owner, sort.chats);
        if !transcripts.is_empty() {
            total_owners += 1;
        }
        for (transcript, bucket) in transcripts {
            total_chats += 1;
            total_highlights += bucket.highlights.len();
            write_bucket(&mut content, &name, transcript, bucket, sort, generated_at);
        }
    }

    content.push_str(RULE_HEAVY);
    content.push('\n');
    content.push_str(&format!("Total highlights: {}\n", total_highlights));
    content.push_str(&format!("Total characters: {}\n", total_owners));
    content.push_str(&format!("Total chats: {}\n", total_chats));
    content.push_str(RULE_HEAVY);
    content.push('\n');
    Ok(content)
}

fn write_bucket<Tz>(
    content: &mut String,
    owner_name: &str,
    transcript: &str,
    bucket: &Bucket,
    sort: &SortOptions,
    generated_at: &DateTime<Tz>,
) where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    content.push_str(RULE_BANNER);
    content.push('\n');
    content.push_str(&format!("[{} > {}]\n", owner_name, transcript));
    content.push_str(RULE_BANNER);
    content.push_str("\n\n");

    let mut annotations: Vec<_> = bucket.highlights.iter().collect();
    sort_annotations(&mut annotations, sort.highlights);

    for hl in annotations {
        let date = generated_at
            .timezone()
            .timestamp_millis_opt(hl.created_at as i64)
            .single()
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        let label = if hl.label.is_empty() {
            format!("Message #{}", hl.message_index)
        } else {
            hl.label.clone()
        };

        content.push_str(&format!("▌ {} | {}\n", label, date));
        content.push_str(&hl.normalized_text);
        content.push('\n');
        if hl.has_note() {
            content.push_str(&format!("\n📝 Note: {}\n", hl.note));
        }
        content.push('\n');
        content.push_str(RULE_ITEM);
        content.push_str("\n\n");
    }
    content.push('\n');
}

/// `highlights_<scope>_<timestamp>.<ext>` with characters unsafe in file names replaced.
pub fn export_file_name<Tz>(scope_title: &str, extension: &str, at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let safe: String = scope_title
        .chars()
        .map(|c| match c {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect();
    format!(
        "highlights_{}_{}.{}",
        safe,
        at.format("%Y-%m-%dT%H-%M-%S"),
        extension
    )
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|n| n != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Parse an import file and return its `highlights` section.
pub fn parse_import(json: &str) -> Result<Value, HighlightError> {
    let mut document: Value = serde_json::from_str(json)?;
    let Some(object) = document.as_object_mut() else {
        return Err(HighlightError::import("invalid file: not a JSON object"));
    };
    if !object.get("version").is_some_and(is_truthy) {
        return Err(HighlightError::import("invalid file: missing version"));
    }
    match object.remove("highlights") {
        Some(highlights @ Value::Object(_)) => Ok(highlights),
        Some(other) if is_truthy(&other) => Err(HighlightError::import(
            "invalid file: highlights is not an object",
        )),
        _ => Err(HighlightError::import("invalid file: missing highlights")),
    }
}

/// Objects merge key by key; arrays and scalars from `source` replace the target value.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target), Value::Object(source)) => {
            for (key, value) in source {
                let merged = match (target.remove(&key), value) {
                    (Some(existing), value @ Value::Object(_)) => deep_merge(existing, value),
                    (None, value @ Value::Object(_)) => deep_merge(Value::Object(Map::new()), value),
                    (_, value) => value,
                };
                target.insert(key, merged);
            }
            Value::Object(target)
        }
        (_, Value::Object(source)) => deep_merge(Value::Object(Map::new()), Value::Object(source)),
        (_, source) => source,
    }
}

/// Import a backup into the store. On any error the store is left untouched.
pub fn import_highlights(
    store: &mut HighlightStore,
    json: &str,
    mode: ImportMode,
) -> Result<ImportReport, HighlightError> {
    let incoming = parse_import(json)?;
    let merged = match mode {
        ImportMode::Merge => deep_merge(serde_json::to_value(store.index())?, incoming),
        ImportMode::Replace => incoming,
    };
    let index = repair_index(&merged, store.palette());
    let report = ImportReport {
        owners: index.owners.len(),
        annotations: index.annotation_count(),
    };
    store.replace_index(index);
    log::info!(
        "Highlighter: imported highlights ({:?}), {} annotations across {} owners",
        mode,
        report.annotations,
        report.owners
    );
    Ok(report)
}
