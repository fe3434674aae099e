//! Load-time repair and migration of the settings document.
//!
//! Missing fields get defaults, malformed nested records are logged and carried along verbatim
//! so a later save writes them back. Nothing found in the document is silently dropped.

use std::collections::{BTreeMap, HashSet};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::palette::{ColorSlot, PaletteSettings, Preset, SLOT_COUNT, normalize_colors};
use super::store::new_id;
use super::types::{Annotation, Bucket, HighlightIndex, Preferences, PreservedEntry, Settings};

const KNOWN_KEYS: &[&str] = &[
    "version",
    "enabled",
    "deleteMode",
    "darkMode",
    "buttonPosition",
    "showFloatingBtn",
    "showWandButton",
    "alwaysHighlightMode",
    "panelPosition",
    "sortOptions",
    "highlights",
    "characterMemos",
    "chatMemos",
    "customColors",
    "colorPresets",
    "currentPresetIndex",
];

/// Turn whatever was stored into a valid `Settings`, stamping the current version.
pub fn repair_settings(value: Value) -> Settings {
    let Value::Object(obj) = value else {
        log::warn!("Highlighter: settings are not an object, using defaults");
        return Settings::default();
    };

    let stored_version = obj.get("version").and_then(Value::as_str).map(str::to_string);
    match stored_version.as_deref() {
        Some(version) if version == crate::VERSION => {}
        other => log::info!(
            "Highlighter: migrating settings from {} to {}",
            other.unwrap_or("pre-1.0.0"),
            crate::VERSION
        ),
    }

    let preferences = repair_preferences(&obj);
    let palette = repair_palette(&obj);
    let highlights = match obj.get("highlights") {
        None | Some(Value::Null) => HighlightIndex::default(),
        Some(value) => repair_index(value, &palette),
    };

    let extra: Map<String, Value> = obj
        .iter()
        .filter(|(key, _)| !KNOWN_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    Settings {
        version: crate::VERSION.to_string(),
        preferences,
        highlights,
        character_memos: repair_memos(obj.get("characterMemos"), "characterMemos"),
        chat_memos: repair_memos(obj.get("chatMemos"), "chatMemos"),
        palette,
        extra,
    }
}

fn field<T: DeserializeOwned>(obj: &Map<String, Value>, key: &str, default: T) -> T {
    match obj.get(key) {
        None | Some(Value::Null) => default,
        Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|err| {
            log::warn!("Highlighter: invalid '{}' in settings ({}), using default", key, err);
            default
        }),
    }
}

fn repair_preferences(obj: &Map<String, Value>) -> Preferences {
    let defaults = Preferences::default();
    Preferences {
        enabled: field(obj, "enabled", defaults.enabled),
        delete_mode: field(obj, "deleteMode", defaults.delete_mode),
        dark_mode: field(obj, "darkMode", defaults.dark_mode),
        button_position: field(obj, "buttonPosition", defaults.button_position),
        show_floating_btn: field(obj, "showFloatingBtn", defaults.show_floating_btn),
        show_wand_button: field(obj, "showWandButton", defaults.show_wand_button),
        always_highlight_mode: field(obj, "alwaysHighlightMode", defaults.always_highlight_mode),
        panel_position: obj.get("panelPosition").filter(|v| !v.is_null()).cloned(),
        sort_options: field(obj, "sortOptions", defaults.sort_options),
    }
}

fn repair_memos(value: Option<&Value>, name: &str) -> BTreeMap<String, String> {
    let Some(value) = value.filter(|v| !v.is_null()) else {
        return BTreeMap::new();
    };
    let Value::Object(entries) = value else {
        log::warn!("Highlighter: '{}' is not an object, starting empty", name);
        return BTreeMap::new();
    };

    entries
        .iter()
        .filter_map(|(key, memo)| match memo {
            Value::String(text) => Some((key.clone(), text.clone())),
            Value::Null => None,
            other => {
                log::warn!("Highlighter: non-text memo {} in '{}', keeping as text", key, name);
                Some((key.clone(), other.to_string()))
            }
        })
        .collect()
}

fn repair_palette(obj: &Map<String, Value>) -> PaletteSettings {
    let legacy: Option<Vec<ColorSlot>> = obj
        .get("customColors")
        .filter(|v| !v.is_null())
        .and_then(|v| serde_json::from_value(v.clone()).ok());

    let Some(Value::Array(raw_presets)) = obj.get("colorPresets") else {
        log::info!("Highlighter: migrating colors to the preset system");
        return PaletteSettings::migrated(legacy);
    };

    let presets: Vec<Preset> = raw_presets
        .iter()
        .enumerate()
        .map(|(index, raw)| match serde_json::from_value::<Preset>(raw.clone()) {
            Ok(mut preset) => {
                preset.colors = normalize_colors(preset.colors);
                preset
            }
            Err(err) => {
                log::warn!("Highlighter: preset {} is invalid ({}), resetting it", index, err);
                if index == 0 {
                    Preset::built_in()
                } else {
                    Preset::user(index, super::palette::default_colors())
                }
            }
        })
        .collect();

    let current = obj
        .get("currentPresetIndex")
        .and_then(Value::as_u64)
        .unwrap_or(0) as usize;
    PaletteSettings::from_parts(presets, current)
}

/// Repair a `highlights` map (owner -> transcript -> bucket).
pub fn repair_index(value: &Value, palette: &PaletteSettings) -> HighlightIndex {
    let mut index = HighlightIndex::default();
    let Value::Object(owners) = value else {
        log::warn!("Highlighter: 'highlights' is not an object, starting empty");
        return index;
    };

    let mut seen_ids = HashSet::new();
    for (owner, chats) in owners {
        let Value::Object(chats) = chats else {
            log::warn!("Highlighter: invalid data for owner {}, keeping it as is", owner);
            index.preserved.push(PreservedEntry {
                owner: owner.clone(),
                transcript: None,
                value: chats.clone(),
            });
            continue;
        };

        for (chat, raw_bucket) in chats {
            let Value::Object(raw_bucket) = raw_bucket else {
                log::warn!(
                    "Highlighter: invalid bucket {}/{}, keeping it as is",
                    owner,
                    chat
                );
                index.preserved.push(PreservedEntry {
                    owner: owner.clone(),
                    transcript: Some(chat.clone()),
                    value: raw_bucket.clone(),
                });
                continue;
            };

            let bucket = repair_bucket(owner, chat, raw_bucket, palette, &mut seen_ids);
            index
                .owners
                .entry(owner.clone())
                .or_default()
                .insert(chat.clone(), bucket);
        }
    }
    index
}

fn repair_bucket(
    owner: &str,
    chat: &str,
    raw: &Map<String, Value>,
    palette: &PaletteSettings,
    seen_ids: &mut HashSet<String>,
) -> Bucket {
    let mut bucket = Bucket::new(
        raw.get("lastModified")
            .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f as u64)))
            .unwrap_or(0),
    );
    bucket.extra = raw
        .iter()
        .filter(|(key, _)| *key != "lastModified" && *key != "highlights")
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    let records: &[Value] = match raw.get("highlights") {
        Some(Value::Array(records)) => records.as_slice(),
        _ => {
            log::warn!(
                "Highlighter: highlights of {}/{} is not an array, converting",
                owner,
                chat
            );
            &[]
        }
    };

    for record in records {
        match repair_annotation(record, palette) {
            Some(mut hl) => {
                if !seen_ids.insert(hl.id.clone()) {
                    let fresh = new_id("hl");
                    log::warn!(
                        "Highlighter: duplicate id {} in {}/{}, renamed to {}",
                        hl.id,
                        owner,
                        chat,
                        fresh
                    );
                    seen_ids.insert(fresh.clone());
                    hl.id = fresh;
                }
                bucket.highlights.push(hl);
            }
            None => {
                log::warn!(
                    "Highlighter: unreadable highlight in {}/{}, keeping it as is",
                    owner,
                    chat
                );
                bucket.preserved.push(record.clone());
            }
        }
    }
    bucket
}

/// Fill fields older records lack, then parse. `None` for records that stay unreadable.
pub fn repair_annotation(record: &Value, palette: &PaletteSettings) -> Option<Annotation> {
    let Value::Object(fields) = record else {
        return None;
    };
    let mut fields = fields.clone();

    for key in ["note", "label"] {
        if fields.get(key).is_none_or(Value::is_null) {
            fields.insert(key.to_string(), Value::String(String::new()));
        }
    }
    for key in ["textOffset", "swipeId"] {
        if fields.get(key).is_none_or(Value::is_null) {
            fields.insert(key.to_string(), Value::from(0));
        }
    }
    if let Some(timestamp) = fields.get("timestamp").and_then(Value::as_f64) {
        if fields.get("timestamp").and_then(Value::as_u64).is_none() && timestamp >= 0.0 {
            fields.insert("timestamp".to_string(), Value::from(timestamp as u64));
        }
    }

    let color = fields.get("color").and_then(Value::as_str).unwrap_or("");
    let slot_valid = fields
        .get("colorIndex")
        .and_then(Value::as_u64)
        .is_some_and(|slot| (slot as usize) < SLOT_COUNT);
    if !slot_valid {
        let slot = palette.slot_of(color).unwrap_or(0);
        fields.insert("colorIndex".to_string(), Value::from(slot));
    }

    let hl: Annotation = serde_json::from_value(Value::Object(fields)).ok()?;
    if hl.id.is_empty() || hl.normalized_text.trim().is_empty() {
        return None;
    }
    Some(hl)
}
