//! Five-slot color palettes, named presets and slot-preserving remapping of stored annotations.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{Annotation, HighlightIndex};
use super::HighlightError;

pub const SLOT_COUNT: usize = 5;
pub const USER_PRESET_COUNT: usize = 5;
pub const FALLBACK_COLOR: &str = "#FFE4B5";
pub const FALLBACK_OPACITY: f64 = 0.8;
const PRESET_BACKUP_VERSION: &str = "2.0";

#[cfg_attr(feature = "typegen", derive(specta::Type))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorSlot {
    pub bg: String,
    pub opacity: f64,
    pub text_color: String,
    /// Inherit the message's own text color instead of `text_color`.
    pub use_default_text_color: bool,
}

impl ColorSlot {
    fn new(bg: &str) -> Self {
        Self {
            bg: bg.to_string(),
            opacity: FALLBACK_OPACITY,
            text_color: "#222".to_string(),
            use_default_text_color: false,
        }
    }

    pub fn background(&self) -> String {
        hex_to_rgba(&self.bg, self.opacity).unwrap_or_else(fallback_background)
    }
}

pub fn default_colors() -> Vec<ColorSlot> {
    ["#FFE4B5", "#D4F1D4", "#E6D5F0", "#C7EBFF", "#FFD4E5"]
        .into_iter()
        .map(ColorSlot::new)
        .collect()
}

#[cfg_attr(feature = "typegen", derive(specta::Type))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    pub name: String,
    /// The built-in preset: colors fixed, opacity editable.
    #[serde(default)]
    pub is_default: bool,
    pub colors: Vec<ColorSlot>,
}

impl Preset {
    pub fn built_in() -> Self {
        Self {
            name: "Default".to_string(),
            is_default: true,
            colors: default_colors(),
        }
    }

    pub fn user(number: usize, colors: Vec<ColorSlot>) -> Self {
        Self {
            name: format!("Preset {}", number),
            is_default: false,
            colors,
        }
    }

    pub fn slot_of(&self, hex: &str) -> Option<usize> {
        self.colors.iter().position(|c| c.bg == hex)
    }
}

/// `{version, presetName, colors}` backup of a single preset.
#[cfg_attr(feature = "typegen", derive(specta::Type))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresetBackup {
    pub version: String,
    pub preset_name: String,
    pub colors: Vec<ColorSlot>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemapReport {
    pub remapped: usize,
    pub unmatched: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaletteSettings {
    /// Mirror of the active preset's colors, kept for older readers of the settings document.
    pub custom_colors: Vec<ColorSlot>,
    pub color_presets: Vec<Preset>,
    pub current_preset_index: usize,
}

impl Default for PaletteSettings {
    fn default() -> Self {
        Self::migrated(None)
    }
}

impl PaletteSettings {
    /// Build the preset list, seeding `Preset 1` from legacy custom colors (which then becomes
    /// the active preset).
    pub fn migrated(legacy: Option<Vec<ColorSlot>>) -> Self {
        let active = if legacy.is_some() { 1 } else { 0 };
        let first_user = legacy
            .map(normalize_colors)
            .unwrap_or_else(default_colors);

        let mut color_presets = vec![Preset::built_in(), Preset::user(1, first_user)];
        for number in 2..=USER_PRESET_COUNT {
            color_presets.push(Preset::user(number, default_colors()));
        }

        let mut palette = Self {
            custom_colors: Vec::new(),
            color_presets,
            current_preset_index: active,
        };
        palette.sync_custom_colors();
        palette
    }

    pub fn from_parts(color_presets: Vec<Preset>, current_preset_index: usize) -> Self {
        let mut palette = Self {
            custom_colors: Vec::new(),
            color_presets,
            current_preset_index,
        };
        if palette.color_presets.is_empty() {
            palette.color_presets.push(Preset::built_in());
        }
        if palette.current_preset_index >= palette.color_presets.len() {
            log::warn!(
                "Highlighter: preset index {} out of range, using 0",
                palette.current_preset_index
            );
            palette.current_preset_index = 0;
        }
        palette.sync_custom_colors();
        palette
    }

    /// The active preset; the built-in one when the preset list is empty.
    pub fn active(&self) -> &Preset {
        static BUILT_IN: OnceLock<Preset> = OnceLock::new();
        self.color_presets
            .get(self.current_preset_index)
            .or_else(|| self.color_presets.first())
            .unwrap_or_else(|| BUILT_IN.get_or_init(Preset::built_in))
    }

    pub fn active_colors(&self) -> &[ColorSlot] {
        &self.active().colors
    }

    pub fn slot_of(&self, hex: &str) -> Option<usize> {
        self.active().slot_of(hex)
    }

    pub fn color_at(&self, slot: usize) -> Option<&ColorSlot> {
        self.active_colors().get(slot)
    }

    /// `rgba(..)` background for a stored color; unknown colors get the fallback.
    pub fn background_for(&self, hex: &str) -> String {
        self.active_colors()
            .iter()
            .find(|c| c.bg == hex)
            .map(ColorSlot::background)
            .unwrap_or_else(fallback_background)
    }

    /// Inline style for a decoration span of `hex`.
    pub fn decoration_style(&self, hex: &str) -> String {
        let mut style = format!("background-color: {}", self.background_for(hex));
        if let Some(slot) = self.active_colors().iter().find(|c| c.bg == hex) {
            if !slot.use_default_text_color {
                style.push_str(&format!("; color: {}", slot.text_color));
            }
        }
        style
    }

    /// Dynamic CSS rules for every slot of the active preset.
    pub fn stylesheet(&self) -> String {
        let mut css = String::new();
        for color in self.active_colors() {
            css.push_str(&format!(
                ".text-highlight[data-color=\"{}\"] {{ --hl-bg-color: {} !important; }}\n",
                color.bg,
                color.background()
            ));
            if !color.use_default_text_color {
                css.push_str(&format!(
                    ".text-highlight[data-color=\"{}\"] {{ color: {} !important; }}\n",
                    color.bg, color.text_color
                ));
            }
        }
        css
    }

    /// Activate another preset and move every annotation to the same slot of the new preset.
    pub fn switch_preset(
        &mut self,
        preset_index: usize,
        highlights: &mut HighlightIndex,
    ) -> Result<RemapReport, HighlightError> {
        let new_colors = self
            .color_presets
            .get(preset_index)
            .map(|p| p.colors.clone())
            .ok_or_else(|| {
                HighlightError::invalid_input(format!("unknown preset index {}", preset_index))
            })?;
        if preset_index == self.current_preset_index {
            return Ok(RemapReport::default());
        }

        let old_colors = self.active_colors().to_vec();
        let report = remap_annotations(highlights, &old_colors, &new_colors, None);

        self.current_preset_index = preset_index;
        self.sync_custom_colors();
        log::info!(
            "Highlighter: switched to preset '{}' ({} remapped, {} unmatched)",
            self.active().name,
            report.remapped,
            report.unmatched
        );
        Ok(report)
    }

    /// Change a slot's color. Editing the active preset rewrites annotations using the old color.
    pub fn set_slot_color(
        &mut self,
        preset_index: usize,
        slot: usize,
        hex: &str,
        highlights: &mut HighlightIndex,
    ) -> Result<(), HighlightError> {
        if !is_hex_color(hex) {
            return Err(HighlightError::invalid_input(format!("invalid color '{}'", hex)));
        }
        let is_active = preset_index == self.current_preset_index;
        let preset = self.editable_preset(preset_index)?;
        if preset.is_default {
            return Err(HighlightError::conflict(
                "colors of the built-in preset cannot be changed",
            ));
        }
        let color = preset
            .colors
            .get_mut(slot)
            .ok_or_else(|| HighlightError::invalid_input(format!("unknown slot {}", slot)))?;
        let old = std::mem::replace(&mut color.bg, hex.to_string());

        if is_active && old != hex {
            for hl in annotations_mut(highlights) {
                if hl.color == old {
                    hl.color = hex.to_string();
                }
            }
        }
        self.sync_custom_colors();
        Ok(())
    }

    pub fn set_slot_opacity(
        &mut self,
        preset_index: usize,
        slot: usize,
        opacity: f64,
    ) -> Result<(), HighlightError> {
        if !(0.0..=1.0).contains(&opacity) {
            return Err(HighlightError::invalid_input(format!(
                "opacity {} outside 0..=1",
                opacity
            )));
        }
        let preset = self.editable_preset(preset_index)?;
        let color = preset
            .colors
            .get_mut(slot)
            .ok_or_else(|| HighlightError::invalid_input(format!("unknown slot {}", slot)))?;
        color.opacity = opacity;
        self.sync_custom_colors();
        Ok(())
    }

    /// `None` inherits the message text color.
    pub fn set_slot_text_color(
        &mut self,
        preset_index: usize,
        slot: usize,
        text_color: Option<&str>,
    ) -> Result<(), HighlightError> {
        let preset = self.editable_preset(preset_index)?;
        if preset.is_default {
            return Err(HighlightError::conflict(
                "colors of the built-in preset cannot be changed",
            ));
        }
        let color = preset
            .colors
            .get_mut(slot)
            .ok_or_else(|| HighlightError::invalid_input(format!("unknown slot {}", slot)))?;
        match text_color {
            Some(text_color) => {
                color.text_color = text_color.to_string();
                color.use_default_text_color = false;
            }
            None => color.use_default_text_color = true,
        }
        self.sync_custom_colors();
        Ok(())
    }

    pub fn rename_preset(&mut self, preset_index: usize, name: &str) -> Result<(), HighlightError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(HighlightError::invalid_input("preset name is empty"));
        }
        let preset = self.editable_preset(preset_index)?;
        if preset.is_default {
            return Err(HighlightError::conflict("the built-in preset cannot be renamed"));
        }
        preset.name = name.to_string();
        Ok(())
    }

    pub fn export_preset(&self) -> PresetBackup {
        let active = self.active();
        PresetBackup {
            version: PRESET_BACKUP_VERSION.to_string(),
            preset_name: active.name.clone(),
            colors: active.colors.clone(),
        }
    }

    /// Load colors from a preset backup into the active preset and remap annotations by slot.
    pub fn import_preset(
        &mut self,
        json: &str,
        highlights: &mut HighlightIndex,
    ) -> Result<RemapReport, HighlightError> {
        let data: Value = serde_json::from_str(json)?;
        let colors = parse_backup_colors(&data)?;

        if self.active().is_default {
            return Err(HighlightError::conflict(
                "colors cannot be imported into the built-in preset; select a user preset first",
            ));
        }

        let old_colors = self.active_colors().to_vec();
        let report = remap_annotations(highlights, &old_colors, &colors, Some(0));
        let index = self.current_preset_index;
        self.color_presets[index].colors = colors;
        self.sync_custom_colors();
        Ok(report)
    }

    fn editable_preset(&mut self, preset_index: usize) -> Result<&mut Preset, HighlightError> {
        self.color_presets.get_mut(preset_index).ok_or_else(|| {
            HighlightError::invalid_input(format!("unknown preset index {}", preset_index))
        })
    }

    pub(crate) fn sync_custom_colors(&mut self) {
        self.custom_colors = self.active_colors().to_vec();
    }
}

fn parse_backup_colors(data: &Value) -> Result<Vec<ColorSlot>, HighlightError> {
    let Some(colors) = data.get("colors").and_then(Value::as_array) else {
        return Err(HighlightError::import("preset backup has no colors"));
    };
    if colors.len() != SLOT_COUNT {
        return Err(HighlightError::import(format!(
            "preset backup must contain exactly {} colors, found {}",
            SLOT_COUNT,
            colors.len()
        )));
    }
    colors
        .iter()
        .map(|color| {
            let complete = color.get("bg").and_then(Value::as_str).is_some_and(|s| !s.is_empty())
                && color.get("opacity").is_some()
                && color
                    .get("textColor")
                    .and_then(Value::as_str)
                    .is_some_and(|s| !s.is_empty())
                && color.get("useDefaultTextColor").is_some();
            if !complete {
                return Err(HighlightError::import("preset backup contains an incomplete color"));
            }
            serde_json::from_value::<ColorSlot>(color.clone()).map_err(HighlightError::from)
        })
        .collect()
}

/// Move every annotation from `old` to the same slot in `new`.
///
/// The stored slot wins when the old preset still has the annotation's color there; otherwise
/// the slot is found by color value. Annotations matching neither go to `fallback_slot`, or are
/// left alone when there is none.
fn remap_annotations(
    highlights: &mut HighlightIndex,
    old: &[ColorSlot],
    new: &[ColorSlot],
    fallback_slot: Option<usize>,
) -> RemapReport {
    let mut report = RemapReport::default();
    for hl in annotations_mut(highlights) {
        let stored = old
            .get(hl.color_slot)
            .is_some_and(|c| c.bg == hl.color)
            .then_some(hl.color_slot);
        let slot = stored
            .or_else(|| old.iter().position(|c| c.bg == hl.color))
            .or(fallback_slot);

        match slot.and_then(|slot| new.get(slot).map(|c| (slot, c))) {
            Some((slot, color)) => {
                hl.color = color.bg.clone();
                hl.color_slot = slot;
                report.remapped += 1;
            }
            None => {
                log::warn!(
                    "Highlighter: color {} of {} not found in previous preset",
                    hl.color,
                    hl.id
                );
                report.unmatched += 1;
            }
        }
    }
    report
}

fn annotations_mut(highlights: &mut HighlightIndex) -> impl Iterator<Item = &mut Annotation> {
    highlights
        .owners
        .values_mut()
        .flat_map(|chats| chats.values_mut())
        .flat_map(|bucket| bucket.highlights.iter_mut())
}

/// Pad with defaults or truncate so a preset always has exactly five slots.
pub fn normalize_colors(mut colors: Vec<ColorSlot>) -> Vec<ColorSlot> {
    if colors.len() != SLOT_COUNT {
        log::warn!(
            "Highlighter: preset has {} colors, normalizing to {}",
            colors.len(),
            SLOT_COUNT
        );
        let defaults = default_colors();
        colors.truncate(SLOT_COUNT);
        colors.extend(defaults.into_iter().skip(colors.len()));
    }
    colors
}

pub fn is_hex_color(hex: &str) -> bool {
    hex.len() == 7 && hex.starts_with('#') && hex[1..].chars().all(|c| c.is_ascii_hexdigit())
}

pub fn hex_to_rgba(hex: &str, opacity: f64) -> Option<String> {
    if !is_hex_color(hex) {
        return None;
    }
    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16).ok();
    Some(format!(
        "rgba({}, {}, {}, {})",
        channel(1..3)?,
        channel(3..5)?,
        channel(5..7)?,
        opacity
    ))
}

fn fallback_background() -> String {
    format!("rgba(255, 228, 181, {})", FALLBACK_OPACITY)
}

#[cfg(test)]
mod tests {
    use super::super::types::Bucket;
    use super::*;

    fn annotation(id: &str, color: &str, slot: usize) -> Annotation {
        Annotation {
            id: id.to_string(),
            message_index: 0,
            variant_index: 0,
            normalized_text: "text".to_string(),
            text_offset: 0,
            color: color.to_string(),
            color_slot: slot,
            note: String::new(),
            label: "A#0".to_string(),
            created_at: 1,
        }
    }

    fn index_with(annotations: Vec<Annotation>) -> HighlightIndex {
        let mut index = HighlightIndex::default();
        let mut bucket = Bucket::new(1);
        bucket.highlights = annotations;
        index
            .owners
            .entry("c".to_string())
            .or_default()
            .insert("chat".to_string(), bucket);
        index
    }

    fn colors_of(index: &HighlightIndex) -> Vec<String> {
        index
            .bucket("c", "chat")
            .unwrap()
            .highlights
            .iter()
            .map(|hl| hl.color.clone())
            .collect()
    }

    #[test]
    fn test_default_palette_layout() {
        let palette = PaletteSettings::default();
        assert_eq!(palette.color_presets.len(), 6);
        assert!(palette.color_presets[0].is_default);
        assert_eq!(palette.current_preset_index, 0);
        assert_eq!(palette.custom_colors, default_colors());
    }

    #[test]
    fn test_active_preset_survives_bad_index_and_empty_list() {
        let mut palette = PaletteSettings::default();
        palette.current_preset_index = 42;
        assert_eq!(palette.active().name, "Default");

        palette.color_presets.clear();
        assert!(palette.active().is_default);
        assert_eq!(palette.active_colors(), default_colors().as_slice());
        assert_eq!(palette.color_at(0).unwrap().bg, FALLBACK_COLOR);
    }

    #[test]
    fn test_legacy_colors_become_active_preset_one() {
        let mut legacy = default_colors();
        legacy[0].bg = "#123456".to_string();
        let palette = PaletteSettings::migrated(Some(legacy));
        assert_eq!(palette.current_preset_index, 1);
        assert_eq!(palette.active_colors()[0].bg, "#123456");
    }

    #[test]
    fn test_background_and_style() {
        let mut palette = PaletteSettings::default();
        assert_eq!(palette.background_for("#D4F1D4"), "rgba(212, 241, 212, 0.8)");
        assert_eq!(palette.background_for("#000000"), "rgba(255, 228, 181, 0.8)");
        assert_eq!(
            palette.decoration_style("#D4F1D4"),
            "background-color: rgba(212, 241, 212, 0.8); color: #222"
        );

        let mut index = HighlightIndex::default();
        palette.switch_preset(2, &mut index).unwrap();
        palette.set_slot_text_color(2, 1, None).unwrap();
        assert_eq!(
            palette.decoration_style("#D4F1D4"),
            "background-color: rgba(212, 241, 212, 0.8)"
        );
    }

    #[test]
    fn test_stylesheet_has_rule_per_slot() {
        let palette = PaletteSettings::default();
        let css = palette.stylesheet();
        assert_eq!(css.lines().count(), 10);
        assert!(css.contains(".text-highlight[data-color=\"#C7EBFF\"] { --hl-bg-color: rgba(199, 235, 255, 0.8) !important; }"));
    }

    #[test]
    fn test_switch_preset_and_back_restores_colors() {
        let mut palette = PaletteSettings::default();
        let mut unused = HighlightIndex::default();
        palette.switch_preset(1, &mut unused).unwrap();
        palette.set_slot_color(1, 0, "#111111", &mut unused).unwrap();
        palette.set_slot_color(1, 2, "#333333", &mut unused).unwrap();
        palette.switch_preset(0, &mut unused).unwrap();

        let mut index = index_with(vec![
            annotation("a", "#FFE4B5", 0),
            annotation("b", "#E6D5F0", 2),
            annotation("c", "#FFD4E5", 4),
        ]);
        let original = colors_of(&index);

        let report = palette.switch_preset(1, &mut index).unwrap();
        assert_eq!(report.remapped, 3);
        assert_eq!(colors_of(&index), vec!["#111111", "#333333", "#FFD4E5"]);

        // Editing a slot nobody uses must not disturb the way back.
        palette.set_slot_color(1, 3, "#444444", &mut index).unwrap();
        palette.switch_preset(0, &mut index).unwrap();
        assert_eq!(colors_of(&index), original);
    }

    #[test]
    fn test_switch_uses_stored_slot_for_duplicate_colors() {
        let mut palette = PaletteSettings::default();
        let mut unused = HighlightIndex::default();
        palette.switch_preset(1, &mut unused).unwrap();
        palette.set_slot_color(1, 3, "#FFE4B5", &mut unused).unwrap();

        let mut index = index_with(vec![annotation("a", "#FFE4B5", 3)]);
        palette.switch_preset(2, &mut index).unwrap();
        let hl = &index.bucket("c", "chat").unwrap().highlights[0];
        assert_eq!(hl.color_slot, 3);
        assert_eq!(hl.color, "#C7EBFF");
    }

    #[test]
    fn test_switch_to_unknown_preset_fails() {
        let mut palette = PaletteSettings::default();
        let mut index = HighlightIndex::default();
        assert!(matches!(
            palette.switch_preset(9, &mut index),
            Err(HighlightError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_built_in_colors_are_immutable_but_opacity_is_not() {
        let mut palette = PaletteSettings::default();
        let mut index = HighlightIndex::default();
        assert!(matches!(
            palette.set_slot_color(0, 0, "#000000", &mut index),
            Err(HighlightError::Conflict { .. })
        ));
        palette.set_slot_opacity(0, 0, 0.5).unwrap();
        assert_eq!(palette.custom_colors[0].opacity, 0.5);
        assert!(palette.set_slot_opacity(0, 0, 1.5).is_err());
    }

    #[test]
    fn test_editing_active_slot_rewrites_annotations() {
        let mut palette = PaletteSettings::default();
        let mut index = index_with(vec![annotation("a", "#D4F1D4", 1)]);
        palette.switch_preset(1, &mut index).unwrap();
        palette.set_slot_color(1, 1, "#00FF00", &mut index).unwrap();
        assert_eq!(colors_of(&index), vec!["#00FF00"]);

        palette.set_slot_color(2, 1, "#0000FF", &mut index).unwrap();
        assert_eq!(colors_of(&index), vec!["#00FF00"]);
    }

    #[test]
    fn test_export_and_import_preset() {
        let mut palette = PaletteSettings::default();
        let mut index = index_with(vec![
            annotation("a", "#E6D5F0", 2),
            annotation("b", "#ABCDEF", 4),
        ]);

        let mut backup = palette.export_preset();
        assert_eq!(backup.version, "2.0");
        assert_eq!(backup.preset_name, "Default");
        backup.colors[2].bg = "#222222".to_string();
        let json = serde_json::to_string(&backup).unwrap();

        assert!(matches!(
            palette.import_preset(&json, &mut index),
            Err(HighlightError::Conflict { .. })
        ));

        palette.switch_preset(1, &mut index).unwrap();
        palette.import_preset(&json, &mut index).unwrap();
        assert_eq!(palette.active_colors()[2].bg, "#222222");
        // Unknown colors fall back to the first slot.
        assert_eq!(colors_of(&index), vec!["#222222", "#FFE4B5"]);
    }

    #[test]
    fn test_import_preset_rejects_incomplete_backups() {
        let mut palette = PaletteSettings::default();
        let mut index = HighlightIndex::default();
        palette.switch_preset(1, &mut index).unwrap();

        let four = serde_json::json!({"colors": default_colors()[..4].to_vec()}).to_string();
        assert!(matches!(
            palette.import_preset(&four, &mut index),
            Err(HighlightError::Import { .. })
        ));

        let incomplete = serde_json::json!({"colors": [
            {"bg": "#111111", "opacity": 1.0, "textColor": "#000"},
            {"bg": "#111111", "opacity": 1.0, "textColor": "#000", "useDefaultTextColor": false},
            {"bg": "#111111", "opacity": 1.0, "textColor": "#000", "useDefaultTextColor": false},
            {"bg": "#111111", "opacity": 1.0, "textColor": "#000", "useDefaultTextColor": false},
            {"bg": "#111111", "opacity": 1.0, "textColor": "#000", "useDefaultTextColor": false}
        ]})
        .to_string();
        assert!(palette.import_preset(&incomplete, &mut index).is_err());
        assert_eq!(palette.active_colors(), default_colors().as_slice());
    }

    #[test]
    fn test_normalize_colors_pads_and_truncates() {
        assert_eq!(normalize_colors(default_colors()[..2].to_vec()).len(), 5);
        let mut many = default_colors();
        many.extend(default_colors());
        assert_eq!(normalize_colors(many).len(), 5);
    }
}
