use crate::dates::{date_range, DateKey};
use crate::model::{
    built_in_color, built_in_palette, is_blank_note, ColorMap, HexColor, HexColorError, NoteMap,
    PaletteEntry,
};
use crate::storage::{
    load_array, load_object, save_json, KeyValueStore, KEY_COLORS, KEY_CUSTOM_MARKERS,
    KEY_MARKERS_V2, KEY_MARKERS_V3, KEY_NOTES,
};
use rand::{distributions::Alphanumeric, Rng};
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};

/// Historical layouts of the per-day color store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorShape {
    /// date -> built-in marker id ("yellow")
    MarkerIds,
    /// date -> built-in or custom palette id
    PaletteIds,
    /// date -> "#rrggbb"
    HexColors,
}

impl ColorShape {
    /// Legacy shapes, consulted newest first when the canonical store is empty.
    pub const LEGACY_CHAIN: [ColorShape; 2] = [ColorShape::PaletteIds, ColorShape::MarkerIds];

    pub fn storage_key(self) -> &'static str {
        match self {
            ColorShape::MarkerIds => KEY_MARKERS_V2,
            ColorShape::PaletteIds => KEY_MARKERS_V3,
            ColorShape::HexColors => KEY_COLORS,
        }
    }

    pub fn resolve(self, raw: &Value, custom: &[PaletteEntry]) -> Option<HexColor> {
        let text = raw.as_str()?;
        match self {
            ColorShape::HexColors => HexColor::parse(text).ok(),
            ColorShape::MarkerIds => built_in_color(text.trim()),
            ColorShape::PaletteIds => resolve_color_reference(text, custom),
        }
    }

    fn convert(self, raw: &serde_json::Map<String, Value>, custom: &[PaletteEntry]) -> Converted {
        let mut out = Converted::default();
        for (key, value) in raw {
            let resolved = DateKey::parse(key)
                .ok()
                .and_then(|k| self.resolve(value, custom).map(|c| (k, c)));
            match resolved {
                Some((k, c)) => {
                    out.colors.insert(k, c);
                }
                None => out.dropped += 1,
            }
        }
        out
    }
}

#[derive(Default)]
struct Converted {
    colors: ColorMap,
    dropped: usize,
}

/// Hex first, then built-in id, then custom palette id.
pub fn resolve_color_reference(text: &str, custom: &[PaletteEntry]) -> Option<HexColor> {
    if let Ok(color) = HexColor::parse(text) {
        return Some(color);
    }
    let id = text.trim();
    built_in_color(id).or_else(|| {
        custom
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.color.clone())
    })
}

/// Drops entries without a usable id or color and keeps the first of each id.
pub fn sanitize_custom_markers(raw: &[Value]) -> Vec<PaletteEntry> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in raw {
        let Some(obj) = item.as_object() else {
            continue;
        };
        let id = obj
            .get("id")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        let color = obj
            .get("color")
            .and_then(Value::as_str)
            .and_then(|c| HexColor::parse(c).ok());
        let Some(color) = color else {
            continue;
        };
        if id.is_empty() || !seen.insert(id.to_string()) {
            continue;
        }
        let label = obj
            .get("label")
            .and_then(Value::as_str)
            .map(str::to_string);
        out.push(PaletteEntry::custom(id.to_string(), color, label));
    }
    out
}

pub fn sanitize_notes(raw: &serde_json::Map<String, Value>) -> (NoteMap, usize) {
    let mut notes = NoteMap::new();
    let mut dropped = 0;
    for (key, value) in raw {
        match (DateKey::parse(key), value.as_str()) {
            (Ok(k), Some(text)) if !is_blank_note(text) => {
                notes.insert(k, text.to_string());
            }
            _ => dropped += 1,
        }
    }
    (notes, dropped)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearScope {
    Colors,
    Notes,
    All,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub migrated_from: Option<ColorShape>,
    pub dropped_colors: usize,
    pub dropped_notes: usize,
}

/// Owner of the per-day color and note maps and of the custom palette.
///
/// Every mutation writes the affected collection through to the backing
/// [`KeyValueStore`] right away. Write failures are logged and otherwise
/// ignored: the in-memory maps stay authoritative for the session.
pub struct AnnotationStore<S: KeyValueStore> {
    store: S,
    colors: ColorMap,
    notes: NoteMap,
    custom: Vec<PaletteEntry>,
    dirty_years: BTreeSet<i32>,
}

impl<S: KeyValueStore> AnnotationStore<S> {
    pub fn load(store: S) -> (Self, LoadReport) {
        let mut report = LoadReport::default();
        let custom = sanitize_custom_markers(&load_array(&store, KEY_CUSTOM_MARKERS));
        let (notes, dropped_notes) = sanitize_notes(&load_object(&store, KEY_NOTES));
        report.dropped_notes = dropped_notes;

        let mut this = AnnotationStore {
            store,
            colors: ColorMap::new(),
            notes,
            custom,
            dirty_years: BTreeSet::new(),
        };

        let canonical = load_object(&this.store, KEY_COLORS);
        if !canonical.is_empty() {
            let converted = ColorShape::HexColors.convert(&canonical, &this.custom);
            this.colors = converted.colors;
            report.dropped_colors = converted.dropped;
            if converted.dropped > 0 {
                tracing::debug!(dropped = converted.dropped, "pruned invalid color entries");
                this.persist_colors();
            }
        } else {
            for shape in ColorShape::LEGACY_CHAIN {
                let legacy = load_object(&this.store, shape.storage_key());
                if legacy.is_empty() {
                    continue;
                }
                let converted = shape.convert(&legacy, &this.custom);
                tracing::info!(
                    from = shape.storage_key(),
                    migrated = converted.colors.len(),
                    dropped = converted.dropped,
                    "migrated legacy color store"
                );
                this.colors = converted.colors;
                report.dropped_colors = converted.dropped;
                report.migrated_from = Some(shape);
                this.persist_colors();
                break;
            }
        }
        if report.dropped_notes > 0 {
            tracing::debug!(dropped = report.dropped_notes, "ignored invalid note entries");
        }
        (this, report)
    }

    pub fn storage(&self) -> &S {
        &self.store
    }

    pub fn colors(&self) -> &ColorMap {
        &self.colors
    }

    pub fn notes(&self) -> &NoteMap {
        &self.notes
    }

    pub fn custom_markers(&self) -> &[PaletteEntry] {
        &self.custom
    }

    pub fn color(&self, key: DateKey) -> Option<&HexColor> {
        self.colors.get(&key)
    }

    pub fn note(&self, key: DateKey) -> Option<&str> {
        self.notes.get(&key).map(String::as_str)
    }

    /// Built-in entries first, then custom entries in insertion order.
    pub fn palette(&self) -> Vec<PaletteEntry> {
        let mut palette = built_in_palette();
        palette.extend(self.custom.iter().cloned());
        palette
    }

    pub fn set_color(&mut self, key: DateKey, color: HexColor) {
        self.colors.insert(key, color);
        self.dirty_years.insert(key.year());
        self.persist_colors();
    }

    pub fn clear_color(&mut self, key: DateKey) {
        self.colors.remove(&key);
        self.dirty_years.insert(key.year());
        self.persist_colors();
    }

    /// Blank text removes the note. Anything else is kept verbatim.
    pub fn set_note(&mut self, key: DateKey, text: &str) {
        if is_blank_note(text) {
            self.clear_note(key);
            return;
        }
        self.notes.insert(key, text.to_string());
        self.dirty_years.insert(key.year());
        self.persist_notes();
    }

    pub fn clear_note(&mut self, key: DateKey) {
        self.notes.remove(&key);
        self.dirty_years.insert(key.year());
        self.persist_notes();
    }

    /// Sets (`Some`) or clears (`None`) every day between the two keys
    /// inclusive and writes the color map once. Returns the touched keys.
    pub fn paint_range(
        &mut self,
        from: DateKey,
        to: DateKey,
        color: Option<&HexColor>,
    ) -> Vec<DateKey> {
        let touched: Vec<DateKey> = date_range(from, to).collect();
        for key in &touched {
            match color {
                Some(c) => {
                    self.colors.insert(*key, c.clone());
                }
                None => {
                    self.colors.remove(key);
                }
            }
            self.dirty_years.insert(key.year());
        }
        self.persist_colors();
        touched
    }

    /// Returns the existing entry when a palette color already matches.
    pub fn add_custom_color(
        &mut self,
        raw: &str,
        label: Option<String>,
    ) -> Result<PaletteEntry, HexColorError> {
        let color = HexColor::parse(raw)?;
        if let Some(existing) = self.palette().into_iter().find(|e| e.color == color) {
            return Ok(existing);
        }
        let id = self.fresh_palette_id();
        let entry = PaletteEntry::custom(id, color, label);
        self.custom.push(entry.clone());
        self.persist_custom();
        tracing::info!(id = %entry.id, color = %entry.color, "added custom color");
        Ok(entry)
    }

    /// Days keep their hex value; only the palette shortcut disappears.
    pub fn remove_custom_color(&mut self, id: &str) -> Option<PaletteEntry> {
        let idx = self.custom.iter().position(|e| e.id == id)?;
        let removed = self.custom.remove(idx);
        self.persist_custom();
        Some(removed)
    }

    /// Full replacement of all three collections, as done by an import.
    pub fn replace_all(&mut self, colors: ColorMap, notes: NoteMap, custom: Vec<PaletteEntry>) {
        self.dirty_years.extend(self.colors.keys().map(DateKey::year));
        self.dirty_years.extend(self.notes.keys().map(DateKey::year));
        self.dirty_years.extend(colors.keys().map(DateKey::year));
        self.dirty_years.extend(notes.keys().map(DateKey::year));
        self.colors = colors;
        self.notes = notes;
        self.custom = custom;
        self.persist_colors();
        self.persist_notes();
        self.persist_custom();
    }

    pub fn clear(&mut self, scope: ClearScope) {
        if matches!(scope, ClearScope::Colors | ClearScope::All) {
            self.dirty_years.extend(self.colors.keys().map(DateKey::year));
            self.colors.clear();
            self.persist_colors();
        }
        if matches!(scope, ClearScope::Notes | ClearScope::All) {
            self.dirty_years.extend(self.notes.keys().map(DateKey::year));
            self.notes.clear();
            self.persist_notes();
        }
    }

    /// Years touched since the last call, for pushing to a remote copy.
    pub fn take_dirty_years(&mut self) -> BTreeSet<i32> {
        std::mem::take(&mut self.dirty_years)
    }

    fn fresh_palette_id(&self) -> String {
        loop {
            let suffix: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(6)
                .map(char::from)
                .collect();
            let id = format!("custom-{}", suffix.to_lowercase());
            if !self.custom.iter().any(|e| e.id == id) && built_in_color(&id).is_none() {
                return id;
            }
        }
    }

    fn persist_colors(&mut self) {
        if let Err(err) = save_json(&mut self.store, KEY_COLORS, &self.colors) {
            tracing::warn!(%err, "color map not persisted");
        }
    }

    fn persist_notes(&mut self) {
        if let Err(err) = save_json(&mut self.store, KEY_NOTES, &self.notes) {
            tracing::warn!(%err, "note map not persisted");
        }
    }

    fn persist_custom(&mut self) {
        if let Err(err) = save_json(&mut self.store, KEY_CUSTOM_MARKERS, &self.custom) {
            tracing::warn!(%err, "custom palette not persisted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use rstest::{fixture, rstest};

    fn key(raw: &str) -> DateKey {
        DateKey::parse(raw).unwrap()
    }

    fn hex(raw: &str) -> HexColor {
        HexColor::parse(raw).unwrap()
    }

    #[fixture]
    fn empty() -> AnnotationStore<MemoryStore> {
        AnnotationStore::load(MemoryStore::new()).0
    }

    fn stored(store: &AnnotationStore<MemoryStore>, k: &str) -> Value {
        serde_json::from_str(&store.storage().get(k).unwrap()).unwrap()
    }

    #[test]
    fn missing_store_loads_empty() {
        let (store, report) = AnnotationStore::load(MemoryStore::new());
        assert!(store.colors().is_empty());
        assert!(store.notes().is_empty());
        assert!(store.custom_markers().is_empty());
        assert_eq!(report, LoadReport::default());
    }

    #[test]
    fn corrupt_store_loads_empty() {
        let backing = MemoryStore::new()
            .with_entry(KEY_COLORS, "{{{")
            .with_entry(KEY_NOTES, "[1,2,3]")
            .with_entry(KEY_CUSTOM_MARKERS, "{\"id\":\"x\"}");
        let (store, _) = AnnotationStore::load(backing);
        assert!(store.colors().is_empty());
        assert!(store.notes().is_empty());
        assert!(store.custom_markers().is_empty());
    }

    #[test]
    fn invalid_entries_are_dropped_and_pruned_on_disk() {
        let backing = MemoryStore::new()
            .with_entry(
                KEY_COLORS,
                r##"{"2025-01-01":"#FFD0D0","2025-1-2":"#ffd0d0","2025-01-03":"red","2025-01-04":7}"##,
            )
            .with_entry(
                KEY_NOTES,
                r#"{"2025-01-01":"  line one\nline two ","2025-01-02":"   ","bad":"x"}"#,
            );
        let (store, report) = AnnotationStore::load(backing);
        assert_eq!(store.colors().len(), 1);
        assert_eq!(store.color(key("2025-01-01")), Some(&hex("#ffd0d0")));
        assert_eq!(store.note(key("2025-01-01")), Some("  line one\nline two "));
        assert_eq!(store.notes().len(), 1);
        assert_eq!(report.dropped_colors, 3);
        assert_eq!(report.dropped_notes, 2);
        assert_eq!(
            stored(&store, KEY_COLORS),
            serde_json::json!({"2025-01-01": "#ffd0d0"})
        );
    }

    #[test]
    fn migrates_built_in_marker_ids() {
        let backing = MemoryStore::new().with_entry(KEY_MARKERS_V2, r#"{"2024-03-10":"yellow"}"#);
        let (store, report) = AnnotationStore::load(backing);
        assert_eq!(report.migrated_from, Some(ColorShape::MarkerIds));
        assert_eq!(store.color(key("2024-03-10")), Some(&hex("#fff3b0")));
        assert_eq!(
            stored(&store, KEY_COLORS),
            serde_json::json!({"2024-03-10": "#fff3b0"})
        );
        // legacy source stays readable
        assert_eq!(
            stored(&store, KEY_MARKERS_V2),
            serde_json::json!({"2024-03-10": "yellow"})
        );
    }

    #[test]
    fn legacy_store_not_consulted_once_canonical_has_data() {
        let backing = MemoryStore::new().with_entry(KEY_MARKERS_V2, r#"{"2024-03-10":"yellow"}"#);
        let (mut store, _) = AnnotationStore::load(backing);
        store.set_color(key("2024-03-10"), hex("#c9f7d5"));
        let backing = MemoryStore::new()
            .with_entry(KEY_MARKERS_V2, r#"{"2024-03-10":"yellow"}"#)
            .with_entry(KEY_COLORS, &store.storage().get(KEY_COLORS).unwrap());
        let (reloaded, report) = AnnotationStore::load(backing);
        assert_eq!(report.migrated_from, None);
        assert_eq!(reloaded.color(key("2024-03-10")), Some(&hex("#c9f7d5")));
    }

    #[test]
    fn migrates_palette_ids_through_custom_markers() {
        let backing = MemoryStore::new()
            .with_entry(
                KEY_CUSTOM_MARKERS,
                r##"[{"id":"custom-abc","color":"#123456","label":"Mine"}]"##,
            )
            .with_entry(
                KEY_MARKERS_V3,
                r##"{"2024-01-01":"custom-abc","2024-01-02":"blue","2024-01-03":"#ABCDEF","2024-01-04":"gone"}"##,
            )
            .with_entry(KEY_MARKERS_V2, r#"{"2020-01-01":"red"}"#);
        let (store, report) = AnnotationStore::load(backing);
        assert_eq!(report.migrated_from, Some(ColorShape::PaletteIds));
        assert_eq!(report.dropped_colors, 1);
        assert_eq!(store.color(key("2024-01-01")), Some(&hex("#123456")));
        assert_eq!(store.color(key("2024-01-02")), Some(&hex("#cfe7ff")));
        assert_eq!(store.color(key("2024-01-03")), Some(&hex("#abcdef")));
        assert!(store.color(key("2020-01-01")).is_none());
    }

    #[rstest]
    fn set_and_clear_persist_immediately(mut empty: AnnotationStore<MemoryStore>) {
        empty.set_color(key("2025-02-01"), hex("#ead7ff"));
        assert_eq!(
            stored(&empty, KEY_COLORS),
            serde_json::json!({"2025-02-01": "#ead7ff"})
        );
        empty.clear_color(key("2025-02-01"));
        assert_eq!(stored(&empty, KEY_COLORS), serde_json::json!({}));
    }

    #[rstest]
    fn blank_note_clears(mut empty: AnnotationStore<MemoryStore>) {
        empty.set_note(key("2025-02-01"), "Dentist\n10:00");
        assert_eq!(empty.note(key("2025-02-01")), Some("Dentist\n10:00"));
        empty.set_note(key("2025-02-01"), " \n\t ");
        assert_eq!(empty.note(key("2025-02-01")), None);
        assert_eq!(stored(&empty, KEY_NOTES), serde_json::json!({}));
    }

    #[rstest]
    fn paint_range_fills_and_erases(mut empty: AnnotationStore<MemoryStore>) {
        let touched =
            empty.paint_range(key("2025-01-07"), key("2025-01-03"), Some(&hex("#ffd0d0")));
        assert_eq!(touched.len(), 5);
        assert_eq!(empty.colors().len(), 5);
        empty.paint_range(key("2025-01-04"), key("2025-01-05"), None);
        assert_eq!(empty.colors().len(), 3);
        assert!(empty.color(key("2025-01-04")).is_none());
    }

    #[rstest]
    fn add_custom_color_reuses_matching_entries(mut empty: AnnotationStore<MemoryStore>) {
        let built_in = empty.add_custom_color("#FFF3B0", None).unwrap();
        assert_eq!(built_in.id, "yellow");
        assert!(empty.custom_markers().is_empty());

        let first = empty.add_custom_color("#0A0B0C", Some("Ink".into())).unwrap();
        let again = empty.add_custom_color("#0a0b0c", None).unwrap();
        assert_eq!(first, again);
        assert_eq!(empty.custom_markers().len(), 1);
        assert!(first.id.starts_with("custom-"));
        assert_eq!(first.label, "Ink");
        assert_eq!(empty.palette().len(), 6);

        assert!(empty.add_custom_color("nope", None).is_err());
    }

    #[rstest]
    fn removing_custom_color_keeps_painted_days(mut empty: AnnotationStore<MemoryStore>) {
        let entry = empty.add_custom_color("#010203", None).unwrap();
        empty.set_color(key("2025-06-01"), entry.color.clone());
        assert_eq!(empty.remove_custom_color(&entry.id), Some(entry.clone()));
        assert!(empty.custom_markers().is_empty());
        assert_eq!(empty.color(key("2025-06-01")), Some(&entry.color));
        assert_eq!(empty.remove_custom_color("yellow"), None);
        assert_eq!(stored(&empty, KEY_CUSTOM_MARKERS), serde_json::json!([]));
    }

    #[rstest]
    fn custom_markers_survive_reload(mut empty: AnnotationStore<MemoryStore>) {
        let entry = empty.add_custom_color("#445566", Some("Slate".into())).unwrap();
        let raw = empty.storage().get(KEY_CUSTOM_MARKERS).unwrap();
        let (reloaded, _) =
            AnnotationStore::load(MemoryStore::new().with_entry(KEY_CUSTOM_MARKERS, &raw));
        assert_eq!(reloaded.custom_markers(), &[entry]);
    }

    #[test]
    fn custom_markers_dedupe_by_id() {
        let raw: Vec<Value> = serde_json::from_str(
            r##"[{"id":"a","color":"#111111"},{"id":"a","color":"#222222"},{"id":" ","color":"#333333"},{"id":"b","color":"bad"},"x"]"##,
        )
        .unwrap();
        let markers = sanitize_custom_markers(&raw);
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].color, hex("#111111"));
        assert_eq!(markers[0].label, "#111111");
    }

    #[rstest]
    fn write_failures_keep_memory_state(mut empty: AnnotationStore<MemoryStore>) {
        empty.storage().fail_writes(true);
        empty.set_color(key("2025-03-03"), hex("#c9f7d5"));
        empty.set_note(key("2025-03-03"), "kept");
        assert_eq!(empty.color(key("2025-03-03")), Some(&hex("#c9f7d5")));
        assert_eq!(empty.note(key("2025-03-03")), Some("kept"));
        assert!(empty.storage().get(KEY_COLORS).is_none());
    }

    #[rstest]
    #[case(ClearScope::Colors, 0, 1)]
    #[case(ClearScope::Notes, 1, 0)]
    #[case(ClearScope::All, 0, 0)]
    fn clear_scopes(
        mut empty: AnnotationStore<MemoryStore>,
        #[case] scope: ClearScope,
        #[case] colors_left: usize,
        #[case] notes_left: usize,
    ) {
        empty.set_color(key("2025-03-03"), hex("#c9f7d5"));
        empty.set_note(key("2025-03-04"), "n");
        empty.clear(scope);
        assert_eq!(empty.colors().len(), colors_left);
        assert_eq!(empty.notes().len(), notes_left);
    }

    #[rstest]
    fn dirty_years_are_drained(mut empty: AnnotationStore<MemoryStore>) {
        empty.paint_range(key("2024-12-31"), key("2025-01-01"), Some(&hex("#c9f7d5")));
        empty.set_note(key("2030-05-05"), "later");
        let years: Vec<i32> = empty.take_dirty_years().into_iter().collect();
        assert_eq!(years, vec![2024, 2025, 2030]);
        assert!(empty.take_dirty_years().is_empty());
    }
}
