use crate::annotations::{
    resolve_color_reference, sanitize_custom_markers, sanitize_notes, AnnotationStore,
};
use crate::dates::DateKey;
use crate::interaction::InteractionController;
use crate::model::{ColorMap, NoteMap, PaletteEntry};
use crate::storage::KeyValueStore;
use crate::timeline::{BlockMetrics, Timeline};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const EXPORT_VERSION: u32 = 2;

#[derive(thiserror::Error, Debug)]
pub enum ImportError {
    #[error("file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("file is not a JSON object")]
    NotAnObject,
    #[error("`{0}` is missing or not a map")]
    MissingField(&'static str),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub colors: ColorMap,
    pub notes: NoteMap,
    pub custom_markers: Vec<PaletteEntry>,
}

/// Snapshot of the validated in-memory state.
pub fn export_document<S: KeyValueStore>(
    store: &AnnotationStore<S>,
    now: DateTime<Utc>,
) -> ExportDocument {
    ExportDocument {
        version: EXPORT_VERSION,
        exported_at: now,
        colors: store.colors().clone(),
        notes: store.notes().clone(),
        custom_markers: store.custom_markers().to_vec(),
    }
}

pub fn to_json(doc: &ExportDocument) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(doc)
}

pub fn default_export_name(now: NaiveDateTime) -> String {
    format!("yeargrid-backup-{}.json", now.format("%Y%m%d-%H%M%S"))
}

/// Blank input means "cancel"; a missing `.json` suffix is added.
pub fn normalize_export_name(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.to_lowercase().ends_with(".json") {
        Some(trimmed.to_string())
    } else {
        Some(format!("{}.json", trimmed))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedState {
    pub colors: ColorMap,
    pub notes: NoteMap,
    pub custom_markers: Vec<PaletteEntry>,
    pub dropped: usize,
}

/// Parses and sanitizes an export file. Individual bad entries are dropped;
/// only a document without usable `colors`/`notes` maps is rejected.
pub fn import_document(raw: &str) -> Result<ImportedState, ImportError> {
    let value: Value = serde_json::from_str(raw)?;
    let Value::Object(doc) = value else {
        return Err(ImportError::NotAnObject);
    };

    // exports before the hex switch called the map `markers`
    let colors_raw = object_field(&doc, "colors")
        .or_else(|| object_field(&doc, "markers"))
        .ok_or(ImportError::MissingField("colors"))?;
    let notes_raw = object_field(&doc, "notes").ok_or(ImportError::MissingField("notes"))?;

    let custom_raw = doc
        .get("customMarkers")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let custom_markers = sanitize_custom_markers(custom_raw);

    let mut dropped = 0;
    let mut colors = ColorMap::new();
    for (key, value) in colors_raw {
        let entry = DateKey::parse(key).ok().and_then(|k| {
            value
                .as_str()
                .and_then(|v| resolve_color_reference(v, &custom_markers))
                .map(|c| (k, c))
        });
        match entry {
            Some((k, c)) => {
                colors.insert(k, c);
            }
            None => dropped += 1,
        }
    }
    let (notes, dropped_notes) = sanitize_notes(notes_raw);
    dropped += dropped_notes;

    Ok(ImportedState {
        colors,
        notes,
        custom_markers,
        dropped,
    })
}

fn object_field<'a>(doc: &'a Map<String, Value>, name: &str) -> Option<&'a Map<String, Value>> {
    doc.get(name).and_then(Value::as_object)
}

/// Replaces everything with the imported state, redraws every materialized
/// day and drops any active tool.
pub fn apply_import<S: KeyValueStore, M: BlockMetrics>(
    imported: ImportedState,
    store: &mut AnnotationStore<S>,
    controller: &mut InteractionController,
    timeline: &mut Timeline<M>,
) {
    tracing::info!(
        colors = imported.colors.len(),
        notes = imported.notes.len(),
        custom = imported.custom_markers.len(),
        dropped = imported.dropped,
        "importing annotations"
    );
    store.replace_all(imported.colors, imported.notes, imported.custom_markers);
    controller.reset();
    timeline.refresh_all(store.colors(), store.notes());
}
