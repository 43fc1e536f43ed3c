use crate::annotations::sanitize_notes;
use crate::dates::DateKey;
use crate::model::{ColorMap, HexColor, NoteMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum RemoteError {
    #[error("remote io on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("encoding year {year}: {source}")]
    Encode {
        year: i32,
        #[source]
        source: serde_json::Error,
    },
}

/// One calendar year's slice of the annotations.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct YearDocument {
    pub year: i32,
    pub colors: ColorMap,
    pub notes: NoteMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl YearDocument {
    pub fn for_year(year: i32, colors: &ColorMap, notes: &NoteMap) -> Self {
        YearDocument {
            year,
            colors: colors
                .iter()
                .filter(|(k, _)| k.year() == year)
                .map(|(k, v)| (*k, v.clone()))
                .collect(),
            notes: notes
                .iter()
                .filter(|(k, _)| k.year() == year)
                .map(|(k, v)| (*k, v.clone()))
                .collect(),
            updated_at: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty() && self.notes.is_empty()
    }
}

pub fn split_by_year(colors: &ColorMap, notes: &NoteMap) -> BTreeMap<i32, YearDocument> {
    let years: BTreeSet<i32> = colors
        .keys()
        .chain(notes.keys())
        .map(DateKey::year)
        .collect();
    years
        .into_iter()
        .map(|year| (year, YearDocument::for_year(year, colors, notes)))
        .collect()
}

/// A per-user document store holding one document per year.
pub trait RemoteStore {
    fn load_all(&self) -> Result<Vec<YearDocument>, RemoteError>;
    fn years(&self) -> Result<Vec<i32>, RemoteError>;
    /// Empty documents are deleted rather than stored.
    fn save_year(&mut self, doc: &YearDocument) -> Result<(), RemoteError>;
    fn delete_year(&mut self, year: i32) -> Result<(), RemoteError>;
}

/// Drops every remote year and writes the non-empty ones again.
pub fn replace_all<R: RemoteStore + ?Sized>(
    remote: &mut R,
    colors: &ColorMap,
    notes: &NoteMap,
) -> Result<(), RemoteError> {
    for year in remote.years()? {
        remote.delete_year(year)?;
    }
    for doc in split_by_year(colors, notes).values() {
        remote.save_year(doc)?;
    }
    Ok(())
}

/// Best effort: failures are logged, local state is never touched.
pub fn push_years<R: RemoteStore + ?Sized>(
    remote: &mut R,
    years: &BTreeSet<i32>,
    colors: &ColorMap,
    notes: &NoteMap,
) {
    for year in years {
        let mut doc = YearDocument::for_year(*year, colors, notes);
        doc.updated_at = Some(Utc::now());
        if let Err(err) = remote.save_year(&doc) {
            tracing::warn!(year, %err, "remote year not saved");
        }
    }
}

pub fn merge_documents(docs: &[YearDocument]) -> (ColorMap, NoteMap) {
    let mut colors = ColorMap::new();
    let mut notes = NoteMap::new();
    for doc in docs {
        colors.extend(doc.colors.iter().map(|(k, v)| (*k, v.clone())));
        notes.extend(doc.notes.iter().map(|(k, v)| (*k, v.clone())));
    }
    (colors, notes)
}

/// Year documents as `<year>.json` files, e.g. inside a synced folder.
#[derive(Debug, Clone)]
pub struct DirRemote {
    dir: PathBuf,
}

impl DirRemote {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DirRemote { dir: dir.into() }
    }

    fn path_for(&self, year: i32) -> PathBuf {
        self.dir.join(format!("{}.json", year))
    }

    fn io_err(path: &Path, source: io::Error) -> RemoteError {
        RemoteError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Invalid entries are skipped; an unreadable document counts as empty.
    fn read_year(&self, year: i32) -> YearDocument {
        let mut doc = YearDocument {
            year,
            colors: ColorMap::new(),
            notes: NoteMap::new(),
            updated_at: None,
        };
        let Some(Value::Object(raw)) = fs::read_to_string(self.path_for(year))
            .ok()
            .and_then(|text| serde_json::from_str::<Value>(&text).ok())
        else {
            return doc;
        };
        if let Some(colors) = raw.get("colors").and_then(Value::as_object) {
            for (key, value) in colors {
                if let (Ok(k), Some(c)) = (
                    DateKey::parse(key),
                    value.as_str().and_then(|v| HexColor::parse(v).ok()),
                ) {
                    doc.colors.insert(k, c);
                }
            }
        }
        if let Some(notes) = raw.get("notes").and_then(Value::as_object) {
            doc.notes = sanitize_notes(notes).0;
        }
        doc
    }
}

impl RemoteStore for DirRemote {
    fn load_all(&self) -> Result<Vec<YearDocument>, RemoteError> {
        Ok(self
            .years()?
            .into_iter()
            .map(|year| self.read_year(year))
            .collect())
    }

    fn years(&self) -> Result<Vec<i32>, RemoteError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(Self::io_err(&self.dir, err)),
        };
        let mut years: Vec<i32> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                let stem = name.to_str()?.strip_suffix(".json")?;
                (stem.len() == 4).then(|| stem.parse().ok()).flatten()
            })
            .collect();
        years.sort_unstable();
        Ok(years)
    }

    fn save_year(&mut self, doc: &YearDocument) -> Result<(), RemoteError> {
        if doc.is_empty() {
            return self.delete_year(doc.year);
        }
        fs::create_dir_all(&self.dir).map_err(|e| Self::io_err(&self.dir, e))?;
        let encoded = serde_json::to_string_pretty(doc).map_err(|source| RemoteError::Encode {
            year: doc.year,
            source,
        })?;
        let path = self.path_for(doc.year);
        fs::write(&path, encoded).map_err(|e| Self::io_err(&path, e))
    }

    fn delete_year(&mut self, year: i32) -> Result<(), RemoteError> {
        let path = self.path_for(year);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Self::io_err(&path, err)),
        }
    }
}
