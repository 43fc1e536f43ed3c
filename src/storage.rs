use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Serialize;
use serde_json::{Map, Value};
use std::cell::Cell;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const KEY_COLORS: &str = "colors-v4";
pub const KEY_MARKERS_V3: &str = "markers-v3";
pub const KEY_MARKERS_V2: &str = "markers-v2";
pub const KEY_NOTES: &str = "notes-v2";
pub const KEY_CUSTOM_MARKERS: &str = "custom-markers-v1";

const PROJECT_DIR: &str = ".yeargrid";

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("writing {key}: {source}")]
    Write {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("encoding {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// String key/value persistence. Reads never fail; a missing or unreadable
/// entry is simply absent.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String) -> Result<(), StoreError>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Box<S> {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), StoreError> {
        (**self).set(key, value)
    }
}

/// One `<key>.json` file per key inside a directory.
#[derive(Debug, Clone)]
pub struct DirStore {
    dir: PathBuf,
}

impl DirStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DirStore { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl KeyValueStore for DirStore {
    fn get(&self, key: &str) -> Option<String> {
        fs::read_to_string(self.path_for(key)).ok()
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), StoreError> {
        let write = || -> io::Result<()> {
            fs::create_dir_all(&self.dir)?;
            fs::write(self.path_for(key), value)
        };
        write().map_err(|source| StoreError::Write {
            key: key.to_string(),
            source,
        })
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
    fail_writes: Cell<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, key: &str, value: &str) -> Self {
        self.entries.insert(key.to_string(), value.to_string());
        self
    }

    /// Makes every following `set` fail, like a full quota would.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.set(fail);
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), StoreError> {
        if self.fail_writes.get() {
            return Err(StoreError::Write {
                key: key.to_string(),
                source: io::Error::new(io::ErrorKind::Other, "quota exceeded"),
            });
        }
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}

/// Reads a JSON object; anything missing, unparsable or of another shape is empty.
pub fn load_object<S: KeyValueStore + ?Sized>(store: &S, key: &str) -> Map<String, Value> {
    match load_value(store, key) {
        Some(Value::Object(map)) => map,
        Some(_) => {
            tracing::debug!(key, "stored value is not an object, using empty default");
            Map::new()
        }
        None => Map::new(),
    }
}

pub fn load_array<S: KeyValueStore + ?Sized>(store: &S, key: &str) -> Vec<Value> {
    match load_value(store, key) {
        Some(Value::Array(items)) => items,
        Some(_) => {
            tracing::debug!(key, "stored value is not an array, using empty default");
            Vec::new()
        }
        None => Vec::new(),
    }
}

fn load_value<S: KeyValueStore + ?Sized>(store: &S, key: &str) -> Option<Value> {
    let raw = store.get(key)?;
    if raw.trim().is_empty() {
        return None;
    }
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::debug!(key, %err, "stored value is not valid JSON, using empty default");
            None
        }
    }
}

pub fn save_json<S, T>(store: &mut S, key: &str, value: &T) -> Result<(), StoreError>
where
    S: KeyValueStore + ?Sized,
    T: Serialize + ?Sized,
{
    let encoded = serde_json::to_string(value).map_err(|source| StoreError::Encode {
        key: key.to_string(),
        source,
    })?;
    store.set(key, encoded)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreScope {
    Project,
    Global,
}

#[derive(Debug, Clone)]
pub struct StoreLocation {
    pub dir: PathBuf,
    pub scope: StoreScope,
}

impl StoreLocation {
    pub fn open(&self) -> DirStore {
        DirStore::new(&self.dir)
    }

    pub fn scope_label(&self) -> &'static str {
        match self.scope {
            StoreScope::Project => "project",
            StoreScope::Global => "global",
        }
    }
}

pub fn init_project_store() -> Result<StoreLocation> {
    let cwd = env::current_dir()?;
    let dir = cwd.join(PROJECT_DIR);
    fs::create_dir_all(&dir).with_context(|| format!("creating {:?}", dir))?;
    Ok(StoreLocation {
        dir,
        scope: StoreScope::Project,
    })
}

/// A `.yeargrid` directory in `start` or any parent wins over the global store.
pub fn locate_store(start: &Path, data_dir: Option<&Path>) -> Result<StoreLocation> {
    if let Some(dir) = find_project_store(start) {
        return Ok(StoreLocation {
            dir,
            scope: StoreScope::Project,
        });
    }
    let dir = match data_dir {
        Some(dir) => dir.to_path_buf(),
        None => global_data_dir()?,
    };
    Ok(StoreLocation {
        dir,
        scope: StoreScope::Global,
    })
}

fn find_project_store(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(current) = dir {
        let candidate = current.join(PROJECT_DIR);
        if candidate.is_dir() {
            return Some(candidate);
        }
        dir = current.parent();
    }
    None
}

pub fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("", "", "yeargrid").context("locating data directory")
}

pub fn global_data_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.data_dir().to_path_buf())
}
