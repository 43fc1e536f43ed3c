use crate::annotations::{resolve_color_reference, AnnotationStore};
use crate::codec::{
    default_export_name, export_document, import_document, normalize_export_name, to_json,
};
use crate::config::Config;
use crate::dates::{today, DateKey};
use crate::model::HexColor;
use crate::remote::{self, DirRemote, RemoteStore};
use crate::storage::{init_project_store, locate_store, DirStore, StoreLocation};
use crate::ui;
use crate::year_block::{build_year, GridCell, YearBlock};
use anyhow::{anyhow, bail, Context, Result};
use chrono::{Datelike, Local, Utc};
use std::env;
use std::fs;
use std::path::PathBuf;

/// Everything a command needs: the opened store and its optional remote copy.
pub struct Session {
    pub config: Config,
    pub location: StoreLocation,
    pub store: AnnotationStore<DirStore>,
    pub remote: Option<DirRemote>,
}

impl Session {
    pub fn open(config: Config) -> Result<Self> {
        let cwd = env::current_dir()?;
        let location = locate_store(&cwd, config.data_dir.as_deref())?;
        let (mut store, report) = AnnotationStore::load(location.open());
        if let Some(shape) = report.migrated_from {
            tracing::info!(?shape, "color store migrated on load");
        }
        let remote = config.sync_dir.as_ref().map(DirRemote::new);
        if let Some(remote) = remote.as_ref() {
            adopt_remote(&mut store, remote);
        }
        Ok(Session {
            config,
            location,
            store,
            remote,
        })
    }

    /// Pushes years touched since the last sync to the remote copy.
    pub fn sync(&mut self) {
        let years = self.store.take_dirty_years();
        if let Some(remote) = self.remote.as_mut() {
            remote::push_years(remote, &years, self.store.colors(), self.store.notes());
        }
    }

    pub fn replace_remote(&mut self) {
        self.store.take_dirty_years();
        if let Some(remote) = self.remote.as_mut() {
            if let Err(err) = remote::replace_all(remote, self.store.colors(), self.store.notes()) {
                tracing::warn!(%err, "remote replace failed");
            }
        }
    }
}

/// Seeds an empty local store from the remote copy.
fn adopt_remote(store: &mut AnnotationStore<DirStore>, remote: &DirRemote) {
    if !store.colors().is_empty() || !store.notes().is_empty() {
        return;
    }
    match remote.load_all() {
        Ok(docs) if !docs.is_empty() => {
            let (colors, notes) = remote::merge_documents(&docs);
            tracing::info!(
                colors = colors.len(),
                notes = notes.len(),
                "seeded local store from remote"
            );
            let custom = store.custom_markers().to_vec();
            store.replace_all(colors, notes, custom);
            store.take_dirty_years();
        }
        Ok(_) => {}
        Err(err) => tracing::warn!(%err, "remote load failed"),
    }
}

pub fn init() -> Result<()> {
    let location = init_project_store()?;
    println!("Initialized store at {}", location.dir.display());
    Ok(())
}

pub fn show(config: Config, year: Option<i32>) -> Result<()> {
    let session = Session::open(config)?;
    let today = DateKey::new(today());
    let year = year.unwrap_or_else(|| Local::now().year());
    let block = build_year(year, today, session.store.colors(), session.store.notes());
    print!("{}", format_year(&block));
    Ok(())
}

pub fn mark(config: Config, date: String, color: String) -> Result<()> {
    let mut session = Session::open(config)?;
    let key = parse_key(&date)?;
    let color = resolve_color_reference(&color, session.store.custom_markers())
        .ok_or_else(|| anyhow!("unknown color {:?} (use #rrggbb or a palette id)", color))?;
    session.store.set_color(key, color.clone());
    session.sync();
    println!("Marked {} {}", key, color);
    Ok(())
}

pub fn unmark(config: Config, date: String) -> Result<()> {
    let mut session = Session::open(config)?;
    let key = parse_key(&date)?;
    session.store.clear_color(key);
    session.sync();
    println!("Unmarked {}", key);
    Ok(())
}

pub fn note(config: Config, date: String, text: Option<String>, clear: bool) -> Result<()> {
    let mut session = Session::open(config)?;
    let key = parse_key(&date)?;
    let text = if clear { String::new() } else { text.unwrap_or_default() };
    session.store.set_note(key, &text);
    session.sync();
    match session.store.note(key) {
        Some(_) => println!("Saved note for {}", key),
        None => println!("Cleared note for {}", key),
    }
    Ok(())
}

pub fn palette_list(config: Config) -> Result<()> {
    let session = Session::open(config)?;
    for entry in session.store.palette() {
        println!(
            "{:<16} {} {}{}",
            entry.id,
            entry.color,
            entry.label,
            if entry.is_custom { "" } else { " (built-in)" }
        );
    }
    Ok(())
}

pub fn palette_add(config: Config, color: String, label: Option<String>) -> Result<()> {
    let mut session = Session::open(config)?;
    let before = session.store.custom_markers().len();
    let entry = session
        .store
        .add_custom_color(&color, label)
        .with_context(|| format!("adding color {}", color))?;
    if session.store.custom_markers().len() == before {
        println!("{} already in palette as {}", entry.color, entry.id);
    } else {
        println!("Added {} as {}", entry.color, entry.id);
    }
    Ok(())
}

pub fn palette_remove(config: Config, id: String) -> Result<()> {
    let mut session = Session::open(config)?;
    match session.store.remove_custom_color(&id) {
        Some(entry) => println!("Removed {} ({})", entry.id, entry.color),
        None => bail!("no custom color with id {}", id),
    }
    Ok(())
}

pub fn export(config: Config, out: Option<PathBuf>) -> Result<()> {
    let session = Session::open(config)?;
    let path = match out {
        Some(path) => path,
        None => PathBuf::from(
            normalize_export_name(&default_export_name(Local::now().naive_local()))
                .ok_or_else(|| anyhow!("empty export name"))?,
        ),
    };
    let doc = export_document(&session.store, Utc::now());
    let json = to_json(&doc).context("encoding export")?;
    fs::write(&path, json).with_context(|| format!("writing {:?}", path))?;
    tracing::info!(path = %path.display(), "exported annotations");
    println!(
        "Exported {} colors and {} notes to {}",
        doc.colors.len(),
        doc.notes.len(),
        path.display()
    );
    Ok(())
}

pub fn import(config: Config, path: PathBuf) -> Result<()> {
    let mut session = Session::open(config)?;
    let raw = fs::read_to_string(&path).with_context(|| format!("reading {:?}", path))?;
    let imported = import_document(&raw).with_context(|| format!("importing {:?}", path))?;
    let dropped = imported.dropped;
    session
        .store
        .replace_all(imported.colors, imported.notes, imported.custom_markers);
    session.replace_remote();
    println!(
        "Imported {} colors and {} notes ({} invalid entries skipped)",
        session.store.colors().len(),
        session.store.notes().len(),
        dropped
    );
    Ok(())
}

pub fn tui(config: Config) -> Result<()> {
    let session = Session::open(config)?;
    ui::run(session)
}

fn parse_key(raw: &str) -> Result<DateKey> {
    DateKey::parse(raw.trim()).with_context(|| format!("invalid date {:?}", raw))
}

/// Three characters per column: day number plus `*` color, `+` note, `#` both.
pub fn format_year(block: &YearBlock) -> String {
    let mut out = format!("{:<5}", block.year);
    for header in &block.header {
        out.push_str(&format!("{:>3}", header.label));
    }
    out.push('\n');
    for month in &block.months {
        out.push_str(&format!("{:<5}", month.label));
        for cell in &month.cells {
            match cell {
                GridCell::Empty { .. } => out.push_str("   "),
                GridCell::Day { state, .. } => {
                    let flag = match (state.color.is_some(), state.note.is_some()) {
                        (true, true) => '#',
                        (true, false) => '*',
                        (false, true) => '+',
                        (false, false) if state.today => '<',
                        (false, false) => ' ',
                    };
                    out.push_str(&format!("{:>2}{}", state.day, flag));
                }
            }
        }
        out.push('\n');
    }
    out
}

pub fn describe_color(color: &HexColor, palette: &[crate::model::PaletteEntry]) -> String {
    palette
        .iter()
        .find(|e| &e.color == color)
        .map(|e| format!("{} ({})", e.label, color))
        .unwrap_or_else(|| color.to_string())
}
