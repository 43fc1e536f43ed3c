use crate::dates::DateKey;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub type ColorMap = BTreeMap<DateKey, HexColor>;
pub type NoteMap = BTreeMap<DateKey, String>;
pub type PaletteId = String;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HexColorError {
    #[error("expected a #rrggbb color, got {0:?}")]
    Invalid(String),
}

/// Lowercase `#rrggbb`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HexColor(String);

impl HexColor {
    /// Accepts surrounding whitespace and either case, stores the canonical form.
    pub fn parse(raw: &str) -> Result<Self, HexColorError> {
        let trimmed = raw.trim();
        let digits = trimmed
            .strip_prefix('#')
            .filter(|d| d.len() == 6 && d.bytes().all(|b| b.is_ascii_hexdigit()))
            .ok_or_else(|| HexColorError::Invalid(raw.to_string()))?;
        Ok(HexColor(format!("#{}", digits.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn rgb(&self) -> (u8, u8, u8) {
        let channel = |at: usize| u8::from_str_radix(&self.0[at..at + 2], 16).unwrap_or(0);
        (channel(1), channel(3), channel(5))
    }
}

impl fmt::Display for HexColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for HexColor {
    type Err = HexColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HexColor::parse(s)
    }
}

impl Serialize for HexColor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for HexColor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        HexColor::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PaletteEntry {
    pub id: PaletteId,
    pub color: HexColor,
    pub label: String,
    #[serde(skip, default = "custom_flag")]
    pub is_custom: bool,
}

fn custom_flag() -> bool {
    true
}

/// Fixed marker colors. These are never persisted.
pub const BUILT_IN_MARKERS: [(&str, &str, &str); 5] = [
    ("yellow", "Yellow", "#fff3b0"),
    ("green", "Green", "#c9f7d5"),
    ("blue", "Blue", "#cfe7ff"),
    ("red", "Red", "#ffd0d0"),
    ("purple", "Purple", "#ead7ff"),
];

pub fn built_in_palette() -> Vec<PaletteEntry> {
    BUILT_IN_MARKERS
        .iter()
        .filter_map(|(id, label, color)| {
            HexColor::parse(color).ok().map(|color| PaletteEntry {
                id: id.to_string(),
                color,
                label: label.to_string(),
                is_custom: false,
            })
        })
        .collect()
}

pub fn built_in_color(id: &str) -> Option<HexColor> {
    BUILT_IN_MARKERS
        .iter()
        .find(|(marker_id, _, _)| *marker_id == id)
        .and_then(|(_, _, color)| HexColor::parse(color).ok())
}

impl PaletteEntry {
    pub fn custom(id: PaletteId, color: HexColor, label: Option<String>) -> Self {
        let label = label
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| color.as_str().to_uppercase());
        PaletteEntry {
            id,
            color,
            label,
            is_custom: true,
        }
    }
}

/// A note counts only when it has non-whitespace content.
pub fn is_blank_note(text: &str) -> bool {
    text.trim().is_empty()
}
