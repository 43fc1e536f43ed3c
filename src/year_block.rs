use crate::dates::{days_in_month, iso_weekday_index, local_noon, DateKey};
use crate::model::{is_blank_note, ColorMap, HexColor, NoteMap};

/// Up to six leading blanks plus the longest month. Every month row of every
/// year uses this width, so columns line up across the whole timeline.
pub const GRID_COLUMNS: usize = 37;
pub const MONTHS: u32 = 12;
pub const WEEKDAY_LABELS: [&str; 7] = ["Mo", "Tu", "We", "Th", "Fr", "Sa", "Su"];

pub fn is_weekend_column(column: usize) -> bool {
    matches!(column % 7, 5 | 6)
}

/// Note text with CRLF line endings folded to LF.
pub fn tooltip_text(text: &str) -> String {
    text.replace("\r\n", "\n")
}

/// First word of the first non-empty line.
pub fn note_preview(text: &str) -> String {
    let normalized = tooltip_text(text);
    normalized
        .trim()
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().next())
        .unwrap_or_default()
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderCell {
    pub label: &'static str,
    pub weekend: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteIndicator {
    pub preview: String,
    pub tooltip: String,
}

/// What a host needs to draw one day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellState {
    pub key: DateKey,
    pub day: u32,
    pub today: bool,
    pub color: Option<HexColor>,
    pub note: Option<NoteIndicator>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridCell {
    /// Placeholder outside the month. Never interactive.
    Empty { weekend: bool },
    Day { weekend: bool, state: CellState },
}

impl GridCell {
    pub fn weekend(&self) -> bool {
        match self {
            GridCell::Empty { weekend } | GridCell::Day { weekend, .. } => *weekend,
        }
    }

    pub fn state(&self) -> Option<&CellState> {
        match self {
            GridCell::Day { state, .. } => Some(state),
            GridCell::Empty { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthRow {
    pub month0: u32,
    pub label: String,
    pub lead: usize,
    pub cells: Vec<GridCell>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YearBlock {
    pub year: i32,
    pub header: Vec<HeaderCell>,
    pub months: Vec<MonthRow>,
}

pub fn render_cell_state(
    key: DateKey,
    today: Option<DateKey>,
    colors: &ColorMap,
    notes: &NoteMap,
) -> CellState {
    let note = notes
        .get(&key)
        .filter(|text| !is_blank_note(text))
        .map(|text| NoteIndicator {
            preview: note_preview(text),
            tooltip: tooltip_text(text),
        });
    CellState {
        key,
        day: chrono::Datelike::day(&key.date()),
        today: today == Some(key),
        color: colors.get(&key).cloned(),
        note,
    }
}

pub fn build_year(
    year: i32,
    today: Option<DateKey>,
    colors: &ColorMap,
    notes: &NoteMap,
) -> YearBlock {
    let header = (0..GRID_COLUMNS)
        .map(|c| HeaderCell {
            label: WEEKDAY_LABELS[c % 7],
            weekend: is_weekend_column(c),
        })
        .collect();

    let months = (0..MONTHS)
        .map(|month0| build_month(year, month0, today, colors, notes))
        .collect();

    YearBlock {
        year,
        header,
        months,
    }
}

fn build_month(
    year: i32,
    month0: u32,
    today: Option<DateKey>,
    colors: &ColorMap,
    notes: &NoteMap,
) -> MonthRow {
    let first = local_noon(year, month0, 1);
    let lead = first
        .map(|f| iso_weekday_index(f.date()) as usize)
        .unwrap_or(0);
    let dim = days_in_month(year, month0) as i64;
    let label = first
        .map(|f| f.format("%b").to_string())
        .unwrap_or_default();

    let cells = (0..GRID_COLUMNS)
        .map(|c| {
            let weekend = is_weekend_column(c);
            let day = c as i64 - lead as i64 + 1;
            if day < 1 || day > dim {
                return GridCell::Empty { weekend };
            }
            let key = local_noon(year, month0, day as u32).and_then(|at| DateKey::new(at.date()));
            match key {
                Some(key) => GridCell::Day {
                    weekend,
                    state: render_cell_state(key, today, colors, notes),
                },
                None => GridCell::Empty { weekend },
            }
        })
        .collect();

    MonthRow {
        month0,
        label,
        lead,
        cells,
    }
}

impl YearBlock {
    pub fn day_cells(&self) -> impl Iterator<Item = &CellState> {
        self.months
            .iter()
            .flat_map(|m| m.cells.iter())
            .filter_map(GridCell::state)
    }

    /// Month index and grid column holding `key`, if it lies in this year.
    pub fn position_of(&self, key: DateKey) -> Option<(usize, usize)> {
        if key.year() != self.year {
            return None;
        }
        let date = key.date();
        let month0 = chrono::Datelike::month0(&date) as usize;
        let row = self.months.get(month0)?;
        Some((month0, row.lead + chrono::Datelike::day0(&date) as usize))
    }

    pub fn cell(&self, key: DateKey) -> Option<&CellState> {
        let (month0, column) = self.position_of(key)?;
        self.months[month0].cells.get(column)?.state()
    }

    /// Re-projects one day from the maps. Returns false when the day is not in this block.
    pub fn refresh_cell(
        &mut self,
        key: DateKey,
        today: Option<DateKey>,
        colors: &ColorMap,
        notes: &NoteMap,
    ) -> bool {
        let Some((month0, column)) = self.position_of(key) else {
            return false;
        };
        match self.months[month0].cells.get_mut(column) {
            Some(GridCell::Day { state, .. }) => {
                *state = render_cell_state(key, today, colors, notes);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::days_in_year;
    use rstest::rstest;

    fn key(raw: &str) -> DateKey {
        DateKey::parse(raw).unwrap()
    }

    #[rstest]
    #[case(2023)]
    #[case(2024)]
    #[case(2025)]
    #[case(1900)]
    #[case(2000)]
    fn twelve_rows_of_fixed_width_cover_every_day(#[case] year: i32) {
        let block = build_year(year, None, &ColorMap::new(), &NoteMap::new());
        assert_eq!(block.months.len(), 12);
        assert!(block.months.iter().all(|m| m.cells.len() == GRID_COLUMNS));
        assert_eq!(block.header.len(), GRID_COLUMNS);
        assert_eq!(block.day_cells().count() as u32, days_in_year(year));
    }

    #[test]
    fn lead_blanks_follow_first_weekday() {
        // June 2025 starts on a Sunday: six blanks, then the 1st in column 6
        let block = build_year(2025, None, &ColorMap::new(), &NoteMap::new());
        let june = &block.months[5];
        assert_eq!(june.lead, 6);
        assert!(june.cells[..6]
            .iter()
            .all(|c| matches!(c, GridCell::Empty { .. })));
        assert_eq!(june.cells[6].state().unwrap().day, 1);
        assert_eq!(june.cells[35].state().unwrap().day, 30);
        assert!(matches!(june.cells[36], GridCell::Empty { .. }));
    }

    #[test]
    fn weekend_columns_are_flagged() {
        let block = build_year(2025, None, &ColorMap::new(), &NoteMap::new());
        let weekend: Vec<usize> = block
            .header
            .iter()
            .enumerate()
            .filter(|(_, h)| h.weekend)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(weekend, vec![5, 6, 12, 13, 19, 20, 26, 27, 33, 34]);
        assert_eq!(block.header[0].label, "Mo");
        assert_eq!(block.header[36].label, "Mo");
        // 2025-03-01 is a Saturday
        let (m, c) = block.position_of(key("2025-03-01")).unwrap();
        assert!(block.months[m].cells[c].weekend());
    }

    #[test]
    fn cells_carry_today_color_and_note() {
        let mut colors = ColorMap::new();
        colors.insert(key("2025-01-03"), HexColor::parse("#ffd0d0").unwrap());
        let mut notes = NoteMap::new();
        notes.insert(key("2025-01-03"), "\r\n  Dentist at 10\r\nbring card".into());
        notes.insert(key("2025-01-04"), "   ".into());
        let block = build_year(2025, Some(key("2025-01-03")), &colors, &notes);

        let cell = block.cell(key("2025-01-03")).unwrap();
        assert!(cell.today);
        assert_eq!(cell.color.as_ref().unwrap().as_str(), "#ffd0d0");
        let note = cell.note.as_ref().unwrap();
        assert_eq!(note.preview, "Dentist");
        assert_eq!(note.tooltip, "\n  Dentist at 10\nbring card");

        let blank = block.cell(key("2025-01-04")).unwrap();
        assert!(blank.note.is_none());
        assert!(!blank.today);
    }

    #[test]
    fn refresh_cell_reprojects_from_maps() {
        let mut block = build_year(2025, None, &ColorMap::new(), &NoteMap::new());
        let mut colors = ColorMap::new();
        colors.insert(key("2025-08-15"), HexColor::parse("#cfe7ff").unwrap());
        assert!(block.refresh_cell(key("2025-08-15"), None, &colors, &NoteMap::new()));
        assert!(block.cell(key("2025-08-15")).unwrap().color.is_some());
        assert!(!block.refresh_cell(key("2026-08-15"), None, &colors, &NoteMap::new()));
    }

    #[rstest]
    #[case("hello world", "hello")]
    #[case("  \n\nsecond line first", "second")]
    #[case("one\r\ntwo", "one")]
    #[case("   ", "")]
    fn previews(#[case] text: &str, #[case] expected: &str) {
        assert_eq!(note_preview(text), expected);
    }
}
