use crate::annotations::ClearScope;
use crate::codec::{
    self, default_export_name, export_document, import_document, normalize_export_name, to_json,
};
use crate::commands::{describe_color, Session};
use crate::dates::{self, add_days, date_key, DateKey};
use crate::interaction::{Effect, InteractionController, Point, PointerHost, PointerId, ToolMode};
use crate::timeline::{BlockMetrics, SentinelEdges, Timeline};
use crate::year_block::{GridCell, MonthRow, YearBlock, GRID_COLUMNS};
use anyhow::{anyhow, Context, Result};
use chrono::{Local, Utc};
use crossterm::event::{
    self, DisableFocusChange, DisableMouseCapture, EnableFocusChange, EnableMouseCapture, Event,
    KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::prelude::{Alignment, Color, Modifier, Rect, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use ratatui::Terminal;
use std::fs;
use std::io::{stdout, Stdout};
use std::time::Duration;

/// Header row, twelve month rows and a spacer.
const BLOCK_ROWS: usize = 14;
const LABEL_WIDTH: u16 = 6;
const SCROLL_STEP: isize = 3;
/// The terminal reports a single mouse.
const MOUSE_POINTER: PointerId = 1;
const NOTE_MARK: char = '•';
const WEEKEND_BG: Color = Color::Rgb(38, 38, 48);

pub fn run(session: Session) -> Result<()> {
    let mut app = App::new(session)?;
    let mut terminal = setup_terminal()?;
    let result = app.event_loop(&mut terminal);
    teardown_terminal(&mut terminal)?;
    result
}

#[derive(Debug, Clone, Copy, Default)]
struct TerminalMetrics;

impl BlockMetrics for TerminalMetrics {
    fn block_height(&self, _block: &YearBlock) -> usize {
        BLOCK_ROWS
    }

    fn month_row(&self, _block: &YearBlock, month0: usize) -> (usize, usize) {
        (1 + month0, 1)
    }
}

/// Where the calendar was last drawn, for hit-testing mouse events.
#[derive(Debug, Clone, Default)]
struct GridGeometry {
    area: Rect,
    /// x offset and width of every day column.
    columns: Vec<(u16, u16)>,
    scroll_top: usize,
}

impl GridGeometry {
    fn column_at(&self, x: u16) -> Option<usize> {
        self.columns
            .iter()
            .position(|(start, width)| x >= *start && x < start + width)
    }

    fn content_row(&self, y: u16) -> Option<usize> {
        if y < self.area.y || y >= self.area.bottom() {
            return None;
        }
        Some(self.scroll_top + usize::from(y - self.area.y))
    }
}

fn day_at(
    geometry: &GridGeometry,
    timeline: &Timeline<TerminalMetrics>,
    point: Point,
) -> Option<DateKey> {
    let x = u16::try_from(point.x).ok()?;
    let y = u16::try_from(point.y).ok()?;
    let column = geometry.column_at(x)?;
    let row = geometry.content_row(y)?;
    let (block, within) = timeline.block_at(row)?;
    let month = block.months.get(within.checked_sub(1)?)?;
    month.cells.get(column)?.state().map(|state| state.key)
}

struct GridHost<'a> {
    geometry: &'a GridGeometry,
    timeline: &'a Timeline<TerminalMetrics>,
    captured: &'a mut Option<PointerId>,
}

impl PointerHost for GridHost<'_> {
    fn day_at(&self, point: Point) -> Option<DateKey> {
        day_at(self.geometry, self.timeline, point)
    }

    fn capture_pointer(&mut self, pointer_id: PointerId) {
        *self.captured = Some(pointer_id);
    }

    fn release_pointer(&mut self, pointer_id: PointerId) {
        if *self.captured == Some(pointer_id) {
            *self.captured = None;
        }
    }
}

struct App {
    session: Session,
    timeline: Timeline<TerminalMetrics>,
    controller: InteractionController,
    geometry: GridGeometry,
    captured: Option<PointerId>,
    cursor: DateKey,
    hover: Option<DateKey>,
    status: String,
    mode: Mode,
}

enum Mode {
    Normal,
    EditingNote { key: DateKey, field: FieldValue },
    Prompt { kind: PromptKind, field: FieldValue },
    ChooseClear,
    ConfirmClear(ClearScope),
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum PromptKind {
    AddColor,
    Export,
    Import,
}

impl PromptKind {
    fn title(&self) -> &'static str {
        match self {
            PromptKind::AddColor => "Add color (#rrggbb [label])",
            PromptKind::Export => "Export to file",
            PromptKind::Import => "Import from file",
        }
    }
}

#[derive(Clone)]
struct FieldValue {
    value: String,
    cursor: usize,
}

impl FieldValue {
    fn new(value: &str) -> Self {
        FieldValue {
            value: value.to_string(),
            cursor: value.len(),
        }
    }

    fn move_left(&mut self) {
        if self.cursor == 0 {
            return;
        }
        self.cursor = prev_grapheme(self.cursor, &self.value);
    }

    fn move_right(&mut self) {
        if self.cursor >= self.value.len() {
            return;
        }
        self.cursor = next_grapheme(self.cursor, &self.value);
    }

    fn move_up(&mut self) {
        let (line_starts, line_idx, col) = line_state(&self.value, self.cursor);
        if line_idx == 0 {
            return;
        }
        let target_start = line_starts[line_idx - 1];
        self.cursor = index_at_col(&self.value, target_start, col);
    }

    fn move_down(&mut self) {
        let (line_starts, line_idx, col) = line_state(&self.value, self.cursor);
        if line_idx + 1 >= line_starts.len() {
            return;
        }
        let target_start = line_starts[line_idx + 1];
        self.cursor = index_at_col(&self.value, target_start, col);
    }

    fn backspace(&mut self) {
        if self.cursor == 0 {
            return;
        }
        let prev = prev_grapheme(self.cursor, &self.value);
        self.value.drain(prev..self.cursor);
        self.cursor = prev;
    }

    fn insert_char(&mut self, ch: char) {
        self.value.insert(self.cursor, ch);
        self.cursor += ch.len_utf8();
    }

    fn with_caret(&self) -> String {
        let mut text = self.value.clone();
        text.insert_str(self.cursor, "▌");
        text
    }
}

impl App {
    fn new(session: Session) -> Result<Self> {
        let today = DateKey::new(dates::today())
            .ok_or_else(|| anyhow!("today's date is outside the supported years"))?;
        let mut timeline = Timeline::new(session.config.timeline(), TerminalMetrics);
        timeline.render_initial_range(today, session.store.colors(), session.store.notes());
        let status = format!(
            "Loaded {} colored days and {} notes from {}",
            session.store.colors().len(),
            session.store.notes().len(),
            session.location.dir.display()
        );
        Ok(App {
            session,
            timeline,
            controller: InteractionController::new(),
            geometry: GridGeometry::default(),
            captured: None,
            cursor: today,
            hover: None,
            status,
            mode: Mode::Normal,
        })
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        loop {
            terminal.draw(|f| self.draw(f))?;
            if event::poll(Duration::from_millis(200))? {
                match event::read()? {
                    Event::Key(key) => {
                        if key.kind != KeyEventKind::Press {
                            continue;
                        }
                        if self.handle_key(key)? {
                            break;
                        }
                    }
                    Event::Mouse(mouse) => self.handle_mouse(mouse),
                    Event::Resize(_, _) | Event::FocusLost => self.cancel_drag(),
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        match self.mode {
            Mode::Normal => self.handle_normal_key(key),
            Mode::EditingNote { .. } | Mode::Prompt { .. } => self.handle_form_key(key),
            Mode::ChooseClear | Mode::ConfirmClear(_) => self.handle_clear_key(key),
        }
    }

    fn handle_normal_key(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Char(c @ '1'..='9') => self.select_palette(c as usize - '1' as usize),
            KeyCode::Char('p') => {
                self.controller.toggle_pen();
                self.status = self.tool_status();
            }
            KeyCode::Char('x') => {
                self.controller.toggle_erase();
                self.status = self.tool_status();
            }
            KeyCode::Esc => {
                if self.controller.drag().is_some() {
                    self.cancel_drag();
                    self.status = "Drag ended".into();
                } else {
                    self.controller.reset();
                    self.status = self.tool_status();
                }
            }
            KeyCode::Left | KeyCode::Char('h') => self.move_cursor(-1),
            KeyCode::Right | KeyCode::Char('l') => self.move_cursor(1),
            KeyCode::Up | KeyCode::Char('k') => self.move_cursor(-7),
            KeyCode::Down | KeyCode::Char('j') => self.move_cursor(7),
            KeyCode::PageUp => self.scroll_page(-1),
            KeyCode::PageDown => self.scroll_page(1),
            KeyCode::Enter => {
                if self.controller.mode() == ToolMode::None {
                    self.status = "Pick a color (1-9), the pen (p) or the eraser (x) first".into();
                } else {
                    let effect = self
                        .controller
                        .activate(self.cursor, &mut self.session.store);
                    self.apply_effect(effect);
                }
            }
            KeyCode::Char('t') => self.go_to_today(),
            KeyCode::Char('a') => {
                self.mode = Mode::Prompt {
                    kind: PromptKind::AddColor,
                    field: FieldValue::new(""),
                };
            }
            KeyCode::Char('D') => self.remove_selected_color(),
            KeyCode::Char('c') => self.mode = Mode::ChooseClear,
            KeyCode::Char('E') => {
                let name = default_export_name(Local::now().naive_local());
                self.mode = Mode::Prompt {
                    kind: PromptKind::Export,
                    field: FieldValue::new(&name),
                };
            }
            KeyCode::Char('I') => {
                self.mode = Mode::Prompt {
                    kind: PromptKind::Import,
                    field: FieldValue::new(""),
                };
            }
            _ => {}
        }
        Ok(false)
    }

    fn handle_form_key(&mut self, key: KeyEvent) -> Result<bool> {
        let mut mode = std::mem::replace(&mut self.mode, Mode::Normal);
        let close_form = match &mut mode {
            Mode::EditingNote { key: day, field } => self.process_note_key(*day, field, key),
            Mode::Prompt { kind, field } => self.process_prompt_key(*kind, field, key),
            _ => true,
        };
        if !close_form {
            self.mode = mode;
        }
        Ok(false)
    }

    fn process_note_key(&mut self, day: DateKey, field: &mut FieldValue, key: KeyEvent) -> bool {
        let control = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Esc => {
                self.status = "Note edit canceled".into();
                return true;
            }
            KeyCode::Left => field.move_left(),
            KeyCode::Right => field.move_right(),
            KeyCode::Up => field.move_up(),
            KeyCode::Down => field.move_down(),
            KeyCode::Enter if control => {
                self.save_note(day, &field.value);
                return true;
            }
            KeyCode::Char('s') if control => {
                self.save_note(day, &field.value);
                return true;
            }
            KeyCode::Enter => field.insert_char('\n'),
            KeyCode::Backspace => field.backspace(),
            KeyCode::Char(c) => {
                if !key
                    .modifiers
                    .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT)
                {
                    field.insert_char(c);
                }
            }
            _ => {}
        }
        false
    }

    fn process_prompt_key(
        &mut self,
        kind: PromptKind,
        field: &mut FieldValue,
        key: KeyEvent,
    ) -> bool {
        match key.code {
            KeyCode::Esc => {
                self.status = "Canceled".into();
                return true;
            }
            KeyCode::Enter => {
                let input = field.value.clone();
                match kind {
                    PromptKind::AddColor => self.add_color(&input),
                    PromptKind::Export => self.export_to(&input),
                    PromptKind::Import => self.import_from(&input),
                }
                return true;
            }
            KeyCode::Left => field.move_left(),
            KeyCode::Right => field.move_right(),
            KeyCode::Backspace => field.backspace(),
            KeyCode::Char(c) => {
                if !key
                    .modifiers
                    .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT)
                {
                    field.insert_char(c);
                }
            }
            _ => {}
        }
        false
    }

    fn handle_clear_key(&mut self, key: KeyEvent) -> Result<bool> {
        match (&self.mode, key.code) {
            (_, KeyCode::Esc) | (Mode::ConfirmClear(_), KeyCode::Char('n')) => {
                self.status = "Clear canceled".into();
                self.mode = Mode::Normal;
            }
            (Mode::ChooseClear, KeyCode::Char('c')) => {
                self.mode = Mode::ConfirmClear(ClearScope::Colors)
            }
            (Mode::ChooseClear, KeyCode::Char('n')) => {
                self.mode = Mode::ConfirmClear(ClearScope::Notes)
            }
            (Mode::ChooseClear, KeyCode::Char('a')) => {
                self.mode = Mode::ConfirmClear(ClearScope::All)
            }
            (Mode::ConfirmClear(scope), KeyCode::Char('y') | KeyCode::Enter) => {
                let scope = *scope;
                self.session.store.clear(scope);
                self.timeline
                    .refresh_all(self.session.store.colors(), self.session.store.notes());
                self.session.sync();
                self.status = format!("Cleared {}", clear_label(scope));
                self.mode = Mode::Normal;
            }
            _ => {}
        }
        Ok(false)
    }

    fn handle_mouse(&mut self, mouse: MouseEvent) {
        // a dialog blocks new gestures but never a release
        let releasing = mouse.kind == MouseEventKind::Up(MouseButton::Left);
        if !releasing && !matches!(self.mode, Mode::Normal) {
            return;
        }
        match mouse.kind {
            MouseEventKind::ScrollUp => return self.timeline.scroll_by(-SCROLL_STEP),
            MouseEventKind::ScrollDown => return self.timeline.scroll_by(SCROLL_STEP),
            _ => {}
        }
        let point = Point {
            x: i32::from(mouse.column),
            y: i32::from(mouse.row),
        };
        let mut host = GridHost {
            geometry: &self.geometry,
            timeline: &self.timeline,
            captured: &mut self.captured,
        };
        let effect = match mouse.kind {
            MouseEventKind::Down(button) => {
                let target = host.day_at(point);
                if let Some(key) = target {
                    self.cursor = key;
                }
                self.controller
                    .pointer_down(MOUSE_POINTER, button == MouseButton::Left, target, &mut host)
            }
            MouseEventKind::Drag(MouseButton::Left) => {
                self.hover = host.day_at(point);
                self.controller.pointer_move(
                    MOUSE_POINTER,
                    point,
                    true,
                    &host,
                    &mut self.session.store,
                )
            }
            MouseEventKind::Up(MouseButton::Left) => self.controller.pointer_up(
                MOUSE_POINTER,
                point,
                &mut host,
                &mut self.session.store,
            ),
            MouseEventKind::Moved => {
                self.hover = host.day_at(point);
                Effect::default()
            }
            _ => Effect::default(),
        };
        self.apply_effect(effect);
    }

    fn cancel_drag(&mut self) {
        let mut host = GridHost {
            geometry: &self.geometry,
            timeline: &self.timeline,
            captured: &mut self.captured,
        };
        let effect = self
            .controller
            .pointer_cancel(MOUSE_POINTER, &mut host, &mut self.session.store);
        self.apply_effect(effect);
    }

    /// Redraws touched days, pushes them to the remote copy and opens the
    /// note editor when asked to. An open dialog keeps the editor closed.
    fn apply_effect(&mut self, effect: Effect) {
        if !effect.changed.is_empty() {
            self.timeline.refresh_cells(
                &effect.changed,
                self.session.store.colors(),
                self.session.store.notes(),
            );
            self.session.sync();
            self.status = match effect.changed.as_slice() {
                [key] => format!("Updated {}", key),
                keys => format!("Updated {} days", keys.len()),
            };
        }
        if let Some(key) = effect.open_note.filter(|_| matches!(self.mode, Mode::Normal)) {
            let text = self.session.store.note(key).unwrap_or_default().to_string();
            self.mode = Mode::EditingNote {
                key,
                field: FieldValue::new(&text),
            };
        }
    }

    fn save_note(&mut self, key: DateKey, text: &str) {
        self.session.store.set_note(key, text);
        self.timeline.refresh_cells(
            &[key],
            self.session.store.colors(),
            self.session.store.notes(),
        );
        self.session.sync();
        self.status = match self.session.store.note(key) {
            Some(_) => format!("Saved note for {}", key),
            None => format!("Removed note for {}", key),
        };
    }

    fn select_palette(&mut self, idx: usize) {
        match self.session.store.palette().into_iter().nth(idx) {
            Some(entry) => {
                self.controller.select_color(entry.color);
                self.status = self.tool_status();
            }
            None => self.status = format!("No palette entry {}", idx + 1),
        }
    }

    fn add_color(&mut self, input: &str) {
        let mut parts = input.trim().splitn(2, char::is_whitespace);
        let hex = parts.next().unwrap_or_default();
        if hex.is_empty() {
            self.status = "Canceled".into();
            return;
        }
        let label = parts
            .next()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty());
        match self.session.store.add_custom_color(hex, label) {
            Ok(entry) => {
                self.status = format!("Palette color {} ({})", entry.label, entry.id);
                if self.controller.selected_color() != Some(&entry.color) {
                    self.controller.select_color(entry.color);
                }
            }
            Err(err) => self.status = format!("Could not add color: {}", err),
        }
    }

    fn remove_selected_color(&mut self) {
        let Some(color) = self.controller.selected_color().cloned() else {
            self.status = "Select a custom color to remove".into();
            return;
        };
        let Some(id) = self
            .session
            .store
            .custom_markers()
            .iter()
            .find(|e| e.color == color)
            .map(|e| e.id.clone())
        else {
            self.status = "Built-in colors cannot be removed".into();
            return;
        };
        if let Some(entry) = self.session.store.remove_custom_color(&id) {
            self.controller.forget_color(&entry.color);
            self.status = format!("Removed {} from the palette", entry.label);
        }
    }

    fn export_to(&mut self, input: &str) {
        let Some(name) = normalize_export_name(input) else {
            self.status = "Export canceled".into();
            return;
        };
        let doc = export_document(&self.session.store, Utc::now());
        let written = to_json(&doc)
            .context("encoding export")
            .and_then(|json| fs::write(&name, json).with_context(|| format!("writing {}", name)));
        match written {
            Ok(()) => {
                tracing::info!(path = %name, "exported annotations");
                self.status = format!("Exported to {}", name);
            }
            Err(err) => self.status = format!("Export failed: {:#}", err),
        }
    }

    fn import_from(&mut self, input: &str) {
        let path = input.trim();
        if path.is_empty() {
            self.status = "Import canceled".into();
            return;
        }
        let imported = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path))
            .and_then(|raw| import_document(&raw).map_err(anyhow::Error::from));
        match imported {
            Ok(imported) => {
                let dropped = imported.dropped;
                codec::apply_import(
                    imported,
                    &mut self.session.store,
                    &mut self.controller,
                    &mut self.timeline,
                );
                self.session.replace_remote();
                self.status = format!(
                    "Imported {} colors and {} notes ({} invalid entries skipped)",
                    self.session.store.colors().len(),
                    self.session.store.notes().len(),
                    dropped
                );
            }
            Err(err) => {
                tracing::warn!(%err, "import rejected");
                self.status = format!("Import failed: {:#}", err);
            }
        }
    }

    fn move_cursor(&mut self, days: i64) {
        let Some(next) = add_days(self.cursor.noon(), days).and_then(date_key) else {
            return;
        };
        self.cursor = next;
        self.timeline
            .ensure_visible(next, self.session.store.colors(), self.session.store.notes());
    }

    fn go_to_today(&mut self) {
        let Some(today) = self.timeline.today() else {
            return;
        };
        self.cursor = today;
        self.timeline
            .ensure_visible(today, self.session.store.colors(), self.session.store.notes());
        self.timeline.request_center(today);
    }

    fn scroll_page(&mut self, direction: isize) {
        let page = self.timeline.viewport_height().max(1) as isize;
        self.timeline.scroll_by(direction * page);
    }

    fn tool_status(&self) -> String {
        match self.controller.mode() {
            ToolMode::None => "No tool selected".into(),
            ToolMode::Color => match self.controller.selected_color() {
                Some(color) => format!(
                    "Painting with {}",
                    describe_color(color, &self.session.store.palette())
                ),
                None => "No color selected".into(),
            },
            ToolMode::Erase => "Eraser active".into(),
            ToolMode::Pen => "Pen active: click a day to edit its note".into(),
        }
    }

    fn draw(&mut self, f: &mut ratatui::Frame<'_>) {
        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Min(8),
                Constraint::Length(7),
            ])
            .split(f.size());

        self.draw_header(f, layout[0]);
        self.draw_calendar(f, layout[1]);
        self.draw_footer(f, layout[2]);

        match &self.mode {
            Mode::EditingNote { key, field } => self.draw_note_editor(f, *key, field),
            Mode::Prompt { kind, field } => self.draw_prompt(f, *kind, field),
            Mode::ChooseClear => self.draw_clear_choice(f),
            Mode::ConfirmClear(scope) => self.draw_confirm_clear(f, *scope),
            Mode::Normal => {}
        }
    }

    fn draw_header(&self, f: &mut ratatui::Frame<'_>, area: Rect) {
        let years = match (self.timeline.min_year(), self.timeline.max_year()) {
            (Some(min), Some(max)) => format!("years {}-{}", min, max),
            _ => "no years".into(),
        };
        let mut tool = format!("tool {}", self.controller.mode().label());
        if let Some(color) = self.controller.selected_color() {
            tool.push(' ');
            tool.push_str(color.as_str());
        }
        if self.captured.is_some() {
            tool.push_str(" (dragging)");
        }
        let title = Line::from(vec![
            Span::styled(
                "yeargrid ",
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                self.session.location.scope_label(),
                Style::default().fg(Color::Green),
            ),
            Span::raw("  •  "),
            Span::styled(
                format!("{}", self.session.location.dir.display()),
                Style::default().fg(Color::DarkGray),
            ),
            Span::raw("  •  "),
            Span::styled(years, Style::default().fg(Color::Gray)),
            Span::raw("  •  "),
            Span::styled(tool, Style::default().fg(Color::Magenta)),
        ]);

        let block = Block::default()
            .borders(Borders::BOTTOM)
            .border_style(Style::default().fg(Color::DarkGray));
        let paragraph = Paragraph::new(title)
            .alignment(Alignment::Center)
            .block(block);
        f.render_widget(paragraph, area);
    }

    fn draw_calendar(&mut self, f: &mut ratatui::Frame<'_>, area: Rect) {
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray));
        let inner = block.inner(area);
        f.render_widget(block, area);

        let colors = self.session.store.colors();
        let notes = self.session.store.notes();
        self.timeline.settle_layout(usize::from(inner.height));
        let mut edges = SentinelEdges { margin: BLOCK_ROWS };
        self.timeline.poll_edges(&mut edges, colors, notes);

        let slots = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(
                std::iter::once(Constraint::Length(LABEL_WIDTH)).chain(
                    (0..GRID_COLUMNS).map(|_| Constraint::Ratio(1, GRID_COLUMNS as u32)),
                ),
            )
            .split(Rect { height: 1, ..inner });
        let label_width = usize::from(slots[0].width);
        let columns: Vec<(u16, u16)> = slots[1..].iter().map(|r| (r.x, r.width)).collect();

        let scroll_top = self.timeline.scroll_top();
        let lines: Vec<Line<'static>> = (scroll_top..scroll_top + usize::from(inner.height))
            .map(|row| match self.timeline.block_at(row) {
                Some((block, within)) => {
                    grid_line(block, within, label_width, &columns, self.cursor)
                }
                None => Line::from(""),
            })
            .collect();
        f.render_widget(Paragraph::new(lines), inner);

        self.geometry = GridGeometry {
            area: inner,
            columns,
            scroll_top,
        };
    }

    fn draw_footer(&self, f: &mut ratatui::Frame<'_>, area: Rect) {
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(3), Constraint::Min(2)])
            .split(area);

        let help_bar = Paragraph::new(vec![self.palette_line(), footer_help_line()])
            .alignment(Alignment::Center)
            .block(
                Block::default()
                    .borders(Borders::TOP)
                    .border_style(Style::default().fg(Color::DarkGray)),
            );
        f.render_widget(help_bar, rows[0]);

        let bottom = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(rows[1]);

        let status = Paragraph::new(self.status.clone())
            .wrap(Wrap { trim: true })
            .block(
                Block::default()
                    .borders(Borders::TOP)
                    .border_style(Style::default().fg(Color::DarkGray)),
            );
        f.render_widget(status, bottom[0]);

        let (detail_lines, title) = self.detail_content();
        let detail = Paragraph::new(detail_lines)
            .wrap(Wrap { trim: true })
            .block(
                Block::default()
                    .borders(Borders::TOP)
                    .border_style(Style::default().fg(Color::DarkGray))
                    .title(title),
            );
        f.render_widget(detail, bottom[1]);
    }

    fn palette_line(&self) -> Line<'static> {
        let selected = self.controller.selected_color();
        let mut spans = Vec::new();
        for (idx, entry) in self.session.store.palette().into_iter().take(9).enumerate() {
            let (r, g, b) = entry.color.rgb();
            let mut swatch = Style::default().bg(Color::Rgb(r, g, b)).fg(Color::Black);
            if selected == Some(&entry.color) {
                swatch = swatch.add_modifier(Modifier::BOLD | Modifier::UNDERLINED);
            }
            spans.push(Span::styled(
                format!("{}", idx + 1),
                Style::default().fg(Color::LightCyan),
            ));
            spans.push(Span::styled(format!(" {} ", entry.label), swatch));
            spans.push(Span::raw("  "));
        }
        Line::from(spans)
    }

    fn detail_content(&self) -> (Vec<Line<'static>>, String) {
        let key = self.hover.unwrap_or(self.cursor);
        let mut lines = vec![Line::from(Span::styled(
            key.date().format("%a %Y-%m-%d").to_string(),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ))];
        if let Some(color) = self.session.store.color(key) {
            lines.push(Line::from(describe_color(
                color,
                &self.session.store.palette(),
            )));
        }
        let cell = self
            .timeline
            .blocks()
            .find(|b| b.year == key.year())
            .and_then(|b| b.cell(key));
        let note = cell.and_then(|c| c.note.as_ref());
        match note {
            Some(note) => lines.extend(note.tooltip.lines().map(|l| {
                Line::from(Span::styled(
                    l.to_string(),
                    Style::default().fg(Color::Gray),
                ))
            })),
            None => lines.push(Line::from(Span::styled(
                "No note",
                Style::default().fg(Color::DarkGray),
            ))),
        }
        let source = if self.hover.is_some() { "Hover" } else { "Cursor" };
        (lines, detail_title(source, note.map(|n| n.preview.as_str())))
    }

    fn draw_note_editor(&self, f: &mut ratatui::Frame<'_>, key: DateKey, field: &FieldValue) {
        let area = centered_rect(70, 60, f.size());
        let mut lines = field_lines("Note", field, true);
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            "Ctrl+Enter or Ctrl+S to save • Esc to cancel • empty note removes it",
            Style::default().fg(Color::Gray),
        )));
        let dialog = Paragraph::new(lines)
            .block(
                Block::default()
                    .title(Span::styled(
                        format!("Note for {}", key.date().format("%a %Y-%m-%d")),
                        Style::default()
                            .fg(Color::Cyan)
                            .add_modifier(Modifier::BOLD),
                    ))
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::Cyan)),
            )
            .wrap(Wrap { trim: false });

        f.render_widget(Clear, area);
        f.render_widget(dialog, area);
    }

    fn draw_prompt(&self, f: &mut ratatui::Frame<'_>, kind: PromptKind, field: &FieldValue) {
        let area = centered_rect(60, 25, f.size());
        let mut lines = field_lines("Value", field, true);
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            "Enter to confirm • Esc or empty input to cancel",
            Style::default().fg(Color::Gray),
        )));
        let dialog = Paragraph::new(lines)
            .block(
                Block::default()
                    .title(Span::styled(
                        kind.title(),
                        Style::default()
                            .fg(Color::Cyan)
                            .add_modifier(Modifier::BOLD),
                    ))
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::Cyan)),
            )
            .wrap(Wrap { trim: true });
        f.render_widget(Clear, area);
        f.render_widget(dialog, area);
    }

    fn draw_clear_choice(&self, f: &mut ratatui::Frame<'_>) {
        let area = centered_rect(50, 30, f.size());
        let body = vec![
            Line::from(Span::styled(
                "What should be cleared?",
                Style::default()
                    .fg(Color::LightRed)
                    .add_modifier(Modifier::BOLD),
            )),
            Line::from(""),
            Line::from("c colors  •  n notes  •  a everything"),
            Line::from("Esc to cancel"),
        ];
        self.draw_danger_dialog(f, area, "Clear", body);
    }

    fn draw_confirm_clear(&self, f: &mut ratatui::Frame<'_>, scope: ClearScope) {
        let area = centered_rect(50, 30, f.size());
        let body = vec![
            Line::from(Span::styled(
                format!("Remove {}? This cannot be undone.", clear_label(scope)),
                Style::default()
                    .fg(Color::LightRed)
                    .add_modifier(Modifier::BOLD),
            )),
            Line::from(""),
            Line::from("Press y to confirm, n or Esc to cancel"),
        ];
        self.draw_danger_dialog(f, area, "Confirm Clear", body);
    }

    fn draw_danger_dialog(
        &self,
        f: &mut ratatui::Frame<'_>,
        area: Rect,
        title: &'static str,
        body: Vec<Line<'static>>,
    ) {
        let dialog = Paragraph::new(body).alignment(Alignment::Center).block(
            Block::default()
                .title(Span::styled(
                    title,
                    Style::default()
                        .fg(Color::LightRed)
                        .add_modifier(Modifier::BOLD),
                ))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::LightRed)),
        );
        f.render_widget(Clear, area);
        f.render_widget(dialog, area);
    }
}

fn clear_label(scope: ClearScope) -> &'static str {
    match scope {
        ClearScope::Colors => "all colors",
        ClearScope::Notes => "all notes",
        ClearScope::All => "all colors and notes",
    }
}

fn footer_help_line() -> Line<'static> {
    Line::from(vec![
        Span::styled("1-9", Style::default().fg(Color::LightCyan)),
        Span::raw(" color  "),
        Span::styled("p", Style::default().fg(Color::LightYellow)),
        Span::raw(" pen  "),
        Span::styled("x", Style::default().fg(Color::LightYellow)),
        Span::raw(" erase  "),
        Span::styled("←↑↓→", Style::default().fg(Color::LightCyan)),
        Span::raw(" move  "),
        Span::styled("Enter", Style::default().fg(Color::LightGreen)),
        Span::raw(" apply  "),
        Span::styled("t", Style::default().fg(Color::LightCyan)),
        Span::raw(" today  "),
        Span::styled("a/D", Style::default().fg(Color::LightMagenta)),
        Span::raw(" add/remove color  "),
        Span::styled("E/I", Style::default().fg(Color::LightMagenta)),
        Span::raw(" export/import  "),
        Span::styled("c", Style::default().fg(Color::LightRed)),
        Span::raw(" clear  "),
        Span::styled("q", Style::default().fg(Color::LightRed)),
        Span::raw(" quit"),
    ])
}

/// Pane title with the first word of the note, if there is one.
fn detail_title(source: &str, preview: Option<&str>) -> String {
    match preview {
        Some(word) if !word.is_empty() => format!("{}: {}", source, word),
        _ => source.to_string(),
    }
}

/// One terminal row of a year block: header, month or spacer.
fn grid_line(
    block: &YearBlock,
    within: usize,
    label_width: usize,
    columns: &[(u16, u16)],
    cursor: DateKey,
) -> Line<'static> {
    if within == 0 {
        let mut spans = vec![Span::styled(
            fit(&block.year.to_string(), label_width),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )];
        for (header, (_, width)) in block.header.iter().zip(columns) {
            let style = if header.weekend {
                Style::default().fg(Color::Magenta).bg(WEEKEND_BG)
            } else {
                Style::default().fg(Color::Gray)
            };
            spans.push(Span::styled(fit(header.label, usize::from(*width)), style));
        }
        return Line::from(spans);
    }
    match block.months.get(within - 1) {
        Some(month) => month_line(month, label_width, columns, cursor),
        None => Line::from(""),
    }
}

fn month_line(
    month: &MonthRow,
    label_width: usize,
    columns: &[(u16, u16)],
    cursor: DateKey,
) -> Line<'static> {
    let mut spans = vec![Span::styled(
        fit(&month.label, label_width),
        Style::default().fg(Color::Gray),
    )];
    for (cell, (_, width)) in month.cells.iter().zip(columns) {
        spans.push(day_span(cell, usize::from(*width), cursor));
    }
    Line::from(spans)
}

fn day_span(cell: &GridCell, width: usize, cursor: DateKey) -> Span<'static> {
    let weekend = cell.weekend();
    let mut style = Style::default().fg(if weekend { Color::Gray } else { Color::White });
    if weekend {
        style = style.bg(WEEKEND_BG);
    }
    let Some(state) = cell.state() else {
        return Span::styled(" ".repeat(width), style);
    };
    let mut text = format!("{:>2}", state.day);
    if state.note.is_some() {
        text.push(NOTE_MARK);
        style = style.add_modifier(Modifier::UNDERLINED);
    }
    if let Some(color) = &state.color {
        let (r, g, b) = color.rgb();
        style = style.bg(Color::Rgb(r, g, b)).fg(Color::Black);
    }
    if state.today {
        style = style.fg(Color::LightRed).add_modifier(Modifier::BOLD);
    }
    if state.key == cursor {
        style = style.add_modifier(Modifier::REVERSED);
    }
    Span::styled(fit(&text, width), style)
}

/// Pads or cuts `text` to exactly `width` characters.
fn fit(text: &str, width: usize) -> String {
    let mut out: String = text.chars().take(width).collect();
    let len = out.chars().count();
    out.extend(std::iter::repeat(' ').take(width - len));
    out
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(
        stdout,
        EnterAlternateScreen,
        EnableMouseCapture,
        EnableFocusChange
    )?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

fn teardown_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        DisableFocusChange,
        DisableMouseCapture,
        LeaveAlternateScreen
    )?;
    terminal.show_cursor()?;
    Ok(())
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Percentage((100 - percent_y) / 2),
                Constraint::Percentage(percent_y),
                Constraint::Percentage((100 - percent_y) / 2),
            ]
            .as_ref(),
        )
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints(
            [
                Constraint::Percentage((100 - percent_x) / 2),
                Constraint::Percentage(percent_x),
                Constraint::Percentage((100 - percent_x) / 2),
            ]
            .as_ref(),
        )
        .split(popup_layout[1])[1]
}

fn prev_grapheme(cursor: usize, text: &str) -> usize {
    if cursor == 0 {
        return 0;
    }
    let mut prev = 0;
    for (idx, _) in text.char_indices() {
        if idx >= cursor {
            break;
        }
        prev = idx;
    }
    prev
}

fn next_grapheme(cursor: usize, text: &str) -> usize {
    for (idx, ch) in text.char_indices() {
        if idx > cursor {
            return idx;
        }
        if idx == cursor {
            return cursor + ch.len_utf8();
        }
    }
    text.len()
}

fn line_state(text: &str, cursor: usize) -> (Vec<usize>, usize, usize) {
    let mut starts = vec![0];
    for (idx, ch) in text.char_indices() {
        if ch == '\n' {
            starts.push(idx + 1);
        }
    }
    let mut line_idx = 0;
    for (i, start) in starts.iter().enumerate() {
        if *start <= cursor {
            line_idx = i;
        } else {
            break;
        }
    }
    let col = text[starts.get(line_idx).copied().unwrap_or(0)..cursor]
        .chars()
        .count();
    (starts, line_idx, col)
}

fn index_at_col(text: &str, start: usize, target_col: usize) -> usize {
    let slice = &text[start..];
    let limit = slice.find('\n').unwrap_or(slice.len());
    for (col, (idx, _)) in slice[..limit].char_indices().enumerate() {
        if col == target_col {
            return start + idx;
        }
    }
    start + limit
}

fn field_lines(label: &str, field: &FieldValue, active: bool) -> Vec<Line<'static>> {
    let label_style = Style::default()
        .fg(Color::Gray)
        .add_modifier(Modifier::BOLD | Modifier::DIM);
    let value_style = Style::default().fg(if active { Color::Cyan } else { Color::White });
    let prefix = format!("{}: ", label);
    let spacer = " ".repeat(prefix.chars().count());
    let text = if active {
        field.with_caret()
    } else {
        field.value.clone()
    };
    text.split('\n')
        .enumerate()
        .map(|(idx, line)| {
            Line::from(vec![
                Span::styled(
                    if idx == 0 {
                        prefix.clone()
                    } else {
                        spacer.clone()
                    },
                    label_style,
                ),
                Span::styled(line.to_string(), value_style),
            ])
        })
        .collect()
}
