use crate::dates::{DateKey, MAX_KEY_YEAR};
use crate::model::{ColorMap, NoteMap};
use crate::year_block::{build_year, YearBlock};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineSettings {
    pub chunk_years: u32,
    pub years_before: u32,
    pub years_after: u32,
}

impl Default for TimelineSettings {
    fn default() -> Self {
        TimelineSettings {
            chunk_years: 2,
            years_before: 2,
            years_after: 2,
        }
    }
}

fn year_span(years: u32) -> i32 {
    i32::try_from(years).unwrap_or(i32::MAX)
}

/// Signals raised by whatever watches the edges of the scrolled content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeSignal {
    NearTop,
    NearBottom,
}

/// Host geometry of a placed block, in the host's scroll units.
pub trait BlockMetrics {
    fn block_height(&self, block: &YearBlock) -> usize;
    /// Top offset of a month row inside its block and the row's height.
    fn month_row(&self, block: &YearBlock, month0: usize) -> (usize, usize);
}

/// What an edge detector gets to see. The timeline never inspects this itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollWindow {
    pub scroll_top: usize,
    pub viewport_height: usize,
    pub content_height: usize,
}

pub trait EdgePort {
    fn edges(&mut self, window: ScrollWindow) -> Vec<EdgeSignal>;
}

/// Reports an edge while the viewport is within `margin` units of it, the
/// way a sentinel element before the first and after the last block would.
#[derive(Debug, Clone, Copy)]
pub struct SentinelEdges {
    pub margin: usize,
}

impl EdgePort for SentinelEdges {
    fn edges(&mut self, window: ScrollWindow) -> Vec<EdgeSignal> {
        let mut out = Vec::new();
        if window.scroll_top <= self.margin {
            out.push(EdgeSignal::NearTop);
        }
        let bottom = window.scroll_top + window.viewport_height + self.margin;
        if bottom >= window.content_height {
            out.push(EdgeSignal::NearBottom);
        }
        out
    }
}

/// Contiguous, grow-only run of materialized year blocks plus the scroll
/// offset into them.
pub struct Timeline<M: BlockMetrics> {
    settings: TimelineSettings,
    metrics: M,
    blocks: VecDeque<YearBlock>,
    today: Option<DateKey>,
    scroll_top: usize,
    viewport_height: usize,
    pending_center: Option<DateKey>,
}

impl<M: BlockMetrics> Timeline<M> {
    pub fn new(settings: TimelineSettings, metrics: M) -> Self {
        Timeline {
            settings: TimelineSettings {
                chunk_years: settings.chunk_years.max(1),
                ..settings
            },
            metrics,
            blocks: VecDeque::new(),
            today: None,
            scroll_top: 0,
            viewport_height: 0,
            pending_center: None,
        }
    }

    /// Materializes the years around today and asks for today to be
    /// centered once the host knows its viewport size.
    pub fn render_initial_range(&mut self, today: DateKey, colors: &ColorMap, notes: &NoteMap) {
        let year = today.year();
        let first = year.saturating_sub(year_span(self.settings.years_before)).max(0);
        let last = year
            .saturating_add(year_span(self.settings.years_after))
            .min(MAX_KEY_YEAR);
        self.today = Some(today);
        self.blocks = (first..=last)
            .map(|y| build_year(y, self.today, colors, notes))
            .collect();
        self.scroll_top = 0;
        self.pending_center = Some(today);
        tracing::debug!(first, last, "rendered initial years");
    }

    /// Called by the host after layout. Applies a pending center request.
    pub fn settle_layout(&mut self, viewport_height: usize) {
        self.viewport_height = viewport_height;
        if let Some(key) = self.pending_center.take() {
            self.center_on(key);
        }
        self.clamp_scroll();
    }

    pub fn request_center(&mut self, key: DateKey) {
        self.pending_center = Some(key);
    }

    pub fn on_edge(&mut self, signal: EdgeSignal, colors: &ColorMap, notes: &NoteMap) -> bool {
        match signal {
            EdgeSignal::NearTop => self.on_near_top(colors, notes),
            EdgeSignal::NearBottom => self.on_near_bottom(colors, notes),
        }
    }

    /// Prepends one chunk of earlier years and shifts the scroll offset by
    /// exactly the added height so the visible content stays put.
    pub fn on_near_top(&mut self, colors: &ColorMap, notes: &NoteMap) -> bool {
        let Some(min_year) = self.min_year() else {
            return false;
        };
        let first = min_year
            .saturating_sub(year_span(self.settings.chunk_years))
            .max(0);
        if first >= min_year {
            return false;
        }
        let before = self.content_height();
        for year in (first..min_year).rev() {
            self.blocks
                .push_front(build_year(year, self.today, colors, notes));
        }
        let after = self.content_height();
        self.scroll_top += after - before;
        tracing::debug!(first, scroll_top = self.scroll_top, "prepended years");
        true
    }

    pub fn on_near_bottom(&mut self, colors: &ColorMap, notes: &NoteMap) -> bool {
        let Some(max_year) = self.max_year() else {
            return false;
        };
        let last = max_year
            .saturating_add(year_span(self.settings.chunk_years))
            .min(MAX_KEY_YEAR);
        if last <= max_year {
            return false;
        }
        for year in max_year + 1..=last {
            self.blocks
                .push_back(build_year(year, self.today, colors, notes));
        }
        tracing::debug!(last, "appended years");
        true
    }

    /// Runs the edge port until it stops reporting edges that can still grow.
    pub fn poll_edges<P: EdgePort>(&mut self, port: &mut P, colors: &ColorMap, notes: &NoteMap) {
        // bounded: every round either grows the range or stops
        for _ in 0..64 {
            let signals = port.edges(self.window());
            let grew = signals
                .into_iter()
                .fold(false, |grew, s| self.on_edge(s, colors, notes) | grew);
            if !grew {
                break;
            }
        }
    }

    pub fn min_year(&self) -> Option<i32> {
        self.blocks.front().map(|b| b.year)
    }

    pub fn max_year(&self) -> Option<i32> {
        self.blocks.back().map(|b| b.year)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &YearBlock> {
        self.blocks.iter()
    }

    pub fn today(&self) -> Option<DateKey> {
        self.today
    }

    pub fn scroll_top(&self) -> usize {
        self.scroll_top
    }

    pub fn viewport_height(&self) -> usize {
        self.viewport_height
    }

    pub fn content_height(&self) -> usize {
        self.blocks
            .iter()
            .map(|b| self.metrics.block_height(b))
            .sum()
    }

    pub fn window(&self) -> ScrollWindow {
        ScrollWindow {
            scroll_top: self.scroll_top,
            viewport_height: self.viewport_height,
            content_height: self.content_height(),
        }
    }

    pub fn scroll_by(&mut self, delta: isize) {
        self.scroll_top = self.scroll_top.saturating_add_signed(delta);
        self.clamp_scroll();
    }

    /// Blocks paired with their top offset in content coordinates.
    pub fn placed_blocks(&self) -> impl Iterator<Item = (usize, &YearBlock)> {
        self.blocks.iter().scan(0usize, move |top, block| {
            let placed = (*top, block);
            *top += self.metrics.block_height(block);
            Some(placed)
        })
    }

    /// Block under a content offset and the offset relative to that block.
    pub fn block_at(&self, offset: usize) -> Option<(&YearBlock, usize)> {
        self.placed_blocks()
            .find(|(top, block)| offset >= *top && offset < top + self.metrics.block_height(block))
            .map(|(top, block)| (block, offset - top))
    }

    /// Content offset and height of the month row holding `key`.
    pub fn row_of(&self, key: DateKey) -> Option<(usize, usize)> {
        let (top, block) = self
            .placed_blocks()
            .find(|(_, block)| block.year == key.year())?;
        let (month0, _) = block.position_of(key)?;
        let (row_top, row_height) = self.metrics.month_row(block, month0);
        Some((top + row_top, row_height))
    }

    pub fn center_on(&mut self, key: DateKey) {
        if let Some((top, height)) = self.row_of(key) {
            let target = (top + height / 2).saturating_sub(self.viewport_height / 2);
            self.scroll_top = target;
            self.clamp_scroll();
        }
    }

    /// Grows the range until `key` is materialized, then scrolls just enough
    /// to show its row.
    pub fn ensure_visible(&mut self, key: DateKey, colors: &ColorMap, notes: &NoteMap) {
        while self.min_year().is_some_and(|y| key.year() < y) {
            if !self.on_near_top(colors, notes) {
                break;
            }
        }
        while self.max_year().is_some_and(|y| key.year() > y) {
            if !self.on_near_bottom(colors, notes) {
                break;
            }
        }
        let Some((top, height)) = self.row_of(key) else {
            return;
        };
        if top < self.scroll_top {
            self.scroll_top = top;
        } else if top + height > self.scroll_top + self.viewport_height {
            self.scroll_top = (top + height).saturating_sub(self.viewport_height);
        }
        self.clamp_scroll();
    }

    pub fn refresh_cells(&mut self, keys: &[DateKey], colors: &ColorMap, notes: &NoteMap) {
        let today = self.today;
        for key in keys {
            if let Some(block) = self.blocks.iter_mut().find(|b| b.year == key.year()) {
                block.refresh_cell(*key, today, colors, notes);
            }
        }
    }

    /// Rebuilds every materialized block from the maps. Block heights do not
    /// depend on annotations, so the scroll offset is unaffected.
    pub fn refresh_all(&mut self, colors: &ColorMap, notes: &NoteMap) {
        let today = self.today;
        for block in self.blocks.iter_mut() {
            *block = build_year(block.year, today, colors, notes);
        }
    }

    fn clamp_scroll(&mut self) {
        let max = self.content_height().saturating_sub(self.viewport_height);
        self.scroll_top = self.scroll_top.min(max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    /// Header row, twelve month rows and a spacer.
    struct Rows;

    impl BlockMetrics for Rows {
        fn block_height(&self, _block: &YearBlock) -> usize {
            14
        }

        fn month_row(&self, _block: &YearBlock, month0: usize) -> (usize, usize) {
            (1 + month0, 1)
        }
    }

    /// Heights that vary per year, so anchor math cannot pass by accident.
    struct Uneven;

    impl BlockMetrics for Uneven {
        fn block_height(&self, block: &YearBlock) -> usize {
            100 + (block.year as usize % 7) * 13
        }

        fn month_row(&self, _block: &YearBlock, month0: usize) -> (usize, usize) {
            (10 + month0 * 7, 7)
        }
    }

    fn key(raw: &str) -> DateKey {
        DateKey::parse(raw).unwrap()
    }

    #[fixture]
    fn timeline() -> Timeline<Rows> {
        let mut timeline = Timeline::new(TimelineSettings::default(), Rows);
        timeline.render_initial_range(key("2025-06-15"), &ColorMap::new(), &NoteMap::new());
        timeline
    }

    #[rstest]
    fn initial_range_spans_two_years_each_side(timeline: Timeline<Rows>) {
        assert_eq!(timeline.min_year(), Some(2023));
        assert_eq!(timeline.max_year(), Some(2027));
        assert_eq!(timeline.content_height(), 5 * 14);
    }

    #[rstest]
    fn centering_waits_for_layout(mut timeline: Timeline<Rows>) {
        assert_eq!(timeline.scroll_top(), 0);
        timeline.settle_layout(10);
        // 2025 block starts at 28, June row at +6
        assert_eq!(timeline.scroll_top(), 28 + 6 - 5);
    }

    #[rstest]
    fn prepend_keeps_the_anchor(mut timeline: Timeline<Rows>) {
        timeline.settle_layout(10);
        let before_top = timeline.scroll_top();
        let before_height = timeline.content_height();
        assert!(timeline.on_near_top(&ColorMap::new(), &NoteMap::new()));
        assert_eq!(timeline.min_year(), Some(2021));
        let after_height = timeline.content_height();
        assert_eq!(
            timeline.scroll_top(),
            before_top + (after_height - before_height)
        );
    }

    #[test]
    fn prepend_anchor_with_uneven_heights() {
        let mut timeline = Timeline::new(TimelineSettings::default(), Uneven);
        timeline.render_initial_range(key("2025-01-01"), &ColorMap::new(), &NoteMap::new());
        timeline.settle_layout(40);
        timeline.scroll_by(17);
        let before_top = timeline.scroll_top();
        let before_height = timeline.content_height();
        let anchor = timeline.row_of(key("2025-01-01")).unwrap().0 - before_top;
        timeline.on_near_top(&ColorMap::new(), &NoteMap::new());
        let after_height = timeline.content_height();
        assert_eq!(
            timeline.scroll_top(),
            before_top + (after_height - before_height)
        );
        let anchor_after = timeline.row_of(key("2025-01-01")).unwrap().0 - timeline.scroll_top();
        assert_eq!(anchor, anchor_after);
    }

    #[rstest]
    fn append_leaves_scroll_alone(mut timeline: Timeline<Rows>) {
        timeline.settle_layout(10);
        let before = timeline.scroll_top();
        assert!(timeline.on_near_bottom(&ColorMap::new(), &NoteMap::new()));
        assert_eq!(timeline.max_year(), Some(2029));
        assert_eq!(timeline.scroll_top(), before);
    }

    #[test]
    fn range_stops_at_key_limits() {
        let mut timeline = Timeline::new(TimelineSettings::default(), Rows);
        timeline.render_initial_range(key("9998-01-01"), &ColorMap::new(), &NoteMap::new());
        assert_eq!(timeline.max_year(), Some(9999));
        assert!(!timeline.on_near_bottom(&ColorMap::new(), &NoteMap::new()));

        let mut timeline = Timeline::new(TimelineSettings::default(), Rows);
        timeline.render_initial_range(key("0001-01-01"), &ColorMap::new(), &NoteMap::new());
        assert_eq!(timeline.min_year(), Some(0));
        assert!(!timeline.on_near_top(&ColorMap::new(), &NoteMap::new()));
    }

    #[test]
    fn oversized_settings_stop_at_last_key_year() {
        let settings = TimelineSettings {
            chunk_years: u32::MAX,
            years_before: 0,
            years_after: i32::MAX as u32,
        };
        let mut timeline = Timeline::new(settings, Rows);
        timeline.render_initial_range(key("9999-06-15"), &ColorMap::new(), &NoteMap::new());
        assert_eq!((timeline.min_year(), timeline.max_year()), (Some(9999), Some(9999)));
        assert!(!timeline.on_near_bottom(&ColorMap::new(), &NoteMap::new()));
    }

    #[rstest]
    fn center_request_waits_for_layout(mut timeline: Timeline<Rows>) {
        timeline.settle_layout(10);
        timeline.scroll_by(-1000);
        timeline.request_center(key("2025-06-15"));
        assert_eq!(timeline.scroll_top(), 0);
        timeline.settle_layout(10);
        assert_eq!(timeline.scroll_top(), 29);
    }

    #[rstest]
    fn sentinel_port_grows_both_ends(mut timeline: Timeline<Rows>) {
        timeline.settle_layout(10);
        timeline.scroll_by(-1000);
        let mut port = SentinelEdges { margin: 3 };
        timeline.poll_edges(&mut port, &ColorMap::new(), &NoteMap::new());
        assert!(timeline.min_year().unwrap() < 2023);
        assert!(timeline.scroll_top() > 3);

        timeline.scroll_by(10_000);
        timeline.poll_edges(&mut port, &ColorMap::new(), &NoteMap::new());
        assert!(timeline.max_year().unwrap() > 2027);
    }

    #[rstest]
    fn block_lookup_by_offset(timeline: Timeline<Rows>) {
        let (block, within) = timeline.block_at(30).unwrap();
        assert_eq!(block.year, 2025);
        assert_eq!(within, 2);
        assert!(timeline.block_at(70).is_none());
    }

    #[rstest]
    fn ensure_visible_extends_range(mut timeline: Timeline<Rows>) {
        timeline.settle_layout(10);
        timeline.ensure_visible(key("2016-03-01"), &ColorMap::new(), &NoteMap::new());
        assert!(timeline.min_year().unwrap() <= 2016);
        let (top, _) = timeline.row_of(key("2016-03-01")).unwrap();
        assert!(top >= timeline.scroll_top() && top < timeline.scroll_top() + 10);
    }

    #[rstest]
    fn refresh_reprojects_cells(mut timeline: Timeline<Rows>) {
        let mut colors = ColorMap::new();
        colors.insert(
            key("2024-02-29"),
            crate::model::HexColor::parse("#fff3b0").unwrap(),
        );
        timeline.refresh_cells(&[key("2024-02-29")], &colors, &NoteMap::new());
        let block = timeline.blocks().find(|b| b.year == 2024).unwrap();
        assert!(block.cell(key("2024-02-29")).unwrap().color.is_some());

        timeline.refresh_all(&ColorMap::new(), &NoteMap::new());
        let block = timeline.blocks().find(|b| b.year == 2024).unwrap();
        assert!(block.cell(key("2024-02-29")).unwrap().color.is_none());
    }
}
