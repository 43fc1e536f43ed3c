use crate::annotations::AnnotationStore;
use crate::dates::DateKey;
use crate::model::HexColor;
use crate::storage::KeyValueStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolMode {
    #[default]
    None,
    Color,
    Erase,
    Pen,
}

impl ToolMode {
    pub fn label(&self) -> &'static str {
        match self {
            ToolMode::None => "none",
            ToolMode::Color => "color",
            ToolMode::Erase => "erase",
            ToolMode::Pen => "pen",
        }
    }
}

pub type PointerId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// Host side of the pointer surface.
pub trait PointerHost {
    /// Day cell under the coordinates. Placeholders and chrome resolve to `None`.
    fn day_at(&self, point: Point) -> Option<DateKey>;
    fn capture_pointer(&mut self, _pointer_id: PointerId) {}
    fn release_pointer(&mut self, _pointer_id: PointerId) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragState {
    pub pointer_id: PointerId,
    pub mode: ToolMode,
    pub color: Option<HexColor>,
    pub start: DateKey,
    pub last: DateKey,
    /// Set once the pointer reached a second day; a release without it is a click.
    pub moved: bool,
}

/// What the host has to do after an event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Effect {
    pub changed: Vec<DateKey>,
    pub open_note: Option<DateKey>,
}

impl Effect {
    fn changed(keys: Vec<DateKey>) -> Self {
        Effect {
            changed: keys,
            open_note: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct InteractionController {
    mode: ToolMode,
    selected: Option<HexColor>,
    drag: Option<DragState>,
}

impl InteractionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> ToolMode {
        self.mode
    }

    pub fn selected_color(&self) -> Option<&HexColor> {
        self.selected.as_ref()
    }

    pub fn drag(&self) -> Option<&DragState> {
        self.drag.as_ref()
    }

    /// Selecting the active color again switches back to no tool.
    pub fn select_color(&mut self, color: HexColor) {
        if self.mode == ToolMode::Color && self.selected.as_ref() == Some(&color) {
            self.reset();
            return;
        }
        self.selected = Some(color);
        self.mode = ToolMode::Color;
    }

    pub fn toggle_pen(&mut self) {
        self.toggle_tool(ToolMode::Pen);
    }

    pub fn toggle_erase(&mut self) {
        self.toggle_tool(ToolMode::Erase);
    }

    fn toggle_tool(&mut self, tool: ToolMode) {
        self.selected = None;
        self.mode = if self.mode == tool {
            ToolMode::None
        } else {
            tool
        };
    }

    pub fn reset(&mut self) {
        self.mode = ToolMode::None;
        self.selected = None;
    }

    /// Forgets a removed palette color if it was the active one.
    pub fn forget_color(&mut self, color: &HexColor) {
        if self.selected.as_ref() == Some(color) {
            self.reset();
        }
    }

    /// `target` is the day under the event target, if any.
    pub fn pointer_down<H: PointerHost>(
        &mut self,
        pointer_id: PointerId,
        primary_button: bool,
        target: Option<DateKey>,
        host: &mut H,
    ) -> Effect {
        if self.drag.is_some() || !primary_button {
            return Effect::default();
        }
        let color = match self.mode {
            ToolMode::None => return Effect::default(),
            ToolMode::Color => match &self.selected {
                Some(c) => Some(c.clone()),
                None => return Effect::default(),
            },
            ToolMode::Erase | ToolMode::Pen => None,
        };
        let Some(start) = target else {
            return Effect::default();
        };
        self.drag = Some(DragState {
            pointer_id,
            mode: self.mode,
            color,
            start,
            last: start,
            moved: false,
        });
        host.capture_pointer(pointer_id);
        Effect::default()
    }

    /// Hit-tests by coordinates: a captured pointer keeps reporting its origin as target.
    pub fn pointer_move<S: KeyValueStore, H: PointerHost>(
        &mut self,
        pointer_id: PointerId,
        point: Point,
        primary_pressed: bool,
        host: &H,
        store: &mut AnnotationStore<S>,
    ) -> Effect {
        let Some(drag) = self.drag.as_mut() else {
            return Effect::default();
        };
        if drag.pointer_id != pointer_id || drag.mode == ToolMode::Pen || !primary_pressed {
            return Effect::default();
        }
        let Some(key) = host.day_at(point) else {
            return Effect::default();
        };
        if key == drag.last {
            return Effect::default();
        }
        drag.moved = true;
        let from = drag.last;
        drag.last = key;
        Effect::changed(fill_step(drag, from, key, store))
    }

    pub fn pointer_up<S: KeyValueStore, H: PointerHost>(
        &mut self,
        pointer_id: PointerId,
        point: Point,
        host: &mut H,
        store: &mut AnnotationStore<S>,
    ) -> Effect {
        let end = host.day_at(point);
        self.finish(pointer_id, end, host, store)
    }

    /// Ends the gesture like a release on the last day reached, so a tap is
    /// still a click. Steps already painted stay painted.
    pub fn pointer_cancel<S: KeyValueStore, H: PointerHost>(
        &mut self,
        pointer_id: PointerId,
        host: &mut H,
        store: &mut AnnotationStore<S>,
    ) -> Effect {
        self.finish(pointer_id, None, host, store)
    }

    fn finish<S: KeyValueStore, H: PointerHost>(
        &mut self,
        pointer_id: PointerId,
        end: Option<DateKey>,
        host: &mut H,
        store: &mut AnnotationStore<S>,
    ) -> Effect {
        if self.drag.as_ref().map(|d| d.pointer_id) != Some(pointer_id) {
            return Effect::default();
        }
        let Some(drag) = self.drag.take() else {
            return Effect::default();
        };
        let effect = if !drag.moved {
            click(&drag, store)
        } else {
            match end {
                Some(end) if end != drag.last && drag.mode != ToolMode::Pen => {
                    Effect::changed(fill_step(&drag, drag.last, end, store))
                }
                _ => Effect::default(),
            }
        };
        host.release_pointer(pointer_id);
        effect
    }

    /// Single activation of a day without a pointer, e.g. from the keyboard.
    pub fn activate<S: KeyValueStore>(
        &mut self,
        key: DateKey,
        store: &mut AnnotationStore<S>,
    ) -> Effect {
        if self.drag.is_some() {
            return Effect::default();
        }
        let color = self.selected.clone();
        if self.mode == ToolMode::Color && color.is_none() {
            return Effect::default();
        }
        let drag = DragState {
            pointer_id: 0,
            mode: self.mode,
            color,
            start: key,
            last: key,
            moved: false,
        };
        click(&drag, store)
    }
}

fn fill_step<S: KeyValueStore>(
    drag: &DragState,
    from: DateKey,
    to: DateKey,
    store: &mut AnnotationStore<S>,
) -> Vec<DateKey> {
    match (drag.mode, &drag.color) {
        (ToolMode::Color, Some(color)) => store.paint_range(from, to, Some(color)),
        (ToolMode::Erase, _) => store.paint_range(from, to, None),
        _ => Vec::new(),
    }
}

fn click<S: KeyValueStore>(drag: &DragState, store: &mut AnnotationStore<S>) -> Effect {
    let key = drag.start;
    match (drag.mode, &drag.color) {
        (ToolMode::Pen, _) => Effect {
            changed: Vec::new(),
            open_note: Some(key),
        },
        (ToolMode::Erase, _) => {
            store.clear_color(key);
            Effect::changed(vec![key])
        }
        (ToolMode::Color, Some(color)) => {
            if store.color(key) == Some(color) {
                store.clear_color(key);
            } else {
                store.set_color(key, color.clone());
            }
            Effect::changed(vec![key])
        }
        _ => Effect::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use rstest::{fixture, rstest};

    /// x = day of January 2025 on row y = 0; everything else is chrome.
    #[derive(Default)]
    struct JanuaryRow {
        captured: Vec<PointerId>,
        released: Vec<PointerId>,
    }

    impl PointerHost for JanuaryRow {
        fn day_at(&self, point: Point) -> Option<DateKey> {
            if point.y != 0 || !(1..=31).contains(&point.x) {
                return None;
            }
            DateKey::parse(&format!("2025-01-{:02}", point.x)).ok()
        }

        fn capture_pointer(&mut self, pointer_id: PointerId) {
            self.captured.push(pointer_id);
        }

        fn release_pointer(&mut self, pointer_id: PointerId) {
            self.released.push(pointer_id);
        }
    }

    struct Ctx {
        host: JanuaryRow,
        store: AnnotationStore<MemoryStore>,
        ctl: InteractionController,
    }

    impl Ctx {
        fn down(&mut self, x: i32) -> Effect {
            let target = self.host.day_at(at(x));
            self.ctl.pointer_down(1, true, target, &mut self.host)
        }

        fn drag_to(&mut self, x: i32) -> Effect {
            self.ctl
                .pointer_move(1, at(x), true, &self.host, &mut self.store)
        }

        fn up(&mut self, x: i32) -> Effect {
            self.ctl.pointer_up(1, at(x), &mut self.host, &mut self.store)
        }

        fn colored(&self) -> Vec<String> {
            self.store.colors().keys().map(|k| k.to_string()).collect()
        }
    }

    fn at(x: i32) -> Point {
        Point { x, y: 0 }
    }

    fn key(raw: &str) -> DateKey {
        DateKey::parse(raw).unwrap()
    }

    fn red() -> HexColor {
        HexColor::parse("#ffd0d0").unwrap()
    }

    #[fixture]
    fn ctx() -> Ctx {
        Ctx {
            host: JanuaryRow::default(),
            store: AnnotationStore::load(MemoryStore::new()).0,
            ctl: InteractionController::new(),
        }
    }

    #[test]
    fn tool_selection_toggles() {
        let mut ctl = InteractionController::new();
        ctl.select_color(red());
        assert_eq!(ctl.mode(), ToolMode::Color);
        ctl.select_color(red());
        assert_eq!(ctl.mode(), ToolMode::None);
        assert!(ctl.selected_color().is_none());

        ctl.select_color(red());
        ctl.toggle_pen();
        assert_eq!(ctl.mode(), ToolMode::Pen);
        assert!(ctl.selected_color().is_none());
        ctl.toggle_erase();
        assert_eq!(ctl.mode(), ToolMode::Erase);
        ctl.toggle_erase();
        assert_eq!(ctl.mode(), ToolMode::None);

        ctl.toggle_pen();
        ctl.select_color(red());
        assert_eq!(ctl.mode(), ToolMode::Color);
    }

    #[rstest]
    #[case(&[3, 4, 5, 6, 7])]
    #[case(&[7, 6, 5, 4, 3])]
    #[case(&[3, 7])]
    #[case(&[7, 3])]
    #[case(&[3, 5, 7])]
    fn drag_paints_inclusive_range_in_any_direction(mut ctx: Ctx, #[case] path: &[i32]) {
        ctx.ctl.select_color(red());
        ctx.down(path[0]);
        for x in &path[1..] {
            ctx.drag_to(*x);
        }
        ctx.up(*path.last().unwrap());
        assert_eq!(
            ctx.colored(),
            vec!["2025-01-03", "2025-01-04", "2025-01-05", "2025-01-06", "2025-01-07"]
        );
        assert!(ctx
            .store
            .colors()
            .values()
            .all(|c| c.as_str() == "#ffd0d0"));
        assert!(ctx.ctl.drag().is_none());
    }

    #[rstest]
    fn click_toggles_same_color(mut ctx: Ctx) {
        ctx.ctl.select_color(red());
        ctx.down(10);
        ctx.up(10);
        assert_eq!(ctx.store.color(key("2025-01-10")), Some(&red()));
        ctx.down(10);
        let effect = ctx.up(10);
        assert_eq!(ctx.store.color(key("2025-01-10")), None);
        assert_eq!(effect.changed, vec![key("2025-01-10")]);
    }

    #[rstest]
    fn click_with_other_color_replaces(mut ctx: Ctx) {
        ctx.store.set_color(key("2025-01-10"), HexColor::parse("#c9f7d5").unwrap());
        ctx.ctl.select_color(red());
        ctx.down(10);
        ctx.up(10);
        assert_eq!(ctx.store.color(key("2025-01-10")), Some(&red()));
    }

    #[rstest]
    fn erase_click_and_drag(mut ctx: Ctx) {
        ctx.store.paint_range(key("2025-01-01"), key("2025-01-10"), Some(&red()));
        ctx.ctl.toggle_erase();
        ctx.down(2);
        ctx.up(2);
        assert!(ctx.store.color(key("2025-01-02")).is_none());
        ctx.down(9);
        ctx.drag_to(5);
        ctx.up(5);
        assert_eq!(
            ctx.colored(),
            vec!["2025-01-01", "2025-01-03", "2025-01-04", "2025-01-10"]
        );
    }

    #[rstest]
    fn pen_click_opens_editor_and_never_paints(mut ctx: Ctx) {
        ctx.ctl.toggle_pen();
        ctx.down(4);
        assert!(ctx.drag_to(8).changed.is_empty());
        let effect = ctx.up(4);
        assert_eq!(effect.open_note, Some(key("2025-01-04")));
        assert!(ctx.store.colors().is_empty());
    }

    #[rstest]
    fn idle_or_colorless_modes_ignore_pointer(mut ctx: Ctx) {
        ctx.down(4);
        assert!(ctx.ctl.drag().is_none());
        ctx.ctl.select_color(red());
        ctx.ctl.select_color(red());
        ctx.down(4);
        ctx.up(4);
        assert!(ctx.store.colors().is_empty());
    }

    #[rstest]
    fn placeholder_and_secondary_button_are_ignored(mut ctx: Ctx) {
        ctx.ctl.select_color(red());
        ctx.down(0);
        assert!(ctx.ctl.drag().is_none());
        ctx.ctl.pointer_down(1, false, Some(key("2025-01-04")), &mut ctx.host);
        assert!(ctx.ctl.drag().is_none());
    }

    #[rstest]
    fn second_pointer_is_ignored(mut ctx: Ctx) {
        ctx.ctl.select_color(red());
        ctx.down(3);
        ctx.ctl
            .pointer_down(2, true, Some(key("2025-01-20")), &mut ctx.host);
        assert_eq!(ctx.ctl.drag().unwrap().pointer_id, 1);
        let foreign = ctx
            .ctl
            .pointer_move(2, at(25), true, &ctx.host, &mut ctx.store);
        assert!(foreign.changed.is_empty());
        ctx.up(3);
        assert_eq!(ctx.colored(), vec!["2025-01-03"]);
        assert_eq!(ctx.host.captured, vec![1]);
        assert_eq!(ctx.host.released, vec![1]);
    }

    #[rstest]
    fn move_without_button_does_not_paint(mut ctx: Ctx) {
        ctx.ctl.select_color(red());
        ctx.down(3);
        ctx.ctl
            .pointer_move(1, at(6), false, &ctx.host, &mut ctx.store);
        assert!(!ctx.ctl.drag().unwrap().moved);
    }

    #[rstest]
    fn release_paints_skipped_terminal_cell(mut ctx: Ctx) {
        ctx.ctl.select_color(red());
        ctx.down(3);
        ctx.drag_to(4);
        let effect = ctx.up(8);
        assert_eq!(effect.changed.len(), 5);
        assert_eq!(ctx.store.colors().len(), 6);
    }

    #[rstest]
    fn release_outside_grid_still_ends_drag(mut ctx: Ctx) {
        ctx.ctl.select_color(red());
        ctx.down(3);
        ctx.drag_to(5);
        let effect = ctx
            .ctl
            .pointer_up(1, Point { x: 5, y: 9 }, &mut ctx.host, &mut ctx.store);
        assert!(effect.changed.is_empty());
        assert!(ctx.ctl.drag().is_none());
        assert_eq!(ctx.host.released, vec![1]);
        assert_eq!(ctx.store.colors().len(), 3);
    }

    #[rstest]
    fn cancel_keeps_committed_steps(mut ctx: Ctx) {
        ctx.ctl.select_color(red());
        ctx.down(3);
        ctx.drag_to(6);
        let effect = ctx.ctl.pointer_cancel(1, &mut ctx.host, &mut ctx.store);
        assert!(effect.changed.is_empty());
        assert!(ctx.ctl.drag().is_none());
        assert_eq!(ctx.host.released, vec![1]);
        assert_eq!(ctx.store.colors().len(), 4);
        assert!(ctx.up(9).changed.is_empty());
    }

    #[rstest]
    fn cancelled_tap_counts_as_click(mut ctx: Ctx) {
        ctx.ctl.toggle_pen();
        ctx.down(4);
        let effect = ctx.ctl.pointer_cancel(1, &mut ctx.host, &mut ctx.store);
        assert_eq!(effect.open_note, Some(key("2025-01-04")));
        assert!(ctx.ctl.drag().is_none());

        ctx.ctl.select_color(red());
        ctx.down(12);
        let effect = ctx.ctl.pointer_cancel(1, &mut ctx.host, &mut ctx.store);
        assert_eq!(effect.changed, vec![key("2025-01-12")]);
        assert_eq!(ctx.store.color(key("2025-01-12")), Some(&red()));
    }

    #[rstest]
    fn cancel_for_other_pointer_is_ignored(mut ctx: Ctx) {
        ctx.ctl.toggle_erase();
        ctx.down(4);
        let effect = ctx.ctl.pointer_cancel(2, &mut ctx.host, &mut ctx.store);
        assert_eq!(effect, Effect::default());
        assert!(ctx.ctl.drag().is_some());
    }

    #[rstest]
    fn keyboard_activation_matches_click(mut ctx: Ctx) {
        ctx.ctl.select_color(red());
        ctx.ctl.activate(key("2025-01-15"), &mut ctx.store);
        assert_eq!(ctx.store.color(key("2025-01-15")), Some(&red()));
        ctx.ctl.activate(key("2025-01-15"), &mut ctx.store);
        assert!(ctx.store.color(key("2025-01-15")).is_none());
        ctx.ctl.toggle_pen();
        let effect = ctx.ctl.activate(key("2025-01-15"), &mut ctx.store);
        assert_eq!(effect.open_note, Some(key("2025-01-15")));
    }
}
