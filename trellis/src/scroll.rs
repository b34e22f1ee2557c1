// Scroll area tracking
//
// Widgets opt into a named scroll area; the context unions their
// bounds, holds the per-area offset, and pushes offsets back onto
// the members. Members tagged static anchor in place.

use crate::dom::Widget;
use utils::region::Rect;

/// Logical units scrolled per wheel tick. UI content is tuned
/// against this value, keep it stable.
pub const WHEEL_STEP: f32 = 24.0;

struct ScrollArea {
    name: String,
    bounds: Option<Rect<f32>>,
    has_static_anchor: bool,
    offset: f32,
}

pub struct ScrollContext {
    areas: Vec<ScrollArea>,
}

impl ScrollContext {
    /// Build the scroll areas from the widget array and apply the
    /// initial (zero) offsets.
    pub fn new(widgets: &mut [Widget]) -> Self {
        let mut ctx = Self { areas: Vec::new() };
        ctx.rebuild(widgets);
        ctx.apply_offsets(widgets);
        ctx
    }

    pub fn area_count(&self) -> usize {
        self.areas.len()
    }

    fn area_index(&self, name: &str) -> Option<usize> {
        self.areas.iter().position(|a| a.name == name)
    }

    fn ensure_area(&mut self, name: &str) -> usize {
        match self.area_index(name) {
            Some(i) => i,
            None => {
                self.areas.push(ScrollArea {
                    name: name.to_string(),
                    bounds: None,
                    has_static_anchor: false,
                    offset: 0.0,
                });
                self.areas.len() - 1
            }
        }
    }

    /// Recompute area membership and bounds. Offsets of areas that
    /// survive are preserved.
    pub fn rebuild(&mut self, widgets: &mut [Widget]) {
        for area in self.areas.iter_mut() {
            area.bounds = None;
            area.has_static_anchor = false;
        }

        for w in widgets.iter_mut() {
            w.scroll_offset = 0.0;
            let name = match &w.scroll_area {
                Some(n) => n.clone(),
                None => continue,
            };
            let idx = self.ensure_area(&name);
            let area = &mut self.areas[idx];
            if w.scroll_static {
                area.has_static_anchor = true;
            }
            area.bounds = Some(match &area.bounds {
                Some(b) => b.union(&w.rect),
                None => w.rect,
            });
        }
    }

    /// Push the current offsets onto the member widgets. Static
    /// members stay pinned at zero.
    pub fn apply_offsets(&self, widgets: &mut [Widget]) {
        for w in widgets.iter_mut() {
            w.scroll_offset = 0.0;
            let name = match &w.scroll_area {
                Some(n) => n,
                None => continue,
            };
            if let Some(idx) = self.area_index(name) {
                if !w.scroll_static {
                    w.scroll_offset = self.areas[idx].offset;
                }
            }
        }
    }

    /// Current offset of a named area
    pub fn offset(&self, name: &str) -> Option<f32> {
        self.area_index(name).map(|i| self.areas[i].offset)
    }

    /// Handle a wheel event at logical position (x, y). Only the
    /// area whose bounds contain the cursor scrolls.
    pub fn handle_wheel(&mut self, x: f32, y: f32, yoff: f32, widgets: &mut [Widget]) {
        let target = self.areas.iter_mut().find(|a| {
            a.bounds
                .as_ref()
                .map(|b| b.contains(x, y))
                .unwrap_or(false)
        });

        if let Some(area) = target {
            area.offset += yoff * WHEEL_STEP;
            self.apply_offsets(widgets);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::WidgetType;

    fn widget_at(x: f32, y: f32, w: f32, h: f32, area: Option<&str>) -> Widget {
        let mut widget = Widget::new(WidgetType::Button);
        widget.rect = Rect::new(x, y, w, h);
        widget.scroll_area = area.map(|a| a.to_string());
        widget
    }

    #[test]
    fn initial_offsets_are_zero() {
        let mut widgets = vec![
            widget_at(0.0, 0.0, 40.0, 18.0, Some("area1")),
            widget_at(0.0, 25.0, 40.0, 12.0, Some("area1")),
        ];
        let ctx = ScrollContext::new(&mut widgets);
        assert_eq!(ctx.area_count(), 1);
        assert_eq!(widgets[0].scroll_offset, 0.0);
        assert_eq!(widgets[1].scroll_offset, 0.0);
    }

    #[test]
    fn bounds_union_members() {
        let mut widgets = vec![
            widget_at(0.0, 0.0, 40.0, 18.0, Some("a")),
            widget_at(0.0, 25.0, 40.0, 12.0, Some("a")),
        ];
        let mut ctx = ScrollContext::new(&mut widgets);

        // a wheel event inside the union scrolls both members
        ctx.handle_wheel(10.0, 30.0, 1.0, &mut widgets);
        assert_eq!(widgets[0].scroll_offset, WHEEL_STEP);
        assert_eq!(widgets[1].scroll_offset, WHEEL_STEP);
    }

    #[test]
    fn wheel_outside_bounds_does_nothing() {
        let mut widgets = vec![widget_at(0.0, 0.0, 40.0, 18.0, Some("a"))];
        let mut ctx = ScrollContext::new(&mut widgets);
        ctx.handle_wheel(200.0, 200.0, 1.0, &mut widgets);
        assert_eq!(widgets[0].scroll_offset, 0.0);
    }

    #[test]
    fn wheel_step_is_24_per_tick() {
        let mut widgets = vec![widget_at(0.0, 0.0, 40.0, 18.0, Some("a"))];
        let mut ctx = ScrollContext::new(&mut widgets);
        ctx.handle_wheel(5.0, 5.0, 2.0, &mut widgets);
        assert_eq!(ctx.offset("a"), Some(48.0));
    }

    #[test]
    fn static_members_stay_pinned() {
        let mut widgets = vec![
            widget_at(0.0, 0.0, 40.0, 18.0, Some("a")),
            widget_at(0.0, 25.0, 40.0, 12.0, Some("a")),
        ];
        widgets[1].scroll_static = true;

        let mut ctx = ScrollContext::new(&mut widgets);
        ctx.handle_wheel(5.0, 5.0, 1.0, &mut widgets);
        assert_eq!(widgets[0].scroll_offset, WHEEL_STEP);
        assert_eq!(widgets[1].scroll_offset, 0.0);
    }

    #[test]
    fn widgets_without_area_are_untouched() {
        let mut widgets = vec![
            widget_at(0.0, 0.0, 40.0, 18.0, None),
            widget_at(0.0, 25.0, 40.0, 12.0, Some("a")),
        ];
        let mut ctx = ScrollContext::new(&mut widgets);
        ctx.handle_wheel(5.0, 30.0, 1.0, &mut widgets);
        assert_eq!(widgets[0].scroll_offset, 0.0);
        assert_eq!(widgets[1].scroll_offset, WHEEL_STEP);
    }
}
