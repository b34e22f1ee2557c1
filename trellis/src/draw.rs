// Widget array -> display list -> GPU streams
//
// This is the per-frame lowering. Widgets become clipped rectangles
// and glyph quads, which then become either instance records for the
// default pipeline or a packed 9-float vertex stream for the legacy
// textured-quad path.

use crate::dom::{Color, Widget, WidgetType};
use crate::font::FontAtlas;
use crate::transform::CoordinateTransformer;
use candela::{GpuInstanceData, Vtx};
use cgmath::Matrix4;
use utils::region::Rect;

/// Scrollbars draw on top of everything in their parent
pub const SCROLLBAR_Z: i32 = 1_000_000;

/// Converts integer z indices into orthographic depth
pub const UI_Z_ORDER_SCALE: f32 = 0.00001;

/// Minimum scrollbar thumb height in logical units
const MIN_SCROLL_THUMB: f32 = 12.0;

/// Fragment shader modes, mirrored in the UI shaders
pub const SHADER_MODE_SOLID: f32 = 0.0;
pub const SHADER_MODE_TEXTURED: f32 = 1.0;
pub const SHADER_MODE_USER_TEXTURE: f32 = 2.0;

/// One flat rectangle of the frame, still in logical units
#[derive(Debug, Clone)]
pub struct ViewModel {
    pub id: Option<String>,
    pub logical_box: Rect<f32>,
    pub z_index: i32,
    pub color: Color,
}

/// One laid-out glyph, in screen space
#[derive(Debug, Clone)]
pub struct GlyphQuad {
    pub min: (f32, f32),
    pub max: (f32, f32),
    pub uv0: (f32, f32),
    pub uv1: (f32, f32),
    pub color: Color,
    pub z_index: i32,
}

/// The per-frame flat list of visual primitives
#[derive(Debug, Clone)]
pub struct DisplayList {
    pub rects: Vec<ViewModel>,
    pub glyphs: Vec<GlyphQuad>,
}

impl DisplayList {
    pub fn empty() -> Self {
        Self {
            rects: Vec::new(),
            glyphs: Vec::new(),
        }
    }
}

/// Clip `input` against the widget's inherited clip rect. None when
/// nothing survives.
fn apply_clip_rect(widget: &Widget, input: &Rect<f32>) -> Option<Rect<f32>> {
    match &widget.clip {
        Some(clip) => input.intersect(clip),
        None => Some(*input),
    }
}

fn push_rect(
    rects: &mut Vec<ViewModel>,
    widget: &Widget,
    rect: Rect<f32>,
    z_index: i32,
    color: Color,
) {
    if let Some(clipped) = apply_clip_rect(widget, &rect) {
        rects.push(ViewModel {
            id: widget.id.clone(),
            logical_box: clipped,
            z_index: z_index,
            color: color,
        });
    }
}

fn emit_hslider(rects: &mut Vec<ViewModel>, widget: &Widget, inner: &Rect<f32>) {
    let track_h = utils::partial_max(inner.r_size.1 * 0.35, 6.0);
    let track_y = inner.r_pos.1 + (inner.r_size.1 - track_h) * 0.5;
    let track_x = inner.r_pos.0;
    let track_w = inner.r_size.0;

    let denom = widget.max_value - widget.min_value;
    let t = if denom != 0.0 {
        utils::partial_clamp((widget.value - widget.min_value) / denom, 0.0, 1.0)
    } else {
        0.0
    };

    let base_z = rects.len() as i32;

    let mut track_color = widget.color;
    track_color.a *= 0.35;
    push_rect(
        rects,
        widget,
        Rect::new(track_x, track_y, track_w, track_h),
        base_z,
        track_color,
    );

    let fill_w = track_w * t;
    push_rect(
        rects,
        widget,
        Rect::new(track_x, track_y, fill_w, track_h),
        base_z + 1,
        widget.color,
    );

    let knob_w = utils::partial_max(track_h, inner.r_size.1 * 0.3);
    let mut knob_x = track_x + fill_w - knob_w * 0.5;
    knob_x = utils::partial_clamp(knob_x, track_x, track_x + track_w - knob_w);
    let knob_h = track_h * 1.5;
    let knob_y = track_y + (track_h - knob_h) * 0.5;
    let knob_color = if widget.text_color.a <= 0.0 {
        Color::white()
    } else {
        widget.text_color
    };
    push_rect(
        rects,
        widget,
        Rect::new(knob_x, knob_y, knob_w, knob_h),
        base_z + 2,
        knob_color,
    );
}

fn emit_scrollbar(rects: &mut Vec<ViewModel>, widget: &Widget, inner: &Rect<f32>) {
    let style = &widget.scrollbar;
    if !style.enabled
        || !style.shown
        || widget.scroll_viewport <= 0.0
        || widget.scroll_content <= widget.scroll_viewport + 1.0
    {
        return;
    }

    let track_w = if style.width > 0.0 {
        style.width
    } else {
        utils::partial_max(4.0, inner.r_size.0 * 0.02)
    };
    let track_h = inner.r_size.1 - widget.padding * 2.0;
    let track_x = inner.r_pos.0 + inner.r_size.0 - track_w - widget.padding * 0.5;
    let track_y = inner.r_pos.1 + widget.padding;

    push_rect(
        rects,
        widget,
        Rect::new(track_x, track_y, track_w, track_h),
        SCROLLBAR_Z,
        style.track_color,
    );

    let thumb_ratio = widget.scroll_viewport / widget.scroll_content;
    let thumb_h = utils::partial_max(track_h * thumb_ratio, MIN_SCROLL_THUMB);
    let max_offset = widget.scroll_content - widget.scroll_viewport;
    let clamped = utils::partial_clamp(widget.scroll_offset, 0.0, max_offset);
    let offset_t = if max_offset != 0.0 {
        clamped / max_offset
    } else {
        0.0
    };
    let thumb_y = track_y + offset_t * (track_h - thumb_h);

    push_rect(
        rects,
        widget,
        Rect::new(track_x, thumb_y, track_w, thumb_h),
        SCROLLBAR_Z + 1,
        style.thumb_color,
    );
}

/// Lay out one widget's text into glyph quads, in screen space
fn emit_text(
    glyphs: &mut Vec<GlyphQuad>,
    widget: &Widget,
    atlas: &FontAtlas,
    transformer: &CoordinateTransformer,
    glyph_z_base: i32,
) {
    if widget.text.is_empty() {
        return;
    }

    let effective_offset = if widget.scroll_static {
        0.0
    } else {
        -widget.scroll_offset
    };
    let mut pen_x = widget.rect.r_pos.0 + widget.padding;
    let pen_y = widget.rect.r_pos.1 + effective_offset + widget.padding + atlas.ascent();

    for ch in widget.text.chars() {
        if (ch as u32) < 32 {
            continue;
        }
        let glyph = match atlas.glyph(ch) {
            Some(g) => g,
            None => continue,
        };

        let glyph_rect = Rect::new(
            pen_x + glyph.offset.0,
            pen_y + glyph.offset.1,
            glyph.size.0,
            glyph.size.1,
        );
        let clipped = match apply_clip_rect(widget, &glyph_rect) {
            Some(c) => c,
            None => {
                pen_x += glyph.advance;
                continue;
            }
        };

        // trim UVs to the surviving strip
        let (mut u0, mut v0) = glyph.uv0;
        let (mut u1, mut v1) = glyph.uv1;
        if clipped.r_pos.0 > glyph_rect.r_pos.0 && glyph_rect.r_size.0 > 0.0 {
            let t = (clipped.r_pos.0 - glyph_rect.r_pos.0) / glyph_rect.r_size.0;
            u0 += (u1 - u0) * t;
        }
        if clipped.r_pos.1 > glyph_rect.r_pos.1 && glyph_rect.r_size.1 > 0.0 {
            let t = (clipped.r_pos.1 - glyph_rect.r_pos.1) / glyph_rect.r_size.1;
            v0 += (v1 - v0) * t;
        }
        let glyph_x1 = glyph_rect.r_pos.0 + glyph_rect.r_size.0;
        let glyph_y1 = glyph_rect.r_pos.1 + glyph_rect.r_size.1;
        if clipped.r_pos.0 + clipped.r_size.0 < glyph_x1 && glyph_rect.r_size.0 > 0.0 {
            let t = (glyph_x1 - (clipped.r_pos.0 + clipped.r_size.0)) / glyph_rect.r_size.0;
            u1 -= (u1 - u0) * t;
        }
        if clipped.r_pos.1 + clipped.r_size.1 < glyph_y1 && glyph_rect.r_size.1 > 0.0 {
            let t = (glyph_y1 - (clipped.r_pos.1 + clipped.r_size.1)) / glyph_rect.r_size.1;
            v1 -= (v1 - v0) * t;
        }

        let dpi = transformer.dpi_scale;
        glyphs.push(GlyphQuad {
            min: (clipped.r_pos.0 * dpi, clipped.r_pos.1 * dpi),
            max: (
                (clipped.r_pos.0 + clipped.r_size.0) * dpi,
                (clipped.r_pos.1 + clipped.r_size.1) * dpi,
            ),
            uv0: (u0, v0),
            uv1: (u1, v1),
            color: widget.text_color,
            z_index: glyph_z_base + glyphs.len() as i32,
        });

        pen_x += glyph.advance;
    }
}

/// Lower the widget array into the frame's display list.
///
/// Rendering order per widget: border (when styled), then the
/// type-specific quads, then scrollbars; all glyphs come after every
/// rectangle so text never z-fights its own background.
pub fn build_display_list(
    widgets: &[Widget],
    atlas: &FontAtlas,
    transformer: &CoordinateTransformer,
) -> DisplayList {
    let mut list = DisplayList::empty();

    for widget in widgets.iter() {
        let effective_offset = if widget.scroll_static {
            0.0
        } else {
            -widget.scroll_offset
        };
        let widget_rect = Rect::new(
            widget.rect.r_pos.0,
            widget.rect.r_pos.1 + effective_offset,
            widget.rect.r_size.0,
            widget.rect.r_size.1,
        );

        let mut inner = widget_rect;
        if widget.border_thickness > 0.0 {
            inner.r_pos.0 += widget.border_thickness;
            inner.r_pos.1 += widget.border_thickness;
            inner.r_size.0 =
                utils::partial_max(inner.r_size.0 - widget.border_thickness * 2.0, 0.0);
            inner.r_size.1 =
                utils::partial_max(inner.r_size.1 - widget.border_thickness * 2.0, 0.0);

            let z = list.rects.len() as i32;
            push_rect(&mut list.rects, widget, widget_rect, z, widget.border_color);
        }

        if widget.widget_type == WidgetType::HSlider {
            emit_hslider(&mut list.rects, widget, &inner);
            continue;
        }

        // spacers occupy layout space but draw nothing
        if widget.widget_type != WidgetType::Spacer {
            let z = list.rects.len() as i32;
            push_rect(&mut list.rects, widget, inner, z, widget.color);
        }

        emit_scrollbar(&mut list.rects, widget, &inner);
    }

    let glyph_z_base = list.rects.len() as i32;
    for widget in widgets.iter() {
        emit_text(
            &mut list.glyphs,
            widget,
            atlas,
            transformer,
            glyph_z_base,
        );
    }

    // stable z order within each primitive class
    list.rects.sort_by_key(|r| r.z_index);
    list.glyphs.sort_by_key(|g| g.z_index);
    list
}

fn instance(
    x: f32,
    y: f32,
    w: f32,
    h: f32,
    z: i32,
    color: Color,
    uv_rect: [f32; 4],
    mode: f32,
    clip: [f32; 4],
) -> GpuInstanceData {
    let translate = Matrix4::from_translation(cgmath::Vector3::new(
        x,
        y,
        z as f32 * UI_Z_ORDER_SCALE,
    ));
    let scale = Matrix4::from_nonuniform_scale(w, h, 1.0);

    GpuInstanceData {
        model: translate * scale,
        color: [color.r, color.g, color.b, color.a],
        uv_rect: uv_rect,
        params_0: [mode, 0.0, 0.0, 0.0],
        params_1: [0.0; 4],
        clip_rect: clip,
    }
}

/// Lower a display list into instance records for the default
/// instanced-quad pipeline. Rectangles first, glyphs after, both in
/// their sorted order.
pub fn to_instances(
    list: &DisplayList,
    transformer: &CoordinateTransformer,
) -> Vec<GpuInstanceData> {
    let dpi = transformer.dpi_scale;
    let full_clip = [
        0.0,
        0.0,
        transformer.viewport_size.x,
        transformer.viewport_size.y,
    ];
    let mut out = Vec::with_capacity(list.rects.len() + list.glyphs.len());

    for rect in list.rects.iter() {
        out.push(instance(
            rect.logical_box.r_pos.0 * dpi,
            rect.logical_box.r_pos.1 * dpi,
            rect.logical_box.r_size.0 * dpi,
            rect.logical_box.r_size.1 * dpi,
            rect.z_index,
            rect.color,
            [0.0, 0.0, 1.0, 1.0],
            SHADER_MODE_SOLID,
            full_clip,
        ));
    }

    for glyph in list.glyphs.iter() {
        out.push(instance(
            glyph.min.0,
            glyph.min.1,
            glyph.max.0 - glyph.min.0,
            glyph.max.1 - glyph.min.1,
            glyph.z_index,
            glyph.color,
            [glyph.uv0.0, glyph.uv0.1, glyph.uv1.0, glyph.uv1.1],
            SHADER_MODE_TEXTURED,
            full_clip,
        ));
    }

    out
}

fn push_quad_vertices(out: &mut Vec<Vtx>, x0: f32, y0: f32, x1: f32, y1: f32, uv: [f32; 4], use_tex: f32, color: Color) {
    let c = [color.r, color.g, color.b, color.a];
    let verts = [
        ([x0, y0], [uv[0], uv[1]]),
        ([x1, y0], [uv[2], uv[1]]),
        ([x0, y1], [uv[0], uv[3]]),
        ([x0, y1], [uv[0], uv[3]]),
        ([x1, y0], [uv[2], uv[1]]),
        ([x1, y1], [uv[2], uv[3]]),
    ];
    for (pos, uv) in verts.iter() {
        out.push(Vtx {
            pos: *pos,
            uv: *uv,
            use_tex: use_tex,
            color: c,
        });
    }
}

/// Lower a display list into the legacy pre-triangulated vertex
/// stream: 9 floats per vertex, 6 vertices per quad.
pub fn to_legacy_vertices(list: &DisplayList, transformer: &CoordinateTransformer) -> Vec<Vtx> {
    let dpi = transformer.dpi_scale;
    let mut out = Vec::with_capacity((list.rects.len() + list.glyphs.len()) * 6);

    for rect in list.rects.iter() {
        let x0 = rect.logical_box.r_pos.0 * dpi;
        let y0 = rect.logical_box.r_pos.1 * dpi;
        let x1 = x0 + rect.logical_box.r_size.0 * dpi;
        let y1 = y0 + rect.logical_box.r_size.1 * dpi;
        push_quad_vertices(&mut out, x0, y0, x1, y1, [0.0; 4], 0.0, rect.color);
    }

    for glyph in list.glyphs.iter() {
        push_quad_vertices(
            &mut out,
            glyph.min.0,
            glyph.min.1,
            glyph.max.0,
            glyph.max.1,
            [glyph.uv0.0, glyph.uv0.1, glyph.uv1.0, glyph.uv1.1],
            1.0,
            glyph.color,
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::WidgetType;
    use crate::font::tests::test_atlas;

    fn transformer() -> CoordinateTransformer {
        CoordinateTransformer::new(1.0, 1.0, (640.0, 480.0))
    }

    fn base_widget(widget_type: WidgetType, x: f32, y: f32, w: f32, h: f32) -> Widget {
        let mut widget = Widget::new(widget_type);
        widget.rect = Rect::new(x, y, w, h);
        widget.padding = 0.0;
        widget.base_padding = 0.0;
        widget
    }

    #[test]
    fn panel_emits_one_rect() {
        let widgets = vec![base_widget(WidgetType::Panel, 0.0, 0.0, 100.0, 50.0)];
        let list = build_display_list(&widgets, &test_atlas(), &transformer());
        assert_eq!(list.rects.len(), 1);
        assert!(list.glyphs.is_empty());
    }

    #[test]
    fn spacer_emits_nothing() {
        let widgets = vec![base_widget(WidgetType::Spacer, 0.0, 0.0, 20.0, 20.0)];
        let list = build_display_list(&widgets, &test_atlas(), &transformer());
        assert!(list.rects.is_empty());
    }

    #[test]
    fn slider_emits_track_fill_knob_with_stacked_z() {
        let mut slider = base_widget(WidgetType::HSlider, 0.0, 0.0, 100.0, 20.0);
        slider.min_value = 0.0;
        slider.max_value = 10.0;
        slider.value = 5.0;
        let widgets = vec![slider];

        let list = build_display_list(&widgets, &test_atlas(), &transformer());
        assert_eq!(list.rects.len(), 3);
        assert_eq!(list.rects[0].z_index, 0);
        assert_eq!(list.rects[1].z_index, 1);
        assert_eq!(list.rects[2].z_index, 2);

        // fill width is track * t at t = 0.5
        let track = &list.rects[0];
        let fill = &list.rects[1];
        assert!((fill.logical_box.r_size.0 - track.logical_box.r_size.0 * 0.5).abs() < 1e-4);
        // the track is translucent relative to the fill
        assert!(track.color.a < fill.color.a);
    }

    #[test]
    fn slider_value_is_clamped() {
        let mut slider = base_widget(WidgetType::HSlider, 0.0, 0.0, 100.0, 20.0);
        slider.min_value = 0.0;
        slider.max_value = 1.0;
        slider.value = 7.0;
        let widgets = vec![slider];

        let list = build_display_list(&widgets, &test_atlas(), &transformer());
        let track = &list.rects[0];
        let fill = &list.rects[1];
        assert!((fill.logical_box.r_size.0 - track.logical_box.r_size.0).abs() < 1e-4);
    }

    #[test]
    fn border_emits_outer_rect_before_fill() {
        let mut panel = base_widget(WidgetType::Panel, 0.0, 0.0, 50.0, 50.0);
        panel.border_thickness = 2.0;
        panel.border_color = Color::new(1.0, 0.0, 0.0, 1.0);
        let widgets = vec![panel];

        let list = build_display_list(&widgets, &test_atlas(), &transformer());
        assert_eq!(list.rects.len(), 2);
        assert_eq!(list.rects[0].color, Color::new(1.0, 0.0, 0.0, 1.0));
        assert_eq!(list.rects[0].logical_box.r_size, (50.0, 50.0));
        assert_eq!(list.rects[1].logical_box.r_pos, (2.0, 2.0));
        assert_eq!(list.rects[1].logical_box.r_size, (46.0, 46.0));
    }

    #[test]
    fn scrollbar_needs_overflowing_content() {
        let mut panel = base_widget(WidgetType::Panel, 0.0, 0.0, 100.0, 100.0);
        panel.scrollbar.enabled = true;
        panel.scrollbar.shown = true;
        panel.scroll_viewport = 100.0;
        panel.scroll_content = 100.5;
        let widgets = vec![panel.clone()];

        // content does not exceed viewport + 1, no scrollbar
        let list = build_display_list(&widgets, &test_atlas(), &transformer());
        assert_eq!(list.rects.len(), 1);

        let mut panel = panel;
        panel.scroll_content = 300.0;
        let list = build_display_list(&[panel], &test_atlas(), &transformer());
        assert_eq!(list.rects.len(), 3);
        assert_eq!(list.rects[1].z_index, SCROLLBAR_Z);
        assert_eq!(list.rects[2].z_index, SCROLLBAR_Z + 1);
        // thumb height respects the floor
        assert!(list.rects[2].logical_box.r_size.1 >= MIN_SCROLL_THUMB);
    }

    #[test]
    fn scroll_offset_shifts_widgets_but_not_static_ones() {
        let mut scrolled = base_widget(WidgetType::Panel, 0.0, 10.0, 50.0, 20.0);
        scrolled.scroll_offset = 6.0;
        let mut pinned = base_widget(WidgetType::Panel, 0.0, 40.0, 50.0, 20.0);
        pinned.scroll_offset = 6.0;
        pinned.scroll_static = true;

        let list =
            build_display_list(&[scrolled, pinned], &test_atlas(), &transformer());
        assert_eq!(list.rects[0].logical_box.r_pos.1, 4.0);
        assert_eq!(list.rects[1].logical_box.r_pos.1, 40.0);
    }

    #[test]
    fn text_pen_starts_at_padding_and_advances() {
        let mut label = base_widget(WidgetType::Label, 10.0, 10.0, 100.0, 20.0);
        label.padding = 2.0;
        label.text = "ab".to_string();

        let atlas = test_atlas();
        let list = build_display_list(&[label], &atlas, &transformer());
        assert_eq!(list.glyphs.len(), 2);

        let glyph = atlas.glyph('a').unwrap();
        // x = widget.x + padding + glyph offset
        let expected_x0 = 10.0 + 2.0 + glyph.offset.0;
        assert!((list.glyphs[0].min.0 - expected_x0).abs() < 1e-4);
        // the second glyph sits one advance further
        assert!(
            (list.glyphs[1].min.0 - (expected_x0 + glyph.advance)).abs() < 1e-4
        );
        // baseline: y = widget.y + padding + ascent, glyph rises above it
        let expected_y0 = 10.0 + 2.0 + atlas.ascent() + glyph.offset.1;
        assert!((list.glyphs[0].min.1 - expected_y0).abs() < 1e-4);
    }

    #[test]
    fn clipped_glyph_uvs_trim_proportionally() {
        let mut label = base_widget(WidgetType::Label, 0.0, 0.0, 100.0, 20.0);
        label.text = "a".to_string();
        let atlas = test_atlas();
        let glyph = *atlas.glyph('a').unwrap();

        // clip away the left half of the glyph box
        let glyph_x0 = 0.0 + glyph.offset.0;
        let glyph_y0 = atlas.ascent() + glyph.offset.1;
        label.clip = Some(Rect::new(
            glyph_x0 + glyph.size.0 / 2.0,
            glyph_y0 - 10.0,
            200.0,
            100.0,
        ));

        let list = build_display_list(&[label], &atlas, &transformer());
        assert_eq!(list.glyphs.len(), 1);

        let q = &list.glyphs[0];
        let mid_u = glyph.uv0.0 + (glyph.uv1.0 - glyph.uv0.0) * 0.5;
        assert!((q.uv0.0 - mid_u).abs() < 1e-4);
        assert!((q.uv1.0 - glyph.uv1.0).abs() < 1e-4);
    }

    #[test]
    fn fully_clipped_widget_emits_nothing() {
        let mut panel = base_widget(WidgetType::Panel, 0.0, 0.0, 50.0, 50.0);
        panel.clip = Some(Rect::new(100.0, 100.0, 10.0, 10.0));
        let list = build_display_list(&[panel], &test_atlas(), &transformer());
        assert!(list.rects.is_empty());
    }

    #[test]
    fn rects_are_sorted_by_z_stable() {
        let mut high = base_widget(WidgetType::Panel, 0.0, 0.0, 10.0, 10.0);
        high.scrollbar.enabled = true;
        high.scrollbar.shown = true;
        high.scroll_viewport = 10.0;
        high.scroll_content = 100.0;
        let low = base_widget(WidgetType::Panel, 20.0, 0.0, 10.0, 10.0);

        let list = build_display_list(&[high, low], &test_atlas(), &transformer());
        for pair in list.rects.windows(2) {
            assert!(pair[0].z_index <= pair[1].z_index);
        }
        // the scrollbar pair sorted to the end
        assert_eq!(list.rects.last().unwrap().z_index, SCROLLBAR_Z + 1);
    }

    #[test]
    fn instances_cover_rects_then_glyphs() {
        let mut label = base_widget(WidgetType::Label, 5.0, 5.0, 60.0, 20.0);
        label.text = "hi".to_string();
        let t = CoordinateTransformer::new(2.0, 1.0, (640.0, 480.0));

        let list = build_display_list(&[label], &test_atlas(), &t);
        let instances = to_instances(&list, &t);
        assert_eq!(instances.len(), list.rects.len() + list.glyphs.len());

        // rect instances scale by dpi; translation lives in column 3
        let m = instances[0].model;
        assert!((m.w.x - list.rects[0].logical_box.r_pos.0 * 2.0).abs() < 1e-4);
        assert!((m.x.x - list.rects[0].logical_box.r_size.0 * 2.0).abs() < 1e-4);
        assert_eq!(instances[0].params_0[0], SHADER_MODE_SOLID);

        let glyph_inst = &instances[list.rects.len()];
        assert_eq!(glyph_inst.params_0[0], SHADER_MODE_TEXTURED);
    }

    #[test]
    fn legacy_stream_packs_six_vertices_per_quad() {
        let mut label = base_widget(WidgetType::Label, 0.0, 0.0, 60.0, 20.0);
        label.text = "x".to_string();
        let t = transformer();

        let list = build_display_list(&[label], &test_atlas(), &t);
        let verts = to_legacy_vertices(&list, &t);
        assert_eq!(verts.len(), (list.rects.len() + list.glyphs.len()) * 6);

        // background quad is untextured, glyph quad is textured
        assert_eq!(verts[0].use_tex, 0.0);
        assert_eq!(verts[verts.len() - 1].use_tex, 1.0);
    }
}
