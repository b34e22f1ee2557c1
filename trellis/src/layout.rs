// The layout engine
//
// Lowering happens in phases: measure gives every node a size from
// the leaves up, assign walks back down handing out positions, and
// materialize flattens the leaves into the Widget array the rest of
// the engine consumes.

use crate::dom::{LayoutKind, Style, StyleTable, UiNode, Widget};
use utils::region::Rect;

/// A measured and positioned node, mirroring the UiNode tree
struct LayoutNode<'a> {
    node: &'a UiNode,
    padding: f32,
    size: (f32, f32),
    pos: (f32, f32),
    children: Vec<LayoutNode<'a>>,
}

fn resolve_style(node: &UiNode, styles: &StyleTable) -> Style {
    node.style
        .as_ref()
        .and_then(|name| styles.get(name))
        .cloned()
        .unwrap_or_default()
}

fn build<'a>(node: &'a UiNode, styles: &StyleTable) -> LayoutNode<'a> {
    LayoutNode {
        node: node,
        padding: resolve_style(node, styles).padding,
        size: (node.width, node.height),
        pos: (node.x, node.y),
        children: node.children.iter().map(|c| build(c, styles)).collect(),
    }
}

/// Bottom-up sizing pass
fn measure(node: &mut LayoutNode) {
    for child in node.children.iter_mut() {
        measure(child);
    }

    if node.children.is_empty() {
        // leaves keep their declared size
        return;
    }

    let spacing = node.node.spacing;
    let pad = node.padding * 2.0;
    let n = node.children.len();

    let (w, h) = match node.node.layout {
        LayoutKind::Row => {
            let w: f32 = node.children.iter().map(|c| c.size.0).sum::<f32>()
                + spacing * (n - 1) as f32;
            let h = node
                .children
                .iter()
                .map(|c| c.size.1)
                .fold(0.0, utils::partial_max);
            (w + pad, h + pad)
        }
        LayoutKind::Column => {
            let h: f32 = node.children.iter().map(|c| c.size.1).sum::<f32>()
                + spacing * (n - 1) as f32;
            let w = node
                .children
                .iter()
                .map(|c| c.size.0)
                .fold(0.0, utils::partial_max);
            (w + pad, h + pad)
        }
        LayoutKind::Table => {
            let cols = utils::partial_max(node.node.columns, 1) as usize;
            let mut width: f32 = 0.0;
            let mut height: f32 = 0.0;
            for row in node.children.chunks(cols) {
                let row_w: f32 = row.iter().map(|c| c.size.0).sum::<f32>()
                    + spacing * (row.len() - 1) as f32;
                let row_h = row
                    .iter()
                    .map(|c| c.size.1)
                    .fold(0.0, utils::partial_max);
                width = utils::partial_max(width, row_w);
                height += row_h + spacing;
            }
            // drop the trailing row spacing
            height -= spacing;
            (width + pad, height + pad)
        }
        LayoutKind::Absolute => {
            // bounding box over the floating children
            let mut width: f32 = node.node.width;
            let mut height: f32 = node.node.height;
            for c in node.children.iter() {
                width = utils::partial_max(width, c.pos.0 + c.size.0);
                height = utils::partial_max(height, c.pos.1 + c.size.1);
            }
            (width, height)
        }
        LayoutKind::None => {
            let w = node
                .children
                .iter()
                .map(|c| c.size.0)
                .fold(node.node.width, utils::partial_max);
            let h = node
                .children
                .iter()
                .map(|c| c.size.1)
                .fold(node.node.height, utils::partial_max);
            (w, h)
        }
    };

    node.size = (w, h);
}

/// Top-down position pass
fn assign(node: &mut LayoutNode, x: f32, y: f32) {
    node.pos = (x, y);

    let origin = (x + node.padding, y + node.padding);
    let spacing = node.node.spacing;

    match node.node.layout {
        LayoutKind::Row => {
            let mut cx = origin.0;
            for child in node.children.iter_mut() {
                assign(child, cx, origin.1);
                cx += child.size.0 + spacing;
            }
        }
        LayoutKind::Column => {
            let mut cy = origin.1;
            for child in node.children.iter_mut() {
                assign(child, origin.0, cy);
                cy += child.size.1 + spacing;
            }
        }
        LayoutKind::Table => {
            let cols = utils::partial_max(node.node.columns, 1) as usize;
            let mut cy = origin.1;
            // chunk indices, the borrow checker will not let us
            // chunk the children directly while assigning
            let count = node.children.len();
            let mut i = 0;
            while i < count {
                let row_end = utils::partial_min(i + cols, count);
                let mut cx = origin.0;
                let mut row_h: f32 = 0.0;
                for j in i..row_end {
                    let child = &mut node.children[j];
                    assign(child, cx, cy);
                    cx += child.size.0 + spacing;
                    row_h = utils::partial_max(row_h, child.size.1);
                }
                cy += row_h + spacing;
                i = row_end;
            }
        }
        LayoutKind::Absolute => {
            for child in node.children.iter_mut() {
                let (ox, oy) = (child.node.x, child.node.y);
                assign(child, origin.0 + ox, origin.1 + oy);
            }
        }
        LayoutKind::None => {
            for child in node.children.iter_mut() {
                assign(child, origin.0, origin.1);
            }
        }
    }
}

/// Flatten the leaves into widgets, depth first in declaration order
fn flatten(node: &LayoutNode, styles: &StyleTable, out: &mut Vec<Widget>) {
    if let Some(widget_type) = node.node.widget {
        let style = resolve_style(node.node, styles);
        let mut w = Widget::new(widget_type);
        w.rect = Rect::new(node.pos.0, node.pos.1, node.size.0, node.size.1);
        w.floating_rect = Rect::new(node.node.x, node.node.y, node.size.0, node.size.1);
        w.padding = style.padding;
        w.base_padding = style.padding;
        w.border_thickness = style.border_thickness;
        if let Some(c) = style.color.or(node.node.color) {
            w.color = c;
        }
        if let Some(c) = style.text_color {
            w.text_color = c;
        }
        if let Some(c) = style.border_color {
            w.border_color = c;
        }
        w.text = node.node.text.clone();
        w.id = node.node.id.clone();
        w.min_value = node.node.min_value;
        w.max_value = node.node.max_value;
        w.value = node.node.value;
        w.scroll_area = node.node.scroll_area.clone();
        w.scroll_static = node.node.scroll_static;
        out.push(w);
    }

    for child in node.children.iter() {
        flatten(child, styles, out);
    }
}

/// Run the full layout pipeline: build, measure, assign from the
/// origin, and materialize the flat widget array.
pub fn materialize_widgets(root: &UiNode, styles: &StyleTable) -> Vec<Widget> {
    let mut tree = build(root, styles);
    measure(&mut tree);
    assign(&mut tree, 0.0, 0.0);

    let mut widgets = Vec::new();
    flatten(&tree, styles, &mut widgets);
    widgets
}

/// Rescale widget padding from its base value.
///
/// Scaling goes through base_padding, so applying the same scale
/// twice is a no-op and applying s then 1/s restores the original.
pub fn apply_widget_padding_scale(widgets: &mut [Widget], scale: f32) {
    for w in widgets.iter_mut() {
        w.padding = w.base_padding * scale;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{LayoutKind, Style, StyleTable, UiNode, WidgetType};

    fn zero_pad_styles() -> StyleTable {
        let mut styles = StyleTable::new();
        styles.insert(
            "zeroPad".to_string(),
            Style {
                padding: 0.0,
                ..Default::default()
            },
        );
        styles
    }

    #[test]
    fn row_layout() {
        let root = UiNode::container(LayoutKind::Row)
            .with_style("zeroPad")
            .with_spacing(5.0)
            .with_child(UiNode::widget(WidgetType::Button, 50.0, 20.0))
            .with_child(UiNode::widget(WidgetType::Label, 30.0, 10.0));

        let widgets = materialize_widgets(&root, &zero_pad_styles());
        assert_eq!(widgets.len(), 2);
        assert_eq!(widgets[0].rect.r_pos, (0.0, 0.0));
        assert_eq!(widgets[1].rect.r_pos, (55.0, 0.0));
    }

    #[test]
    fn column_layout_with_scroll_area() {
        let root = UiNode::container(LayoutKind::Column)
            .with_style("zeroPad")
            .with_spacing(7.0)
            .with_child(
                UiNode::widget(WidgetType::Button, 40.0, 18.0).with_scroll_area("area1"),
            )
            .with_child(
                UiNode::widget(WidgetType::Button, 40.0, 12.0).with_scroll_area("area1"),
            );

        let mut widgets = materialize_widgets(&root, &zero_pad_styles());
        assert_eq!(widgets.len(), 2);
        assert_eq!(widgets[0].rect.r_pos, (0.0, 0.0));
        assert_eq!(widgets[1].rect.r_pos, (0.0, 25.0));

        let ctx = crate::scroll::ScrollContext::new(&mut widgets);
        assert!(ctx.area_count() > 0);
        assert_eq!(widgets[0].scroll_offset, 0.0);
        assert_eq!(widgets[1].scroll_offset, 0.0);
    }

    #[test]
    fn table_layout() {
        let root = UiNode::container(LayoutKind::Table)
            .with_style("zeroPad")
            .with_columns(2)
            .with_spacing(3.0)
            .with_child(UiNode::widget(WidgetType::Panel, 10.0, 10.0))
            .with_child(UiNode::widget(WidgetType::Panel, 12.0, 8.0))
            .with_child(UiNode::widget(WidgetType::Panel, 6.0, 14.0));

        let widgets = materialize_widgets(&root, &zero_pad_styles());
        assert_eq!(widgets.len(), 3);
        assert_eq!(widgets[0].rect.r_pos, (0.0, 0.0));
        assert_eq!(widgets[1].rect.r_pos, (13.0, 0.0));
        assert_eq!(widgets[2].rect.r_pos, (0.0, 13.0));
    }

    #[test]
    fn absolute_layout_uses_floating_offsets() {
        let mut child = UiNode::widget(WidgetType::Panel, 10.0, 10.0);
        child.x = 30.0;
        child.y = 40.0;

        let root = UiNode::container(LayoutKind::Absolute)
            .with_style("zeroPad")
            .with_child(child);

        let widgets = materialize_widgets(&root, &zero_pad_styles());
        assert_eq!(widgets[0].rect.r_pos, (30.0, 40.0));
    }

    #[test]
    fn padding_scale_is_idempotent() {
        let mut w = Widget::new(WidgetType::Panel);
        w.base_padding = 10.0;
        w.padding = 10.0;
        let mut widgets = vec![w];

        apply_widget_padding_scale(&mut widgets, 2.0);
        assert!((widgets[0].padding - 20.0).abs() < 0.001);
        apply_widget_padding_scale(&mut widgets, 2.0);
        assert!((widgets[0].padding - 20.0).abs() < 0.001);
        apply_widget_padding_scale(&mut widgets, 0.5);
        assert!((widgets[0].padding - 5.0).abs() < 0.001);
    }

    #[test]
    fn container_padding_offsets_children() {
        let mut styles = StyleTable::new();
        styles.insert(
            "pad4".to_string(),
            Style {
                padding: 4.0,
                ..Default::default()
            },
        );

        let root = UiNode::container(LayoutKind::Row)
            .with_style("pad4")
            .with_spacing(0.0)
            .with_child(UiNode::widget(WidgetType::Button, 10.0, 10.0));

        let widgets = materialize_widgets(&root, &styles);
        assert_eq!(widgets[0].rect.r_pos, (4.0, 4.0));
    }
}
