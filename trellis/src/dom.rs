// Widget and node tree definitions
//
// A UiNode tree describes the interface declaratively; layout lowers
// it into a flat Widget array with assigned rectangles. Widgets are
// plain data, cross-referenced by index, never by pointer.

use utils::region::Rect;

use std::collections::HashMap;

/// Default padding applied when a node has no style
pub const DEFAULT_PADDING: f32 = 8.0;

/// An RGBA color in linear [0, 1] components
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self {
            r: r,
            g: g,
            b: b,
            a: a,
        }
    }

    /// The neutral gray widgets start out with
    pub const fn default_widget() -> Self {
        Self::new(0.6, 0.6, 0.6, 1.0)
    }

    pub const fn transparent() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }

    pub const fn white() -> Self {
        Self::new(1.0, 1.0, 1.0, 1.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WidgetType {
    Panel,
    Label,
    Button,
    HSlider,
    Rect,
    Spacer,
    Checkbox,
    Progress,
}

/// How a container arranges its children
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LayoutKind {
    /// Leaf or plain stack, children at the container origin
    None,
    Row,
    Column,
    Table,
    /// Children position themselves with their floating rects
    Absolute,
}

/// Scrollbar appearance carried by scrollable widgets
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ScrollbarStyle {
    pub enabled: bool,
    pub shown: bool,
    /// 0 selects the width heuristic at draw time
    pub width: f32,
    pub track_color: Color,
    pub thumb_color: Color,
}

impl Default for ScrollbarStyle {
    fn default() -> Self {
        Self {
            enabled: false,
            shown: false,
            width: 0.0,
            track_color: Color::new(0.2, 0.2, 0.22, 0.8),
            thumb_color: Color::new(0.5, 0.5, 0.55, 0.9),
        }
    }
}

/// A materialized leaf UI element
#[derive(Debug, Clone)]
pub struct Widget {
    pub widget_type: WidgetType,
    /// Layout-assigned rectangle in logical units
    pub rect: Rect<f32>,
    /// Free-floating rectangle for absolute layouts
    pub floating_rect: Rect<f32>,
    pub color: Color,
    pub text_color: Color,
    pub padding: f32,
    /// The unscaled padding; `padding` is always base_padding times
    /// the current scale so re-applying a scale is idempotent
    pub base_padding: f32,
    pub border_thickness: f32,
    pub border_color: Color,
    pub text: String,
    pub min_value: f32,
    pub max_value: f32,
    pub value: f32,
    pub id: Option<String>,
    /// Scroll area membership by name
    pub scroll_area: Option<String>,
    /// Members tagged static draw in place instead of scrolling
    pub scroll_static: bool,
    pub scroll_offset: f32,
    pub scrollbar: ScrollbarStyle,
    pub scroll_viewport: f32,
    pub scroll_content: f32,
    /// Inherited clip rectangle, if any
    pub clip: Option<Rect<f32>>,
    pub z_index: i32,
}

impl Widget {
    pub fn new(widget_type: WidgetType) -> Self {
        Self {
            widget_type: widget_type,
            rect: Rect::new(0.0, 0.0, 0.0, 0.0),
            floating_rect: Rect::new(0.0, 0.0, 0.0, 0.0),
            color: Color::default_widget(),
            text_color: Color::white(),
            padding: DEFAULT_PADDING,
            base_padding: DEFAULT_PADDING,
            border_thickness: 0.0,
            border_color: Color::transparent(),
            text: String::new(),
            min_value: 0.0,
            max_value: 1.0,
            value: 0.0,
            id: None,
            scroll_area: None,
            scroll_static: false,
            scroll_offset: 0.0,
            scrollbar: ScrollbarStyle::default(),
            scroll_viewport: 0.0,
            scroll_content: 0.0,
            clip: None,
            z_index: 0,
        }
    }
}

/// A named style entry resolved during materialization
#[derive(Debug, Clone)]
pub struct Style {
    pub padding: f32,
    pub color: Option<Color>,
    pub text_color: Option<Color>,
    pub border_thickness: f32,
    pub border_color: Option<Color>,
}

impl Default for Style {
    fn default() -> Self {
        Self {
            padding: DEFAULT_PADDING,
            color: None,
            text_color: None,
            border_thickness: 0.0,
            border_color: None,
        }
    }
}

/// Name -> style lookup table
pub type StyleTable = HashMap<String, Style>;

/// One node of the declarative UI tree
#[derive(Debug, Clone)]
pub struct UiNode {
    pub layout: LayoutKind,
    /// Set on leaves that materialize into widgets
    pub widget: Option<WidgetType>,
    pub spacing: f32,
    /// Table column count; ignored by other layouts
    pub columns: u32,
    pub style: Option<String>,
    /// Declared size; containers may grow beyond it
    pub width: f32,
    pub height: f32,
    /// Declared offset, used by absolute layouts
    pub x: f32,
    pub y: f32,
    pub id: Option<String>,
    pub text: String,
    pub color: Option<Color>,
    pub min_value: f32,
    pub max_value: f32,
    pub value: f32,
    pub scroll_area: Option<String>,
    pub scroll_static: bool,
    pub children: Vec<UiNode>,
}

impl UiNode {
    pub fn container(layout: LayoutKind) -> Self {
        Self {
            layout: layout,
            widget: None,
            spacing: 0.0,
            columns: 1,
            style: None,
            width: 0.0,
            height: 0.0,
            x: 0.0,
            y: 0.0,
            id: None,
            text: String::new(),
            color: None,
            min_value: 0.0,
            max_value: 1.0,
            value: 0.0,
            scroll_area: None,
            scroll_static: false,
            children: Vec::new(),
        }
    }

    pub fn widget(widget_type: WidgetType, width: f32, height: f32) -> Self {
        let mut node = Self::container(LayoutKind::None);
        node.widget = Some(widget_type);
        node.width = width;
        node.height = height;
        node
    }

    pub fn with_spacing(mut self, spacing: f32) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn with_columns(mut self, columns: u32) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_style(mut self, style: &str) -> Self {
        self.style = Some(style.to_string());
        self
    }

    pub fn with_scroll_area(mut self, area: &str) -> Self {
        self.scroll_area = Some(area.to_string());
        self
    }

    pub fn with_child(mut self, child: UiNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }
}
