// The Trellis UI toolkit
//
// Trellis turns a declarative node tree into flat widget arrays,
// lays them out, and lowers them each frame into the display list
// and instance streams the Candela renderer consumes.

pub mod dom;
pub mod draw;
pub mod font;
pub mod frame;
pub mod layout;
pub mod platform;
pub mod scroll;
pub mod transform;

pub use dom::{Color, ScrollbarStyle, UiNode, Widget, WidgetType};
pub use draw::{DisplayList, GlyphQuad, ViewModel};
pub use font::FontAtlas;
pub use frame::RenderFramePacket;
pub use layout::{apply_widget_padding_scale, materialize_widgets};
pub use scroll::ScrollContext;
pub use transform::CoordinateTransformer;

extern crate utils;
pub use utils::{anyhow, Context, Error, Result};
