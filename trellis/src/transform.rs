// Coordinate spaces and the UI projection
//
// Three spaces are in play: world (model units), logical (UI units,
// world scaled by the logical scale) and screen (device pixels,
// logical scaled by the DPI factor). The transformer provides the
// round trips plus the orthographic projection handed to the
// shaders.

use cgmath::{Matrix4, Vector2};

/// Orthographic depth range. Higher z values render on top.
pub const ORTHO_Z_NEAR: f32 = -100.0;
pub const ORTHO_Z_FAR: f32 = 100.0;

#[derive(Debug, Copy, Clone)]
pub struct CoordinateTransformer {
    pub dpi_scale: f32,
    pub logical_scale: f32,
    /// Viewport size in device pixels
    pub viewport_size: Vector2<f32>,
}

impl CoordinateTransformer {
    pub fn new(dpi_scale: f32, logical_scale: f32, viewport_size: (f32, f32)) -> Self {
        Self {
            dpi_scale: dpi_scale,
            logical_scale: logical_scale,
            viewport_size: Vector2::new(viewport_size.0, viewport_size.1),
        }
    }

    pub fn world_to_logical(&self, world: Vector2<f32>) -> Vector2<f32> {
        world * self.logical_scale
    }

    pub fn logical_to_world(&self, logical: Vector2<f32>) -> Vector2<f32> {
        logical / self.logical_scale
    }

    pub fn logical_to_screen(&self, logical: Vector2<f32>) -> Vector2<f32> {
        logical * self.dpi_scale
    }

    pub fn screen_to_logical(&self, screen: Vector2<f32>) -> Vector2<f32> {
        screen / self.dpi_scale
    }

    pub fn world_to_screen(&self, world: Vector2<f32>) -> Vector2<f32> {
        self.logical_to_screen(self.world_to_logical(world))
    }

    pub fn screen_to_world(&self, screen: Vector2<f32>) -> Vector2<f32> {
        self.logical_to_world(self.screen_to_logical(screen))
    }

    /// Orthographic projection over device pixels, origin top-left,
    /// y growing downward, z in [ORTHO_Z_NEAR, ORTHO_Z_FAR]
    pub fn projection(&self) -> Matrix4<f32> {
        cgmath::ortho(
            0.0,
            self.viewport_size.x,
            self.viewport_size.y,
            0.0,
            ORTHO_Z_NEAR,
            ORTHO_Z_FAR,
        )
    }
}

/// A rectangle in logical space waiting to be resolved
#[derive(Debug, Copy, Clone)]
pub struct LayoutBox {
    pub pos: Vector2<f32>,
    pub size: Vector2<f32>,
}

/// A box resolved against a transformer: the original logical
/// rectangle plus the device-pixel one.
#[derive(Debug, Copy, Clone)]
pub struct LayoutResult {
    pub logical: LayoutBox,
    pub device: LayoutBox,
}

/// Resolve a logical box into device pixels
pub fn layout_resolve(logical: &LayoutBox, transformer: &CoordinateTransformer) -> LayoutResult {
    LayoutResult {
        logical: *logical,
        device: LayoutBox {
            pos: transformer.logical_to_screen(logical.pos),
            size: transformer.logical_to_screen(logical.size),
        },
    }
}

/// Point-in-box test in logical space
pub fn layout_hit_test(layout: &LayoutResult, point: Vector2<f32>) -> bool {
    let min = layout.logical.pos;
    let max = layout.logical.pos + layout.logical.size;
    point.x >= min.x && point.x <= max.x && point.y >= min.y && point.y <= max.y
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nearly_equal(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn world_logical_screen_round_trip() {
        let transformer = CoordinateTransformer::new(2.0, 1.5, (300.0, 200.0));

        let world = Vector2::new(10.0, 20.0);
        let logical = transformer.world_to_logical(world);
        let screen = transformer.world_to_screen(world);

        assert!(nearly_equal(logical.x, 15.0));
        assert!(nearly_equal(logical.y, 30.0));
        assert!(nearly_equal(screen.x, 30.0));
        assert!(nearly_equal(screen.y, 60.0));

        let roundtrip = transformer.screen_to_world(screen);
        assert!(nearly_equal(roundtrip.x, world.x));
        assert!(nearly_equal(roundtrip.y, world.y));
    }

    #[test]
    fn layout_resolve_and_hit_test() {
        let transformer = CoordinateTransformer::new(2.0, 1.5, (300.0, 200.0));

        let logical_box = LayoutBox {
            pos: Vector2::new(5.0, 5.0),
            size: Vector2::new(10.0, 10.0),
        };
        let layout = layout_resolve(&logical_box, &transformer);
        assert!(nearly_equal(layout.device.size.x, 20.0));
        assert!(nearly_equal(layout.device.size.y, 20.0));

        assert!(layout_hit_test(&layout, Vector2::new(7.0, 7.0)));
        assert!(!layout_hit_test(&layout, Vector2::new(40.0, 3.0)));
    }

    #[test]
    fn projection_maps_corners_to_clip_space() {
        let transformer = CoordinateTransformer::new(1.0, 1.0, (640.0, 480.0));
        let proj = transformer.projection();

        let origin = proj * cgmath::Vector4::new(0.0, 0.0, 0.0, 1.0);
        assert!(nearly_equal(origin.x, -1.0));
        assert!(nearly_equal(origin.y, 1.0));

        let corner = proj * cgmath::Vector4::new(640.0, 480.0, 0.0, 1.0);
        assert!(nearly_equal(corner.x, 1.0));
        assert!(nearly_equal(corner.y, -1.0));
    }
}
