// Windowing platform backends
//
// The renderer consumes platforms through the candela WindowSystem
// callbacks. The headless backend drives tests and offscreen use;
// the SDL2 backend is the interactive default when the `sdl` feature
// is enabled.

mod headless;
pub use headless::HeadlessPlat;

#[cfg(feature = "sdl")]
mod sdl2;
#[cfg(feature = "sdl")]
pub use self::sdl2::SDL2Plat;
