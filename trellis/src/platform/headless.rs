// Headless platform backend
//
// No window system at all: the surface comes from
// VK_EXT_headless_surface and events never arrive. Used by tests
// and offscreen rendering.

use ash::extensions::ext;
use ash::vk;
use candela::{CandelaError, WindowSystem};

use std::ffi::CString;
use std::time::Instant;

pub struct HeadlessPlat {
    size: (u32, u32),
    start: Instant,
}

impl HeadlessPlat {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: (width, height),
            start: Instant::now(),
        }
    }
}

impl WindowSystem for HeadlessPlat {
    fn required_extensions(&self) -> Vec<CString> {
        vec![
            ash::extensions::khr::Surface::name().to_owned(),
            ext::HeadlessSurface::name().to_owned(),
        ]
    }

    fn create_vulkan_surface(
        &self,
        entry: &ash::Entry,
        inst: &ash::Instance,
    ) -> candela::Result<vk::SurfaceKHR> {
        let loader = ext::HeadlessSurface::new(entry, inst);
        let info = vk::HeadlessSurfaceCreateInfoEXT::default();
        unsafe {
            loader
                .create_headless_surface(&info, None)
                .or(Err(CandelaError::VK_SURF_NOT_SUPPORTED))
        }
    }

    fn framebuffer_size(&self) -> (u32, u32) {
        self.size
    }

    fn poll_events(&self) {}

    fn wait_events(&self) {
        // nothing will ever wake us; yield instead of spinning
        std::thread::sleep(std::time::Duration::from_millis(16));
    }

    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}
