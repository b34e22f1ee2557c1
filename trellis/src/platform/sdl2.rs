// SDL2 platform backend
//
// The interactive windowing path. SDL owns the window and the event
// pump; the renderer only ever sees the WindowSystem callbacks. The
// event pump must stay on the thread that created the window.

extern crate sdl2;

use ash::vk;
use candela::{CandelaError, WindowSystem};
use utils::log;

use std::cell::RefCell;
use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};

pub struct SDL2Plat {
    #[allow(dead_code)]
    sdl: sdl2::Sdl,
    #[allow(dead_code)]
    video: sdl2::VideoSubsystem,
    window: sdl2::video::Window,
    event_pump: RefCell<sdl2::EventPump>,
    should_close: AtomicBool,
    start: std::time::Instant,
}

// The window and pump are only touched from the thread that owns the
// platform; the WindowSystem trait needs the marker anyway so the
// renderer half can hold the same Arc.
unsafe impl Send for SDL2Plat {}
unsafe impl Sync for SDL2Plat {}

impl SDL2Plat {
    pub fn new(title: &str, width: u32, height: u32) -> crate::Result<Self> {
        let sdl = sdl2::init().map_err(|e| crate::anyhow!("SDL init: {}", e))?;
        let video = sdl
            .video()
            .map_err(|e| crate::anyhow!("SDL video: {}", e))?;
        let window = video
            .window(title, width, height)
            .vulkan()
            .resizable()
            .build()
            .map_err(|e| crate::anyhow!("SDL window: {}", e))?;
        let event_pump = sdl
            .event_pump()
            .map_err(|e| crate::anyhow!("SDL event pump: {}", e))?;

        Ok(Self {
            sdl: sdl,
            video: video,
            window: window,
            event_pump: RefCell::new(event_pump),
            should_close: AtomicBool::new(false),
            start: std::time::Instant::now(),
        })
    }

    pub fn should_close(&self) -> bool {
        self.should_close.load(Ordering::Acquire)
    }

    /// Used by the render thread on shutdown to unblock the logic
    /// side's wait_events path
    pub fn set_should_close(&self) {
        self.should_close.store(true, Ordering::Release);
    }

    fn handle_event(&self, event: sdl2::event::Event) {
        if let sdl2::event::Event::Quit { .. } = event {
            self.should_close.store(true, Ordering::Release);
        }
    }
}

impl WindowSystem for SDL2Plat {
    fn required_extensions(&self) -> Vec<CString> {
        match self.window.vulkan_instance_extensions() {
            Ok(names) => names
                .iter()
                .map(|n| CString::new(*n).unwrap())
                .collect(),
            Err(e) => {
                log::error!("SDL could not report vulkan extensions: {}", e);
                Vec::new()
            }
        }
    }

    fn create_vulkan_surface(
        &self,
        _entry: &ash::Entry,
        inst: &ash::Instance,
    ) -> candela::Result<vk::SurfaceKHR> {
        let raw_instance = inst.handle().as_raw() as usize;
        match self.window.vulkan_create_surface(raw_instance as _) {
            Ok(surface) => Ok(vk::SurfaceKHR::from_raw(surface)),
            Err(e) => {
                log::error!("SDL surface creation failed: {}", e);
                Err(CandelaError::VK_SURF_NOT_SUPPORTED)
            }
        }
    }

    fn framebuffer_size(&self) -> (u32, u32) {
        self.window.vulkan_drawable_size()
    }

    fn poll_events(&self) {
        let mut pump = self.event_pump.borrow_mut();
        while let Some(event) = pump.poll_event() {
            self.handle_event(event);
        }
    }

    fn wait_events(&self) {
        let mut pump = self.event_pump.borrow_mut();
        if let Some(event) = pump.wait_event_timeout(100) {
            self.handle_event(event);
        }
    }

    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}
