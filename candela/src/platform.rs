// Platform contract and device feature detection
//
// The windowing system is an external collaborator. The renderer only
// sees these callbacks; it never links against SDL/GLFW/etc itself.

use ash::vk;

use crate::Result;

/// Callbacks into the windowing platform.
///
/// Every operation either succeeds with a valid handle or returns a
/// categorized failure that the backend surfaces as fatal. These are
/// invoked from the render thread during init, swapchain recreation
/// and device-loss recovery.
pub trait WindowSystem: Send + Sync {
    /// Names of the instance extensions the platform needs for
    /// surface creation (e.g. VK_KHR_surface + the platform one)
    fn required_extensions(&self) -> Vec<std::ffi::CString>;

    /// Create a VkSurfaceKHR for the native window
    fn create_vulkan_surface(
        &self,
        entry: &ash::Entry,
        inst: &ash::Instance,
    ) -> Result<vk::SurfaceKHR>;

    /// Current framebuffer size in device pixels. May be (0, 0) while
    /// the window is minimized.
    fn framebuffer_size(&self) -> (u32, u32);

    /// Pump pending window events without blocking
    fn poll_events(&self);

    /// Block until an event arrives. Used while the window is
    /// minimized so we do not spin on a 0x0 framebuffer.
    fn wait_events(&self);

    /// Monotonic time in seconds
    fn now(&self) -> f64;
}

/// What the chosen physical device can do for us.
///
/// Queried once at device creation; the renderer consults this rather
/// than re-asking Vulkan.
pub struct VkDeviceFeatures {
    /// Device supports a compute-capable queue family
    pub supports_compute: bool,
}

impl VkDeviceFeatures {
    pub fn new(inst: &ash::Instance, pdev: vk::PhysicalDevice) -> Self {
        let families = unsafe { inst.get_physical_device_queue_family_properties(pdev) };
        let supports_compute = families
            .iter()
            .any(|info| info.queue_flags.contains(vk::QueueFlags::COMPUTE));

        Self {
            supports_compute: supports_compute,
        }
    }
}
