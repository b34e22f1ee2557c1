// The display medium: surface and swapchain handling
//
// The Display chooses the surface format and present mode, owns the
// swapchain and its image views, and maps the acquire/present result
// codes into our error categories so the frame loop can react.

use ash::extensions::khr;
use ash::vk;

extern crate utils as lantern_utils;
use crate::device::Device;
use crate::instance::Instance;
use crate::platform::WindowSystem;
use crate::{CandelaError, Result};
use lantern_utils::log;

use std::sync::Arc;

pub struct Display {
    /// loads the surface extension functions
    pub(crate) d_surface_loader: khr::Surface,
    pub(crate) d_surface: vk::SurfaceKHR,
    pub(crate) d_surface_caps: vk::SurfaceCapabilitiesKHR,
    pub(crate) d_surface_format: vk::SurfaceFormatKHR,
    pub(crate) d_present_mode: vk::PresentModeKHR,
    /// the current dimensions of the swapchain images
    pub(crate) d_resolution: vk::Extent2D,

    /// loads swapchain extension
    pub(crate) d_swapchain_loader: khr::Swapchain,
    /// the actual swapchain
    pub(crate) d_swapchain: vk::SwapchainKHR,
    /// a set of images belonging to swapchain
    pub(crate) d_images: Vec<vk::Image>,
    /// views describing how to access the images
    pub(crate) d_views: Vec<vk::ImageView>,
}

impl Display {
    /// Create the presentation surface through the platform hooks.
    ///
    /// This happens before device selection since we need the surface
    /// to pick a queue family that can present to it.
    pub(crate) fn create_surface(
        instance: &Arc<Instance>,
        window_system: &dyn WindowSystem,
    ) -> Result<(khr::Surface, vk::SurfaceKHR)> {
        let surface_loader = khr::Surface::new(&instance.loader, &instance.inst);
        let surface = window_system.create_vulkan_surface(&instance.loader, &instance.inst)?;
        Ok((surface_loader, surface))
    }

    /// Pick the surface format to render in.
    ///
    /// Prefer 8-bit BGRA/RGBA UNORM; fall back to whatever the
    /// surface reports first.
    fn select_surface_format(
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
        pdev: vk::PhysicalDevice,
    ) -> Result<vk::SurfaceFormatKHR> {
        let formats = unsafe {
            surface_loader
                .get_physical_device_surface_formats(pdev, surface)
                .or(Err(CandelaError::INVALID_FORMAT))?
        };

        formats
            .iter()
            .find(|f| {
                f.format == vk::Format::B8G8R8A8_UNORM || f.format == vk::Format::R8G8B8A8_UNORM
            })
            .or_else(|| formats.iter().nth(0))
            .copied()
            .ok_or(CandelaError::INVALID_FORMAT)
    }

    /// FIFO is always available; prefer MAILBOX when the driver
    /// offers it so resize feels smoother.
    fn select_present_mode(
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
        pdev: vk::PhysicalDevice,
    ) -> vk::PresentModeKHR {
        let modes = unsafe {
            surface_loader
                .get_physical_device_surface_present_modes(pdev, surface)
                .unwrap_or_else(|_| vec![vk::PresentModeKHR::FIFO])
        };

        modes
            .iter()
            .copied()
            .find(|&m| m == vk::PresentModeKHR::MAILBOX)
            .unwrap_or(vk::PresentModeKHR::FIFO)
    }

    /// Build a Display around an existing surface once the Device
    /// exists. This creates the initial swapchain.
    pub(crate) fn new(
        instance: &Arc<Instance>,
        dev: &Device,
        surface_loader: khr::Surface,
        surface: vk::SurfaceKHR,
        window_system: &dyn WindowSystem,
    ) -> Result<Self> {
        let surface_format = Self::select_surface_format(&surface_loader, surface, dev.pdev)?;
        let present_mode = Self::select_present_mode(&surface_loader, surface, dev.pdev);
        let swapchain_loader = khr::Swapchain::new(&instance.inst, &dev.dev);

        let mut display = Self {
            d_surface_loader: surface_loader,
            d_surface: surface,
            d_surface_caps: vk::SurfaceCapabilitiesKHR::default(),
            d_surface_format: surface_format,
            d_present_mode: present_mode,
            d_resolution: vk::Extent2D::default(),
            d_swapchain_loader: swapchain_loader,
            d_swapchain: vk::SwapchainKHR::null(),
            d_images: Vec::new(),
            d_views: Vec::new(),
        };

        display.recreate_swapchain(dev, window_system)?;
        Ok(display)
    }

    /// Screenshot helper: does the swapchain store BGRA-ordered
    /// pixels that need a swizzle before being written as RGBA
    pub(crate) fn is_bgra(&self) -> bool {
        matches!(
            self.d_surface_format.format,
            vk::Format::B8G8R8A8_UNORM | vk::Format::B8G8R8A8_SRGB
        )
    }

    /// The size the next swapchain should take.
    ///
    /// Normally the surface reports it directly. When the window is
    /// minimized the framebuffer is 0x0 and swapchain creation must
    /// wait until the platform reports a real size again.
    fn wait_for_valid_drawable_size(
        &mut self,
        dev: &Device,
        window_system: &dyn WindowSystem,
    ) -> Result<vk::Extent2D> {
        loop {
            self.d_surface_caps = unsafe {
                self.d_surface_loader
                    .get_physical_device_surface_capabilities(dev.pdev, self.d_surface)
                    .or(Err(CandelaError::VK_SURF_NOT_SUPPORTED))?
            };

            let extent = if self.d_surface_caps.current_extent.width != u32::MAX {
                self.d_surface_caps.current_extent
            } else {
                let (w, h) = window_system.framebuffer_size();
                vk::Extent2D {
                    width: w,
                    height: h,
                }
            };

            if extent.width > 0 && extent.height > 0 {
                return Ok(extent);
            }
            // Minimized. Sleep on the platform until something
            // changes rather than spinning.
            window_system.wait_events();
        }
    }

    /// create a new vkSwapchain
    ///
    /// Swapchains contain images that can be used for WSI
    /// presentation. They take a vkSurfaceKHR and provide a way to
    /// manage swapping effects such as double/triple buffering.
    unsafe fn create_swapchain(
        &mut self,
        old_swapchain: Option<vk::SwapchainKHR>,
    ) -> Result<vk::SwapchainKHR> {
        // how many images we want the swapchain to contain
        let mut desired_image_count = self.d_surface_caps.min_image_count + 1;
        if self.d_surface_caps.max_image_count > 0
            && desired_image_count > self.d_surface_caps.max_image_count
        {
            desired_image_count = self.d_surface_caps.max_image_count;
        }

        let transform = if self
            .d_surface_caps
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            self.d_surface_caps.current_transform
        };

        // TRANSFER_SRC so the screenshot path can copy the backbuffer out
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.d_surface)
            .min_image_count(desired_image_count)
            .image_color_space(self.d_surface_format.color_space)
            .image_format(self.d_surface_format.format)
            .image_extent(self.d_resolution)
            .image_usage(
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
            )
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(self.d_present_mode)
            .clipped(true)
            .image_array_layers(1)
            .old_swapchain(match old_swapchain {
                Some(s) => s,
                None => vk::SwapchainKHR::null(),
            });

        self.d_swapchain_loader
            .create_swapchain(&create_info, None)
            .or(Err(CandelaError::COULD_NOT_CREATE_SWAPCHAIN))
    }

    /// Get the vkImages for the swapchain, and create vkImageViews
    /// for them
    unsafe fn select_images_and_views(&mut self, dev: &Device) -> Result<()> {
        let images = self
            .d_swapchain_loader
            .get_swapchain_images(self.d_swapchain)
            .or(Err(CandelaError::COULD_NOT_CREATE_IMAGE))?;

        let mut views = Vec::with_capacity(images.len());
        for &image in images.iter() {
            let create_info = vk::ImageViewCreateInfo::builder()
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.d_surface_format.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::R,
                    g: vk::ComponentSwizzle::G,
                    b: vk::ComponentSwizzle::B,
                    a: vk::ComponentSwizzle::A,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image(image);

            views.push(
                dev.dev
                    .create_image_view(&create_info, None)
                    .or(Err(CandelaError::COULD_NOT_CREATE_IMAGE))?,
            );
        }

        self.d_images = images;
        self.d_views = views;
        Ok(())
    }

    /// Tear down the swapchain-dependent objects we own
    pub(crate) fn destroy_swapchain(&mut self, dev: &Device) {
        unsafe {
            for view in self.d_views.drain(..) {
                dev.dev.destroy_image_view(view, None);
            }
            // the images belong to the swapchain, the destroy call
            // takes care of them
            self.d_images.clear();

            if self.d_swapchain != vk::SwapchainKHR::null() {
                self.d_swapchain_loader
                    .destroy_swapchain(self.d_swapchain, None);
                self.d_swapchain = vk::SwapchainKHR::null();
            }
        }
    }

    /// Recreate our swapchain.
    ///
    /// This will be done on OUT_OF_DATE or SUBOPTIMAL, signifying
    /// that the window is being resized and we have to regenerate
    /// accordingly.
    pub(crate) fn recreate_swapchain(
        &mut self,
        dev: &Device,
        window_system: &dyn WindowSystem,
    ) -> Result<()> {
        dev.wait_idle();

        self.d_resolution = self.wait_for_valid_drawable_size(dev, window_system)?;
        log::debug!(
            "Creating swapchain at {}x{}",
            self.d_resolution.width,
            self.d_resolution.height
        );

        unsafe {
            let old = match self.d_swapchain {
                s if s == vk::SwapchainKHR::null() => None,
                s => Some(s),
            };
            let new_swapchain = self.create_swapchain(old)?;

            // Now that we recreated the swapchain destroy the old one
            self.destroy_swapchain(dev);
            self.d_swapchain = new_swapchain;

            self.select_images_and_views(dev)?;
        }
        Ok(())
    }

    /// Acquire the next swapchain image, signalling `sema` when it
    /// is ready. Maps the WSI result codes onto our error space.
    pub(crate) fn acquire_next_image(&mut self, sema: vk::Semaphore) -> Result<u32> {
        unsafe {
            match self.d_swapchain_loader.acquire_next_image(
                self.d_swapchain,
                u64::MAX,
                sema,
                vk::Fence::null(),
            ) {
                Ok((index, false)) => Ok(index),
                Ok((_, true)) => Err(CandelaError::OUT_OF_DATE),
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(CandelaError::OUT_OF_DATE),
                Err(vk::Result::SUBOPTIMAL_KHR) => Err(CandelaError::OUT_OF_DATE),
                Err(vk::Result::ERROR_DEVICE_LOST) => Err(CandelaError::DEVICE_LOST),
                Err(res) => {
                    log::error!("{}", crate::vk_fatal_msg("vkAcquireNextImageKHR", res));
                    Err(CandelaError::COULD_NOT_ACQUIRE_NEXT_IMAGE)
                }
            }
        }
    }

    /// Present `image_index`, waiting on `wait_sema` (the render-done
    /// semaphore).
    pub(crate) fn present(
        &mut self,
        queue: vk::Queue,
        image_index: u32,
        wait_sema: vk::Semaphore,
    ) -> Result<()> {
        let waits = [wait_sema];
        let swapchains = [self.d_swapchain];
        let indices = [image_index];
        let info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&waits)
            .swapchains(&swapchains)
            .image_indices(&indices);

        unsafe {
            match self.d_swapchain_loader.queue_present(queue, &info) {
                Ok(false) => Ok(()),
                Ok(true) => Err(CandelaError::OUT_OF_DATE),
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(CandelaError::OUT_OF_DATE),
                Err(vk::Result::SUBOPTIMAL_KHR) => Err(CandelaError::OUT_OF_DATE),
                Err(vk::Result::ERROR_DEVICE_LOST) => Err(CandelaError::DEVICE_LOST),
                Err(res) => {
                    log::error!("{}", crate::vk_fatal_msg("vkQueuePresentKHR", res));
                    Err(CandelaError::PRESENT_FAILED)
                }
            }
        }
    }

    /// Full teardown, including the surface. Called at shutdown and
    /// during device-loss recovery.
    pub(crate) fn destroy(&mut self, dev: &Device) {
        self.destroy_swapchain(dev);
        unsafe {
            self.d_surface_loader.destroy_surface(self.d_surface, None);
            self.d_surface = vk::SurfaceKHR::null();
        }
    }
}
