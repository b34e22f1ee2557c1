// Vulkan device representation
//
// This stores per-GPU state: the logical device, queues, memory
// properties and the small helpers for buffers, images and one-shot
// copy submissions that everything above leans on.

use ash::extensions::khr;
use ash::vk;

extern crate utils as lantern_utils;
use crate::instance::Instance;
use crate::platform::VkDeviceFeatures;

use crate::{CandelaError, Result};
use lantern_utils::log;

use std::sync::Arc;

pub struct Device {
    pub(crate) inst: Arc<Instance>,
    /// the logical device we are using
    pub(crate) dev: ash::Device,
    /// Details about what this device supports
    pub(crate) dev_features: VkDeviceFeatures,
    /// the physical device selected to display to
    pub(crate) pdev: vk::PhysicalDevice,
    pub(crate) mem_props: vk::PhysicalDeviceMemoryProperties,
    /// Graphics queue family index in use
    pub(crate) graphics_family: u32,
    /// The one graphics/present queue. The render thread is the only
    /// submitter; one-shot copies reuse it with a fence wait.
    pub(crate) queue: vk::Queue,
    /// pool for one-shot copy command buffers
    copy_pool: vk::CommandPool,
    copy_cbuf: vk::CommandBuffer,
    copy_fence: vk::Fence,
}

impl Device {
    /// Choose a vkPhysicalDevice.
    ///
    /// For now we are just going to get the first one; eventually
    /// there needs to be a way of grabbing the configured pdev from
    /// the user.
    fn select_pdev(inst: &ash::Instance) -> vk::PhysicalDevice {
        let pdevices = unsafe {
            inst.enumerate_physical_devices()
                .expect("Physical device error")
        };

        *pdevices.iter().nth(0).expect("Couldn't find suitable device.")
    }

    /// Choose a queue family
    ///
    /// returns an index into the array of queue types. We require a
    /// family that can do graphics and present to `surface`.
    fn select_queue_family(
        inst: &ash::Instance,
        pdev: vk::PhysicalDevice,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
    ) -> Result<u32> {
        unsafe { inst.get_physical_device_queue_family_properties(pdev) }
            .iter()
            .enumerate()
            .filter_map(|(index, info)| {
                let supports_present = unsafe {
                    surface_loader
                        .get_physical_device_surface_support(pdev, index as u32, surface)
                        .unwrap_or(false)
                };
                match info.queue_flags.contains(vk::QueueFlags::GRAPHICS) && supports_present {
                    true => Some(index as u32),
                    false => None,
                }
            })
            .nth(0)
            .ok_or(CandelaError::VK_SURF_NOT_SUPPORTED)
    }

    /// Create a vkDevice from a vkPhysicalDevice
    ///
    /// Create a logical device for interfacing with the physical
    /// device. We specify any device extensions we need, the
    /// swapchain being the most important one.
    fn create_device(
        inst: &ash::Instance,
        pdev: vk::PhysicalDevice,
        queue_family: u32,
    ) -> ash::Device {
        let dev_extension_names = [khr::Swapchain::name().as_ptr()];

        let features = vk::PhysicalDeviceFeatures::builder()
            .vertex_pipeline_stores_and_atomics(true)
            .fragment_stores_and_atomics(true)
            .build();

        // for now we only have one graphics queue, so one priority
        let priorities = [1.0];
        let queue_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queue_family)
            .queue_priorities(&priorities)
            .build()];

        let dev_create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&dev_extension_names)
            .enabled_features(&features)
            .build();

        unsafe { inst.create_device(pdev, &dev_create_info, None).unwrap() }
    }

    /// Create a new Device for the default physical device, attached
    /// to the given surface's queue family.
    pub fn new(
        instance: Arc<Instance>,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
    ) -> Result<Self> {
        let pdev = Self::select_pdev(&instance.inst);
        let graphics_family =
            Self::select_queue_family(&instance.inst, pdev, surface_loader, surface)?;
        let mem_props =
            unsafe { instance.inst.get_physical_device_memory_properties(pdev) };
        let dev_features = VkDeviceFeatures::new(&instance.inst, pdev);

        let dev = Self::create_device(&instance.inst, pdev, graphics_family);
        let queue = unsafe { dev.get_device_queue(graphics_family, 0) };

        let mut ret = Self {
            inst: instance,
            dev: dev,
            dev_features: dev_features,
            pdev: pdev,
            mem_props: mem_props,
            graphics_family: graphics_family,
            queue: queue,
            copy_pool: vk::CommandPool::null(),
            copy_cbuf: vk::CommandBuffer::null(),
            copy_fence: vk::Fence::null(),
        };

        ret.copy_pool = ret.create_command_pool(graphics_family);
        ret.copy_cbuf = ret.create_command_buffers(ret.copy_pool, 1)[0];
        ret.copy_fence = unsafe {
            ret.dev
                .create_fence(&vk::FenceCreateInfo::default(), None)
                .or(Err(CandelaError::INVALID))?
        };

        Ok(ret)
    }

    /// returns a new vkCommandPool
    ///
    /// Command buffers are allocated from command pools. That's about
    /// all they do. They just manage memory.
    pub(crate) fn create_command_pool(&self, queue_family: u32) -> vk::CommandPool {
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family);

        unsafe { self.dev.create_command_pool(&pool_create_info, None).unwrap() }
    }

    /// Allocate `count` command buffers from `pool`
    pub(crate) fn create_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Vec<vk::CommandBuffer> {
        let cbuf_allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_buffer_count(count)
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY);

        unsafe { self.dev.allocate_command_buffers(&cbuf_allocate_info).unwrap() }
    }

    /// Find a memory type index supporting `flags` out of `reqs`
    pub(crate) fn find_memory_type_index(
        &self,
        reqs: &vk::MemoryRequirements,
        flags: vk::MemoryPropertyFlags,
    ) -> Result<u32> {
        for (i, ty) in self.mem_props.memory_types.iter().enumerate() {
            if reqs.memory_type_bits & (1 << i) != 0 && ty.property_flags.contains(flags) {
                return Ok(i as u32);
            }
        }
        log::error!("Could not find memory type with flags {:?}", flags);
        Err(CandelaError::OUT_OF_MEMORY)
    }

    /// Allocate a buffer of `size` bytes with backing memory.
    pub(crate) fn create_buffer_with_size(
        &self,
        usage: vk::BufferUsageFlags,
        props: vk::MemoryPropertyFlags,
        size: vk::DeviceSize,
    ) -> Result<(vk::Buffer, vk::DeviceMemory)> {
        unsafe {
            let info = vk::BufferCreateInfo::builder()
                .size(size)
                .usage(usage)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);
            let buffer = self
                .dev
                .create_buffer(&info, None)
                .or(Err(CandelaError::COULD_NOT_CREATE_BUFFER))?;

            let reqs = self.dev.get_buffer_memory_requirements(buffer);
            let alloc = vk::MemoryAllocateInfo::builder()
                .allocation_size(reqs.size)
                .memory_type_index(self.find_memory_type_index(&reqs, props)?);
            let memory = match self.dev.allocate_memory(&alloc, None) {
                Ok(m) => m,
                Err(_) => {
                    self.dev.destroy_buffer(buffer, None);
                    return Err(CandelaError::OUT_OF_MEMORY);
                }
            };
            self.dev
                .bind_buffer_memory(buffer, memory, 0)
                .or(Err(CandelaError::COULD_NOT_CREATE_BUFFER))?;

            Ok((buffer, memory))
        }
    }

    /// Write `data` into mapped `memory` at `offset`
    pub(crate) fn update_memory<T: Copy>(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        data: &[T],
    ) -> Result<()> {
        unsafe {
            let bytes = (data.len() * std::mem::size_of::<T>()) as u64;
            if bytes == 0 {
                return Ok(());
            }
            let ptr = self
                .dev
                .map_memory(memory, offset, bytes, vk::MemoryMapFlags::empty())
                .or(Err(CandelaError::OUT_OF_MEMORY))?;
            std::ptr::copy_nonoverlapping(data.as_ptr() as *const u8, ptr as *mut u8, bytes as usize);
            self.dev.unmap_memory(memory);
        }
        Ok(())
    }

    /// Create a 2D image with a view and backing memory
    pub(crate) fn create_image(
        &self,
        resolution: &vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
        props: vk::MemoryPropertyFlags,
        tiling: vk::ImageTiling,
    ) -> Result<(vk::Image, vk::ImageView, vk::DeviceMemory)> {
        unsafe {
            let info = vk::ImageCreateInfo::builder()
                .image_type(vk::ImageType::TYPE_2D)
                .format(format)
                .extent(vk::Extent3D {
                    width: resolution.width,
                    height: resolution.height,
                    depth: 1,
                })
                .mip_levels(1)
                .array_layers(1)
                .samples(vk::SampleCountFlags::TYPE_1)
                .tiling(tiling)
                .usage(usage)
                .sharing_mode(vk::SharingMode::EXCLUSIVE)
                .initial_layout(vk::ImageLayout::UNDEFINED);
            let image = self
                .dev
                .create_image(&info, None)
                .or(Err(CandelaError::COULD_NOT_CREATE_IMAGE))?;

            let reqs = self.dev.get_image_memory_requirements(image);
            let alloc = vk::MemoryAllocateInfo::builder()
                .allocation_size(reqs.size)
                .memory_type_index(self.find_memory_type_index(&reqs, props)?);
            let memory = self
                .dev
                .allocate_memory(&alloc, None)
                .or(Err(CandelaError::OUT_OF_MEMORY))?;
            self.dev
                .bind_image_memory(image, memory, 0)
                .or(Err(CandelaError::COULD_NOT_CREATE_IMAGE))?;

            let view_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: aspect,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view = self
                .dev
                .create_image_view(&view_info, None)
                .or(Err(CandelaError::COULD_NOT_CREATE_IMAGE))?;

            Ok((image, view, memory))
        }
    }

    /// One linear sampler shared by the font atlas and user textures
    pub(crate) fn create_sampler(&self) -> vk::Sampler {
        let info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK);

        unsafe { self.dev.create_sampler(&info, None).unwrap() }
    }

    /// Record and submit a one-shot command buffer, waiting on its
    /// fence before returning. This is what the staging copies in
    /// Stream upload/readback ride on. Blocks on the queue, keep it
    /// off the per-frame hot path.
    pub(crate) fn one_shot<F: FnOnce(vk::CommandBuffer)>(&self, record: F) -> Result<()> {
        unsafe {
            self.dev
                .reset_command_buffer(self.copy_cbuf, vk::CommandBufferResetFlags::empty())
                .or(Err(CandelaError::INVALID))?;

            let begin = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.dev
                .begin_command_buffer(self.copy_cbuf, &begin)
                .or(Err(CandelaError::INVALID))?;

            record(self.copy_cbuf);

            self.dev
                .end_command_buffer(self.copy_cbuf)
                .or(Err(CandelaError::INVALID))?;

            let cbufs = [self.copy_cbuf];
            let submit = vk::SubmitInfo::builder().command_buffers(&cbufs).build();
            match self.dev.queue_submit(self.queue, &[submit], self.copy_fence) {
                Ok(()) => {}
                Err(vk::Result::ERROR_DEVICE_LOST) => return Err(CandelaError::DEVICE_LOST),
                Err(res) => {
                    log::error!("{}", crate::vk_fatal_msg("one-shot submit failed", res));
                    return Err(CandelaError::SUBMIT_FAILED);
                }
            }
            self.dev
                .wait_for_fences(&[self.copy_fence], true, u64::MAX)
                .or(Err(CandelaError::TIMEOUT))?;
            self.dev
                .reset_fences(&[self.copy_fence])
                .or(Err(CandelaError::INVALID))?;
        }
        Ok(())
    }

    /// Insert a layout transition barrier for `image`
    pub(crate) fn transition_image_layout(
        &self,
        cbuf: vk::CommandBuffer,
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
    ) {
        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .build();

        unsafe {
            self.dev.cmd_pipeline_barrier(
                cbuf,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    /// Upload `pixels` into `image`, leaving it in SHADER_READ_ONLY
    pub(crate) fn upload_image_pixels(
        &self,
        image: vk::Image,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<()> {
        let (staging, staging_mem) = self.create_buffer_with_size(
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            pixels.len() as u64,
        )?;
        self.update_memory(staging_mem, 0, pixels)?;

        let ret = self.one_shot(|cbuf| {
            self.transition_image_layout(
                cbuf,
                image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::AccessFlags::empty(),
                vk::AccessFlags::TRANSFER_WRITE,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
            );

            let region = vk::BufferImageCopy::builder()
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_extent(vk::Extent3D {
                    width: width,
                    height: height,
                    depth: 1,
                })
                .build();
            unsafe {
                self.dev.cmd_copy_buffer_to_image(
                    cbuf,
                    staging,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }

            self.transition_image_layout(
                cbuf,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::SHADER_READ,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
            );
        });

        unsafe {
            self.dev.destroy_buffer(staging, None);
            self.dev.free_memory(staging_mem, None);
        }

        ret
    }

    /// Best-effort wait for the device to go idle
    pub(crate) fn wait_idle(&self) {
        unsafe {
            if let Err(res) = self.dev.device_wait_idle() {
                log::error!("device_wait_idle failed: {:?}", res);
            }
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            self.wait_idle();
            self.dev.destroy_fence(self.copy_fence, None);
            self.dev.destroy_command_pool(self.copy_pool, None);
            self.dev.destroy_device(None);
        }
    }
}
