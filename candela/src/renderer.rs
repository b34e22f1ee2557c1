// The Vulkan renderer
//
// This layer is very low, and as a result is mostly unsafe. Nothing
// unsafe/vulkan/ash/etc should be exposed to upper layers.
//
// One VulkanRenderer owns every device object: swapchain, pipelines,
// descriptor pools, the per-frame ring, and the handle tables that
// streams/textures/pipelines index into. On device loss the whole
// state block is dropped and rebuilt from the retained CreateInfo.

use ash::vk;

extern crate utils as lantern_utils;
use crate::backend::{BindingTracker, RendererBackend, MAX_SSBO_SLOTS};
use crate::compute::ComputeCtx;
use crate::descpool::{self, DescPool};
use crate::device::Device;
use crate::display::Display;
use crate::instance::Instance;
use crate::list::{
    GpuInstanceData, PushStage, RenderCommand, RenderCommandList, INSTANCE_DATA_SIZE,
    LEGACY_UI_PIPELINE,
};
use crate::pipeline::{
    self, PipelineLayoutKind, PipelineLayouts, TextureFormat, VertexInputKind, QUAD_DATA,
    QUAD_INDICES,
};
use crate::stream::BufferHandle;
use crate::{CandelaError, CreateInfo, Result};
use lantern_utils::log;

use std::sync::Arc;

/// Number of frames in flight
pub(crate) const FRAME_RING_SIZE: usize = 2;

/// Screenshot paths are capped at this many bytes
const SCREENSHOT_PATH_MAX: usize = 256;

/// Starting capacity of the per-frame instance SSBO, in elements
const INSTANCE_FLOOR: usize = 16;

/// Frame clear color
const CLEAR_COLOR: [f32; 4] = [0.1, 0.1, 0.12, 1.0];

/// One GPU buffer in the backend's table
pub(crate) struct BufferVk {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: u64,
    pub host_visible: bool,
    pub mapped: Option<*mut u8>,
}

/// One texture in the backend's table
pub(crate) struct TextureVk {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub memory: vk::DeviceMemory,
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
    pub layout: vk::ImageLayout,
    /// Lazily allocated sampler descriptor, freed with the texture
    pub desc: Option<(usize, vk::DescriptorSet)>,
    /// Lazily allocated storage-image descriptor for compute writes
    pub storage_desc: Option<(usize, vk::DescriptorSet)>,
}

/// Dynamic per-frame resources, indexed by the frame cursor
pub(crate) struct FrameResources {
    pub fence: vk::Fence,
    /// Pool for ephemeral draw-call descriptor sets; reset at frame
    /// start, which invalidates everything allocated from it
    pub frame_pool: vk::DescriptorPool,
    /// The dynamic instance SSBO and its persistent mapping
    pub inst_buf: vk::Buffer,
    pub inst_mem: vk::DeviceMemory,
    pub inst_mapped: *mut u8,
    pub inst_capacity: usize,
    /// Long-lived Set 1 descriptor pointing at inst_buf
    pub inst_desc: (usize, vk::DescriptorSet),
}

/// All device-owned state. Dropped wholesale on device loss and at
/// shutdown; the Drop impl runs the reverse-of-creation teardown.
pub(crate) struct RendererState {
    pub inst: Arc<Instance>,
    pub dev: Device,
    pub display: Display,
    pub layouts: PipelineLayouts,
    pub pass: vk::RenderPass,

    pub depth_image: vk::Image,
    pub depth_view: vk::ImageView,
    pub depth_mem: vk::DeviceMemory,
    pub framebuffers: Vec<vk::Framebuffer>,

    /// Built-in pipelines: instanced quads and the legacy 9-float path
    pub default_pipeline: vk::Pipeline,
    pub legacy_pipeline: vk::Pipeline,
    /// Caller-created pipelines, 1-based handles
    pub graphics_pipes: Vec<Option<(vk::Pipeline, PipelineLayoutKind)>>,

    pub desc_pool: DescPool,
    pub sampler: vk::Sampler,

    /// Font atlas GPU objects + its Set 0 descriptor
    pub font_image: vk::Image,
    pub font_view: vk::ImageView,
    pub font_mem: vk::DeviceMemory,
    pub font_desc: (usize, vk::DescriptorSet),

    /// Fallback 1x1 texture for the user-texture set and the compute
    /// target before the app binds anything
    pub default_texture: u32,
    /// Which texture Set 2 samples / compute writes
    pub user_texture: u32,

    /// Unit quad geometry shared by all instanced draws
    pub quad_vbuf: vk::Buffer,
    pub quad_vmem: vk::DeviceMemory,
    pub quad_ibuf: vk::Buffer,
    pub quad_imem: vk::DeviceMemory,

    pub cmd_pool: vk::CommandPool,
    /// One command buffer per frame cursor
    pub cbufs: Vec<vk::CommandBuffer>,
    pub img_avail_sema: vk::Semaphore,
    pub render_done_sema: vk::Semaphore,

    pub frames: Vec<FrameResources>,
    /// For each swapchain image, the frame cursor that last submitted
    /// against it. That frame's fence gates reuse of the image.
    pub images_inflight: Vec<Option<usize>>,

    pub compute: ComputeCtx,

    /// Caller-created buffers, 1-based handles
    pub buffers: Vec<Option<BufferVk>>,
    /// Caller-created textures, 1-based handles
    pub textures: Vec<Option<TextureVk>>,
}

// The mapped instance pointers make this !Send by default. The
// renderer lives on the render thread only; the pointers are never
// shared.
unsafe impl Send for RendererState {}

pub struct VulkanRenderer {
    pub(crate) state: RendererState,
    /// Retained so device-loss recovery can re-run the init sequence
    info: CreateInfo,

    /// Instance records staged for the next frame. Copied into the
    /// frame cursor's SSBO after its fence wait, and re-uploaded
    /// after device-loss recovery.
    pending_instances: Vec<GpuInstanceData>,

    /// Set 1 bindings latched outside a command list; consumed as the
    /// starting state of the next submit's binding walk
    graphics_tracker: BindingTracker,

    current_frame_cursor: usize,
    screenshot_pending: bool,
    screenshot_path: String,
}

impl RendererState {
    /// Run the full init sequence: instance, surface, device,
    /// swapchain, render pass, pipelines, font texture, per-frame
    /// ring. Used at startup and again for device-loss recovery.
    pub fn new(info: &CreateInfo) -> Result<Self> {
        let instance = Arc::new(Instance::new(info));
        let (surface_loader, surface) =
            Display::create_surface(&instance, info.window_system.as_ref())?;
        let dev = Device::new(instance.clone(), &surface_loader, surface)?;
        let display = Display::new(
            &instance,
            &dev,
            surface_loader,
            surface,
            info.window_system.as_ref(),
        )?;

        let layouts = PipelineLayouts::new(&dev);
        let pass = pipeline::create_render_pass(&dev, display.d_surface_format.format);

        let (depth_image, depth_view, depth_mem) = dev.create_image(
            &display.d_resolution,
            TextureFormat::D32.as_vk(),
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::ImageTiling::OPTIMAL,
        )?;
        let framebuffers = Self::create_framebuffers(&dev, &display, pass, depth_view);

        let default_pipeline = pipeline::create_graphics_pipeline(
            &dev,
            pass,
            layouts.ui_layout,
            &info.vert_spv,
            &info.frag_spv,
            VertexInputKind::QuadInstanced,
        )?;
        let (legacy_vert, legacy_frag) = if info.legacy_vert_spv.is_empty() {
            (&info.vert_spv, &info.frag_spv)
        } else {
            (&info.legacy_vert_spv, &info.legacy_frag_spv)
        };
        let legacy_pipeline = pipeline::create_graphics_pipeline(
            &dev,
            pass,
            layouts.ui_layout,
            legacy_vert,
            legacy_frag,
            VertexInputKind::LegacyUi,
        )?;

        let mut desc_pool = DescPool::new(&dev.dev);
        let sampler = dev.create_sampler();

        // Font atlas image. An empty atlas still gets a 1x1 white
        // pixel so Set 0 always has something valid bound.
        let (font_w, font_h, font_pixels) = if info.font_pixels.is_empty() {
            (1u32, 1u32, vec![255u8])
        } else {
            (info.font_width, info.font_height, info.font_pixels.clone())
        };
        let (font_image, font_view, font_mem) = dev.create_image(
            &vk::Extent2D {
                width: font_w,
                height: font_h,
            },
            vk::Format::R8_UNORM,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            vk::ImageAspectFlags::COLOR,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::ImageTiling::OPTIMAL,
        )?;
        dev.upload_image_pixels(font_image, font_w, font_h, &font_pixels)?;

        let font_desc = desc_pool.alloc_set(&dev.dev, layouts.sampler_layout);
        Self::write_sampler_desc(
            &dev,
            font_desc.1,
            sampler,
            font_view,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );

        // Unit quad vertex/index buffers
        let (quad_vbuf, quad_vmem) = dev.create_buffer_with_size(
            vk::BufferUsageFlags::VERTEX_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            (std::mem::size_of_val(&QUAD_DATA)) as u64,
        )?;
        dev.update_memory(quad_vmem, 0, &QUAD_DATA)?;
        let (quad_ibuf, quad_imem) = dev.create_buffer_with_size(
            vk::BufferUsageFlags::INDEX_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            (std::mem::size_of_val(&QUAD_INDICES)) as u64,
        )?;
        dev.update_memory(quad_imem, 0, &QUAD_INDICES)?;

        let cmd_pool = dev.create_command_pool(dev.graphics_family);
        let cbufs = dev.create_command_buffers(cmd_pool, FRAME_RING_SIZE as u32);

        let sema_info = vk::SemaphoreCreateInfo::default();
        let (img_avail_sema, render_done_sema) = unsafe {
            (
                dev.dev
                    .create_semaphore(&sema_info, None)
                    .or(Err(CandelaError::INVALID))?,
                dev.dev
                    .create_semaphore(&sema_info, None)
                    .or(Err(CandelaError::INVALID))?,
            )
        };

        let mut frames = Vec::with_capacity(FRAME_RING_SIZE);
        for _ in 0..FRAME_RING_SIZE {
            frames.push(Self::create_frame_resources(&dev, &layouts, &mut desc_pool)?);
        }

        let images_inflight = vec![None; display.d_images.len()];
        let compute = ComputeCtx::new(&dev, &layouts, &mut desc_pool)?;

        let mut state = Self {
            inst: instance,
            dev: dev,
            display: display,
            layouts: layouts,
            pass: pass,
            depth_image: depth_image,
            depth_view: depth_view,
            depth_mem: depth_mem,
            framebuffers: framebuffers,
            default_pipeline: default_pipeline,
            legacy_pipeline: legacy_pipeline,
            graphics_pipes: Vec::new(),
            desc_pool: desc_pool,
            sampler: sampler,
            font_image: font_image,
            font_view: font_view,
            font_mem: font_mem,
            font_desc: font_desc,
            default_texture: 0,
            user_texture: 0,
            quad_vbuf: quad_vbuf,
            quad_vmem: quad_vmem,
            quad_ibuf: quad_ibuf,
            quad_imem: quad_imem,
            cmd_pool: cmd_pool,
            cbufs: cbufs,
            img_avail_sema: img_avail_sema,
            render_done_sema: render_done_sema,
            frames: frames,
            images_inflight: images_inflight,
            compute: compute,
            buffers: Vec::new(),
            textures: Vec::new(),
        };

        // The fallback user texture doubles as the default compute
        // target, so it needs storage usage
        state.default_texture = state.texture_create_internal(1, 1, TextureFormat::Rgba8)?;
        state.user_texture = state.default_texture;

        Ok(state)
    }

    pub(crate) fn write_sampler_desc(
        dev: &Device,
        set: vk::DescriptorSet,
        sampler: vk::Sampler,
        view: vk::ImageView,
        layout: vk::ImageLayout,
    ) {
        let info = [vk::DescriptorImageInfo::builder()
            .sampler(sampler)
            .image_view(view)
            .image_layout(layout)
            .build()];
        let write = [vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&info)
            .build()];
        unsafe { dev.dev.update_descriptor_sets(&write, &[]) };
    }

    fn create_framebuffers(
        dev: &Device,
        display: &Display,
        pass: vk::RenderPass,
        depth_view: vk::ImageView,
    ) -> Vec<vk::Framebuffer> {
        display
            .d_views
            .iter()
            .map(|&view| {
                let attachments = [view, depth_view];
                let info = vk::FramebufferCreateInfo::builder()
                    .render_pass(pass)
                    .attachments(&attachments)
                    .width(display.d_resolution.width)
                    .height(display.d_resolution.height)
                    .layers(1);
                unsafe { dev.dev.create_framebuffer(&info, None).unwrap() }
            })
            .collect()
    }

    fn create_frame_resources(
        dev: &Device,
        layouts: &PipelineLayouts,
        desc_pool: &mut DescPool,
    ) -> Result<FrameResources> {
        let fence = unsafe {
            dev.dev
                .create_fence(
                    &vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED),
                    None,
                )
                .or(Err(CandelaError::INVALID))?
        };
        let frame_pool = descpool::create_frame_pool(&dev.dev);

        let capacity = INSTANCE_FLOOR * INSTANCE_DATA_SIZE;
        let (inst_buf, inst_mem) = dev.create_buffer_with_size(
            vk::BufferUsageFlags::STORAGE_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            capacity as u64,
        )?;
        let inst_mapped = unsafe {
            dev.dev
                .map_memory(inst_mem, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                .or(Err(CandelaError::OUT_OF_MEMORY))? as *mut u8
        };

        let inst_desc = desc_pool.alloc_set(&dev.dev, layouts.ssbo_layout);
        Self::write_ssbo_desc(dev, inst_desc.1, &[inst_buf; MAX_SSBO_SLOTS]);

        Ok(FrameResources {
            fence: fence,
            frame_pool: frame_pool,
            inst_buf: inst_buf,
            inst_mem: inst_mem,
            inst_mapped: inst_mapped,
            inst_capacity: capacity,
            inst_desc: inst_desc,
        })
    }

    /// Point all of a Set 1 descriptor's slots at the given buffers
    pub(crate) fn write_ssbo_desc(dev: &Device, set: vk::DescriptorSet, buffers: &[vk::Buffer]) {
        let mut infos = Vec::with_capacity(MAX_SSBO_SLOTS);
        for i in 0..MAX_SSBO_SLOTS {
            infos.push(
                [vk::DescriptorBufferInfo::builder()
                    .buffer(buffers[i])
                    .offset(0)
                    .range(vk::WHOLE_SIZE)
                    .build()],
            );
        }
        let writes: Vec<vk::WriteDescriptorSet> = (0..MAX_SSBO_SLOTS)
            .map(|i| {
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(i as u32)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(&infos[i])
                    .build()
            })
            .collect();
        unsafe { dev.dev.update_descriptor_sets(&writes, &[]) };
    }

    /// Resolve a buffer handle into the vk buffer, if it is live
    pub(crate) fn lookup_buffer(&self, handle: BufferHandle) -> Option<&BufferVk> {
        if handle == 0 {
            return None;
        }
        self.buffers.get(handle as usize - 1)?.as_ref()
    }

    /// Grow a frame's instance SSBO until it holds `bytes`. Only
    /// called after that frame's fence has been waited on.
    fn ensure_instance_capacity(&mut self, cursor: usize, bytes: usize) -> Result<()> {
        if self.frames[cursor].inst_capacity >= bytes {
            return Ok(());
        }

        let mut new_capacity = self.frames[cursor].inst_capacity;
        while new_capacity < bytes {
            new_capacity *= 2;
        }

        unsafe {
            let frame = &mut self.frames[cursor];
            self.dev.dev.unmap_memory(frame.inst_mem);
            self.dev.dev.destroy_buffer(frame.inst_buf, None);
            self.dev.dev.free_memory(frame.inst_mem, None);

            let (buf, mem) = self.dev.create_buffer_with_size(
                vk::BufferUsageFlags::STORAGE_BUFFER,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                new_capacity as u64,
            )?;
            frame.inst_buf = buf;
            frame.inst_mem = mem;
            frame.inst_capacity = new_capacity;
            frame.inst_mapped = self
                .dev
                .dev
                .map_memory(mem, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                .or(Err(CandelaError::OUT_OF_MEMORY))? as *mut u8;

            Self::write_ssbo_desc(&self.dev, frame.inst_desc.1, &[buf; MAX_SSBO_SLOTS]);
        }
        Ok(())
    }

    /// Recreate everything that depends on the swapchain
    fn handle_out_of_date(&mut self, window_system: &dyn crate::WindowSystem) -> Result<()> {
        self.display.recreate_swapchain(&self.dev, window_system)?;

        unsafe {
            for fb in self.framebuffers.drain(..) {
                self.dev.dev.destroy_framebuffer(fb, None);
            }
            self.dev.dev.destroy_image_view(self.depth_view, None);
            self.dev.dev.destroy_image(self.depth_image, None);
            self.dev.dev.free_memory(self.depth_mem, None);
        }

        let (depth_image, depth_view, depth_mem) = self.dev.create_image(
            &self.display.d_resolution,
            TextureFormat::D32.as_vk(),
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::ImageTiling::OPTIMAL,
        )?;
        self.depth_image = depth_image;
        self.depth_view = depth_view;
        self.depth_mem = depth_mem;
        self.framebuffers =
            Self::create_framebuffers(&self.dev, &self.display, self.pass, depth_view);
        self.images_inflight = vec![None; self.display.d_images.len()];
        Ok(())
    }

    pub(crate) fn texture_create_internal(
        &mut self,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Result<u32> {
        let (usage, aspect) = match format {
            TextureFormat::D32 => (
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
                vk::ImageAspectFlags::DEPTH,
            ),
            _ => (
                vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::STORAGE
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::COLOR_ATTACHMENT,
                vk::ImageAspectFlags::COLOR,
            ),
        };

        let (image, view, memory) = self.dev.create_image(
            &vk::Extent2D {
                width: width,
                height: height,
            },
            format.as_vk(),
            usage,
            aspect,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::ImageTiling::OPTIMAL,
        )?;

        let tex = TextureVk {
            image: image,
            view: view,
            memory: memory,
            format: format,
            width: width,
            height: height,
            layout: vk::ImageLayout::UNDEFINED,
            desc: None,
            storage_desc: None,
        };

        // reuse a free slot if one exists
        for (i, slot) in self.textures.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(tex);
                return Ok(i as u32 + 1);
            }
        }
        self.textures.push(Some(tex));
        Ok(self.textures.len() as u32)
    }

    /// Get (allocating if needed) the sampler descriptor for a
    /// texture, transitioning it to GENERAL so compute output can be
    /// sampled without extra tracking.
    pub(crate) fn texture_descriptor(&mut self, id: u32) -> Result<vk::DescriptorSet> {
        if id == 0 || id as usize > self.textures.len() {
            return Err(CandelaError::INVALID);
        }

        // Transition first so we don't hold a &mut across it
        let needs_transition = {
            let tex = self.textures[id as usize - 1]
                .as_ref()
                .ok_or(CandelaError::INVALID)?;
            tex.layout != vk::ImageLayout::GENERAL
        };
        if needs_transition {
            let image = self.textures[id as usize - 1].as_ref().unwrap().image;
            let old_layout = self.textures[id as usize - 1].as_ref().unwrap().layout;
            self.dev.one_shot(|cbuf| {
                self.dev.transition_image_layout(
                    cbuf,
                    image,
                    old_layout,
                    vk::ImageLayout::GENERAL,
                    vk::AccessFlags::empty(),
                    vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::ALL_COMMANDS,
                );
            })?;
            self.textures[id as usize - 1].as_mut().unwrap().layout = vk::ImageLayout::GENERAL;
        }

        let needs_alloc = self.textures[id as usize - 1].as_ref().unwrap().desc.is_none();
        if needs_alloc {
            let set = self
                .desc_pool
                .alloc_set(&self.dev.dev, self.layouts.user_texture_layout);
            let view = self.textures[id as usize - 1].as_ref().unwrap().view;
            Self::write_sampler_desc(
                &self.dev,
                set.1,
                self.sampler,
                view,
                vk::ImageLayout::GENERAL,
            );
            self.textures[id as usize - 1].as_mut().unwrap().desc = Some(set);
        }

        Ok(self.textures[id as usize - 1].as_ref().unwrap().desc.unwrap().1)
    }
}

impl Drop for RendererState {
    fn drop(&mut self) {
        // reverse of creation. The Device and Instance fields drop
        // after this body runs.
        self.dev.wait_idle();
        unsafe {
            let d = &self.dev.dev;

            self.compute.destroy(&self.dev, &mut self.desc_pool);

            for tex in self.textures.drain(..).flatten() {
                if let Some((pool, set)) = tex.desc {
                    self.desc_pool.free_set(d, pool, set);
                }
                if let Some((pool, set)) = tex.storage_desc {
                    self.desc_pool.free_set(d, pool, set);
                }
                d.destroy_image_view(tex.view, None);
                d.destroy_image(tex.image, None);
                d.free_memory(tex.memory, None);
            }
            for buf in self.buffers.drain(..).flatten() {
                d.destroy_buffer(buf.buffer, None);
                d.free_memory(buf.memory, None);
            }

            for frame in self.frames.drain(..) {
                d.destroy_fence(frame.fence, None);
                d.destroy_descriptor_pool(frame.frame_pool, None);
                d.unmap_memory(frame.inst_mem);
                d.destroy_buffer(frame.inst_buf, None);
                d.free_memory(frame.inst_mem, None);
            }

            d.destroy_semaphore(self.img_avail_sema, None);
            d.destroy_semaphore(self.render_done_sema, None);
            d.destroy_command_pool(self.cmd_pool, None);

            d.destroy_buffer(self.quad_vbuf, None);
            d.free_memory(self.quad_vmem, None);
            d.destroy_buffer(self.quad_ibuf, None);
            d.free_memory(self.quad_imem, None);

            d.destroy_image_view(self.font_view, None);
            d.destroy_image(self.font_image, None);
            d.free_memory(self.font_mem, None);
            d.destroy_sampler(self.sampler, None);

            for pipe in self.graphics_pipes.drain(..).flatten() {
                d.destroy_pipeline(pipe.0, None);
            }
            d.destroy_pipeline(self.default_pipeline, None);
            d.destroy_pipeline(self.legacy_pipeline, None);

            for fb in self.framebuffers.drain(..) {
                d.destroy_framebuffer(fb, None);
            }
            d.destroy_image_view(self.depth_view, None);
            d.destroy_image(self.depth_image, None);
            d.free_memory(self.depth_mem, None);

            self.desc_pool.destroy(d);
            d.destroy_render_pass(self.pass, None);
        }
        self.layouts.destroy(&self.dev);
        self.display.destroy(&self.dev);
    }
}

impl VulkanRenderer {
    /// Create a new Vulkan renderer.
    ///
    /// This runs the entire init sequence described by the backend
    /// contract: instance, surface, device, swapchain, render pass,
    /// default pipelines, font texture and the per-frame ring.
    pub fn new(info: CreateInfo) -> Result<Self> {
        let state = RendererState::new(&info)?;
        Ok(Self {
            state: state,
            info: info,
            pending_instances: Vec::new(),
            graphics_tracker: BindingTracker::new(),
            current_frame_cursor: 0,
            screenshot_pending: false,
            screenshot_path: String::new(),
        })
    }

    pub fn resolution(&self) -> (u32, u32) {
        (
            self.state.display.d_resolution.width,
            self.state.display.d_resolution.height,
        )
    }

    /// Tear down and fully re-initialize after VK_ERROR_DEVICE_LOST.
    ///
    /// Caller-created buffers/textures/pipelines die with the old
    /// device; their handles become invalid and the owning layers
    /// must recreate them. The staged instance data survives so the
    /// UI shows up again on the next frame.
    fn recover_device(&mut self) -> Result<()> {
        log::error!("Vulkan device lost, attempting recovery");
        self.state.dev.wait_idle();

        let new_state = match RendererState::new(&self.info) {
            Ok(s) => s,
            Err(e) => {
                log::error!("Device-loss recovery failed: {}", e);
                return Err(CandelaError::RECOVERY_FAILED);
            }
        };
        // old state tears down here, in reverse creation order
        self.state = new_state;
        self.current_frame_cursor = 0;
        log::error!("Vulkan device recovered");
        Ok(())
    }

    /// Map a push stage bitset onto vk flags
    fn push_stages(stages: PushStage) -> vk::ShaderStageFlags {
        let mut out = vk::ShaderStageFlags::empty();
        if stages.contains(PushStage::VERTEX) {
            out |= vk::ShaderStageFlags::VERTEX;
        }
        if stages.contains(PushStage::FRAGMENT) {
            out |= vk::ShaderStageFlags::FRAGMENT;
        }
        if stages.contains(PushStage::COMPUTE) {
            out |= vk::ShaderStageFlags::COMPUTE;
        }
        out
    }

    /// Record and submit one frame. See the frame submission
    /// contract: fence wait, acquire, pool reset, record, submit,
    /// optional screenshot readback, present, cursor advance.
    fn submit_commands_internal(&mut self, list: &RenderCommandList) -> Result<()> {
        let cursor = self.current_frame_cursor;
        let dev_handle = self.state.dev.dev.clone();

        unsafe {
            dev_handle
                .wait_for_fences(&[self.state.frames[cursor].fence], true, u64::MAX)
                .or(Err(CandelaError::TIMEOUT))?;
        }

        // 1. acquire
        let image_index = match self.state.display.acquire_next_image(self.state.img_avail_sema)
        {
            Ok(idx) => idx,
            Err(CandelaError::OUT_OF_DATE) => {
                let ws = self.info.window_system.clone();
                self.state.handle_out_of_date(ws.as_ref())?;
                return Ok(());
            }
            Err(CandelaError::DEVICE_LOST) => return self.recover_device(),
            Err(e) => return Err(e),
        };

        // before reusing this image, wait out the frame that last
        // submitted against it
        if let Some(prev) = self.state.images_inflight[image_index as usize] {
            if prev != cursor {
                unsafe {
                    dev_handle
                        .wait_for_fences(&[self.state.frames[prev].fence], true, u64::MAX)
                        .or(Err(CandelaError::TIMEOUT))?;
                }
            }
        }
        self.state.images_inflight[image_index as usize] = Some(cursor);

        unsafe {
            dev_handle
                .reset_fences(&[self.state.frames[cursor].fence])
                .or(Err(CandelaError::INVALID))?;

            // 2. reset this frame's ephemeral descriptor pool
            dev_handle
                .reset_descriptor_pool(
                    self.state.frames[cursor].frame_pool,
                    vk::DescriptorPoolResetFlags::empty(),
                )
                .or(Err(CandelaError::INVALID))?;
        }

        // stage this frame's instances into the ring
        let inst_bytes = self.pending_instances.len() * INSTANCE_DATA_SIZE;
        if inst_bytes > 0 {
            self.state.ensure_instance_capacity(cursor, inst_bytes)?;
            unsafe {
                std::ptr::copy_nonoverlapping(
                    GpuInstanceData::as_bytes(&self.pending_instances).as_ptr(),
                    self.state.frames[cursor].inst_mapped,
                    inst_bytes,
                );
            }
        }

        // 3. record
        let cbuf = self.state.cbufs[cursor];
        let extent = self.state.display.d_resolution;
        unsafe {
            dev_handle
                .reset_command_buffer(cbuf, vk::CommandBufferResetFlags::empty())
                .or(Err(CandelaError::INVALID))?;
            dev_handle
                .begin_command_buffer(cbuf, &vk::CommandBufferBeginInfo::default())
                .or(Err(CandelaError::INVALID))?;

            let clear_vals = [
                vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: CLEAR_COLOR,
                    },
                },
                vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: 1.0,
                        stencil: 0,
                    },
                },
            ];
            let pass_info = vk::RenderPassBeginInfo::builder()
                .render_pass(self.state.pass)
                .framebuffer(self.state.framebuffers[image_index as usize])
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: extent,
                })
                .clear_values(&clear_vals);
            dev_handle.cmd_begin_render_pass(cbuf, &pass_info, vk::SubpassContents::INLINE);

            dev_handle.cmd_set_viewport(
                cbuf,
                0,
                &[vk::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width: extent.width as f32,
                    height: extent.height as f32,
                    min_depth: 0.0,
                    max_depth: 1.0,
                }],
            );
            dev_handle.cmd_set_scissor(
                cbuf,
                0,
                &[vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: extent,
                }],
            );

            // defaults: quad geometry, default pipeline, global sets
            dev_handle.cmd_bind_vertex_buffers(cbuf, 0, &[self.state.quad_vbuf], &[0]);
            dev_handle.cmd_bind_index_buffer(cbuf, self.state.quad_ibuf, 0, vk::IndexType::UINT32);
            dev_handle.cmd_bind_pipeline(
                cbuf,
                vk::PipelineBindPoint::GRAPHICS,
                self.state.default_pipeline,
            );
        }

        let user_tex = self.state.user_texture;
        let user_desc = self.state.texture_descriptor(user_tex)?;
        let mut current_layout = self.state.layouts.ui_layout;
        unsafe {
            dev_handle.cmd_bind_descriptor_sets(
                cbuf,
                vk::PipelineBindPoint::GRAPHICS,
                current_layout,
                0,
                &[self.state.font_desc.1],
                &[],
            );
            dev_handle.cmd_bind_descriptor_sets(
                cbuf,
                vk::PipelineBindPoint::GRAPHICS,
                current_layout,
                2,
                &[user_desc],
                &[],
            );
            dev_handle.cmd_bind_descriptor_sets(
                cbuf,
                vk::PipelineBindPoint::GRAPHICS,
                current_layout,
                1,
                &[self.state.frames[cursor].inst_desc.1],
                &[],
            );
        }

        // 4. walk the command list in order, starting from any
        // bindings latched through graphics_bind_buffer
        let mut tracker = std::mem::replace(&mut self.graphics_tracker, BindingTracker::new());
        for cmd in list.iter() {
            match cmd {
                RenderCommand::BindPipeline { id } => unsafe {
                    let (pipe, layout_kind) = match *id {
                        0 => (self.state.default_pipeline, PipelineLayoutKind::Ui),
                        LEGACY_UI_PIPELINE => {
                            (self.state.legacy_pipeline, PipelineLayoutKind::Ui)
                        }
                        id => {
                            match self
                                .state
                                .graphics_pipes
                                .get(id as usize - 1)
                                .and_then(|p| *p)
                            {
                                Some(p) => p,
                                None => {
                                    log::error!("BindPipeline: unknown pipeline {}", id);
                                    continue;
                                }
                            }
                        }
                    };
                    dev_handle.cmd_bind_pipeline(cbuf, vk::PipelineBindPoint::GRAPHICS, pipe);
                    current_layout = self.state.layouts.pipeline_layout(layout_kind);

                    // rebind global sets, the new layout may differ
                    dev_handle.cmd_bind_descriptor_sets(
                        cbuf,
                        vk::PipelineBindPoint::GRAPHICS,
                        current_layout,
                        0,
                        &[self.state.font_desc.1],
                        &[],
                    );
                    if layout_kind == PipelineLayoutKind::Ui {
                        dev_handle.cmd_bind_descriptor_sets(
                            cbuf,
                            vk::PipelineBindPoint::GRAPHICS,
                            current_layout,
                            2,
                            &[user_desc],
                            &[],
                        );
                    }
                    dev_handle.cmd_bind_descriptor_sets(
                        cbuf,
                        vk::PipelineBindPoint::GRAPHICS,
                        current_layout,
                        1,
                        &[self.state.frames[cursor].inst_desc.1],
                        &[],
                    );
                },
                RenderCommand::BindSsbo { slot, buffer } => {
                    tracker.bind(*slot, *buffer);
                }
                RenderCommand::BindVertexBuffer { buffer } => unsafe {
                    if let Some(buf) = self.state.lookup_buffer(*buffer) {
                        dev_handle.cmd_bind_vertex_buffers(cbuf, 0, &[buf.buffer], &[0]);
                    }
                },
                RenderCommand::BindIndexBuffer { buffer } => unsafe {
                    if let Some(buf) = self.state.lookup_buffer(*buffer) {
                        dev_handle.cmd_bind_index_buffer(
                            cbuf,
                            buf.buffer,
                            0,
                            vk::IndexType::UINT32,
                        );
                    }
                },
                RenderCommand::PushConstants { stages, data } => unsafe {
                    dev_handle.cmd_push_constants(
                        cbuf,
                        current_layout,
                        Self::push_stages(*stages),
                        0,
                        data,
                    );
                },
                RenderCommand::SetViewport {
                    x,
                    y,
                    w,
                    h,
                    min_depth,
                    max_depth,
                } => unsafe {
                    dev_handle.cmd_set_viewport(
                        cbuf,
                        0,
                        &[vk::Viewport {
                            x: *x,
                            y: *y,
                            width: *w,
                            height: *h,
                            min_depth: *min_depth,
                            max_depth: *max_depth,
                        }],
                    );
                },
                RenderCommand::SetScissor { x, y, w, h } => unsafe {
                    dev_handle.cmd_set_scissor(
                        cbuf,
                        0,
                        &[vk::Rect2D {
                            offset: vk::Offset2D { x: *x, y: *y },
                            extent: vk::Extent2D {
                                width: *w,
                                height: *h,
                            },
                        }],
                    );
                },
                RenderCommand::Draw { .. } | RenderCommand::DrawIndexed { .. } => {
                    if let Some(slots) = tracker.take_for_draw() {
                        self.bind_frame_descriptors(cbuf, cursor, current_layout, &slots)?;
                    }
                    unsafe {
                        match cmd {
                            RenderCommand::Draw {
                                vertex_count,
                                instance_count,
                                first_vertex,
                                first_instance,
                            } => dev_handle.cmd_draw(
                                cbuf,
                                *vertex_count,
                                *instance_count,
                                *first_vertex,
                                *first_instance,
                            ),
                            RenderCommand::DrawIndexed {
                                index_count,
                                instance_count,
                                first_index,
                                vertex_offset,
                                first_instance,
                            } => dev_handle.cmd_draw_indexed(
                                cbuf,
                                *index_count,
                                *instance_count,
                                *first_index,
                                *vertex_offset,
                                *first_instance,
                            ),
                            _ => unreachable!(),
                        }
                    }
                }
            }
        }

        unsafe {
            dev_handle.cmd_end_render_pass(cbuf);
        }

        // 5. screenshot readback, recorded after the render pass
        let capturing = self.screenshot_pending;
        let mut screenshot_staging = None;
        if capturing {
            self.screenshot_pending = false;
            screenshot_staging = self.record_screenshot_copy(cbuf, image_index)?;
        }

        unsafe {
            dev_handle
                .end_command_buffer(cbuf)
                .or(Err(CandelaError::INVALID))?;

            // 6. submit
            let waits = [self.state.img_avail_sema];
            let stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
            let cbufs = [cbuf];
            let signals = [self.state.render_done_sema];
            let submit = vk::SubmitInfo::builder()
                .wait_semaphores(&waits)
                .wait_dst_stage_mask(&stages)
                .command_buffers(&cbufs)
                .signal_semaphores(&signals)
                .build();

            match dev_handle.queue_submit(
                self.state.dev.queue,
                &[submit],
                self.state.frames[cursor].fence,
            ) {
                Ok(()) => {}
                Err(vk::Result::ERROR_DEVICE_LOST) => return self.recover_device(),
                Err(res) => {
                    log::error!("{}", crate::vk_fatal_msg("vkQueueSubmit", res));
                    return Err(CandelaError::SUBMIT_FAILED);
                }
            }
        }

        // 7. screenshot CPU side: wait the inflight fence, copy the
        // pixels out, hand them to a detached worker
        if let Some((buf, mem)) = screenshot_staging {
            self.finish_screenshot(cursor, buf, mem)?;
        }

        // 8. present
        match self.state.display.present(
            self.state.dev.queue,
            image_index,
            self.state.render_done_sema,
        ) {
            Ok(()) => {}
            Err(CandelaError::OUT_OF_DATE) => {
                let ws = self.info.window_system.clone();
                self.state.handle_out_of_date(ws.as_ref())?;
            }
            Err(CandelaError::DEVICE_LOST) => return self.recover_device(),
            Err(e) => return Err(e),
        }

        // 9. the submit succeeded, advance the ring
        self.current_frame_cursor = (self.current_frame_cursor + 1) % FRAME_RING_SIZE;
        Ok(())
    }

    /// Allocate a descriptor set from the frame pool for the pending
    /// Set 1 bindings and bind it
    fn bind_frame_descriptors(
        &mut self,
        cbuf: vk::CommandBuffer,
        cursor: usize,
        layout: vk::PipelineLayout,
        slots: &[BufferHandle; MAX_SSBO_SLOTS],
    ) -> Result<()> {
        let layouts = [self.state.layouts.ssbo_layout];
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.state.frames[cursor].frame_pool)
            .set_layouts(&layouts)
            .build();

        let set = match unsafe { self.state.dev.dev.allocate_descriptor_sets(&info) } {
            Ok(sets) => sets[0],
            Err(res) => {
                log::error!("Failed to allocate frame descriptor set: {:?}", res);
                return Err(CandelaError::OUT_OF_MEMORY);
            }
        };

        // resolve handles; anything unresolvable falls back to the
        // frame instance buffer so the fixed layout stays satisfied
        let fallback = self.state.frames[cursor].inst_buf;
        let mut buffers = [fallback; MAX_SSBO_SLOTS];
        for (i, handle) in slots.iter().enumerate() {
            if let Some(buf) = self.state.lookup_buffer(*handle) {
                buffers[i] = buf.buffer;
            }
        }
        RendererState::write_ssbo_desc(&self.state.dev, set, &buffers);

        unsafe {
            self.state.dev.dev.cmd_bind_descriptor_sets(
                cbuf,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                1,
                &[set],
                &[],
            );
        }
        Ok(())
    }
}

impl RendererBackend for VulkanRenderer {
    fn submit_commands(&mut self, list: &RenderCommandList) -> Result<()> {
        self.submit_commands_internal(list)
    }

    fn update_viewport(&mut self, width: u32, height: u32) -> Result<()> {
        log::debug!("update_viewport to {}x{}", width, height);
        let ws = self.info.window_system.clone();
        self.state.handle_out_of_date(ws.as_ref())
    }

    fn request_screenshot(&mut self, path: &str) {
        // overwrite any prior pending request; cap the path without
        // splitting a multi-byte character
        let mut end = lantern_utils::partial_min(SCREENSHOT_PATH_MAX, path.len());
        while !path.is_char_boundary(end) {
            end -= 1;
        }
        self.screenshot_path = path[..end].to_string();
        self.screenshot_pending = true;
    }

    fn frame_set_instances(&mut self, instances: &[GpuInstanceData]) {
        self.pending_instances.clear();
        self.pending_instances.extend_from_slice(instances);
    }

    fn compute_pipeline_create(&mut self, spirv: &[u8], layout_index: usize) -> u32 {
        self.compute_pipeline_create_internal(spirv, layout_index)
    }

    fn compute_pipeline_destroy(&mut self, id: u32) {
        self.compute_pipeline_destroy_internal(id)
    }

    fn compute_dispatch(
        &mut self,
        id: u32,
        group_x: u32,
        group_y: u32,
        group_z: u32,
        push_constants: &[u8],
    ) -> Result<()> {
        self.compute_dispatch_internal(id, group_x, group_y, group_z, push_constants)
    }

    fn compute_wait(&mut self) -> Result<()> {
        self.compute_wait_internal()
    }

    fn compile_shader(&mut self, source: &str, stage: &str) -> Option<Vec<u8>> {
        crate::compute::compile_shader_external(source, stage)
    }

    fn buffer_create(&mut self, total_size: u64, host_visible: bool) -> BufferHandle {
        let props = if host_visible {
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
        } else {
            vk::MemoryPropertyFlags::DEVICE_LOCAL
        };
        // every stream can serve any role
        let usage = vk::BufferUsageFlags::STORAGE_BUFFER
            | vk::BufferUsageFlags::VERTEX_BUFFER
            | vk::BufferUsageFlags::INDEX_BUFFER
            | vk::BufferUsageFlags::TRANSFER_SRC
            | vk::BufferUsageFlags::TRANSFER_DST;

        let (buffer, memory) = match self.state.dev.create_buffer_with_size(usage, props, total_size)
        {
            Ok(pair) => pair,
            Err(e) => {
                log::error!("buffer_create failed: {}", e);
                return 0;
            }
        };

        let entry = BufferVk {
            buffer: buffer,
            memory: memory,
            size: total_size,
            host_visible: host_visible,
            mapped: None,
        };
        for (i, slot) in self.state.buffers.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(entry);
                return i as u32 + 1;
            }
        }
        self.state.buffers.push(Some(entry));
        self.state.buffers.len() as u32
    }

    fn buffer_destroy(&mut self, handle: BufferHandle) {
        if handle == 0 || handle as usize > self.state.buffers.len() {
            return;
        }
        // unbind from any compute/graphics slots so nothing dangles
        self.state.compute.unbind_buffer(handle);
        self.graphics_tracker.unbind(handle);

        if let Some(buf) = self.state.buffers[handle as usize - 1].take() {
            self.state.dev.wait_idle();
            unsafe {
                if buf.mapped.is_some() {
                    self.state.dev.dev.unmap_memory(buf.memory);
                }
                self.state.dev.dev.destroy_buffer(buf.buffer, None);
                self.state.dev.dev.free_memory(buf.memory, None);
            }
        }
    }

    fn buffer_map(&mut self, handle: BufferHandle) -> Result<*mut u8> {
        let dev = self.state.dev.dev.clone();
        let buf = self
            .state
            .buffers
            .get_mut(handle.checked_sub(1).ok_or(CandelaError::INVALID)? as usize)
            .and_then(|b| b.as_mut())
            .ok_or(CandelaError::INVALID)?;
        if !buf.host_visible {
            return Err(CandelaError::INVALID);
        }
        if let Some(ptr) = buf.mapped {
            return Ok(ptr);
        }
        let ptr = unsafe {
            dev.map_memory(buf.memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                .or(Err(CandelaError::OUT_OF_MEMORY))? as *mut u8
        };
        buf.mapped = Some(ptr);
        Ok(ptr)
    }

    fn buffer_unmap(&mut self, handle: BufferHandle) -> Result<()> {
        let dev = self.state.dev.dev.clone();
        let buf = self
            .state
            .buffers
            .get_mut(handle.checked_sub(1).ok_or(CandelaError::INVALID)? as usize)
            .and_then(|b| b.as_mut())
            .ok_or(CandelaError::INVALID)?;
        if buf.mapped.take().is_some() {
            unsafe { dev.unmap_memory(buf.memory) };
        }
        Ok(())
    }

    fn buffer_upload(&mut self, handle: BufferHandle, data: &[u8], offset: u64) -> Result<()> {
        let (target, size, host_visible, memory) = {
            let buf = self
                .state
                .lookup_buffer(handle)
                .ok_or(CandelaError::INVALID)?;
            (buf.buffer, buf.size, buf.host_visible, buf.memory)
        };
        if offset + data.len() as u64 > size {
            return Err(CandelaError::INVALID);
        }

        if host_visible {
            return self.state.dev.update_memory(memory, offset, data);
        }

        // staging + one-shot copy
        let (staging, staging_mem) = self.state.dev.create_buffer_with_size(
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            data.len() as u64,
        )?;
        self.state.dev.update_memory(staging_mem, 0, data)?;

        let ret = self.state.dev.one_shot(|cbuf| {
            let region = vk::BufferCopy::builder()
                .src_offset(0)
                .dst_offset(offset)
                .size(data.len() as u64)
                .build();
            unsafe {
                self.state
                    .dev
                    .dev
                    .cmd_copy_buffer(cbuf, staging, target, &[region]);
            }
        });

        unsafe {
            self.state.dev.dev.destroy_buffer(staging, None);
            self.state.dev.dev.free_memory(staging_mem, None);
        }
        ret
    }

    fn buffer_read(&mut self, handle: BufferHandle, out: &mut [u8], offset: u64) -> Result<()> {
        let (source, size) = {
            let buf = self
                .state
                .lookup_buffer(handle)
                .ok_or(CandelaError::INVALID)?;
            (buf.buffer, buf.size)
        };
        if offset + out.len() as u64 > size {
            return Err(CandelaError::INVALID);
        }

        let (staging, staging_mem) = self.state.dev.create_buffer_with_size(
            vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            out.len() as u64,
        )?;

        let ret = self.state.dev.one_shot(|cbuf| {
            let region = vk::BufferCopy::builder()
                .src_offset(offset)
                .dst_offset(0)
                .size(out.len() as u64)
                .build();
            unsafe {
                self.state
                    .dev
                    .dev
                    .cmd_copy_buffer(cbuf, source, staging, &[region]);
            }
        });

        if ret.is_ok() {
            unsafe {
                let ptr = self
                    .state
                    .dev
                    .dev
                    .map_memory(staging_mem, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                    .or(Err(CandelaError::OUT_OF_MEMORY))?;
                std::ptr::copy_nonoverlapping(ptr as *const u8, out.as_mut_ptr(), out.len());
                self.state.dev.dev.unmap_memory(staging_mem);
            }
        }

        unsafe {
            self.state.dev.dev.destroy_buffer(staging, None);
            self.state.dev.dev.free_memory(staging_mem, None);
        }
        ret
    }

    fn compute_bind_buffer(&mut self, handle: BufferHandle, slot: u32) {
        self.state.compute.bind_buffer(handle, slot);
    }

    fn graphics_bind_buffer(&mut self, handle: BufferHandle, slot: u32) {
        self.graphics_tracker.bind(slot, handle);
    }

    fn graphics_pipeline_create(
        &mut self,
        vert_spv: &[u8],
        frag_spv: &[u8],
        layout_index: usize,
    ) -> u32 {
        let kind = match PipelineLayoutKind::from_index(layout_index) {
            Some(k) => k,
            None => {
                log::error!("graphics_pipeline_create: bad layout index {}", layout_index);
                return 0;
            }
        };
        let vertex_input = match kind {
            PipelineLayoutKind::Ui => VertexInputKind::QuadInstanced,
            PipelineLayoutKind::ZeroCopy => VertexInputKind::None,
        };

        let pipe = match pipeline::create_graphics_pipeline(
            &self.state.dev,
            self.state.pass,
            self.state.layouts.pipeline_layout(kind),
            vert_spv,
            frag_spv,
            vertex_input,
        ) {
            Ok(p) => p,
            Err(e) => {
                log::error!("graphics_pipeline_create failed: {}", e);
                return 0;
            }
        };

        for (i, slot) in self.state.graphics_pipes.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some((pipe, kind));
                return i as u32 + 1;
            }
        }
        self.state.graphics_pipes.push(Some((pipe, kind)));
        self.state.graphics_pipes.len() as u32
    }

    fn graphics_pipeline_destroy(&mut self, id: u32) {
        if id == 0 || id as usize > self.state.graphics_pipes.len() {
            return;
        }
        if let Some((pipe, _)) = self.state.graphics_pipes[id as usize - 1].take() {
            self.state.dev.wait_idle();
            unsafe { self.state.dev.dev.destroy_pipeline(pipe, None) };
        }
    }

    fn texture_create(&mut self, width: u32, height: u32, format: TextureFormat) -> u32 {
        match self.state.texture_create_internal(width, height, format) {
            Ok(id) => id,
            Err(e) => {
                log::error!("texture_create failed: {}", e);
                0
            }
        }
    }

    fn texture_destroy(&mut self, id: u32) {
        if id == 0 || id as usize > self.state.textures.len() {
            return;
        }
        if self.state.user_texture == id {
            self.state.user_texture = self.state.default_texture;
        }
        if let Some(tex) = self.state.textures[id as usize - 1].take() {
            self.state.dev.wait_idle();
            let d = self.state.dev.dev.clone();
            // free the lazily allocated descriptors back to the pool
            if let Some((pool, set)) = tex.desc {
                self.state.desc_pool.free_set(&d, pool, set);
            }
            if let Some((pool, set)) = tex.storage_desc {
                self.state.desc_pool.free_set(&d, pool, set);
            }
            unsafe {
                d.destroy_image_view(tex.view, None);
                d.destroy_image(tex.image, None);
                d.free_memory(tex.memory, None);
            }
        }
    }

    fn texture_resize(&mut self, id: u32, width: u32, height: u32) -> Result<()> {
        if id == 0 || id as usize > self.state.textures.len() {
            return Err(CandelaError::INVALID);
        }
        let format = self.state.textures[id as usize - 1]
            .as_ref()
            .ok_or(CandelaError::INVALID)?
            .format;

        // recreate preserving the slot so existing handles stay valid
        self.state.dev.wait_idle();
        let d = self.state.dev.dev.clone();
        if let Some(tex) = self.state.textures[id as usize - 1].take() {
            if let Some((pool, set)) = tex.desc {
                self.state.desc_pool.free_set(&d, pool, set);
            }
            if let Some((pool, set)) = tex.storage_desc {
                self.state.desc_pool.free_set(&d, pool, set);
            }
            unsafe {
                d.destroy_image_view(tex.view, None);
                d.destroy_image(tex.image, None);
                d.free_memory(tex.memory, None);
            }
        }

        let (usage, aspect) = match format {
            TextureFormat::D32 => (
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
                vk::ImageAspectFlags::DEPTH,
            ),
            _ => (
                vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::STORAGE
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::COLOR_ATTACHMENT,
                vk::ImageAspectFlags::COLOR,
            ),
        };
        let (image, view, memory) = self.state.dev.create_image(
            &vk::Extent2D {
                width: width,
                height: height,
            },
            format.as_vk(),
            usage,
            aspect,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::ImageTiling::OPTIMAL,
        )?;
        self.state.textures[id as usize - 1] = Some(TextureVk {
            image: image,
            view: view,
            memory: memory,
            format: format,
            width: width,
            height: height,
            layout: vk::ImageLayout::UNDEFINED,
            desc: None,
            storage_desc: None,
        });
        Ok(())
    }

    fn texture_bind_user(&mut self, id: u32) {
        if id == 0 {
            self.state.user_texture = self.state.default_texture;
            return;
        }
        if id as usize <= self.state.textures.len()
            && self.state.textures[id as usize - 1].is_some()
        {
            self.state.user_texture = id;
        } else {
            log::error!("texture_bind_user: unknown texture {}", id);
        }
    }
}

impl VulkanRenderer {
    /// Record the swapchain-to-staging copy for a pending screenshot.
    /// Returns the staging buffer to read after submission.
    fn record_screenshot_copy(
        &mut self,
        cbuf: vk::CommandBuffer,
        image_index: u32,
    ) -> Result<Option<(vk::Buffer, vk::DeviceMemory)>> {
        let extent = self.state.display.d_resolution;
        let size = extent.width as u64 * extent.height as u64 * 4;

        let (staging, staging_mem) = match self.state.dev.create_buffer_with_size(
            vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            size,
        ) {
            Ok(pair) => pair,
            Err(e) => {
                // screenshots are best-effort: log and skip
                log::error!("screenshot staging allocation failed: {}", e);
                return Ok(None);
            }
        };

        let image = self.state.display.d_images[image_index as usize];
        self.state.dev.transition_image_layout(
            cbuf,
            image,
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_READ,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
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
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .build();
        unsafe {
            self.state.dev.dev.cmd_copy_image_to_buffer(
                cbuf,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                staging,
                &[region],
            );
        }

        self.state.dev.transition_image_layout(
            cbuf,
            image,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::AccessFlags::TRANSFER_READ,
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        );

        Ok(Some((staging, staging_mem)))
    }

    /// Wait for the frame, pull the staged pixels into a heap buffer
    /// and spawn the detached PNG writer
    fn finish_screenshot(
        &mut self,
        cursor: usize,
        staging: vk::Buffer,
        staging_mem: vk::DeviceMemory,
    ) -> Result<()> {
        let extent = self.state.display.d_resolution;
        let size = extent.width as usize * extent.height as usize * 4;
        let swizzle = self.state.display.is_bgra();
        let path = self.screenshot_path.clone();

        unsafe {
            self.state
                .dev
                .dev
                .wait_for_fences(&[self.state.frames[cursor].fence], true, u64::MAX)
                .or(Err(CandelaError::TIMEOUT))?;

            let ptr = self
                .state
                .dev
                .dev
                .map_memory(staging_mem, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                .or(Err(CandelaError::OUT_OF_MEMORY))?;
            let mut pixels = vec![0u8; size];
            std::ptr::copy_nonoverlapping(ptr as *const u8, pixels.as_mut_ptr(), size);
            self.state.dev.dev.unmap_memory(staging_mem);
            self.state.dev.dev.destroy_buffer(staging, None);
            self.state.dev.dev.free_memory(staging_mem, None);

            let (width, height) = (extent.width, extent.height);
            // worker owns its pixels, the renderer spawns and forgets
            std::thread::spawn(move || {
                write_screenshot(path, pixels, width, height, swizzle);
            });
        }
        Ok(())
    }
}

impl VulkanRenderer {
    /// Run a render graph outside the main UI pass, on a one-shot
    /// command buffer. Offscreen pass chains (node-editor previews
    /// and the like) ride this.
    pub fn execute_render_graph(&mut self, graph: &mut crate::rgraph::RgGraph) -> Result<()> {
        let dev = &self.state.dev;
        dev.one_shot(|cbuf| {
            graph.execute(dev, cbuf);
        })
    }

    /// Release a graph's transient resources. Must happen before the
    /// renderer itself is torn down.
    pub fn destroy_render_graph(&mut self, graph: &mut crate::rgraph::RgGraph) {
        self.state.dev.wait_idle();
        graph.destroy(&self.state.dev);
    }
}

/// Screenshot worker body: swizzle if the swapchain was BGRA, then
/// encode a 4-channel PNG at the requested path.
fn write_screenshot(path: String, mut pixels: Vec<u8>, width: u32, height: u32, swizzle: bool) {
    if swizzle {
        for px in pixels.chunks_exact_mut(4) {
            px.swap(0, 2);
        }
    }

    if let Err(e) = image::save_buffer(&path, &pixels, width, height, image::ColorType::Rgba8) {
        log::error!("Failed to save screenshot {}: {}", path, e);
    } else {
        log::debug!("Saved screenshot to {}", path);
    }
}
