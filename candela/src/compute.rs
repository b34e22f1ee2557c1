// Compute pipelines and dispatch
//
// Compute work rides its own command buffer and fence, separate from
// the graphics frame ring. A dispatch consumes the slot bindings
// recorded since the last dispatch; they do not leak into the next
// one unless re-declared.

use ash::vk;

extern crate utils as lantern_utils;
use crate::backend::MAX_SSBO_SLOTS;
use crate::descpool::DescPool;
use crate::device::Device;
use crate::pipeline::{self, PipelineLayouts};
use crate::renderer::{RendererState, VulkanRenderer};
use crate::stream::BufferHandle;
use crate::{CandelaError, Result};
use lantern_utils::log;

pub(crate) struct ComputeCtx {
    pool: vk::CommandPool,
    cbuf: vk::CommandBuffer,
    fence: vk::Fence,
    fence_pending: bool,

    /// 1-based compute pipeline handles
    pipelines: Vec<Option<vk::Pipeline>>,

    /// Slot bindings consumed by the next dispatch
    bound: [BufferHandle; MAX_SSBO_SLOTS],

    /// Persistent descriptor sets, rewritten before each dispatch
    image_desc: (usize, vk::DescriptorSet),
    ssbo_desc: (usize, vk::DescriptorSet),

    /// Tiny placeholder buffer keeping unused SSBO slots valid
    null_buf: vk::Buffer,
    null_mem: vk::DeviceMemory,
}

impl ComputeCtx {
    pub fn new(dev: &Device, layouts: &PipelineLayouts, desc_pool: &mut DescPool) -> Result<Self> {
        let pool = dev.create_command_pool(dev.graphics_family);
        let cbuf = dev.create_command_buffers(pool, 1)[0];
        let fence = unsafe {
            dev.dev
                .create_fence(&vk::FenceCreateInfo::default(), None)
                .or(Err(CandelaError::INVALID))?
        };

        let image_desc = desc_pool.alloc_set(&dev.dev, layouts.compute_image_layout);
        let ssbo_desc = desc_pool.alloc_set(&dev.dev, layouts.ssbo_layout);

        let (null_buf, null_mem) = dev.create_buffer_with_size(
            vk::BufferUsageFlags::STORAGE_BUFFER,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            16,
        )?;

        Ok(Self {
            pool: pool,
            cbuf: cbuf,
            fence: fence,
            fence_pending: false,
            pipelines: Vec::new(),
            bound: [0; MAX_SSBO_SLOTS],
            image_desc: image_desc,
            ssbo_desc: ssbo_desc,
            null_buf: null_buf,
            null_mem: null_mem,
        })
    }

    pub fn bind_buffer(&mut self, handle: BufferHandle, slot: u32) {
        if (slot as usize) < MAX_SSBO_SLOTS {
            self.bound[slot as usize] = handle;
        }
    }

    /// Drop any bindings referring to `handle`. Called when a stream
    /// is destroyed so the next dispatch cannot see a dead buffer.
    pub fn unbind_buffer(&mut self, handle: BufferHandle) {
        for slot in self.bound.iter_mut() {
            if *slot == handle {
                *slot = 0;
            }
        }
    }

    fn store_pipeline(&mut self, pipe: vk::Pipeline) -> u32 {
        for (i, slot) in self.pipelines.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(pipe);
                return i as u32 + 1;
            }
        }
        self.pipelines.push(Some(pipe));
        self.pipelines.len() as u32
    }

    pub fn destroy(&mut self, dev: &Device, desc_pool: &mut DescPool) {
        unsafe {
            if self.fence_pending {
                let _ = dev.dev.wait_for_fences(&[self.fence], true, u64::MAX);
            }
            for pipe in self.pipelines.drain(..).flatten() {
                dev.dev.destroy_pipeline(pipe, None);
            }
            desc_pool.free_set(&dev.dev, self.image_desc.0, self.image_desc.1);
            desc_pool.free_set(&dev.dev, self.ssbo_desc.0, self.ssbo_desc.1);
            dev.dev.destroy_buffer(self.null_buf, None);
            dev.dev.free_memory(self.null_mem, None);
            dev.dev.destroy_fence(self.fence, None);
            dev.dev.destroy_command_pool(self.pool, None);
        }
    }
}

impl VulkanRenderer {
    pub(crate) fn compute_pipeline_create_internal(
        &mut self,
        spirv: &[u8],
        layout_index: usize,
    ) -> u32 {
        if !self.state.dev.dev_features.supports_compute {
            log::error!("compute_pipeline_create: device has no compute support");
            return 0;
        }
        if layout_index != 0 {
            log::error!("compute_pipeline_create: bad layout index {}", layout_index);
            return 0;
        }

        let module = match pipeline::create_shader_module(&self.state.dev, spirv) {
            Ok(m) => m,
            Err(_) => {
                log::error!("compute_pipeline_create: invalid SPIR-V blob");
                return 0;
            }
        };

        let entrypoint = std::ffi::CString::new("main").unwrap();
        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(&entrypoint)
            .build();
        let info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage)
            .layout(self.state.layouts.compute_layout)
            .build();

        let pipe = unsafe {
            self.state
                .dev
                .dev
                .create_compute_pipelines(vk::PipelineCache::null(), &[info], None)
        };
        unsafe { self.state.dev.dev.destroy_shader_module(module, None) };

        match pipe {
            Ok(pipes) => self.state.compute.store_pipeline(pipes[0]),
            Err(_) => {
                log::error!("compute_pipeline_create: pipeline creation failed");
                0
            }
        }
    }

    pub(crate) fn compute_pipeline_destroy_internal(&mut self, id: u32) {
        if id == 0 || id as usize > self.state.compute.pipelines.len() {
            return;
        }
        let _ = self.compute_wait_internal();
        if let Some(pipe) = self.state.compute.pipelines[id as usize - 1].take() {
            unsafe { self.state.dev.dev.destroy_pipeline(pipe, None) };
        }
    }

    /// Dispatch `id` with the bound slots. A missing compute
    /// capability downgrades this to a logged no-op so graphics
    /// frames keep working.
    pub(crate) fn compute_dispatch_internal(
        &mut self,
        id: u32,
        group_x: u32,
        group_y: u32,
        group_z: u32,
        push_constants: &[u8],
    ) -> Result<()> {
        if !self.state.dev.dev_features.supports_compute {
            log::error!("compute_dispatch ignored: no compute support");
            return Ok(());
        }
        let pipe = match self
            .state
            .compute
            .pipelines
            .get(id.wrapping_sub(1) as usize)
            .and_then(|p| *p)
        {
            Some(p) => p,
            None => {
                log::error!("compute_dispatch: unknown pipeline {}", id);
                return Err(CandelaError::INVALID);
            }
        };

        // the persistent descriptor sets cannot be rewritten while
        // the previous dispatch is still on the queue
        self.compute_wait_internal()?;

        // Resolve the bound slots; empty ones point at the
        // placeholder so the fixed layout stays satisfied. Bindings
        // are consumed by this dispatch.
        let mut buffers = [self.state.compute.null_buf; MAX_SSBO_SLOTS];
        for (i, handle) in self.state.compute.bound.iter().enumerate() {
            if let Some(buf) = self.state.lookup_buffer(*handle) {
                buffers[i] = buf.buffer;
            }
        }
        self.state.compute.bound = [0; MAX_SSBO_SLOTS];
        RendererState::write_ssbo_desc(&self.state.dev, self.state.compute.ssbo_desc.1, &buffers);

        // point set 0 at the current compute target image
        let target = self.state.user_texture;
        self.write_compute_image_desc(target)?;

        let dev = self.state.dev.dev.clone();
        unsafe {
            dev.reset_command_buffer(
                self.state.compute.cbuf,
                vk::CommandBufferResetFlags::empty(),
            )
            .or(Err(CandelaError::INVALID))?;
            let begin = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            dev.begin_command_buffer(self.state.compute.cbuf, &begin)
                .or(Err(CandelaError::INVALID))?;

            dev.cmd_bind_pipeline(
                self.state.compute.cbuf,
                vk::PipelineBindPoint::COMPUTE,
                pipe,
            );
            dev.cmd_bind_descriptor_sets(
                self.state.compute.cbuf,
                vk::PipelineBindPoint::COMPUTE,
                self.state.layouts.compute_layout,
                0,
                &[self.state.compute.image_desc.1, self.state.compute.ssbo_desc.1],
                &[],
            );
            if !push_constants.is_empty() {
                dev.cmd_push_constants(
                    self.state.compute.cbuf,
                    self.state.layouts.compute_layout,
                    vk::ShaderStageFlags::COMPUTE,
                    0,
                    push_constants,
                );
            }

            dev.cmd_dispatch(self.state.compute.cbuf, group_x, group_y, group_z);

            // make compute writes visible to the next consumer,
            // whatever stage that turns out to be
            let barrier = vk::MemoryBarrier::builder()
                .src_access_mask(vk::AccessFlags::SHADER_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ | vk::AccessFlags::MEMORY_READ)
                .build();
            dev.cmd_pipeline_barrier(
                self.state.compute.cbuf,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );

            dev.end_command_buffer(self.state.compute.cbuf)
                .or(Err(CandelaError::INVALID))?;

            let cbufs = [self.state.compute.cbuf];
            let submit = vk::SubmitInfo::builder().command_buffers(&cbufs).build();
            match dev.queue_submit(self.state.dev.queue, &[submit], self.state.compute.fence) {
                Ok(()) => {}
                Err(vk::Result::ERROR_DEVICE_LOST) => return Err(CandelaError::DEVICE_LOST),
                Err(res) => {
                    log::error!("{}", crate::vk_fatal_msg("compute submit", res));
                    return Err(CandelaError::SUBMIT_FAILED);
                }
            }
        }
        self.state.compute.fence_pending = true;
        Ok(())
    }

    /// Wait for the outstanding dispatch, if any
    pub(crate) fn compute_wait_internal(&mut self) -> Result<()> {
        if !self.state.compute.fence_pending {
            return Ok(());
        }
        unsafe {
            self.state
                .dev
                .dev
                .wait_for_fences(&[self.state.compute.fence], true, u64::MAX)
                .or(Err(CandelaError::TIMEOUT))?;
            self.state
                .dev
                .dev
                .reset_fences(&[self.state.compute.fence])
                .or(Err(CandelaError::INVALID))?;
        }
        self.state.compute.fence_pending = false;
        Ok(())
    }

    /// Make the compute image descriptor point at texture `id`,
    /// transitioning it to GENERAL on first use
    fn write_compute_image_desc(&mut self, id: u32) -> Result<()> {
        // the sampler-descriptor helper transitions to GENERAL too
        let _ = self.state.texture_descriptor(id)?;
        let view = self.state.textures[id as usize - 1]
            .as_ref()
            .ok_or(CandelaError::INVALID)?
            .view;

        let info = [vk::DescriptorImageInfo::builder()
            .image_view(view)
            .image_layout(vk::ImageLayout::GENERAL)
            .build()];
        let write = [vk::WriteDescriptorSet::builder()
            .dst_set(self.state.compute.image_desc.1)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
            .image_info(&info)
            .build()];
        unsafe { self.state.dev.dev.update_descriptor_sets(&write, &[]) };
        Ok(())
    }
}

/// Compile shader source to SPIR-V by shelling out to
/// glslangValidator. Logs the attempted command on failure so the
/// caller can reproduce it.
pub(crate) fn compile_shader_external(source: &str, stage: &str) -> Option<Vec<u8>> {
    use std::io::Write;
    use std::process::Command;

    let stage_flag = match stage {
        "vertex" => "vert",
        "fragment" => "frag",
        "compute" => "comp",
        other => {
            log::error!("compile_shader: unknown stage {}", other);
            return None;
        }
    };

    let dir = std::env::temp_dir();
    let src_path = dir.join(format!("lantern_shader.{}", stage_flag));
    let out_path = dir.join(format!("lantern_shader.{}.spv", stage_flag));

    let write_src = std::fs::File::create(&src_path)
        .and_then(|mut f| f.write_all(source.as_bytes()));
    if let Err(e) = write_src {
        log::error!("compile_shader: could not write {}: {}", src_path.display(), e);
        return None;
    }

    let cmdline = format!(
        "glslangValidator -V -S {} -o {} {}",
        stage_flag,
        out_path.display(),
        src_path.display()
    );
    let status = Command::new("glslangValidator")
        .args(["-V", "-S", stage_flag, "-o"])
        .arg(&out_path)
        .arg(&src_path)
        .status();

    match status {
        Ok(s) if s.success() => match std::fs::read(&out_path) {
            Ok(spv) => Some(spv),
            Err(e) => {
                log::error!("compile_shader: could not read {}: {}", out_path.display(), e);
                None
            }
        },
        Ok(s) => {
            log::error!("compile_shader failed (exit {:?}): {}", s.code(), cmdline);
            None
        }
        Err(e) => {
            log::error!("compile_shader could not run ({}): {}", e, cmdline);
            None
        }
    }
}
