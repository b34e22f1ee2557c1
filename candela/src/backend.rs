// The renderer backend capability surface
//
// This trait is the narrow waist of the engine: everything above it
// (streams, graphs, the UI translation) talks in these operations and
// never sees ash. The Vulkan implementation lives in renderer.rs; a
// recording stub lives in the test module for exercising the
// backend-agnostic layers.

extern crate utils as lantern_utils;
use crate::list::{GpuInstanceData, RenderCommandList};
use crate::pipeline::TextureFormat;
use crate::stream::BufferHandle;
use crate::Result;

/// Number of SSBO binding slots in Set 1
pub const MAX_SSBO_SLOTS: usize = 4;

/// Tracks the pending Set 1 SSBO bindings between commands.
///
/// BIND_BUFFER records a slot and marks the table dirty; the next
/// draw consumes the table and allocates one descriptor set for it.
/// Draws with a clean table reuse whatever is already bound, so a
/// BIND_BUFFER that is never followed by a draw allocates nothing.
pub struct BindingTracker {
    pending: [BufferHandle; MAX_SSBO_SLOTS],
    dirty: bool,
}

impl BindingTracker {
    pub fn new() -> Self {
        Self {
            pending: [0; MAX_SSBO_SLOTS],
            dirty: false,
        }
    }

    pub fn bind(&mut self, slot: u32, buffer: BufferHandle) {
        if (slot as usize) < MAX_SSBO_SLOTS {
            self.pending[slot as usize] = buffer;
            self.dirty = true;
        }
    }

    /// Clear every slot referring to `buffer`, for stream teardown
    pub fn unbind(&mut self, buffer: BufferHandle) {
        for slot in self.pending.iter_mut() {
            if *slot == buffer {
                *slot = 0;
            }
        }
    }

    /// Called at each draw. Returns the resolved slot table exactly
    /// when a new descriptor set must be allocated, with empty slots
    /// falling back to slot 0 to satisfy the fixed layout.
    pub fn take_for_draw(&mut self) -> Option<[BufferHandle; MAX_SSBO_SLOTS]> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;

        let fallback = self.pending[0];
        let mut resolved = self.pending;
        for slot in resolved.iter_mut() {
            if *slot == 0 {
                *slot = fallback;
            }
        }
        Some(resolved)
    }
}

/// Every capability a render backend must provide.
///
/// Construction is backend-specific and teardown rides Drop; the
/// operational surface is here. Handles are 1-based with 0 meaning
/// failure, so callers can check and degrade.
pub trait RendererBackend {
    // --- Core loop ---

    /// Record and submit one frame from the command list
    fn submit_commands(&mut self, list: &RenderCommandList) -> Result<()>;

    /// Recreate the swapchain-dependent objects for a new size
    fn update_viewport(&mut self, width: u32, height: u32) -> Result<()>;

    /// Latch a screenshot request; the next submit performs the
    /// readback and spawns the PNG writer
    fn request_screenshot(&mut self, path: &str);

    /// Stage this frame's instance records. They are copied into the
    /// current frame cursor's SSBO during the next submit, after that
    /// frame's fence has been waited on.
    fn frame_set_instances(&mut self, instances: &[GpuInstanceData]);

    // --- Compute ---

    /// Create a compute pipeline from SPIR-V. Returns id >= 1, or 0
    /// on failure (including devices without compute support).
    fn compute_pipeline_create(&mut self, spirv: &[u8], layout_index: usize) -> u32;
    fn compute_pipeline_destroy(&mut self, id: u32);

    /// Dispatch workgroups on pipeline `id` with the currently bound
    /// compute slots. A no-op with a logged warning when compute is
    /// unavailable.
    fn compute_dispatch(
        &mut self,
        id: u32,
        group_x: u32,
        group_y: u32,
        group_z: u32,
        push_constants: &[u8],
    ) -> Result<()>;

    /// Wait for outstanding compute work (full memory barrier)
    fn compute_wait(&mut self) -> Result<()>;

    /// Optionally compile high-level shader source to SPIR-V by
    /// delegating to an external toolchain. Returns the blob, or None
    /// with the attempted command logged.
    fn compile_shader(&mut self, source: &str, stage: &str) -> Option<Vec<u8>>;

    // --- Buffers ---

    fn buffer_create(&mut self, total_size: u64, host_visible: bool) -> BufferHandle;
    fn buffer_destroy(&mut self, handle: BufferHandle);
    fn buffer_map(&mut self, handle: BufferHandle) -> Result<*mut u8>;
    fn buffer_unmap(&mut self, handle: BufferHandle) -> Result<()>;
    fn buffer_upload(&mut self, handle: BufferHandle, data: &[u8], offset: u64) -> Result<()>;
    fn buffer_read(&mut self, handle: BufferHandle, out: &mut [u8], offset: u64) -> Result<()>;

    /// Record `handle` as the SSBO for the next compute dispatch at
    /// `slot`
    fn compute_bind_buffer(&mut self, handle: BufferHandle, slot: u32);

    /// Record `handle` as the Set 1 SSBO at `slot` for the next draw
    fn graphics_bind_buffer(&mut self, handle: BufferHandle, slot: u32);

    // --- Graphics pipelines ---

    fn graphics_pipeline_create(
        &mut self,
        vert_spv: &[u8],
        frag_spv: &[u8],
        layout_index: usize,
    ) -> u32;
    fn graphics_pipeline_destroy(&mut self, id: u32);

    // --- Textures ---

    /// Create a GPU texture. Returns id >= 1, or 0 on failure.
    fn texture_create(&mut self, width: u32, height: u32, format: TextureFormat) -> u32;
    /// Destroy the texture and free its lazily allocated descriptor
    fn texture_destroy(&mut self, id: u32);
    /// Recreate the texture at a new size, preserving its format
    fn texture_resize(&mut self, id: u32, width: u32, height: u32) -> Result<()>;
    /// Select which texture Set 2 (the user texture slot) samples
    fn texture_bind_user(&mut self, id: u32);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::list::RenderCommand;
    use crate::CandelaError;
    use std::collections::HashMap;

    /// A CPU-side recording backend for testing the layers above the
    /// Vulkan implementation. Buffers are plain byte vectors so
    /// upload/readback round trips work for real.
    pub struct StubBackend {
        buffers: Vec<Option<Vec<u8>>>,
        pub compute_bindings: HashMap<u32, BufferHandle>,
        pub graphics_bindings: HashMap<u32, BufferHandle>,
        /// (pipeline id, groups, push constant bytes, bindings at
        /// dispatch time) for every dispatch, in order
        pub dispatches: Vec<(u32, (u32, u32, u32), Vec<u8>, HashMap<u32, BufferHandle>)>,
        /// Descriptor sets "allocated" while walking submitted lists
        pub frame_descriptor_allocs: usize,
        pub submitted_lists: usize,
        pub compute_pipelines: u32,
        pub instances: Vec<GpuInstanceData>,
        pub screenshot_path: Option<String>,
        pub supports_compute: bool,
    }

    impl StubBackend {
        pub fn new() -> Self {
            Self {
                buffers: Vec::new(),
                compute_bindings: HashMap::new(),
                graphics_bindings: HashMap::new(),
                dispatches: Vec::new(),
                frame_descriptor_allocs: 0,
                submitted_lists: 0,
                compute_pipelines: 0,
                instances: Vec::new(),
                screenshot_path: None,
                supports_compute: true,
            }
        }

        fn buffer_mut(&mut self, handle: BufferHandle) -> Option<&mut Vec<u8>> {
            self.buffers
                .get_mut(handle.checked_sub(1)? as usize)?
                .as_mut()
        }
    }

    impl RendererBackend for StubBackend {
        fn submit_commands(&mut self, list: &RenderCommandList) -> Result<()> {
            self.submitted_lists += 1;

            // Mirror the real frame walk closely enough to observe
            // the descriptor allocation policy.
            let mut tracker = BindingTracker::new();
            for cmd in list.iter() {
                match cmd {
                    RenderCommand::BindSsbo { slot, buffer } => tracker.bind(*slot, *buffer),
                    RenderCommand::Draw { .. } | RenderCommand::DrawIndexed { .. } => {
                        if tracker.take_for_draw().is_some() {
                            self.frame_descriptor_allocs += 1;
                        }
                    }
                    _ => {}
                }
            }
            Ok(())
        }

        fn update_viewport(&mut self, _width: u32, _height: u32) -> Result<()> {
            Ok(())
        }

        fn request_screenshot(&mut self, path: &str) {
            self.screenshot_path = Some(path.to_string());
        }

        fn frame_set_instances(&mut self, instances: &[GpuInstanceData]) {
            self.instances = instances.to_vec();
        }

        fn compute_pipeline_create(&mut self, _spirv: &[u8], _layout_index: usize) -> u32 {
            if !self.supports_compute {
                return 0;
            }
            self.compute_pipelines += 1;
            self.compute_pipelines
        }

        fn compute_pipeline_destroy(&mut self, _id: u32) {}

        fn compute_dispatch(
            &mut self,
            id: u32,
            group_x: u32,
            group_y: u32,
            group_z: u32,
            push_constants: &[u8],
        ) -> Result<()> {
            if !self.supports_compute {
                return Err(CandelaError::NO_COMPUTE);
            }
            self.dispatches.push((
                id,
                (group_x, group_y, group_z),
                push_constants.to_vec(),
                self.compute_bindings.clone(),
            ));
            // bindings are consumed by the dispatch, same as the
            // Vulkan implementation
            self.compute_bindings.clear();
            Ok(())
        }

        fn compute_wait(&mut self) -> Result<()> {
            Ok(())
        }

        fn compile_shader(&mut self, _source: &str, _stage: &str) -> Option<Vec<u8>> {
            None
        }

        fn buffer_create(&mut self, total_size: u64, _host_visible: bool) -> BufferHandle {
            self.buffers.push(Some(vec![0u8; total_size as usize]));
            self.buffers.len() as BufferHandle
        }

        fn buffer_destroy(&mut self, handle: BufferHandle) {
            if handle != 0 {
                if let Some(slot) = self.buffers.get_mut(handle as usize - 1) {
                    *slot = None;
                }
                self.compute_bindings.retain(|_, h| *h != handle);
                self.graphics_bindings.retain(|_, h| *h != handle);
            }
        }

        fn buffer_map(&mut self, handle: BufferHandle) -> Result<*mut u8> {
            self.buffer_mut(handle)
                .map(|b| b.as_mut_ptr())
                .ok_or(CandelaError::INVALID)
        }

        fn buffer_unmap(&mut self, _handle: BufferHandle) -> Result<()> {
            Ok(())
        }

        fn buffer_upload(&mut self, handle: BufferHandle, data: &[u8], offset: u64) -> Result<()> {
            let buf = self.buffer_mut(handle).ok_or(CandelaError::INVALID)?;
            let off = offset as usize;
            if off + data.len() > buf.len() {
                return Err(CandelaError::INVALID);
            }
            buf[off..off + data.len()].copy_from_slice(data);
            Ok(())
        }

        fn buffer_read(&mut self, handle: BufferHandle, out: &mut [u8], offset: u64) -> Result<()> {
            let buf = self.buffer_mut(handle).ok_or(CandelaError::INVALID)?;
            let off = offset as usize;
            if off + out.len() > buf.len() {
                return Err(CandelaError::INVALID);
            }
            out.copy_from_slice(&buf[off..off + out.len()]);
            Ok(())
        }

        fn compute_bind_buffer(&mut self, handle: BufferHandle, slot: u32) {
            if handle == 0 {
                self.compute_bindings.remove(&slot);
            } else {
                self.compute_bindings.insert(slot, handle);
            }
        }

        fn graphics_bind_buffer(&mut self, handle: BufferHandle, slot: u32) {
            if handle == 0 {
                self.graphics_bindings.remove(&slot);
            } else {
                self.graphics_bindings.insert(slot, handle);
            }
        }

        fn graphics_pipeline_create(
            &mut self,
            _vert_spv: &[u8],
            _frag_spv: &[u8],
            _layout_index: usize,
        ) -> u32 {
            1
        }

        fn graphics_pipeline_destroy(&mut self, _id: u32) {}

        fn texture_create(&mut self, _width: u32, _height: u32, _format: TextureFormat) -> u32 {
            1
        }

        fn texture_destroy(&mut self, _id: u32) {}

        fn texture_resize(&mut self, _id: u32, _width: u32, _height: u32) -> Result<()> {
            Ok(())
        }

        fn texture_bind_user(&mut self, _id: u32) {}
    }

    #[test]
    fn bind_without_draw_allocates_nothing() {
        let mut rend = StubBackend::new();
        let mut list = RenderCommandList::new();
        list.bind_pipeline(0);
        list.bind_ssbo(1, 3);
        // no draw follows the bind
        rend.submit_commands(&list).unwrap();
        assert_eq!(rend.frame_descriptor_allocs, 0);
    }

    #[test]
    fn draw_after_bind_allocates_once() {
        let mut rend = StubBackend::new();
        let mut list = RenderCommandList::new();
        list.bind_ssbo(0, 3);
        list.draw_indexed(6, 1);
        // a second draw with a clean table reuses the set
        list.draw_indexed(6, 1);
        rend.submit_commands(&list).unwrap();
        assert_eq!(rend.frame_descriptor_allocs, 1);
    }

    #[test]
    fn missing_slots_fall_back_to_slot_zero() {
        let mut tracker = BindingTracker::new();
        tracker.bind(0, 9);
        let resolved = tracker.take_for_draw().unwrap();
        assert_eq!(resolved, [9, 9, 9, 9]);
        // clean after the draw
        assert!(tracker.take_for_draw().is_none());
    }
}
