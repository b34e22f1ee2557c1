// The render graph
//
// Passes declare how they use resources (read / write / depth plus
// load and store ops) and the graph plans the image barriers and
// layout transitions needed to execute them in order. Transient
// textures are graph-owned; imported ones (the swapchain backbuffer)
// are never destroyed here.

use ash::vk;

extern crate utils as lantern_utils;
use crate::device::Device;
use crate::pipeline::TextureFormat;
use lantern_utils::log;

/// 1-based resource id. 0 is the invalid handle.
pub type RgResourceHandle = u32;
pub const RG_INVALID_HANDLE: RgResourceHandle = 0;

pub const MAX_RESOURCES: usize = 64;
pub const MAX_PASSES: usize = 32;
pub const MAX_PASS_RESOURCES: usize = 16;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RgLoadOp {
    DontCare,
    Clear,
    Load,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RgStoreOp {
    DontCare,
    Store,
}

/// Opaque command buffer handed to pass callbacks
pub struct RgCmdBuffer {
    pub cmd: vk::CommandBuffer,
}

pub type RgPassExecuteFn = Box<dyn FnMut(&mut RgCmdBuffer, &mut [u8])>;

struct RgResource {
    name: String,
    width: u32,
    height: u32,
    format: TextureFormat,
    /// Externally owned backing (e.g. a swapchain image)
    imported: Option<vk::Image>,
    /// Graph-owned backing, allocated before first use
    transient: Option<(vk::Image, vk::ImageView, vk::DeviceMemory)>,

    // tracked state for barrier planning
    layout: vk::ImageLayout,
    access: vk::AccessFlags,
    stage: vk::PipelineStageFlags,
}

#[derive(Copy, Clone)]
struct RgPassResourceRef {
    handle: RgResourceHandle,
    is_write: bool,
    is_depth: bool,
    #[allow(dead_code)]
    load_op: RgLoadOp,
    #[allow(dead_code)]
    store_op: RgStoreOp,
}

struct RgPass {
    name: String,
    refs: Vec<RgPassResourceRef>,
    execute_fn: Option<RgPassExecuteFn>,
    user_data: Vec<u8>,
}

/// One planned layout transition, in execution order
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RgTransition {
    pub handle: RgResourceHandle,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub is_depth: bool,
}

pub struct RgGraph {
    resources: Vec<RgResource>,
    passes: Vec<RgPass>,
    compiled: bool,
}

/// Map a usage declaration onto (layout, access, stage)
fn usage_to_state(
    is_write: bool,
    is_depth: bool,
) -> (vk::ImageLayout, vk::AccessFlags, vk::PipelineStageFlags) {
    if is_depth {
        return (
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        );
    }
    if is_write {
        return (
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        );
    }
    (
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        vk::AccessFlags::SHADER_READ,
        vk::PipelineStageFlags::FRAGMENT_SHADER,
    )
}

impl RgGraph {
    pub fn new() -> Self {
        Self {
            resources: Vec::new(),
            passes: Vec::new(),
            compiled: false,
        }
    }

    fn push_resource(&mut self, res: RgResource) -> RgResourceHandle {
        if self.resources.len() >= MAX_RESOURCES {
            log::error!("RgGraph: resource table full ({} entries)", MAX_RESOURCES);
            return RG_INVALID_HANDLE;
        }
        self.resources.push(res);
        self.resources.len() as RgResourceHandle
    }

    /// Declare a transient texture managed by the graph. Returns the
    /// invalid handle when the table is full.
    pub fn create_texture(
        &mut self,
        name: &str,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> RgResourceHandle {
        self.push_resource(RgResource {
            name: name.to_string(),
            width: width,
            height: height,
            format: format,
            imported: None,
            transient: None,
            layout: vk::ImageLayout::UNDEFINED,
            access: vk::AccessFlags::empty(),
            stage: vk::PipelineStageFlags::TOP_OF_PIPE,
        })
    }

    /// Import an externally owned texture. The graph plans barriers
    /// for it but never destroys it.
    pub fn import_texture(
        &mut self,
        name: &str,
        image: vk::Image,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> RgResourceHandle {
        self.push_resource(RgResource {
            name: name.to_string(),
            width: width,
            height: height,
            format: format,
            imported: Some(image),
            transient: None,
            layout: vk::ImageLayout::UNDEFINED,
            access: vk::AccessFlags::empty(),
            stage: vk::PipelineStageFlags::TOP_OF_PIPE,
        })
    }

    /// Start defining a pass. `user_data_size` bytes of zeroed
    /// storage travel with the pass and reach its execute callback.
    pub fn add_pass(&mut self, name: &str, user_data_size: usize) -> Option<RgPassBuilder> {
        if self.passes.len() >= MAX_PASSES {
            log::error!("RgGraph: pass table full ({} entries)", MAX_PASSES);
            return None;
        }
        self.passes.push(RgPass {
            name: name.to_string(),
            refs: Vec::new(),
            execute_fn: None,
            user_data: vec![0u8; user_data_size],
        });
        let index = self.passes.len() - 1;
        Some(RgPassBuilder {
            graph: self,
            pass: index,
        })
    }

    /// Validate the declaration. Current policy keeps declaration
    /// order; culling of unreferenced passes can slot in here later.
    pub fn compile(&mut self) -> bool {
        for pass in self.passes.iter() {
            for r in pass.refs.iter() {
                if r.handle == RG_INVALID_HANDLE
                    || r.handle as usize > self.resources.len()
                {
                    log::error!(
                        "RgGraph: pass '{}' references invalid resource {}",
                        pass.name,
                        r.handle
                    );
                    return false;
                }
            }
        }
        self.compiled = true;
        true
    }

    /// Plan the transitions for the next execution, updating the
    /// per-resource tracked state. First use transitions away from
    /// UNDEFINED; later uses transition from the recorded state.
    pub fn plan_transitions(&mut self) -> Vec<Vec<RgTransition>> {
        let mut plan = Vec::with_capacity(self.passes.len());
        for pass in self.passes.iter() {
            let mut transitions = Vec::new();
            for r in pass.refs.iter() {
                let res = &mut self.resources[r.handle as usize - 1];
                let (new_layout, dst_access, dst_stage) = usage_to_state(r.is_write, r.is_depth);

                if res.layout == new_layout {
                    continue;
                }
                transitions.push(RgTransition {
                    handle: r.handle,
                    old_layout: res.layout,
                    new_layout: new_layout,
                    src_access: res.access,
                    dst_access: dst_access,
                    src_stage: res.stage,
                    dst_stage: dst_stage,
                    is_depth: r.is_depth,
                });
                res.layout = new_layout;
                res.access = dst_access;
                res.stage = dst_stage;
            }
            plan.push(transitions);
        }
        plan
    }

    /// Current tracked layout of a resource, for tests and debugging
    pub fn resource_layout(&self, handle: RgResourceHandle) -> Option<vk::ImageLayout> {
        if handle == RG_INVALID_HANDLE {
            return None;
        }
        self.resources
            .get(handle as usize - 1)
            .map(|r| r.layout)
    }

    /// Allocate backing for any transient resource about to be used
    fn ensure_transient_backing(&mut self, dev: &Device) {
        for res in self.resources.iter_mut() {
            if res.imported.is_some() || res.transient.is_some() {
                continue;
            }
            let (usage, aspect) = match res.format {
                TextureFormat::D32 => (
                    vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
                    vk::ImageAspectFlags::DEPTH,
                ),
                _ => (
                    vk::ImageUsageFlags::COLOR_ATTACHMENT
                        | vk::ImageUsageFlags::SAMPLED
                        | vk::ImageUsageFlags::TRANSFER_SRC,
                    vk::ImageAspectFlags::COLOR,
                ),
            };
            match dev.create_image(
                &vk::Extent2D {
                    width: res.width,
                    height: res.height,
                },
                res.format.as_vk(),
                usage,
                aspect,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                vk::ImageTiling::OPTIMAL,
            ) {
                Ok(backing) => res.transient = Some(backing),
                Err(e) => log::error!(
                    "RgGraph: failed to allocate transient '{}': {}",
                    res.name,
                    e
                ),
            }
        }
    }

    /// Execute the graph on a command buffer: barriers first, then
    /// each pass's callback in declaration order. Reached through
    /// VulkanRenderer::execute_render_graph.
    pub(crate) fn execute(&mut self, dev: &Device, cmd: vk::CommandBuffer) {
        if !self.compiled {
            log::error!("RgGraph: execute called before compile");
            return;
        }
        self.ensure_transient_backing(dev);

        let plan = self.plan_transitions();
        let mut rg_cmd = RgCmdBuffer { cmd: cmd };

        for (pass_idx, transitions) in plan.iter().enumerate() {
            for t in transitions.iter() {
                let res = &self.resources[t.handle as usize - 1];
                let image = match (res.imported, &res.transient) {
                    (Some(img), _) => img,
                    (None, Some((img, _, _))) => *img,
                    (None, None) => continue,
                };

                let barrier = vk::ImageMemoryBarrier::builder()
                    .old_layout(t.old_layout)
                    .new_layout(t.new_layout)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: if t.is_depth {
                            vk::ImageAspectFlags::DEPTH
                        } else {
                            vk::ImageAspectFlags::COLOR
                        },
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .src_access_mask(t.src_access)
                    .dst_access_mask(t.dst_access)
                    .build();

                unsafe {
                    dev.dev.cmd_pipeline_barrier(
                        cmd,
                        t.src_stage,
                        t.dst_stage,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[barrier],
                    );
                }
            }

            let pass = &mut self.passes[pass_idx];
            if let Some(execute_fn) = pass.execute_fn.as_mut() {
                execute_fn(&mut rg_cmd, &mut pass.user_data);
            }
        }
    }

    /// Free the transient backings. Imported resources are untouched.
    pub(crate) fn destroy(&mut self, dev: &Device) {
        for res in self.resources.iter_mut() {
            if let Some((image, view, mem)) = res.transient.take() {
                unsafe {
                    dev.dev.destroy_image_view(view, None);
                    dev.dev.destroy_image(image, None);
                    dev.dev.free_memory(mem, None);
                }
            }
        }
    }
}

/// Builder for declaring one pass's resource usage
pub struct RgPassBuilder<'a> {
    graph: &'a mut RgGraph,
    pass: usize,
}

impl<'a> RgPassBuilder<'a> {
    fn push_ref(&mut self, r: RgPassResourceRef) -> &mut Self {
        let pass = &mut self.graph.passes[self.pass];
        if pass.refs.len() >= MAX_PASS_RESOURCES {
            log::error!(
                "RgGraph: pass '{}' exceeds {} resource refs",
                pass.name,
                MAX_PASS_RESOURCES
            );
            return self;
        }
        pass.refs.push(r);
        self
    }

    /// Declare that this pass samples `handle`
    pub fn read(&mut self, handle: RgResourceHandle) -> &mut Self {
        self.push_ref(RgPassResourceRef {
            handle: handle,
            is_write: false,
            is_depth: false,
            load_op: RgLoadOp::Load,
            store_op: RgStoreOp::DontCare,
        })
    }

    /// Declare that this pass writes `handle` as a color attachment
    pub fn write(
        &mut self,
        handle: RgResourceHandle,
        load_op: RgLoadOp,
        store_op: RgStoreOp,
    ) -> &mut Self {
        self.push_ref(RgPassResourceRef {
            handle: handle,
            is_write: true,
            is_depth: false,
            load_op: load_op,
            store_op: store_op,
        })
    }

    /// Declare the pass's depth attachment
    pub fn set_depth(
        &mut self,
        handle: RgResourceHandle,
        load_op: RgLoadOp,
        store_op: RgStoreOp,
    ) -> &mut Self {
        self.push_ref(RgPassResourceRef {
            handle: handle,
            is_write: true,
            is_depth: true,
            load_op: load_op,
            store_op: store_op,
        })
    }

    /// Install the execution callback for this pass
    pub fn set_execution(&mut self, f: RgPassExecuteFn) -> &mut Self {
        self.graph.passes[self.pass].execute_fn = Some(f);
        self
    }

    /// Mutable view of the pass's zeroed user data block
    pub fn user_data(&mut self) -> &mut [u8] {
        &mut self.graph.passes[self.pass].user_data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_one_based_and_distinct() {
        let mut graph = RgGraph::new();
        let t1 = graph.create_texture("Tex1", 800, 600, TextureFormat::Rgba8);
        let t2 = graph.create_texture("Tex2", 800, 600, TextureFormat::Rgba8);
        assert_ne!(t1, RG_INVALID_HANDLE);
        assert_ne!(t2, RG_INVALID_HANDLE);
        assert_ne!(t1, t2);
    }

    #[test]
    fn resource_overflow_returns_invalid_handle() {
        let mut graph = RgGraph::new();
        for i in 0..MAX_RESOURCES {
            let h = graph.create_texture(&format!("t{}", i), 4, 4, TextureFormat::Rgba8);
            assert_ne!(h, RG_INVALID_HANDLE);
        }
        let overflow = graph.create_texture("too-many", 4, 4, TextureFormat::Rgba8);
        assert_eq!(overflow, RG_INVALID_HANDLE);
    }

    #[test]
    fn pass_overflow_returns_none() {
        let mut graph = RgGraph::new();
        for i in 0..MAX_PASSES {
            assert!(graph.add_pass(&format!("p{}", i), 0).is_some());
        }
        assert!(graph.add_pass("too-many", 0).is_none());
    }

    #[test]
    fn compile_rejects_invalid_refs() {
        let mut graph = RgGraph::new();
        graph.add_pass("bad", 0).unwrap().read(99);
        assert!(!graph.compile());
    }

    #[test]
    fn two_pass_declaration_compiles() {
        let mut graph = RgGraph::new();
        let tex1 = graph.create_texture("Tex1", 800, 600, TextureFormat::Rgba8);
        let tex2 = graph.create_texture("Tex2", 800, 600, TextureFormat::Rgba8);

        graph
            .add_pass("Pass1", 0)
            .unwrap()
            .write(tex1, RgLoadOp::Clear, RgStoreOp::Store);
        graph
            .add_pass("Pass2", 0)
            .unwrap()
            .read(tex1)
            .write(tex2, RgLoadOp::DontCare, RgStoreOp::Store);

        assert!(graph.compile());
    }

    #[test]
    fn single_writer_reaches_color_attachment_layout() {
        let mut graph = RgGraph::new();
        let tex = graph.create_texture("target", 64, 64, TextureFormat::Rgba8);
        graph
            .add_pass("draw", 0)
            .unwrap()
            .write(tex, RgLoadOp::Clear, RgStoreOp::Store);
        assert!(graph.compile());

        let plan = graph.plan_transitions();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].len(), 1);

        let t = plan[0][0];
        assert_eq!(t.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(t.new_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(t.dst_access, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(
            t.dst_stage,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(
            graph.resource_layout(tex),
            Some(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        );
    }

    #[test]
    fn write_then_read_transitions_from_tracked_state() {
        let mut graph = RgGraph::new();
        let tex = graph.create_texture("ping", 64, 64, TextureFormat::Rgba8);
        graph
            .add_pass("produce", 0)
            .unwrap()
            .write(tex, RgLoadOp::Clear, RgStoreOp::Store);
        graph.add_pass("consume", 0).unwrap().read(tex);
        assert!(graph.compile());

        let plan = graph.plan_transitions();
        let write = plan[0][0];
        let read = plan[1][0];

        assert_eq!(write.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(write.new_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        // the second use starts from the recorded state, not UNDEFINED
        assert_eq!(read.old_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(read.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(read.src_access, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(read.dst_access, vk::AccessFlags::SHADER_READ);
    }

    #[test]
    fn depth_usage_maps_to_depth_state() {
        let mut graph = RgGraph::new();
        let depth = graph.create_texture("depth", 64, 64, TextureFormat::D32);
        graph
            .add_pass("draw", 0)
            .unwrap()
            .set_depth(depth, RgLoadOp::Clear, RgStoreOp::DontCare);
        assert!(graph.compile());

        let plan = graph.plan_transitions();
        let t = plan[0][0];
        assert!(t.is_depth);
        assert_eq!(
            t.new_layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
        assert_eq!(
            t.dst_access,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        );
        assert_eq!(
            t.dst_stage,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
        );
    }

    #[test]
    fn pass_user_data_is_zeroed_and_sized() {
        let mut graph = RgGraph::new();
        let mut builder = graph.add_pass("with-data", 16).unwrap();
        let data = builder.user_data();
        assert_eq!(data.len(), 16);
        assert!(data.iter().all(|&b| b == 0));
    }
}
