// Recorded render commands
//
// A RenderCommandList is the in-process wire format between the UI
// translation layer and the backend. Commands execute in the order
// they were recorded; nothing here touches Vulkan directly.

use cgmath::Matrix4;

use crate::stream::BufferHandle;

/// Stride of the legacy UI vertex: pos.xy, uv, use_tex, rgba
pub const VTX_STRIDE: usize = 36;

/// Well-known pipeline id selecting the built-in legacy 9-float
/// vertex pipeline in BindPipeline. Id 0 is the default instanced
/// pipeline; ids from graphics_pipeline_create start at 1.
pub const LEGACY_UI_PIPELINE: u32 = u32::MAX;

/// Legacy UI vertex for the pre-triangulated quad path
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Vtx {
    pub pos: [f32; 2],
    pub uv: [f32; 2],
    pub use_tex: f32,
    pub color: [f32; 4],
}

/// Size in bytes of one GpuInstanceData record
pub const INSTANCE_DATA_SIZE: usize = 160;

/// Per-quad instance record for the default pipeline.
///
/// Layout is std430-tight: mat4 (column-major) followed by six vec4s.
/// The shader discards fragments outside clip_rect (screen space).
#[repr(C)]
#[derive(Clone, Copy)]
pub struct GpuInstanceData {
    pub model: Matrix4<f32>,
    pub color: [f32; 4],
    pub uv_rect: [f32; 4],
    pub params_0: [f32; 4],
    pub params_1: [f32; 4],
    pub clip_rect: [f32; 4],
}

impl GpuInstanceData {
    pub fn as_bytes(instances: &[GpuInstanceData]) -> &[u8] {
        unsafe {
            std::slice::from_raw_parts(
                instances.as_ptr() as *const u8,
                instances.len() * INSTANCE_DATA_SIZE,
            )
        }
    }
}

bitflags::bitflags! {
    /// Which shader stages a push constant range reaches
    pub struct PushStage: u32 {
        const VERTEX = 1;
        const FRAGMENT = 2;
        const COMPUTE = 4;
    }
}

/// One recorded command. The backend consumes these in order.
#[derive(Clone, Debug)]
pub enum RenderCommand {
    /// Bind pipeline `id`; 0 selects the built-in default UI pipeline
    BindPipeline { id: u32 },
    /// Latch a pending SSBO binding for Set 1 at `slot`. Takes effect
    /// at the next draw.
    BindSsbo { slot: u32, buffer: BufferHandle },
    BindVertexBuffer { buffer: BufferHandle },
    BindIndexBuffer { buffer: BufferHandle },
    /// Inline push constant bytes for the currently bound layout
    PushConstants { stages: PushStage, data: Vec<u8> },
    SetViewport {
        x: f32,
        y: f32,
        w: f32,
        h: f32,
        min_depth: f32,
        max_depth: f32,
    },
    SetScissor { x: i32, y: i32, w: u32, h: u32 },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
}

/// An ordered sequence of commands making up one frame
pub struct RenderCommandList {
    cmds: Vec<RenderCommand>,
}

impl RenderCommandList {
    pub fn new() -> Self {
        Self { cmds: Vec::new() }
    }

    pub fn record(&mut self, cmd: RenderCommand) {
        self.cmds.push(cmd);
    }

    pub fn bind_pipeline(&mut self, id: u32) {
        self.record(RenderCommand::BindPipeline { id });
    }

    pub fn bind_ssbo(&mut self, slot: u32, buffer: BufferHandle) {
        self.record(RenderCommand::BindSsbo { slot, buffer });
    }

    pub fn push_constants<T: Copy>(&mut self, stages: PushStage, data: &T) {
        let bytes = unsafe {
            std::slice::from_raw_parts(data as *const T as *const u8, std::mem::size_of::<T>())
        }
        .to_vec();
        self.record(RenderCommand::PushConstants {
            stages: stages,
            data: bytes,
        });
    }

    pub fn draw_indexed(&mut self, index_count: u32, instance_count: u32) {
        self.record(RenderCommand::DrawIndexed {
            index_count: index_count,
            instance_count: instance_count,
            first_index: 0,
            vertex_offset: 0,
            first_instance: 0,
        });
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.record(RenderCommand::Draw {
            vertex_count: vertex_count,
            instance_count: instance_count,
            first_vertex: 0,
            first_instance: 0,
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &RenderCommand> {
        self.cmds.iter()
    }

    pub fn len(&self) -> usize {
        self.cmds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cmds.is_empty()
    }

    pub fn clear(&mut self) {
        self.cmds.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::SquareMatrix;

    #[test]
    fn instance_data_layout() {
        assert_eq!(std::mem::size_of::<GpuInstanceData>(), INSTANCE_DATA_SIZE);
        // mat4 + 6 * vec4
        assert_eq!(INSTANCE_DATA_SIZE, 64 + 6 * 16);
    }

    #[test]
    fn vtx_stride() {
        assert_eq!(std::mem::size_of::<Vtx>(), VTX_STRIDE);
    }

    #[test]
    fn instance_bytes_length() {
        let inst = GpuInstanceData {
            model: Matrix4::identity(),
            color: [1.0; 4],
            uv_rect: [0.0; 4],
            params_0: [0.0; 4],
            params_1: [0.0; 4],
            clip_rect: [0.0; 4],
        };
        let arr = [inst, inst];
        assert_eq!(GpuInstanceData::as_bytes(&arr).len(), 2 * INSTANCE_DATA_SIZE);
    }

    #[test]
    fn commands_keep_order() {
        let mut list = RenderCommandList::new();
        list.bind_pipeline(0);
        list.bind_ssbo(1, 7);
        list.draw_indexed(6, 10);

        let kinds: Vec<_> = list.iter().collect();
        assert!(matches!(kinds[0], RenderCommand::BindPipeline { id: 0 }));
        assert!(matches!(
            kinds[1],
            RenderCommand::BindSsbo { slot: 1, buffer: 7 }
        ));
        assert!(matches!(
            kinds[2],
            RenderCommand::DrawIndexed {
                index_count: 6,
                instance_count: 10,
                ..
            }
        ));
    }
}
