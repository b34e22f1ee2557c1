// Pipeline layouts, render pass and graphics pipeline creation
//
// The three descriptor layout conventions live here:
//   Layout 0 (default UI):  Set 0 = font sampler, Set 1 = instance
//     SSBOs, Set 2 = user texture. Push constants = 64 byte view_proj,
//     vertex+fragment.
//   Layout 1 (zero-copy):   no vertex input, Set 0 = global sampler,
//     Set 1 = SSBO bindings 0..4. Push constants = 128 bytes.
//   Compute layout:         Set 0 = storage image, Set 1 = SSBOs,
//     push constants = 128 bytes, compute.

use ash::{util, vk};
use cgmath::{Vector2, Vector3};

use crate::backend::MAX_SSBO_SLOTS;
use crate::device::Device;
use crate::list::Vtx;
use crate::{CandelaError, Result};

use std::io::Cursor;

/// Texture formats exposed through the backend
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TextureFormat {
    Rgba8,
    Rgba16F,
    D32,
}

impl TextureFormat {
    pub(crate) fn as_vk(&self) -> vk::Format {
        match self {
            TextureFormat::Rgba8 => vk::Format::R8G8B8A8_UNORM,
            TextureFormat::Rgba16F => vk::Format::R16G16B16A16_SFLOAT,
            TextureFormat::D32 => vk::Format::D32_SFLOAT,
        }
    }
}

/// Which pipeline layout convention a pipeline was created against
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PipelineLayoutKind {
    Ui,
    ZeroCopy,
}

impl PipelineLayoutKind {
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(PipelineLayoutKind::Ui),
            1 => Some(PipelineLayoutKind::ZeroCopy),
            _ => None,
        }
    }
}

/// Vertex input flavor: the instanced unit quad or the legacy
/// pre-triangulated 9-float stream
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum VertexInputKind {
    QuadInstanced,
    LegacyUi,
    None,
}

/// Reference data for the unit quad that every UI instance stretches
#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct QuadVert {
    pub vertex: Vector2<f32>,
    pub tex: Vector2<f32>,
}

pub(crate) static QUAD_DATA: [QuadVert; 4] = [
    QuadVert {
        vertex: Vector2::new(0.0, 0.0),
        tex: Vector2::new(0.0, 0.0),
    },
    QuadVert {
        vertex: Vector2::new(1.0, 0.0),
        tex: Vector2::new(1.0, 0.0),
    },
    QuadVert {
        vertex: Vector2::new(0.0, 1.0),
        tex: Vector2::new(0.0, 1.0),
    },
    QuadVert {
        vertex: Vector2::new(1.0, 1.0),
        tex: Vector2::new(1.0, 1.0),
    },
];

pub(crate) static QUAD_INDICES: [Vector3<u32>; 2] =
    [Vector3::new(0, 1, 2), Vector3::new(2, 1, 3)];

/// All descriptor set layouts and pipeline layouts, created once per
/// device and shared by every pipeline.
pub(crate) struct PipelineLayouts {
    /// Set 0: one combined image sampler (the font atlas)
    pub sampler_layout: vk::DescriptorSetLayout,
    /// Set 1: MAX_SSBO_SLOTS storage buffers
    pub ssbo_layout: vk::DescriptorSetLayout,
    /// Set 2: the user texture (compute target / image)
    pub user_texture_layout: vk::DescriptorSetLayout,
    /// Compute Set 0: one storage image for compute writes
    pub compute_image_layout: vk::DescriptorSetLayout,

    pub ui_layout: vk::PipelineLayout,
    pub zero_copy_layout: vk::PipelineLayout,
    pub compute_layout: vk::PipelineLayout,
}

impl PipelineLayouts {
    fn create_sampler_layout(dev: &Device, stages: vk::ShaderStageFlags) -> vk::DescriptorSetLayout {
        let bindings = [vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .stage_flags(stages)
            .descriptor_count(1)
            .build()];
        let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);

        unsafe { dev.dev.create_descriptor_set_layout(&info, None).unwrap() }
    }

    fn create_ssbo_layout(dev: &Device, stages: vk::ShaderStageFlags) -> vk::DescriptorSetLayout {
        let mut bindings = Vec::with_capacity(MAX_SSBO_SLOTS);
        for i in 0..MAX_SSBO_SLOTS {
            bindings.push(
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(i as u32)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .stage_flags(stages)
                    .descriptor_count(1)
                    .build(),
            );
        }
        let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);

        unsafe { dev.dev.create_descriptor_set_layout(&info, None).unwrap() }
    }

    fn create_storage_image_layout(dev: &Device) -> vk::DescriptorSetLayout {
        let bindings = [vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .descriptor_count(1)
            .build()];
        let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);

        unsafe { dev.dev.create_descriptor_set_layout(&info, None).unwrap() }
    }

    pub fn new(dev: &Device) -> Self {
        let graphics_stages = vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;
        let sampler_layout = Self::create_sampler_layout(dev, vk::ShaderStageFlags::FRAGMENT);
        let ssbo_layout = Self::create_ssbo_layout(
            dev,
            graphics_stages | vk::ShaderStageFlags::COMPUTE,
        );
        let user_texture_layout =
            Self::create_sampler_layout(dev, vk::ShaderStageFlags::FRAGMENT);
        let compute_image_layout = Self::create_storage_image_layout(dev);

        unsafe {
            // Layout 0: view_proj matrix push constant
            let ui_push = [vk::PushConstantRange::builder()
                .stage_flags(graphics_stages)
                .offset(0)
                .size(64)
                .build()];
            let ui_sets = [sampler_layout, ssbo_layout, user_texture_layout];
            let ui_layout = dev
                .dev
                .create_pipeline_layout(
                    &vk::PipelineLayoutCreateInfo::builder()
                        .set_layouts(&ui_sets)
                        .push_constant_ranges(&ui_push),
                    None,
                )
                .unwrap();

            // Layout 1: vertex pulling, bigger push constant block
            let zc_push = [vk::PushConstantRange::builder()
                .stage_flags(graphics_stages)
                .offset(0)
                .size(128)
                .build()];
            let zc_sets = [sampler_layout, ssbo_layout];
            let zero_copy_layout = dev
                .dev
                .create_pipeline_layout(
                    &vk::PipelineLayoutCreateInfo::builder()
                        .set_layouts(&zc_sets)
                        .push_constant_ranges(&zc_push),
                    None,
                )
                .unwrap();

            let comp_push = [vk::PushConstantRange::builder()
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
                .offset(0)
                .size(128)
                .build()];
            let comp_sets = [compute_image_layout, ssbo_layout];
            let compute_layout = dev
                .dev
                .create_pipeline_layout(
                    &vk::PipelineLayoutCreateInfo::builder()
                        .set_layouts(&comp_sets)
                        .push_constant_ranges(&comp_push),
                    None,
                )
                .unwrap();

            Self {
                sampler_layout: sampler_layout,
                ssbo_layout: ssbo_layout,
                user_texture_layout: user_texture_layout,
                compute_image_layout: compute_image_layout,
                ui_layout: ui_layout,
                zero_copy_layout: zero_copy_layout,
                compute_layout: compute_layout,
            }
        }
    }

    pub fn pipeline_layout(&self, kind: PipelineLayoutKind) -> vk::PipelineLayout {
        match kind {
            PipelineLayoutKind::Ui => self.ui_layout,
            PipelineLayoutKind::ZeroCopy => self.zero_copy_layout,
        }
    }

    pub fn destroy(&mut self, dev: &Device) {
        unsafe {
            dev.dev.destroy_pipeline_layout(self.ui_layout, None);
            dev.dev.destroy_pipeline_layout(self.zero_copy_layout, None);
            dev.dev.destroy_pipeline_layout(self.compute_layout, None);
            dev.dev
                .destroy_descriptor_set_layout(self.sampler_layout, None);
            dev.dev.destroy_descriptor_set_layout(self.ssbo_layout, None);
            dev.dev
                .destroy_descriptor_set_layout(self.user_texture_layout, None);
            dev.dev
                .destroy_descriptor_set_layout(self.compute_image_layout, None);
        }
    }
}

/// Create the main render pass: one color attachment cleared and
/// presented, one D32 depth attachment cleared and dropped.
pub(crate) fn create_render_pass(dev: &Device, color_format: vk::Format) -> vk::RenderPass {
    let attachments = [
        vk::AttachmentDescription {
            format: color_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        },
        vk::AttachmentDescription {
            format: TextureFormat::D32.as_vk(),
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ..Default::default()
        },
    ];

    let color_refs = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };

    let subpasses = [vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)
        .depth_stencil_attachment(&depth_ref)
        .build()];

    // wait for the acquired image before writing color
    let dependencies = [vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    }];

    let info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { dev.dev.create_render_pass(&info, None).unwrap() }
}

/// Turn a SPIR-V byte blob into a shader module
pub(crate) fn create_shader_module(dev: &Device, spv: &[u8]) -> Result<vk::ShaderModule> {
    let code = util::read_spv(&mut Cursor::new(spv)).or(Err(CandelaError::INVALID))?;
    let info = vk::ShaderModuleCreateInfo::builder().code(&code);

    unsafe {
        dev.dev
            .create_shader_module(&info, None)
            .or(Err(CandelaError::INVALID))
    }
}

fn vertex_input_bindings(
    kind: VertexInputKind,
) -> (
    Vec<vk::VertexInputBindingDescription>,
    Vec<vk::VertexInputAttributeDescription>,
) {
    match kind {
        VertexInputKind::QuadInstanced => (
            vec![vk::VertexInputBindingDescription {
                binding: 0,
                stride: std::mem::size_of::<QuadVert>() as u32,
                input_rate: vk::VertexInputRate::VERTEX,
            }],
            vec![
                vk::VertexInputAttributeDescription {
                    binding: 0,
                    location: 0,
                    format: vk::Format::R32G32_SFLOAT,
                    offset: offset_of!(QuadVert, vertex) as u32,
                },
                vk::VertexInputAttributeDescription {
                    binding: 0,
                    location: 1,
                    format: vk::Format::R32G32_SFLOAT,
                    offset: offset_of!(QuadVert, tex) as u32,
                },
            ],
        ),
        VertexInputKind::LegacyUi => (
            vec![vk::VertexInputBindingDescription {
                binding: 0,
                stride: std::mem::size_of::<Vtx>() as u32,
                input_rate: vk::VertexInputRate::VERTEX,
            }],
            vec![
                vk::VertexInputAttributeDescription {
                    binding: 0,
                    location: 0,
                    format: vk::Format::R32G32_SFLOAT,
                    offset: offset_of!(Vtx, pos) as u32,
                },
                vk::VertexInputAttributeDescription {
                    binding: 0,
                    location: 1,
                    format: vk::Format::R32G32_SFLOAT,
                    offset: offset_of!(Vtx, uv) as u32,
                },
                vk::VertexInputAttributeDescription {
                    binding: 0,
                    location: 2,
                    format: vk::Format::R32_SFLOAT,
                    offset: offset_of!(Vtx, use_tex) as u32,
                },
                vk::VertexInputAttributeDescription {
                    binding: 0,
                    location: 3,
                    format: vk::Format::R32G32B32A32_SFLOAT,
                    offset: offset_of!(Vtx, color) as u32,
                },
            ],
        ),
        VertexInputKind::None => (Vec::new(), Vec::new()),
    }
}

/// Create a graphics pipeline against the main render pass.
///
/// Viewport and scissor are dynamic state, so pipelines survive
/// swapchain resizes untouched.
pub(crate) fn create_graphics_pipeline(
    dev: &Device,
    pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    vert_spv: &[u8],
    frag_spv: &[u8],
    vertex_input: VertexInputKind,
) -> Result<vk::Pipeline> {
    let vert_module = create_shader_module(dev, vert_spv)?;
    let frag_module = match create_shader_module(dev, frag_spv) {
        Ok(m) => m,
        Err(e) => {
            unsafe { dev.dev.destroy_shader_module(vert_module, None) };
            return Err(e);
        }
    };

    let entrypoint = std::ffi::CString::new("main").unwrap();
    let stages = [
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vert_module)
            .name(&entrypoint)
            .build(),
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(frag_module)
            .name(&entrypoint)
            .build(),
    ];

    let (bindings, attributes) = vertex_input_bindings(vertex_input);
    let vertex_info = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    let assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST);

    // one dynamic viewport/scissor each
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);

    let raster = vk::PipelineRasterizationStateCreateInfo::builder()
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .line_width(1.0);

    let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let depth = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(true)
        .depth_write_enable(true)
        .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL);

    // standard premultiplied-style alpha blending for UI quads
    let blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
        .blend_enable(true)
        .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
        .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::ONE)
        .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .alpha_blend_op(vk::BlendOp::ADD)
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .build()];
    let blend = vk::PipelineColorBlendStateCreateInfo::builder()
        .attachments(&blend_attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic = vk::PipelineDynamicStateCreateInfo::builder()
        .dynamic_states(&dynamic_states);

    let info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&stages)
        .vertex_input_state(&vertex_info)
        .input_assembly_state(&assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&raster)
        .multisample_state(&multisample)
        .depth_stencil_state(&depth)
        .color_blend_state(&blend)
        .dynamic_state(&dynamic)
        .layout(layout)
        .render_pass(pass)
        .subpass(0)
        .build();

    let pipeline = unsafe {
        dev.dev
            .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
            .map_err(|_| CandelaError::INVALID)
    };

    unsafe {
        dev.dev.destroy_shader_module(vert_module, None);
        dev.dev.destroy_shader_module(frag_module, None);
    }

    Ok(pipeline?[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_indices_resolve() {
        assert_eq!(PipelineLayoutKind::from_index(0), Some(PipelineLayoutKind::Ui));
        assert_eq!(
            PipelineLayoutKind::from_index(1),
            Some(PipelineLayoutKind::ZeroCopy)
        );
        assert_eq!(PipelineLayoutKind::from_index(2), None);
    }

    #[test]
    fn texture_formats_map() {
        assert_eq!(TextureFormat::Rgba8.as_vk(), vk::Format::R8G8B8A8_UNORM);
        assert_eq!(
            TextureFormat::Rgba16F.as_vk(),
            vk::Format::R16G16B16A16_SFLOAT
        );
        assert_eq!(TextureFormat::D32.as_vk(), vk::Format::D32_SFLOAT);
    }
}
