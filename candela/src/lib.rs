// The Candela renderer
//
// A Vulkan backend for data-bound 2D interfaces and node editors.
// The upper layers speak in Streams, RenderCommandLists and graph
// descriptions; everything ash-flavored stays below the
// RendererBackend trait.

#![allow(non_camel_case_types)]

#[macro_use]
extern crate memoffset;

pub mod backend;
pub mod cgraph;
mod descpool;
mod device;
mod display;
mod instance;
pub mod list;
pub mod pipeline;
pub mod platform;
mod renderer;
pub mod rgraph;
pub mod stream;

mod compute;

pub use backend::RendererBackend;
pub use cgraph::{ComputeDoubleBuffer, ComputeGraph, ComputePass};
pub use list::{
    GpuInstanceData, PushStage, RenderCommand, RenderCommandList, Vtx, INSTANCE_DATA_SIZE,
    LEGACY_UI_PIPELINE, VTX_STRIDE,
};
pub use pipeline::{PipelineLayoutKind, TextureFormat};
pub use platform::WindowSystem;
pub use renderer::VulkanRenderer;
pub use rgraph::{RgGraph, RgLoadOp, RgResourceHandle, RgStoreOp};
pub use stream::{Stream, StreamType};

use std::sync::Arc;
use thiserror::Error;

/// Candela errors
///
/// The recoverable swapchain outcomes get their own variants so the
/// frame loop can match on them; everything else is a hard failure
/// carrying enough text to act on.
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum CandelaError {
    #[error("Operation timed out")]
    TIMEOUT,
    #[error("Operation is not ready")]
    NOT_READY,
    #[error("Swapchain is out of date and must be recreated")]
    OUT_OF_DATE,
    #[error("The device was lost and must be re-initialized")]
    DEVICE_LOST,
    #[error("Vulkan surface does not support the required usage")]
    VK_SURF_NOT_SUPPORTED,
    #[error("Vulkan device does not support the required extensions")]
    VK_NOT_ALL_EXTENSIONS_AVAILABLE,
    #[error("Could not create the Vulkan swapchain")]
    COULD_NOT_CREATE_SWAPCHAIN,
    #[error("Could not create a Vulkan image")]
    COULD_NOT_CREATE_IMAGE,
    #[error("Could not create a Vulkan buffer")]
    COULD_NOT_CREATE_BUFFER,
    #[error("Could not acquire the next swapchain image")]
    COULD_NOT_ACQUIRE_NEXT_IMAGE,
    #[error("Presentation failed")]
    PRESENT_FAILED,
    #[error("Queue submission failed")]
    SUBMIT_FAILED,
    #[error("No suitable memory type available")]
    OUT_OF_MEMORY,
    #[error("Unsupported surface format")]
    INVALID_FORMAT,
    #[error("The device does not expose a compute queue")]
    NO_COMPUTE,
    #[error("Recovery after device loss failed")]
    RECOVERY_FAILED,
    #[error("Invalid operation or handle")]
    INVALID,
}

pub type Result<T> = std::result::Result<T, CandelaError>;

/// Format a fatal Vulkan result for logging.
///
/// Recoverable results never reach this; anything that does carries
/// the raw VkResult name plus a short human description.
pub fn vk_fatal_msg(what: &str, res: ash::vk::Result) -> String {
    format!("{}: {:?} ({})", what, res, res)
}

/// Parameters for creating a renderer backend
///
/// Built with `CreateInfo::builder()`. The window system hooks and the
/// shader blobs are retained by the backend so that device-loss
/// recovery can re-run the full init sequence.
pub struct CreateInfo {
    /// Platform callbacks used for surface creation and sizing
    pub window_system: Arc<dyn WindowSystem>,
    /// Vertex shader SPIR-V for the default UI pipeline
    pub vert_spv: Vec<u8>,
    /// Fragment shader SPIR-V for the default UI pipeline
    pub frag_spv: Vec<u8>,
    /// Shaders for the legacy 9-float vertex path. Empty blobs reuse
    /// the default shaders.
    pub legacy_vert_spv: Vec<u8>,
    pub legacy_frag_spv: Vec<u8>,
    /// Prebuilt single-channel font atlas and its dimensions
    pub font_pixels: Vec<u8>,
    pub font_width: u32,
    pub font_height: u32,
    /// Enable the Vulkan validation layer
    pub enable_validation: bool,
}

impl CreateInfo {
    pub fn builder(window_system: Arc<dyn WindowSystem>) -> CreateInfoBuilder {
        CreateInfoBuilder {
            info: CreateInfo {
                window_system: window_system,
                vert_spv: Vec::new(),
                frag_spv: Vec::new(),
                legacy_vert_spv: Vec::new(),
                legacy_frag_spv: Vec::new(),
                font_pixels: Vec::new(),
                font_width: 0,
                font_height: 0,
                enable_validation: cfg!(debug_assertions),
            },
        }
    }
}

pub struct CreateInfoBuilder {
    info: CreateInfo,
}

impl CreateInfoBuilder {
    pub fn vert_spv(mut self, spv: Vec<u8>) -> Self {
        self.info.vert_spv = spv;
        self
    }

    pub fn frag_spv(mut self, spv: Vec<u8>) -> Self {
        self.info.frag_spv = spv;
        self
    }

    pub fn legacy_shaders(mut self, vert: Vec<u8>, frag: Vec<u8>) -> Self {
        self.info.legacy_vert_spv = vert;
        self.info.legacy_frag_spv = frag;
        self
    }

    pub fn font_atlas(mut self, pixels: Vec<u8>, width: u32, height: u32) -> Self {
        assert_eq!(pixels.len(), (width * height) as usize);
        self.info.font_pixels = pixels;
        self.info.font_width = width;
        self.info.font_height = height;
        self
    }

    pub fn enable_validation(mut self, enable: bool) -> Self {
        self.info.enable_validation = enable;
        self
    }

    pub fn build(self) -> CreateInfo {
        self.info
    }
}
