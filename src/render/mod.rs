//! # Render Module
//!
//! The GPU-driven frame pipeline: static resource upload, the depth
//! pyramid, the two-phase cull dispatcher, the indirect draw recorder
//! and the per-frame driver that sequences them.

mod composite;
mod culling;
mod draw;
mod driver;
mod pyramid;
mod resources;

pub use composite::Compositor;
pub use culling::{CullDispatcher, CullPhase, CullPushConstants, PassKind, select_lod, workgroup_count};
pub use draw::{DrawRecorder, RenderAttachments};
pub use driver::Renderer;
pub use pyramid::{mip_count, previous_power_of_two, pyramid_extent, PyramidGenerator};
pub use resources::{SceneBuffers, UploadError};

use crate::camera::ViewData;
use crate::core::RenderConfig;
use crate::scene::SceneError;
use crate::texture::TextureError;
use bytemuck::{Pod, Zeroable};
use thiserror::Error;

/// One indirect draw record (20 bytes), written by the culling shaders
/// and consumed by the count-driven indirect draw.
///
/// The object id rides in `first_instance`; the vertex shader reads it
/// back through the instance index builtin. Records are tightly packed,
/// so the draw stride equals the record size.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct IndirectDraw {
    /// Number of indices of the selected LOD.
    pub index_count: u32,
    /// Always 1.
    pub instance_count: u32,
    /// First index of the selected LOD.
    pub first_index: u32,
    /// Base vertex, always 0; vertices are pulled by global index.
    pub base_vertex: i32,
    /// The render-object id.
    pub first_instance: u32,
}

impl IndirectDraw {
    /// Size of a record in bytes; also the indirect draw stride.
    pub const SIZE: usize = 20;

    /// Byte offset of the draw fields inside a record.
    pub const DRAW_FIELD_OFFSET: u64 = 0;
}

/// Per-frame input handed to [`Renderer::draw_frame`].
#[derive(Debug, Clone)]
pub struct DrawContext {
    /// Camera state mirrored into the view uniform. The frame driver
    /// patches the pyramid extent and LOD target before upload.
    pub view: ViewData,
    /// Number of render objects to consider; clamped to the uploaded
    /// object count.
    pub draw_count: u32,
    /// Run the hierarchical-depth occlusion test in the late pass.
    /// Seeded from [`RenderConfig::occlusion_culling`]; overridable
    /// per frame.
    pub occlusion_culling: bool,
    /// Run LOD selection in the culling shaders. Seeded from
    /// [`RenderConfig::lod_selection`]; overridable per frame.
    pub lod_selection: bool,
    /// Request the pyramid debug view. The debug blit is disabled;
    /// the request is logged and otherwise ignored.
    pub debug_pyramid: bool,
    /// Keep culling data from the previous frame while the matrices
    /// keep moving, to inspect culling from outside the frozen frustum.
    pub freeze_frustum: bool,
}

impl DrawContext {
    /// Draw context with the culling toggles taken from the render
    /// configuration and debug paths off.
    pub fn new(view: ViewData, draw_count: u32, config: &RenderConfig) -> Self {
        Self {
            view,
            draw_count,
            occlusion_culling: config.occlusion_culling,
            lod_selection: config.lod_selection,
            debug_pyramid: false,
            freeze_frustum: false,
        }
    }
}

/// Per-frame statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameStats {
    /// Frames submitted since startup.
    pub frame: u64,
    /// Objects handed to the culling shaders last frame.
    pub draw_count: u32,
    /// Frames skipped while the window was minimized.
    pub suspended_frames: u64,
    /// Surface reconfigurations caused by resizes or lost surfaces.
    pub surface_rebuilds: u32,
}

/// Errors surfaced by the renderer.
#[derive(Error, Debug)]
pub enum RenderError {
    /// Scene validation failed before upload.
    #[error("scene validation failed: {0}")]
    Scene(#[from] SceneError),

    /// Static buffer upload failed.
    #[error("upload failed: {0}")]
    Upload(#[from] UploadError),

    /// A texture payload could not be uploaded.
    #[error("texture upload failed: {0}")]
    Texture(#[from] TextureError),

    /// A frame was requested before a scene was uploaded.
    #[error("no scene uploaded")]
    NoScene,

    /// The device ran out of memory acquiring a surface texture.
    #[error("device out of memory")]
    OutOfMemory,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::Zeroable;

    #[test]
    fn test_indirect_record_layout() {
        assert_eq!(std::mem::size_of::<IndirectDraw>(), IndirectDraw::SIZE);
        assert_eq!(std::mem::offset_of!(IndirectDraw, index_count), 0);
        assert_eq!(std::mem::offset_of!(IndirectDraw, first_instance), 16);
    }

    #[test]
    fn test_draw_context_seeds_from_config() {
        let config = RenderConfig {
            occlusion_culling: false,
            lod_selection: true,
            ..Default::default()
        };
        let context = DrawContext::new(ViewData::zeroed(), 0, &config);
        assert!(!context.occlusion_culling);
        assert!(context.lod_selection);
        assert!(!context.debug_pyramid);
        assert!(!context.freeze_frustum);
    }
}
