//! # Core Module
//!
//! Device bring-up, surface management and the per-frame ring of
//! view-uniform slots.

mod context;
mod frame;

pub use context::{Context, ContextError};
pub use frame::{FrameRing, FrameSlot, FRAMES_IN_FLIGHT};

/// Render configuration options.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Power preference for GPU selection.
    pub power_preference: wgpu::PowerPreference,
    /// Desired present mode; FIFO is used when unsupported.
    pub present_mode: wgpu::PresentMode,
    /// Install API validation and route messages through `log`.
    pub validation: bool,
    /// Enable hierarchical-depth occlusion culling in the late pass.
    pub occlusion_culling: bool,
    /// Enable level-of-detail selection in the culling shaders.
    pub lod_selection: bool,
    /// Screen-space error threshold for LOD selection (pixels).
    pub lod_error_threshold: f32,
    /// Clear color of the early opaque pass.
    pub clear_color: wgpu::Color,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            present_mode: wgpu::PresentMode::Mailbox,
            validation: cfg!(debug_assertions),
            occlusion_culling: true,
            lod_selection: true,
            lod_error_threshold: 2.0,
            clear_color: wgpu::Color {
                r: 0.1,
                g: 0.2,
                b: 0.3,
                a: 0.0,
            },
        }
    }
}
