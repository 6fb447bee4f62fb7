//! # Arken - GPU-Driven Rasterization Engine
//!
//! Arken renders large static scenes (hundreds of thousands of draw calls)
//! by moving visibility decisions entirely onto the GPU. Compute shaders
//! perform two-phase frustum and occlusion culling against a hierarchical
//! depth pyramid, select levels of detail, and emit indirect draw commands
//! that the host never reads back.
//!
//! ## Frame pipeline
//!
//! 1. **Upload**: Scene arrays (vertices, indices, surfaces, render objects,
//!    transforms, materials, meshlets) are staged and copied to device-local
//!    buffers in a single submission.
//! 2. **Early pass**: Objects visible last frame are frustum-culled and drawn.
//! 3. **Depth pyramid**: The depth attachment is min-reduced into a mip chain.
//! 4. **Late pass**: All objects are culled against the frustum and the
//!    pyramid; newly visible objects are drawn and visibility is recorded
//!    for the next frame.
//! 5. **Post pass**: A second late cull emits transparent objects.
//! 6. **Composite**: The color attachment is blitted to the surface.
//!
//! ## Example
//!
//! ```ignore
//! use arken::prelude::*;
//!
//! let config = RenderConfig::default();
//! let mut ctx = Context::new_blocking(window, 1280, 720, &config)?;
//! let mut renderer = Renderer::new(&ctx, config);
//! renderer.upload_scene(&ctx, &scene, &textures)?;
//!
//! loop {
//!     let view = ViewData::new(&proj, &view_matrix, camera_pos, 0.1, 1000.0);
//!     let frame = DrawContext::new(view, draw_count, renderer.config());
//!     renderer.draw_frame(&mut ctx, &frame)?;
//! }
//! ```

#![warn(missing_docs)]

pub mod camera;
pub mod core;
pub mod logging;
pub mod render;
pub mod scene;
pub mod texture;

// Re-export commonly used types
pub mod prelude {
    //! Convenient re-exports of commonly used types.

    pub use crate::camera::*;
    pub use crate::core::*;
    pub use crate::render::*;
    pub use crate::scene::*;
    pub use crate::texture::*;
}

/// Engine version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const NAME: &str = "Arken";
