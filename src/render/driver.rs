//! Per-frame driver.
//!
//! Sequences one frame: early cull, early draw, pyramid reduction,
//! late cull, late draw, post cull, post draw, composite, present.
//! Also owns surface recreation and the minimized-window side channel.

use super::composite::Compositor;
use super::culling::{CullDispatcher, CullPhase, PassKind};
use super::draw::{DrawRecorder, RenderAttachments};
use super::pyramid::PyramidGenerator;
use super::resources::{SceneBuffers, TextureTable};
use super::{DrawContext, FrameStats, RenderError};
use crate::core::{Context, FrameRing, RenderConfig};
use crate::scene::SceneData;
use crate::texture::{create_scene_sampler, SceneTexture, TextureStats, TextureUploader};

/// A scene bound to its culling and drawing pipelines. The texture
/// table sizes the geometry pipeline layout, so all three are built
/// together at upload time.
struct LoadedScene {
    culler: CullDispatcher,
    drawer: DrawRecorder,
    buffers: SceneBuffers,
}

/// The GPU-driven renderer.
///
/// Lifetimes are strictly ordered: the [`Context`] outlives the
/// renderer, which outlives its loaded scene; GPU resources only hold
/// indices or references they never free through.
pub struct Renderer {
    config: RenderConfig,
    ring: FrameRing,
    attachments: RenderAttachments,
    pyramid: PyramidGenerator,
    compositor: Compositor,
    uploader: TextureUploader,
    scene: Option<LoadedScene>,
    stats: FrameStats,
    pending_resize: Option<(u32, u32)>,
    suspended: bool,
}

impl Renderer {
    /// Create the renderer's frame ring, attachments, depth pyramid
    /// and composite pass. Scene-dependent pipelines are built by
    /// [`Renderer::upload_scene`].
    pub fn new(ctx: &Context, config: RenderConfig) -> Self {
        let extent = (ctx.width, ctx.height);
        let ring = FrameRing::new(&ctx.device);
        let attachments = RenderAttachments::new(&ctx.device, extent);
        let pyramid = PyramidGenerator::new(&ctx.device, extent, &attachments.depth_view);
        let compositor = Compositor::new(&ctx.device, ctx.surface_format, &attachments);
        let uploader = TextureUploader::new(&ctx.device);

        Self {
            config,
            ring,
            attachments,
            pyramid,
            compositor,
            uploader,
            scene: None,
            stats: FrameStats::default(),
            pending_resize: None,
            suspended: false,
        }
    }

    /// Validate and upload a scene plus its textures.
    ///
    /// Texture uploads are transactional: a failed payload aborts the
    /// upload without growing the table. With no textures at all, a
    /// one-texel white fallback keeps the table non-empty.
    pub fn upload_scene(
        &mut self,
        ctx: &Context,
        mut scene: SceneData,
        textures: Vec<TextureStats>,
    ) -> Result<(), RenderError> {
        scene.validate()?;
        scene.propagate_material_flags();

        let mut uploaded: Vec<SceneTexture> = Vec::with_capacity(textures.len().max(1));
        for stats in &textures {
            uploaded.push(self.uploader.upload(&ctx.device, &ctx.queue, stats)?);
        }
        if uploaded.is_empty() {
            log::info!("scene has no textures, adding a white fallback");
            uploaded.push(self.uploader.upload(
                &ctx.device,
                &ctx.queue,
                &TextureStats {
                    width: 1,
                    height: 1,
                    mip_count: 1,
                    format: wgpu::TextureFormat::Rgba8Unorm,
                    data: vec![255; 4],
                },
            )?);
        }

        let sampler = create_scene_sampler(&ctx.device);
        let table = TextureTable::new(&ctx.device, uploaded, sampler);

        let cluster_path = ctx.cluster_path && scene.has_clusters();
        let culler = CullDispatcher::new(&ctx.device, cluster_path, &self.pyramid);
        let drawer = DrawRecorder::new(&ctx.device, &table.layout);
        let buffers = SceneBuffers::new(
            &ctx.device,
            &ctx.queue,
            &scene,
            culler.scene_layout(),
            drawer.geometry_layout(),
            table,
            &self.ring,
        )?;

        self.scene = Some(LoadedScene {
            culler,
            drawer,
            buffers,
        });
        Ok(())
    }

    /// Report a window resize. A zero-sized window suspends the frame
    /// loop until a non-zero size arrives; the actual rebuild happens
    /// at the start of the next frame.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            log::info!("window minimized, suspending frames");
            self.suspended = true;
        } else {
            self.suspended = false;
            self.pending_resize = Some((width, height));
        }
    }

    /// The render configuration, the baseline for per-frame
    /// [`DrawContext`] toggles.
    #[inline]
    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Frame statistics.
    #[inline]
    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    /// Extent of the depth pyramid at mip 0.
    #[inline]
    pub fn pyramid_extent(&self) -> (u32, u32) {
        self.pyramid.extent()
    }

    /// Whether the frame loop is suspended by a minimized window.
    #[inline]
    pub fn suspended(&self) -> bool {
        self.suspended
    }

    /// Record, submit and present one frame.
    ///
    /// Acquire failures are not fatal: an out-of-date or lost surface
    /// is reconfigured and the frame skipped; a timeout is logged and
    /// the next iteration retries.
    pub fn draw_frame(&mut self, ctx: &mut Context, frame: &DrawContext) -> Result<(), RenderError> {
        if self.suspended {
            self.stats.suspended_frames += 1;
            return Ok(());
        }
        if let Some((width, height)) = self.pending_resize.take() {
            self.apply_resize(ctx, width, height);
        }

        let scene = self.scene.as_ref().ok_or(RenderError::NoScene)?;

        let mut draw_count = frame.draw_count;
        if draw_count > scene.buffers.object_count {
            log::warn!(
                "draw count {} exceeds uploaded object count {}, clamping",
                draw_count,
                scene.buffers.object_count
            );
            draw_count = scene.buffers.object_count;
        }

        let slot = self.ring.index();
        let view_buffer = &self.ring.current().view_buffer;
        if frame.freeze_frustum {
            // Culling data stays frozen; only the matrix keeps moving
            // so the frozen frustum can be inspected from outside.
            ctx.queue
                .write_buffer(view_buffer, 0, bytemuck::bytes_of(&frame.view.proj_view));
        } else {
            let mut view = frame.view;
            let (pyramid_w, pyramid_h) = self.pyramid.extent();
            view.pyramid = [
                pyramid_w as f32,
                pyramid_h as f32,
                self.config.lod_error_threshold,
                0.0,
            ];
            ctx.queue
                .write_buffer(view_buffer, 0, bytemuck::bytes_of(&view));
        }

        if frame.debug_pyramid {
            // The pyramid debug blit is disabled.
            log::debug!("pyramid debug view requested, blit is disabled");
        }

        let surface = match ctx.get_current_texture() {
            Ok(surface) => surface,
            Err(wgpu::SurfaceError::Outdated) | Err(wgpu::SurfaceError::Lost) => {
                log::info!("surface out of date, reconfiguring");
                ctx.reconfigure();
                self.stats.surface_rebuilds += 1;
                return Ok(());
            }
            Err(wgpu::SurfaceError::Timeout) => {
                log::warn!("surface acquire timed out, skipping frame");
                return Ok(());
            }
            Err(wgpu::SurfaceError::OutOfMemory) => return Err(RenderError::OutOfMemory),
            Err(other) => {
                log::error!("surface acquire failed: {other}");
                return Ok(());
            }
        };
        let surface_view = surface
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let occlusion = frame.occlusion_culling;
        let lod = frame.lod_selection;
        let mut encoder = ctx.create_command_encoder();

        // Phase 1: draw what was visible last frame.
        scene.culler.dispatch(
            &mut encoder,
            &scene.buffers,
            slot,
            CullPhase::Early,
            PassKind::Opaque,
            occlusion,
            lod,
            draw_count,
        );
        scene.drawer.record(
            &mut encoder,
            &self.attachments,
            &scene.buffers,
            slot,
            CullPhase::Early,
            PassKind::Opaque,
            self.config.clear_color,
            draw_count,
        );

        // Reduce the early depth into the pyramid.
        self.pyramid.generate(&mut encoder);

        // Phase 2: cull everything against frustum + pyramid, draw the
        // remainder and record this frame's visibility.
        scene.culler.dispatch(
            &mut encoder,
            &scene.buffers,
            slot,
            CullPhase::Late,
            PassKind::Opaque,
            occlusion,
            lod,
            draw_count,
        );
        scene.drawer.record(
            &mut encoder,
            &self.attachments,
            &scene.buffers,
            slot,
            CullPhase::Late,
            PassKind::Opaque,
            self.config.clear_color,
            draw_count,
        );

        // Transparents get one more cull + draw.
        scene.culler.dispatch(
            &mut encoder,
            &scene.buffers,
            slot,
            CullPhase::Late,
            PassKind::Post,
            occlusion,
            lod,
            draw_count,
        );
        scene.drawer.record(
            &mut encoder,
            &self.attachments,
            &scene.buffers,
            slot,
            CullPhase::Late,
            PassKind::Post,
            self.config.clear_color,
            draw_count,
        );

        self.compositor.composite(&mut encoder, &surface_view);

        ctx.submit(std::iter::once(encoder.finish()));
        surface.present();

        self.ring.advance();
        self.stats.frame += 1;
        self.stats.draw_count = draw_count;
        Ok(())
    }

    /// Present a cleared image without running the pipeline. Keeps
    /// present cadence responsive while the main loop is suspended.
    pub fn clear_frame(&mut self, ctx: &Context) -> Result<(), RenderError> {
        let surface = match ctx.get_current_texture() {
            Ok(surface) => surface,
            Err(wgpu::SurfaceError::OutOfMemory) => return Err(RenderError::OutOfMemory),
            Err(err) => {
                log::warn!("clear frame skipped, surface unavailable: {err}");
                return Ok(());
            }
        };
        let surface_view = surface
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = ctx.create_command_encoder();
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Clear Frame Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &surface_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        ctx.submit(std::iter::once(encoder.finish()));
        surface.present();

        self.ring.advance();
        self.stats.suspended_frames += 1;
        Ok(())
    }

    /// Rebuild everything an extent change touches: the surface, both
    /// attachments, the pyramid (keeping its sampler) and the bind
    /// groups referencing them. Resizing to the current extent is a
    /// no-op.
    fn apply_resize(&mut self, ctx: &mut Context, width: u32, height: u32) {
        let width = width.max(1);
        let height = height.max(1);
        if (width, height) == self.attachments.extent
            && width == ctx.width
            && height == ctx.height
        {
            return;
        }

        ctx.resize(width, height);
        let extent = (ctx.width, ctx.height);
        self.attachments = RenderAttachments::new(&ctx.device, extent);
        self.pyramid.rebuild(&ctx.device, extent, &self.attachments.depth_view);
        if let Some(scene) = &mut self.scene {
            scene.culler.rebind_pyramid(&ctx.device, &self.pyramid);
        }
        self.compositor.rebind(&ctx.device, &self.attachments);
        self.stats.surface_rebuilds += 1;
    }
}

#[cfg(test)]
mod tests {
    /// Host mirror of one frame of the two-phase visibility protocol:
    /// the early pass draws last frame's visible set, the late pass
    /// draws newly visible objects and rewrites visibility.
    fn simulate_frame(
        visibility: &mut [bool],
        in_frustum: &[bool],
        occluded: &[bool],
    ) -> (Vec<usize>, Vec<usize>) {
        let early: Vec<usize> = (0..visibility.len())
            .filter(|&i| visibility[i] && in_frustum[i])
            .collect();
        let mut late = Vec::new();
        for i in 0..visibility.len() {
            let visible_now = in_frustum[i] && !occluded[i];
            if visible_now && !visibility[i] {
                late.push(i);
            }
            visibility[i] = visible_now;
        }
        (early, late)
    }

    #[test]
    fn test_first_frame_draws_everything_late() {
        let mut visibility = vec![false, false];
        let (early, late) = simulate_frame(&mut visibility, &[true, true], &[false, false]);
        assert!(early.is_empty());
        assert_eq!(late, vec![0, 1]);
        assert_eq!(visibility, vec![true, true]);
    }

    #[test]
    fn test_steady_state_draws_early_only() {
        // An object visible last frame, still in the frustum with
        // unchanged occlusion, is drawn in the early pass.
        let mut visibility = vec![true];
        let (early, late) = simulate_frame(&mut visibility, &[true], &[false]);
        assert_eq!(early, vec![0]);
        assert!(late.is_empty());
        assert_eq!(visibility, vec![true]);
    }

    #[test]
    fn test_occluder_sequence() {
        // Near sphere occludes far sphere from the second frame on.
        let mut visibility = vec![false, false];

        // Frame 1: empty pyramid, both drawn late.
        let (early, late) = simulate_frame(&mut visibility, &[true, true], &[false, false]);
        assert!(early.is_empty());
        assert_eq!(late, vec![0, 1]);
        assert_eq!(visibility, vec![true, true]);

        // Frame 2: the early pass drew the near sphere, so the pyramid
        // now occludes the far one; the late pass rejects it.
        let (early, late) = simulate_frame(&mut visibility, &[true, true], &[false, true]);
        assert_eq!(early, vec![0, 1]);
        assert!(late.is_empty());
        assert_eq!(visibility, vec![true, false]);

        // Frame 3: only the near sphere rides the early pass.
        let (early, late) = simulate_frame(&mut visibility, &[true, true], &[false, true]);
        assert_eq!(early, vec![0]);
        assert!(late.is_empty());
    }

    #[test]
    fn test_late_pass_complements_early_pass() {
        // Occlusion off, frustum covering the scene: early and late
        // sets partition the objects.
        let mut visibility = vec![true, false, true, false, false];
        let count = visibility.len();
        let in_frustum = vec![true; count];
        let occluded = vec![false; count];
        let (early, late) = simulate_frame(&mut visibility, &in_frustum, &occluded);
        assert_eq!(early.len() + late.len(), count);
        let mut all: Vec<usize> = early.into_iter().chain(late).collect();
        all.sort_unstable();
        assert_eq!(all, (0..count).collect::<Vec<_>>());
    }

    #[test]
    fn test_object_leaving_frustum_is_forgotten() {
        let mut visibility = vec![true];
        let (early, late) = simulate_frame(&mut visibility, &[false], &[false]);
        assert!(early.is_empty());
        assert!(late.is_empty());
        assert_eq!(visibility, vec![false]);
    }
}
