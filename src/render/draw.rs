//! Indirect draw recording.
//!
//! One render pass per call. The early opaque pass clears both
//! attachments; every later pass loads them. Draws are indexed and
//! count-driven: the GPU-written count caps how many of the indirect
//! records are consumed, so slots past the count are never read.

use super::culling::{CullPhase, PassKind};
use super::resources::SceneBuffers;
use super::IndirectDraw;

/// Color attachment format.
pub const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

/// Depth attachment format.
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Reversed depth: the clear value is the far plane.
pub const DEPTH_CLEAR: f32 = 0.0;

/// Offscreen color and depth attachments at the draw extent.
pub struct RenderAttachments {
    /// HDR color attachment, sampled by the composite pass.
    pub color: wgpu::Texture,
    /// View of the color attachment.
    pub color_view: wgpu::TextureView,
    /// Depth attachment, read by the pyramid reduction.
    pub depth: wgpu::Texture,
    /// View of the depth attachment.
    pub depth_view: wgpu::TextureView,
    /// Attachment extent.
    pub extent: (u32, u32),
}

impl RenderAttachments {
    /// Create both attachments at `extent`.
    pub fn new(device: &wgpu::Device, extent: (u32, u32)) -> Self {
        let color = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Color Attachment"),
            size: wgpu::Extent3d {
                width: extent.0,
                height: extent.1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOR_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let color_view = color.create_view(&wgpu::TextureViewDescriptor::default());

        let depth = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Depth Attachment"),
            size: wgpu::Extent3d {
                width: extent.0,
                height: extent.1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            color,
            color_view,
            depth,
            depth_view,
            extent,
        }
    }
}

/// Owns the geometry pipelines and records indirect draw passes.
pub struct DrawRecorder {
    geometry_layout: wgpu::BindGroupLayout,
    opaque_pipeline: wgpu::RenderPipeline,
    post_pipeline: wgpu::RenderPipeline,
}

impl DrawRecorder {
    /// Create the opaque and post geometry pipelines. The texture
    /// table layout is sized at upload time, which is why the recorder
    /// is built alongside the scene.
    pub fn new(device: &wgpu::Device, texture_table_layout: &wgpu::BindGroupLayout) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Geometry Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/geometry.wgsl").into()),
        });

        let geometry_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Geometry Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                geometry_storage_entry(1, wgpu::ShaderStages::VERTEX), // vertices
                geometry_storage_entry(2, wgpu::ShaderStages::VERTEX), // render objects
                geometry_storage_entry(3, wgpu::ShaderStages::VERTEX), // transforms
                geometry_storage_entry(4, wgpu::ShaderStages::FRAGMENT), // materials
                geometry_storage_entry(5, wgpu::ShaderStages::VERTEX), // surfaces
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Geometry Pipeline Layout"),
            bind_group_layouts: &[&geometry_layout, texture_table_layout],
            push_constant_ranges: &[],
        });

        let make_pipeline = |label: &str, blend: Option<wgpu::BlendState>, depth_write: bool| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some("vs_main"),
                    // Vertices are pulled from the storage buffer.
                    buffers: &[],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: COLOR_FORMAT,
                        blend,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: Some(wgpu::Face::Back),
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: depth_write,
                    // Reversed depth.
                    depth_compare: wgpu::CompareFunction::Greater,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        };

        let opaque_pipeline = make_pipeline("Geometry Opaque Pipeline", None, true);
        let post_pipeline = make_pipeline(
            "Geometry Post Pipeline",
            Some(wgpu::BlendState::ALPHA_BLENDING),
            false,
        );

        Self {
            geometry_layout,
            opaque_pipeline,
            post_pipeline,
        }
    }

    /// Layout of the geometry bind group (group 0).
    #[inline]
    pub fn geometry_layout(&self) -> &wgpu::BindGroupLayout {
        &self.geometry_layout
    }

    /// Record one draw pass consuming the culling output.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        attachments: &RenderAttachments,
        scene: &SceneBuffers,
        slot: usize,
        phase: CullPhase,
        pass_kind: PassKind,
        clear_color: wgpu::Color,
        draw_count: u32,
    ) {
        let clears = phase == CullPhase::Early && pass_kind == PassKind::Opaque;

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(match (phase, pass_kind) {
                (CullPhase::Early, _) => "Early Draw Pass",
                (CullPhase::Late, PassKind::Opaque) => "Late Draw Pass",
                (CullPhase::Late, PassKind::Post) => "Post Draw Pass",
            }),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &attachments.color_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: if clears {
                        wgpu::LoadOp::Clear(clear_color)
                    } else {
                        wgpu::LoadOp::Load
                    },
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &attachments.depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: if clears {
                        wgpu::LoadOp::Clear(DEPTH_CLEAR)
                    } else {
                        wgpu::LoadOp::Load
                    },
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        // wgpu's NDC is already y-up, so no negated-viewport flip is
        // needed; the viewport is plain full-extent.
        let (width, height) = attachments.extent;
        pass.set_viewport(0.0, 0.0, width as f32, height as f32, 0.0, 1.0);
        pass.set_scissor_rect(0, 0, width, height);

        pass.set_pipeline(match pass_kind {
            PassKind::Opaque => &self.opaque_pipeline,
            PassKind::Post => &self.post_pipeline,
        });
        pass.set_bind_group(0, &scene.geometry_bind_groups[slot], &[]);
        pass.set_bind_group(1, &scene.texture_table.bind_group, &[]);

        // Cluster path consumes per-meshlet task records indexing into
        // the packed meshlet streams; otherwise one record slot per
        // object over the shared index buffer. Both are capped by the
        // GPU-written count.
        let (records, max_count) = if scene.cluster_path {
            pass.set_index_buffer(
                scene.meshlet_data_buffer.slice(..),
                wgpu::IndexFormat::Uint32,
            );
            (&scene.task_buffer, scene.meshlet_count.max(1))
        } else {
            pass.set_index_buffer(scene.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            (&scene.indirect_buffer, draw_count)
        };
        pass.multi_draw_indexed_indirect_count(
            records,
            IndirectDraw::DRAW_FIELD_OFFSET,
            &scene.count_buffer,
            0,
            max_count,
        );
    }
}

fn geometry_storage_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}
