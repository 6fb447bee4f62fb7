//! Two-phase GPU culling dispatcher.
//!
//! The early phase frustum-culls objects that were visible last frame
//! so their depth is on screen before the pyramid is reduced. The late
//! phase re-culls everything against the frustum and the pyramid,
//! draws what the early phase missed and records this frame's
//! visibility. A third dispatch with the post flag routes transparent
//! objects into their own draw pass.

use super::pyramid::PyramidGenerator;
use super::resources::SceneBuffers;
use bytemuck::{Pod, Zeroable};

/// Threads per culling workgroup.
pub const CULL_WORKGROUP_SIZE: u32 = 64;

/// Culling phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullPhase {
    /// Frustum-only pass over last frame's visible set.
    Early,
    /// Frustum + occlusion pass over every object.
    Late,
}

/// Which objects a cull dispatch emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    /// Opaque objects.
    Opaque,
    /// Transparent objects, emitted by the dedicated post pass.
    Post,
}

/// Push constants of both culling pipelines (16 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CullPushConstants {
    /// Number of objects to consider.
    pub draw_count: u32,
    /// 1 when emitting transparents.
    pub post_pass: u32,
    /// 1 when the pyramid test runs.
    pub occlusion: u32,
    /// 1 when LOD selection runs.
    pub lod: u32,
}

impl CullPushConstants {
    /// Size in bytes.
    pub const SIZE: usize = 16;
}

/// Workgroups for a dispatch over `draw_count` objects. At least one
/// group is dispatched so a zero count still records a legal dispatch.
pub fn workgroup_count(draw_count: u32) -> u32 {
    draw_count.div_ceil(CULL_WORKGROUP_SIZE).max(1)
}

/// Host mirror of the shader's LOD choice: the coarsest LOD whose
/// projected error stays within the threshold. `screen_scale` folds
/// the projection term and object scale over distance into one factor.
pub fn select_lod(errors: &[f32], screen_scale: f32, threshold: f32) -> usize {
    let mut selected = 0;
    for (i, error) in errors.iter().enumerate().skip(1) {
        if error * screen_scale <= threshold {
            selected = i;
        } else {
            break;
        }
    }
    selected
}

const EARLY_SHADER: &str = if cfg!(debug_assertions) {
    include_str!("../shaders/cull_early_debug.wgsl")
} else {
    include_str!("../shaders/cull_early.wgsl")
};

const LATE_SHADER: &str = if cfg!(debug_assertions) {
    include_str!("../shaders/cull_late_debug.wgsl")
} else {
    include_str!("../shaders/cull_late.wgsl")
};

/// Owns the culling pipelines and the pyramid bind group of the late
/// phase.
pub struct CullDispatcher {
    scene_layout: wgpu::BindGroupLayout,
    pyramid_layout: wgpu::BindGroupLayout,
    early_pipeline: wgpu::ComputePipeline,
    late_pipeline: wgpu::ComputePipeline,
    pyramid_bind_group: wgpu::BindGroup,
}

impl CullDispatcher {
    /// Create the culling pipelines.
    ///
    /// `cluster_path` selects the per-meshlet emission loop at pipeline
    /// build time through a shader override.
    pub fn new(device: &wgpu::Device, cluster_path: bool, pyramid: &PyramidGenerator) -> Self {
        let scene_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Cull Scene Bind Group Layout"),
            entries: &[
                uniform_entry(0),
                storage_entry(1, true),  // render objects
                storage_entry(2, true),  // transforms
                storage_entry(3, true),  // surfaces
                storage_entry(4, false), // indirect draws
                storage_entry(5, false), // indirect count
                storage_entry(6, false), // visibility
                storage_entry(7, true),  // meshlets
                storage_entry(8, false), // task records
            ],
        });

        let pyramid_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Cull Pyramid Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
                    count: None,
                },
            ],
        });

        let push_constant_range = wgpu::PushConstantRange {
            stages: wgpu::ShaderStages::COMPUTE,
            range: 0..CullPushConstants::SIZE as u32,
        };

        let early_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Cull Early Pipeline Layout"),
            bind_group_layouts: &[&scene_layout],
            push_constant_ranges: &[push_constant_range.clone()],
        });

        let late_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Cull Late Pipeline Layout"),
            bind_group_layouts: &[&scene_layout, &pyramid_layout],
            push_constant_ranges: &[push_constant_range],
        });

        let constants = std::collections::HashMap::from([(
            "CLUSTER_PATH".to_string(),
            if cluster_path { 1.0 } else { 0.0 },
        )]);
        let compilation_options = wgpu::PipelineCompilationOptions {
            constants: &constants,
            ..Default::default()
        };

        let early_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Cull Early Shader"),
            source: wgpu::ShaderSource::Wgsl(EARLY_SHADER.into()),
        });
        let late_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Cull Late Shader"),
            source: wgpu::ShaderSource::Wgsl(LATE_SHADER.into()),
        });

        let early_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Cull Early Pipeline"),
            layout: Some(&early_layout),
            module: &early_shader,
            entry_point: Some("main"),
            compilation_options: compilation_options.clone(),
            cache: None,
        });
        let late_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Cull Late Pipeline"),
            layout: Some(&late_layout),
            module: &late_shader,
            entry_point: Some("main"),
            compilation_options,
            cache: None,
        });

        let pyramid_bind_group = create_pyramid_bind_group(device, &pyramid_layout, pyramid);

        Self {
            scene_layout,
            pyramid_layout,
            early_pipeline,
            late_pipeline,
            pyramid_bind_group,
        }
    }

    /// Layout of the scene bind group, used by the upload phase to
    /// build one bind group per frame slot.
    #[inline]
    pub fn scene_layout(&self) -> &wgpu::BindGroupLayout {
        &self.scene_layout
    }

    /// Rebind the pyramid after it was rebuilt on resize.
    pub fn rebind_pyramid(&mut self, device: &wgpu::Device, pyramid: &PyramidGenerator) {
        self.pyramid_bind_group = create_pyramid_bind_group(device, &self.pyramid_layout, pyramid);
    }

    /// Record one cull dispatch.
    ///
    /// The count buffer is cleared first; putting the clear and the
    /// dispatch on the same encoder gives the draw-read → clear-write →
    /// compute-write ordering of the indirect count.
    #[allow(clippy::too_many_arguments)]
    pub fn dispatch(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        scene: &SceneBuffers,
        slot: usize,
        phase: CullPhase,
        pass_kind: PassKind,
        occlusion: bool,
        lod: bool,
        draw_count: u32,
    ) {
        encoder.clear_buffer(&scene.count_buffer, 0, None);

        let label = match (phase, pass_kind) {
            (CullPhase::Early, _) => "Cull Early Pass",
            (CullPhase::Late, PassKind::Opaque) => "Cull Late Pass",
            (CullPhase::Late, PassKind::Post) => "Cull Post Pass",
        };

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: None,
        });

        match phase {
            CullPhase::Early => pass.set_pipeline(&self.early_pipeline),
            CullPhase::Late => {
                pass.set_pipeline(&self.late_pipeline);
                pass.set_bind_group(1, &self.pyramid_bind_group, &[]);
            }
        }
        pass.set_bind_group(0, &scene.cull_bind_groups[slot], &[]);

        pass.set_push_constants(
            0,
            bytemuck::bytes_of(&CullPushConstants {
                draw_count,
                post_pass: (pass_kind == PassKind::Post) as u32,
                occlusion: occlusion as u32,
                lod: lod as u32,
            }),
        );
        pass.dispatch_workgroups(workgroup_count(draw_count), 1, 1);
    }
}

fn create_pyramid_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    pyramid: &PyramidGenerator,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Cull Pyramid Bind Group"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(pyramid.view()),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(pyramid.sampler()),
            },
        ],
    })
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_constant_size() {
        assert_eq!(
            std::mem::size_of::<CullPushConstants>(),
            CullPushConstants::SIZE
        );
    }

    #[test]
    fn test_workgroup_count() {
        assert_eq!(workgroup_count(0), 1);
        assert_eq!(workgroup_count(1), 1);
        assert_eq!(workgroup_count(64), 1);
        assert_eq!(workgroup_count(65), 2);
        assert_eq!(workgroup_count(1_000_000), 15_625);
    }

    #[test]
    fn test_lod_selection_threshold() {
        // Error bounds {0, 1, 4} at a projected scale of 1.5 against a
        // threshold of 2: LOD 1 projects to 1.5 and stays in budget,
        // LOD 2 projects to 6 and does not.
        assert_eq!(select_lod(&[0.0, 1.0, 4.0], 1.5, 2.0), 1);
    }

    #[test]
    fn test_lod_selection_bounds() {
        // A tiny projected scale picks the coarsest LOD.
        assert_eq!(select_lod(&[0.0, 1.0, 4.0], 0.01, 2.0), 2);
        // A huge projected scale keeps LOD 0.
        assert_eq!(select_lod(&[0.0, 1.0, 4.0], 100.0, 2.0), 0);
        // A single LOD is always LOD 0.
        assert_eq!(select_lod(&[0.0], 1.0, 2.0), 0);
    }
}
