//! Hierarchical depth pyramid for occlusion culling.
//!
//! The pyramid is a min-reduced mip chain of the depth attachment.
//! Depth is reversed (1 at the near plane, 0 at infinity), so the
//! minimum over a footprint is the farthest occluder; a sphere whose
//! nearest depth is below that minimum is hidden everywhere in the
//! footprint.

use bytemuck::{Pod, Zeroable};

/// Workgroup edge of the reduction shader; dispatches are
/// `ceil(extent / 32)` per axis.
pub const REDUCE_WORKGROUP_SIZE: u32 = 32;

/// Largest power of two that is less than or equal to `v`, with a
/// floor of 1.
pub fn previous_power_of_two(v: u32) -> u32 {
    if v == 0 {
        1
    } else {
        1 << (31 - v.leading_zeros())
    }
}

/// Pyramid extent for a draw extent: the previous power of two of each
/// dimension, so every texel footprint maps conservatively onto the
/// depth attachment.
pub fn pyramid_extent(draw_width: u32, draw_height: u32) -> (u32, u32) {
    (
        previous_power_of_two(draw_width),
        previous_power_of_two(draw_height),
    )
}

/// Number of mips down to 1x1 for a power-of-two extent.
pub fn mip_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Push constant carrying the destination mip extent.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct ReducePushConstants {
    dst_width: f32,
    dst_height: f32,
}

/// Depth pyramid image, its per-mip views and the reduction pipeline.
///
/// The image and views are destroyed and rebuilt on resize; the
/// sampler and pipeline survive for the life of the renderer.
pub struct PyramidGenerator {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    /// Non-filtering sampler used by the late culling shader.
    sampler: wgpu::Sampler,
    texture: wgpu::Texture,
    mip_views: Vec<wgpu::TextureView>,
    full_view: wgpu::TextureView,
    /// One bind group per mip: source view and destination mip.
    reduce_bind_groups: Vec<wgpu::BindGroup>,
    width: u32,
    height: u32,
    mips: u32,
}

impl PyramidGenerator {
    /// Create the reduction pipeline, sampler and the initial pyramid
    /// for `draw_extent`.
    pub fn new(device: &wgpu::Device, draw_extent: (u32, u32), depth_view: &wgpu::TextureView) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Depth Pyramid Reduce Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/depth_pyramid.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Depth Pyramid Bind Group Layout"),
            entries: &[
                // Source: the depth attachment for mip 0, the previous
                // mip otherwise.
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
                // Destination mip.
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: wgpu::TextureFormat::R32Float,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Depth Pyramid Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[wgpu::PushConstantRange {
                stages: wgpu::ShaderStages::COMPUTE,
                range: 0..std::mem::size_of::<ReducePushConstants>() as u32,
            }],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Depth Pyramid Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        // Nearest sampling; the min reduction happens in the shader, so
        // filtering would only blur conservative depths.
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Depth Pyramid Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let (texture, mip_views, full_view, reduce_bind_groups, width, height, mips) =
            build_pyramid(device, &bind_group_layout, draw_extent, depth_view);

        Self {
            pipeline,
            bind_group_layout,
            sampler,
            texture,
            mip_views,
            full_view,
            reduce_bind_groups,
            width,
            height,
            mips,
        }
    }

    /// Destroy and rebuild the pyramid image for a new draw extent.
    /// The sampler is preserved.
    pub fn rebuild(
        &mut self,
        device: &wgpu::Device,
        draw_extent: (u32, u32),
        depth_view: &wgpu::TextureView,
    ) {
        let (texture, mip_views, full_view, reduce_bind_groups, width, height, mips) =
            build_pyramid(device, &self.bind_group_layout, draw_extent, depth_view);
        self.texture.destroy();
        self.texture = texture;
        self.mip_views = mip_views;
        self.full_view = full_view;
        self.reduce_bind_groups = reduce_bind_groups;
        self.width = width;
        self.height = height;
        self.mips = mips;
        log::debug!("depth pyramid rebuilt: {}x{}, {} mips", width, height, mips);
    }

    /// Record the reduction, one compute pass per mip. Each pass reads
    /// the level written by the previous one; the per-pass boundary is
    /// the write-to-read edge between consecutive mips.
    pub fn generate(&self, encoder: &mut wgpu::CommandEncoder) {
        for mip in 0..self.mips {
            let dst_w = (self.width >> mip).max(1);
            let dst_h = (self.height >> mip).max(1);

            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&format!("Depth Pyramid Reduce Mip {mip}")),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &self.reduce_bind_groups[mip as usize], &[]);
            pass.set_push_constants(
                0,
                bytemuck::bytes_of(&ReducePushConstants {
                    dst_width: dst_w as f32,
                    dst_height: dst_h as f32,
                }),
            );
            pass.dispatch_workgroups(
                dst_w.div_ceil(REDUCE_WORKGROUP_SIZE),
                dst_h.div_ceil(REDUCE_WORKGROUP_SIZE),
                1,
            );
        }
    }

    /// Full-chain view sampled by the late culling shader.
    #[inline]
    pub fn view(&self) -> &wgpu::TextureView {
        &self.full_view
    }

    /// The reduction-mode sampler.
    #[inline]
    pub fn sampler(&self) -> &wgpu::Sampler {
        &self.sampler
    }

    /// Pyramid extent at mip 0.
    #[inline]
    pub fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Number of mip levels.
    #[inline]
    pub fn mips(&self) -> u32 {
        self.mips
    }
}

type PyramidParts = (
    wgpu::Texture,
    Vec<wgpu::TextureView>,
    wgpu::TextureView,
    Vec<wgpu::BindGroup>,
    u32,
    u32,
    u32,
);

fn build_pyramid(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    draw_extent: (u32, u32),
    depth_view: &wgpu::TextureView,
) -> PyramidParts {
    let (width, height) = pyramid_extent(draw_extent.0, draw_extent.1);
    let mips = mip_count(width, height);

    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Depth Pyramid Texture"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: mips,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::R32Float,
        usage: wgpu::TextureUsages::STORAGE_BINDING
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });

    let mip_views: Vec<wgpu::TextureView> = (0..mips)
        .map(|mip| {
            texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some(&format!("Depth Pyramid Mip {mip} View")),
                base_mip_level: mip,
                mip_level_count: Some(1),
                ..Default::default()
            })
        })
        .collect();

    let full_view = texture.create_view(&wgpu::TextureViewDescriptor {
        label: Some("Depth Pyramid Full View"),
        ..Default::default()
    });

    let reduce_bind_groups = (0..mips)
        .map(|mip| {
            let source = if mip == 0 {
                depth_view
            } else {
                &mip_views[mip as usize - 1]
            };
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("Depth Pyramid Reduce Bind Group Mip {mip}")),
                layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(source),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&mip_views[mip as usize]),
                    },
                ],
            })
        })
        .collect();

    (texture, mip_views, full_view, reduce_bind_groups, width, height, mips)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_previous_power_of_two() {
        assert_eq!(previous_power_of_two(0), 1);
        assert_eq!(previous_power_of_two(1), 1);
        assert_eq!(previous_power_of_two(2), 2);
        assert_eq!(previous_power_of_two(1023), 512);
        assert_eq!(previous_power_of_two(1024), 1024);
        assert_eq!(previous_power_of_two(1920), 1024);
    }

    #[test]
    fn test_pyramid_extent_720p() {
        assert_eq!(pyramid_extent(1280, 720), (1024, 512));
        assert_eq!(mip_count(1024, 512), 11);
    }

    #[test]
    fn test_pyramid_extent_1080p() {
        assert_eq!(pyramid_extent(1920, 1080), (1024, 1024));
        assert_eq!(mip_count(1024, 1024), 11);
    }

    #[test]
    fn test_mip_chain_reaches_one() {
        let (w, h) = pyramid_extent(333, 77);
        let mips = mip_count(w, h);
        assert_eq!((w >> (mips - 1)).max(1), 1);
        assert_eq!((h >> (mips - 1)).max(1), 1);
    }

    #[test]
    fn test_mip_extents_floor_at_one() {
        let (w, h) = (1024, 512);
        let mips = mip_count(w, h);
        for mip in 0..mips {
            assert!((w >> mip).max(1) >= 1);
            assert!((h >> mip).max(1) >= 1);
        }
        // The final mip is 1x1 in both dimensions.
        assert_eq!(((w >> (mips - 1)).max(1), (h >> (mips - 1)).max(1)), (1, 1));
    }

    #[test]
    fn test_resize_idempotent() {
        let a = pyramid_extent(1600, 900);
        let b = pyramid_extent(1600, 900);
        assert_eq!(a, b);
        assert_eq!(mip_count(a.0, a.1), mip_count(b.0, b.1));
    }
}
