//! Static scene upload and long-lived bind groups.
//!
//! Every persistent buffer is created device-local, filled through a
//! host-visible staging buffer, and copied in a single transfer
//! submission that also zero-fills the visibility buffer. Bind groups
//! are built once here and reused every frame; the per-frame hot path
//! only rewrites the view uniform contents.

use crate::core::{FrameRing, FRAMES_IN_FLIGHT};
use crate::render::IndirectDraw;
use crate::scene::{Meshlet, SceneData};
use crate::texture::SceneTexture;
use std::num::NonZeroU32;
use thiserror::Error;

/// Errors raised while uploading the static scene.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    /// A required scene array is empty.
    #[error("scene has no {0}")]
    EmptyScene(&'static str),
}

/// The texture table: one sampled-texture slot per loaded texture plus
/// the shared sampler, bound as a single binding array.
pub struct TextureTable {
    /// Bind group layout sized to the texture count.
    pub layout: wgpu::BindGroupLayout,
    /// The bound table.
    pub bind_group: wgpu::BindGroup,
    /// Number of textures in the table.
    pub count: u32,
    // Keeps the textures alive for the bind group.
    _textures: Vec<SceneTexture>,
    _sampler: wgpu::Sampler,
}

impl TextureTable {
    /// Build the table over uploaded textures and the shared sampler.
    pub fn new(
        device: &wgpu::Device,
        textures: Vec<SceneTexture>,
        sampler: wgpu::Sampler,
    ) -> Self {
        let count = textures.len() as u32;
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Texture Table Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: Some(NonZeroU32::new(count).expect("texture table is never empty")),
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let views: Vec<&wgpu::TextureView> = textures.iter().map(|t| &t.view).collect();
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Texture Table Bind Group"),
            layout: &layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureViewArray(&views),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
            ],
        });

        Self {
            layout,
            bind_group,
            count,
            _textures: textures,
            _sampler: sampler,
        }
    }
}

/// Device-resident scene: static buffers, per-frame transients and the
/// bind groups tying them to the culling and geometry pipelines.
pub struct SceneBuffers {
    /// Packed vertex records, pulled by the geometry shader.
    pub vertex_buffer: wgpu::Buffer,
    /// 32-bit index buffer.
    pub index_buffer: wgpu::Buffer,
    /// Surface records.
    pub surface_buffer: wgpu::Buffer,
    /// Render-object records.
    pub object_buffer: wgpu::Buffer,
    /// Transform records.
    pub transform_buffer: wgpu::Buffer,
    /// Material records.
    pub material_buffer: wgpu::Buffer,
    /// Meshlet records, a one-record placeholder without clusters.
    pub meshlet_buffer: wgpu::Buffer,
    /// Packed meshlet streams, placeholder without clusters.
    pub meshlet_data_buffer: wgpu::Buffer,
    /// One indirect record slot per render object.
    pub indirect_buffer: wgpu::Buffer,
    /// One indirect record slot per meshlet for the cluster path.
    pub task_buffer: wgpu::Buffer,
    /// GPU-written draw count, cleared before every cull dispatch.
    pub count_buffer: wgpu::Buffer,
    /// One u32 per object: visible last frame.
    pub visibility_buffer: wgpu::Buffer,
    /// Per-frame-slot culling bind groups (group 0).
    pub cull_bind_groups: Vec<wgpu::BindGroup>,
    /// Per-frame-slot geometry bind groups (group 0).
    pub geometry_bind_groups: Vec<wgpu::BindGroup>,
    /// The texture table (group 1 of the geometry pipelines).
    pub texture_table: TextureTable,
    /// Number of uploaded render objects.
    pub object_count: u32,
    /// Number of uploaded meshlets.
    pub meshlet_count: u32,
    /// Whether the cluster draw path is active for this scene.
    pub cluster_path: bool,
}

impl SceneBuffers {
    /// Create every destination buffer, stage the scene arrays, record
    /// one transfer command buffer and wait for it.
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        scene: &SceneData,
        cull_layout: &wgpu::BindGroupLayout,
        geometry_layout: &wgpu::BindGroupLayout,
        texture_table: TextureTable,
        ring: &FrameRing,
    ) -> Result<Self, UploadError> {
        require(!scene.vertices.is_empty(), "vertices")?;
        require(!scene.indices.is_empty(), "indices")?;
        require(!scene.surfaces.is_empty(), "surfaces")?;
        require(!scene.objects.is_empty(), "render objects")?;
        require(!scene.transforms.is_empty(), "transforms")?;
        require(!scene.materials.is_empty(), "materials")?;

        let cluster_path = scene.has_clusters();
        let object_count = scene.objects.len() as u32;
        let meshlet_count = scene.meshlets.len() as u32;

        let vertex_bytes: &[u8] = bytemuck::cast_slice(&scene.vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(&scene.indices);
        let surface_bytes: &[u8] = bytemuck::cast_slice(&scene.surfaces);
        let object_bytes: &[u8] = bytemuck::cast_slice(&scene.objects);
        let transform_bytes: &[u8] = bytemuck::cast_slice(&scene.transforms);
        let material_bytes: &[u8] = bytemuck::cast_slice(&scene.materials);

        let (vertex_buffer, vertex_staging) =
            staged_buffer(device, "Vertex Buffer", wgpu::BufferUsages::STORAGE, vertex_bytes);
        let (index_buffer, index_staging) =
            staged_buffer(device, "Index Buffer", wgpu::BufferUsages::INDEX, index_bytes);
        let (surface_buffer, surface_staging) =
            staged_buffer(device, "Surface Buffer", wgpu::BufferUsages::STORAGE, surface_bytes);
        let (object_buffer, object_staging) = staged_buffer(
            device,
            "Render Object Buffer",
            wgpu::BufferUsages::STORAGE,
            object_bytes,
        );
        let (transform_buffer, transform_staging) = staged_buffer(
            device,
            "Transform Buffer",
            wgpu::BufferUsages::STORAGE,
            transform_bytes,
        );
        let (material_buffer, material_staging) = staged_buffer(
            device,
            "Material Buffer",
            wgpu::BufferUsages::STORAGE,
            material_bytes,
        );

        // Cluster buffers keep a one-record placeholder when the scene
        // carries no meshlets, so the culling bind group stays valid.
        let mut meshlet_staging = None;
        let mut meshlet_data_staging = None;
        let (meshlet_buffer, meshlet_data_buffer) = if cluster_path {
            let (meshlets, staging) = staged_buffer(
                device,
                "Meshlet Buffer",
                wgpu::BufferUsages::STORAGE,
                bytemuck::cast_slice(&scene.meshlets),
            );
            meshlet_staging = Some(staging);
            // The cluster path binds the packed streams as its index
            // source.
            let (data, staging) = staged_buffer(
                device,
                "Meshlet Data Buffer",
                wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::INDEX,
                bytemuck::cast_slice(&scene.meshlet_data),
            );
            meshlet_data_staging = Some(staging);
            (meshlets, data)
        } else {
            (
                empty_storage(device, "Meshlet Buffer", Meshlet::SIZE as u64),
                empty_storage(device, "Meshlet Data Buffer", 4),
            )
        };

        let indirect_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Indirect Draw Buffer"),
            size: object_count as u64 * IndirectDraw::SIZE as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::INDIRECT,
            mapped_at_creation: false,
        });
        let task_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Indirect Task Buffer"),
            size: meshlet_count.max(1) as u64 * IndirectDraw::SIZE as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::INDIRECT,
            mapped_at_creation: false,
        });
        let count_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Indirect Count Buffer"),
            size: std::mem::size_of::<u32>() as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::INDIRECT
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let visibility_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Visibility Buffer"),
            size: object_count as u64 * std::mem::size_of::<u32>() as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        // One transfer command buffer copies every staging buffer and
        // zero-fills the visibility buffer: nothing is drawn on the
        // first frame, which is the intended cold start.
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Scene Upload Encoder"),
        });
        encoder.copy_buffer_to_buffer(&vertex_staging, 0, &vertex_buffer, 0, vertex_bytes.len() as u64);
        encoder.copy_buffer_to_buffer(&index_staging, 0, &index_buffer, 0, index_bytes.len() as u64);
        encoder.copy_buffer_to_buffer(&surface_staging, 0, &surface_buffer, 0, surface_bytes.len() as u64);
        encoder.copy_buffer_to_buffer(&object_staging, 0, &object_buffer, 0, object_bytes.len() as u64);
        encoder.copy_buffer_to_buffer(
            &transform_staging,
            0,
            &transform_buffer,
            0,
            transform_bytes.len() as u64,
        );
        encoder.copy_buffer_to_buffer(
            &material_staging,
            0,
            &material_buffer,
            0,
            material_bytes.len() as u64,
        );
        if let Some(staging) = &meshlet_staging {
            encoder.copy_buffer_to_buffer(
                staging,
                0,
                &meshlet_buffer,
                0,
                (scene.meshlets.len() * Meshlet::SIZE) as u64,
            );
        }
        if let Some(staging) = &meshlet_data_staging {
            encoder.copy_buffer_to_buffer(
                staging,
                0,
                &meshlet_data_buffer,
                0,
                (scene.meshlet_data.len() * 4) as u64,
            );
        }
        encoder.clear_buffer(&visibility_buffer, 0, None);
        queue.submit(Some(encoder.finish()));
        device.poll(wgpu::Maintain::Wait);

        log::info!(
            "scene uploaded: {} objects, {} surfaces, {} vertices, {} meshlets, {} textures",
            object_count,
            scene.surfaces.len(),
            scene.vertices.len(),
            meshlet_count,
            texture_table.count,
        );

        let mut buffers = Self {
            vertex_buffer,
            index_buffer,
            surface_buffer,
            object_buffer,
            transform_buffer,
            material_buffer,
            meshlet_buffer,
            meshlet_data_buffer,
            indirect_buffer,
            task_buffer,
            count_buffer,
            visibility_buffer,
            cull_bind_groups: Vec::new(),
            geometry_bind_groups: Vec::new(),
            texture_table,
            object_count,
            meshlet_count,
            cluster_path,
        };
        buffers.build_bind_groups(device, cull_layout, geometry_layout, ring);
        Ok(buffers)
    }

    /// Build the per-frame-slot bind groups. Only the view uniform
    /// differs between slots; every other binding is static.
    fn build_bind_groups(
        &mut self,
        device: &wgpu::Device,
        cull_layout: &wgpu::BindGroupLayout,
        geometry_layout: &wgpu::BindGroupLayout,
        ring: &FrameRing,
    ) {
        self.cull_bind_groups = (0..FRAMES_IN_FLIGHT)
            .map(|slot| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(&format!("Cull Bind Group {slot}")),
                    layout: cull_layout,
                    entries: &[
                        buffer_entry(0, &ring.slots()[slot].view_buffer),
                        buffer_entry(1, &self.object_buffer),
                        buffer_entry(2, &self.transform_buffer),
                        buffer_entry(3, &self.surface_buffer),
                        buffer_entry(4, &self.indirect_buffer),
                        buffer_entry(5, &self.count_buffer),
                        buffer_entry(6, &self.visibility_buffer),
                        buffer_entry(7, &self.meshlet_buffer),
                        buffer_entry(8, &self.task_buffer),
                    ],
                })
            })
            .collect();

        self.geometry_bind_groups = (0..FRAMES_IN_FLIGHT)
            .map(|slot| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(&format!("Geometry Bind Group {slot}")),
                    layout: geometry_layout,
                    entries: &[
                        buffer_entry(0, &ring.slots()[slot].view_buffer),
                        buffer_entry(1, &self.vertex_buffer),
                        buffer_entry(2, &self.object_buffer),
                        buffer_entry(3, &self.transform_buffer),
                        buffer_entry(4, &self.material_buffer),
                        buffer_entry(5, &self.surface_buffer),
                    ],
                })
            })
            .collect();
    }
}

fn require(ok: bool, what: &'static str) -> Result<(), UploadError> {
    if ok {
        Ok(())
    } else {
        Err(UploadError::EmptyScene(what))
    }
}

/// Create a device-local buffer plus a mapped staging buffer holding
/// `data`, ready for a recorded copy.
fn staged_buffer(
    device: &wgpu::Device,
    label: &str,
    usage: wgpu::BufferUsages,
    data: &[u8],
) -> (wgpu::Buffer, wgpu::Buffer) {
    let dest = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: data.len() as u64,
        usage: usage | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(&format!("{label} Staging")),
        size: data.len() as u64,
        usage: wgpu::BufferUsages::COPY_SRC,
        mapped_at_creation: true,
    });
    staging
        .slice(..)
        .get_mapped_range_mut()
        .copy_from_slice(data);
    staging.unmap();

    (dest, staging)
}

fn empty_storage(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: wgpu::BufferUsages::STORAGE,
        mapped_at_creation: false,
    })
}

fn buffer_entry(binding: u32, buffer: &wgpu::Buffer) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: buffer.as_entire_binding(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Material, RenderObject, Surface, Transform, Vertex};

    #[test]
    fn test_empty_scene_is_rejected_by_require() {
        assert_eq!(
            require(false, "vertices").unwrap_err(),
            UploadError::EmptyScene("vertices")
        );
        assert!(require(true, "vertices").is_ok());
    }

    #[test]
    fn test_staged_sizes_match_records() {
        // The staging copies move whole records; a size mismatch here
        // would corrupt every downstream shader read.
        let vertices = [Vertex::default(); 4];
        assert_eq!(
            bytemuck::cast_slice::<_, u8>(&vertices).len(),
            4 * Vertex::SIZE
        );
        let transforms = [Transform::default(); 2];
        assert_eq!(
            bytemuck::cast_slice::<_, u8>(&transforms).len(),
            2 * Transform::SIZE
        );
        let objects = [RenderObject::default(); 3];
        assert_eq!(
            bytemuck::cast_slice::<_, u8>(&objects).len(),
            3 * RenderObject::SIZE
        );
        let surfaces = [Surface::default(); 2];
        assert_eq!(
            bytemuck::cast_slice::<_, u8>(&surfaces).len(),
            2 * Surface::SIZE
        );
        let materials = [Material::default(); 2];
        assert_eq!(
            bytemuck::cast_slice::<_, u8>(&materials).len(),
            2 * Material::SIZE
        );
    }
}
