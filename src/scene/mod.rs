//! # Scene Module
//!
//! GPU-resident scene description: packed vertex records, surfaces with
//! LOD tables and bounding spheres, render objects, decomposed
//! transforms, materials and optional meshlet clusters. These structs
//! are uploaded once and read by the culling and geometry shaders.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of LOD levels per surface.
pub const MAX_LODS: usize = 8;

/// Render-object flag: the object's material is transparent and is only
/// emitted by the post pass.
pub const OBJECT_FLAG_TRANSPARENT: u32 = 1;

/// Material flag: transparent, rendered in the post pass with blending.
pub const MATERIAL_FLAG_TRANSPARENT: u32 = 1;

/// Packed vertex record (32 bytes).
///
/// The layout is opaque to the renderer; the geometry shader pulls
/// vertices from a storage buffer by index.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable, Serialize, Deserialize)]
pub struct Vertex {
    /// Position in local space.
    pub position: [f32; 3],
    /// Texture coordinate u, interleaved to keep the record at 32 bytes.
    pub uv_x: f32,
    /// Normal in local space.
    pub normal: [f32; 3],
    /// Texture coordinate v.
    pub uv_y: f32,
}

impl Vertex {
    /// Size of a vertex record in bytes.
    pub const SIZE: usize = 32;

    /// Create a vertex from position, normal and texture coordinates.
    pub const fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            uv_x: uv[0],
            normal,
            uv_y: uv[1],
        }
    }
}

/// One level of detail of a surface (16 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable, Serialize, Deserialize)]
pub struct SurfaceLod {
    /// Offset into the shared index buffer.
    pub index_offset: u32,
    /// Number of indices.
    pub index_count: u32,
    /// Simplification error bound in local units.
    pub error: f32,
    /// Padding.
    pub _pad: u32,
}

/// One mesh primitive with LOD table, bounding sphere and cluster
/// range (160 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, Serialize, Deserialize)]
pub struct Surface {
    /// Bounding sphere: xyz = center (local space), w = radius.
    pub bounding_sphere: [f32; 4],
    /// Number of populated LOD entries (>= 1).
    pub lod_count: u32,
    /// First meshlet index of this surface.
    pub meshlet_offset: u32,
    /// Number of meshlets; zero when the scene carries no clusters.
    pub meshlet_count: u32,
    /// Padding.
    pub _pad: u32,
    /// LOD table, entries beyond `lod_count` are ignored.
    pub lods: [SurfaceLod; MAX_LODS],
}

impl Surface {
    /// Size of a surface record in bytes.
    pub const SIZE: usize = 160;

    /// Create a single-LOD surface without clusters.
    pub fn single_lod(bounding_sphere: [f32; 4], index_offset: u32, index_count: u32) -> Self {
        let mut lods = [SurfaceLod::default(); MAX_LODS];
        lods[0] = SurfaceLod {
            index_offset,
            index_count,
            error: 0.0,
            _pad: 0,
        };
        Self {
            bounding_sphere,
            lod_count: 1,
            meshlet_offset: 0,
            meshlet_count: 0,
            _pad: 0,
            lods,
        }
    }
}

impl Default for Surface {
    fn default() -> Self {
        Self {
            bounding_sphere: [0.0, 0.0, 0.0, 1.0],
            lod_count: 1,
            meshlet_offset: 0,
            meshlet_count: 0,
            _pad: 0,
            lods: [SurfaceLod::default(); MAX_LODS],
        }
    }
}

/// One drawable instance (16 bytes): indices into the transform,
/// surface and material tables plus flags.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable, Serialize, Deserialize)]
pub struct RenderObject {
    /// Index into the transform buffer.
    pub transform_index: u32,
    /// Index into the surface buffer.
    pub surface_index: u32,
    /// Index into the material buffer.
    pub material_index: u32,
    /// Object flags; bit 0 mirrors the material transparency flag so
    /// the culling shader does not need the material buffer.
    pub flags: u32,
}

impl RenderObject {
    /// Size of a render object record in bytes.
    pub const SIZE: usize = 16;
}

/// Decomposed object transform (32 bytes). The shaders rebuild the
/// model matrix from position, uniform scale and orientation.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, Serialize, Deserialize)]
pub struct Transform {
    /// World-space translation.
    pub position: [f32; 3],
    /// Uniform scale.
    pub scale: f32,
    /// Orientation quaternion (x, y, z, w).
    pub orientation: [f32; 4],
}

impl Transform {
    /// Size of a transform record in bytes.
    pub const SIZE: usize = 32;

    /// Identity transform at a position.
    pub const fn at(position: [f32; 3]) -> Self {
        Self {
            position,
            scale: 1.0,
            orientation: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::at([0.0, 0.0, 0.0])
    }
}

/// Material constants (48 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, Serialize, Deserialize)]
pub struct Material {
    /// Base color factor.
    pub albedo: [f32; 4],
    /// Index into the texture table.
    pub texture_index: u32,
    /// Index of the normal map in the texture table.
    pub normal_index: u32,
    /// Metallic factor.
    pub metallic: f32,
    /// Roughness factor.
    pub roughness: f32,
    /// Material flags; bit 0 marks transparency.
    pub flags: u32,
    /// Padding.
    pub _pad: [u32; 3],
}

impl Material {
    /// Size of a material record in bytes.
    pub const SIZE: usize = 48;
}

impl Default for Material {
    fn default() -> Self {
        Self {
            albedo: [1.0, 1.0, 1.0, 1.0],
            texture_index: 0,
            normal_index: 0,
            metallic: 0.0,
            roughness: 1.0,
            flags: 0,
            _pad: [0; 3],
        }
    }
}

/// One cluster of a surface's triangles with its bounding cone
/// (48 bytes). Read by the cluster culling path.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable, Serialize, Deserialize)]
pub struct Meshlet {
    /// Bounding sphere center in local space.
    pub center: [f32; 3],
    /// Bounding sphere radius.
    pub radius: f32,
    /// Average triangle normal of the cluster.
    pub cone_axis: [f32; 3],
    /// Cone cutoff; the cluster is backfacing when the view direction
    /// dotted with the axis exceeds it.
    pub cone_cutoff: f32,
    /// Offset of the cluster's packed triangle indices in the
    /// meshlet-data stream, which the cluster path binds as its index
    /// source.
    pub data_offset: u32,
    /// Offset of the cluster's triangles in the shared index buffer.
    pub index_offset: u32,
    /// Number of triangles.
    pub triangle_count: u32,
    /// Number of vertices referenced by the packed stream.
    pub vertex_count: u32,
}

impl Meshlet {
    /// Size of a meshlet record in bytes.
    pub const SIZE: usize = 48;
}

/// Scene description produced by a loader. The renderer treats the
/// arrays as opaque blobs of declared sizes; only the cross-references
/// are inspected, at upload time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneData {
    /// Packed vertex records.
    pub vertices: Vec<Vertex>,
    /// 32-bit indices into `vertices`.
    pub indices: Vec<u32>,
    /// Mesh primitives.
    pub surfaces: Vec<Surface>,
    /// Drawable instances.
    pub objects: Vec<RenderObject>,
    /// Object transforms.
    pub transforms: Vec<Transform>,
    /// Materials.
    pub materials: Vec<Material>,
    /// Optional mesh clusters.
    pub meshlets: Vec<Meshlet>,
    /// Packed per-cluster index streams; the cluster path draws
    /// through this buffer instead of the shared index buffer.
    pub meshlet_data: Vec<u32>,
}

/// A scene cross-reference is out of bounds.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SceneError {
    /// A render object references a missing transform/surface/material.
    #[error("object {object}: {field} index {index} out of bounds (len {len})")]
    ObjectIndex {
        /// Offending object.
        object: usize,
        /// Which table the reference points into.
        field: &'static str,
        /// The out-of-range index.
        index: u32,
        /// Length of the referenced table.
        len: usize,
    },

    /// A surface LOD or meshlet range exceeds its buffer.
    #[error("surface {surface}: {field} range {start}..{end} exceeds len {len}")]
    SurfaceRange {
        /// Offending surface.
        surface: usize,
        /// Which range is invalid.
        field: &'static str,
        /// Range start.
        start: u32,
        /// Range end.
        end: u64,
        /// Length of the referenced buffer.
        len: usize,
    },

    /// A surface declares zero or too many LODs.
    #[error("surface {surface}: lod count {count} outside 1..={max}")]
    LodCount {
        /// Offending surface.
        surface: usize,
        /// Declared count.
        count: u32,
        /// Maximum allowed.
        max: usize,
    },

    /// A meshlet range exceeds the index or data buffer.
    #[error("meshlet {meshlet}: {field} range exceeds len {len}")]
    MeshletRange {
        /// Offending meshlet.
        meshlet: usize,
        /// Which range is invalid.
        field: &'static str,
        /// Length of the referenced buffer.
        len: usize,
    },
}

impl SceneData {
    /// Validate every cross-reference before upload.
    pub fn validate(&self) -> Result<(), SceneError> {
        for (i, object) in self.objects.iter().enumerate() {
            check_index(i, "transform", object.transform_index, self.transforms.len())?;
            check_index(i, "surface", object.surface_index, self.surfaces.len())?;
            check_index(i, "material", object.material_index, self.materials.len())?;
        }

        for (i, surface) in self.surfaces.iter().enumerate() {
            if surface.lod_count == 0 || surface.lod_count as usize > MAX_LODS {
                return Err(SceneError::LodCount {
                    surface: i,
                    count: surface.lod_count,
                    max: MAX_LODS,
                });
            }
            for lod in &surface.lods[..surface.lod_count as usize] {
                let end = lod.index_offset as u64 + lod.index_count as u64;
                if end > self.indices.len() as u64 {
                    return Err(SceneError::SurfaceRange {
                        surface: i,
                        field: "lod indices",
                        start: lod.index_offset,
                        end,
                        len: self.indices.len(),
                    });
                }
            }
            let meshlet_end = surface.meshlet_offset as u64 + surface.meshlet_count as u64;
            if meshlet_end > self.meshlets.len() as u64 {
                return Err(SceneError::SurfaceRange {
                    surface: i,
                    field: "meshlets",
                    start: surface.meshlet_offset,
                    end: meshlet_end,
                    len: self.meshlets.len(),
                });
            }
        }

        for (i, meshlet) in self.meshlets.iter().enumerate() {
            let index_end = meshlet.index_offset as u64 + meshlet.triangle_count as u64 * 3;
            if index_end > self.indices.len() as u64 {
                return Err(SceneError::MeshletRange {
                    meshlet: i,
                    field: "indices",
                    len: self.indices.len(),
                });
            }
            let data_end = meshlet.data_offset as u64 + meshlet.triangle_count as u64 * 3;
            if data_end > self.meshlet_data.len() as u64 {
                return Err(SceneError::MeshletRange {
                    meshlet: i,
                    field: "data",
                    len: self.meshlet_data.len(),
                });
            }
        }

        Ok(())
    }

    /// Mirror each material's transparency flag onto its objects so the
    /// culling shader can route them to the post pass without reading
    /// the material buffer.
    pub fn propagate_material_flags(&mut self) {
        for object in &mut self.objects {
            let material = &self.materials[object.material_index as usize];
            if material.flags & MATERIAL_FLAG_TRANSPARENT != 0 {
                object.flags |= OBJECT_FLAG_TRANSPARENT;
            } else {
                object.flags &= !OBJECT_FLAG_TRANSPARENT;
            }
        }
    }

    /// Whether the scene carries cluster data for the meshlet path.
    pub fn has_clusters(&self) -> bool {
        !self.meshlets.is_empty() && !self.meshlet_data.is_empty()
    }
}

fn check_index(
    object: usize,
    field: &'static str,
    index: u32,
    len: usize,
) -> Result<(), SceneError> {
    if (index as usize) < len {
        Ok(())
    } else {
        Err(SceneError::ObjectIndex {
            object,
            field,
            index,
            len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_scene() -> SceneData {
        SceneData {
            vertices: vec![Vertex::default(); 3],
            indices: vec![0, 1, 2],
            surfaces: vec![Surface::single_lod([0.0, 0.0, 0.0, 1.0], 0, 3)],
            objects: vec![RenderObject::default()],
            transforms: vec![Transform::default()],
            materials: vec![Material::default()],
            meshlets: vec![],
            meshlet_data: vec![],
        }
    }

    #[test]
    fn test_record_sizes() {
        assert_eq!(std::mem::size_of::<Vertex>(), Vertex::SIZE);
        assert_eq!(std::mem::size_of::<Surface>(), Surface::SIZE);
        assert_eq!(std::mem::size_of::<RenderObject>(), RenderObject::SIZE);
        assert_eq!(std::mem::size_of::<Transform>(), Transform::SIZE);
        assert_eq!(std::mem::size_of::<Material>(), Material::SIZE);
        assert_eq!(std::mem::size_of::<Meshlet>(), Meshlet::SIZE);
    }

    #[test]
    fn test_valid_scene_passes() {
        assert!(minimal_scene().validate().is_ok());
    }

    #[test]
    fn test_object_reference_bounds() {
        let mut scene = minimal_scene();
        scene.objects[0].surface_index = 7;
        let err = scene.validate().unwrap_err();
        assert!(matches!(err, SceneError::ObjectIndex { field: "surface", .. }));
    }

    #[test]
    fn test_lod_range_bounds() {
        let mut scene = minimal_scene();
        scene.surfaces[0].lods[0].index_count = 64;
        assert!(scene.validate().is_err());
    }

    #[test]
    fn test_lod_count_bounds() {
        let mut scene = minimal_scene();
        scene.surfaces[0].lod_count = 0;
        assert!(matches!(
            scene.validate().unwrap_err(),
            SceneError::LodCount { .. }
        ));
    }

    #[test]
    fn test_meshlet_range_bounds() {
        let mut scene = minimal_scene();
        scene.meshlets.push(Meshlet {
            triangle_count: 2,
            ..Default::default()
        });
        assert!(matches!(
            scene.validate().unwrap_err(),
            SceneError::MeshletRange { .. }
        ));
    }

    #[test]
    fn test_material_flag_propagation() {
        let mut scene = minimal_scene();
        scene.materials[0].flags = MATERIAL_FLAG_TRANSPARENT;
        scene.propagate_material_flags();
        assert_eq!(scene.objects[0].flags & OBJECT_FLAG_TRANSPARENT, 1);

        scene.materials[0].flags = 0;
        scene.propagate_material_flags();
        assert_eq!(scene.objects[0].flags & OBJECT_FLAG_TRANSPARENT, 0);
    }
}
