//! Per-frame view data mirrored into the GPU view uniform.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4, Vec4Swizzles};

/// Per-frame view uniform (208 bytes).
///
/// Mirrored into each frame slot's uniform buffer. The culling shaders
/// read the separated frustum planes and the projection extraction
/// terms; the geometry shaders read the combined matrix.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ViewData {
    /// projection * view.
    pub proj_view: [[f32; 4]; 4],
    /// Six separated frustum planes (xyz = normal, w = distance).
    /// Order: left, right, bottom, top, near, far.
    pub planes: [[f32; 4]; 6],
    /// World-space camera position, w unused.
    pub camera_pos: [f32; 4],
    /// Projection extraction: x = P00, y = P11, z = near, w = far.
    /// P00/P11 rebuild the projected extent of a view-space sphere
    /// for the occlusion test.
    pub proj_extract: [f32; 4],
    /// x = pyramid width, y = pyramid height, z = LOD error target,
    /// w unused. Width/height are patched by the frame driver so they
    /// always match the live pyramid, including across resizes.
    pub pyramid: [f32; 4],
}

impl ViewData {
    /// Size of the uniform in bytes.
    pub const SIZE: usize = 208;

    /// Build view data from projection and view matrices.
    ///
    /// The pyramid extent and LOD target are filled in by the frame
    /// driver; callers only provide camera state.
    pub fn new(proj: &Mat4, view: &Mat4, camera_pos: Vec3, znear: f32, zfar: f32) -> Self {
        let proj_view = *proj * *view;
        let planes = extract_frustum_planes(&proj_view);

        Self {
            proj_view: proj_view.to_cols_array_2d(),
            planes: [
                planes[0].into(),
                planes[1].into(),
                planes[2].into(),
                planes[3].into(),
                planes[4].into(),
                planes[5].into(),
            ],
            camera_pos: [camera_pos.x, camera_pos.y, camera_pos.z, 1.0],
            proj_extract: [proj.x_axis.x, proj.y_axis.y, znear, zfar],
            pyramid: [0.0; 4],
        }
    }
}

/// Extract the six clip-volume planes from a projection-view matrix
/// using the Gribb-Hartmann method, adapted to the 0..1 clip depth
/// range. Order: left, right, bottom, top, near, far.
///
/// Planes that cannot be normalized (the degenerate far plane of an
/// infinite projection) are kept as-is; they accept every point.
pub fn extract_frustum_planes(m: &Mat4) -> [Vec4; 6] {
    let row0 = m.row(0);
    let row1 = m.row(1);
    let row2 = m.row(2);
    let row3 = m.row(3);

    [
        normalize_plane(row3 + row0), // left
        normalize_plane(row3 - row0), // right
        normalize_plane(row3 + row1), // bottom
        normalize_plane(row3 - row1), // top
        normalize_plane(row3 - row2), // near (reversed depth: z <= w)
        normalize_plane(row2),        // far  (z >= 0)
    ]
}

fn normalize_plane(plane: Vec4) -> Vec4 {
    let length = plane.xyz().length();
    if length > 0.0 {
        plane / length
    } else {
        plane
    }
}

/// Host-side mirror of the shader's frustum test: a sphere passes when
/// it is not fully behind any plane.
pub fn sphere_in_frustum(planes: &[[f32; 4]; 6], center: Vec3, radius: f32) -> bool {
    planes.iter().all(|p| {
        let plane = Vec4::from_array(*p);
        plane.xyz().dot(center) + plane.w >= -radius
    })
}

/// Reversed-depth perspective projection with an infinite far plane.
///
/// Depth 1 lands on the near plane and depth 0 at infinity, which is
/// what the min-reduced depth pyramid expects.
pub fn perspective_reversed_z(fov_y: f32, aspect: f32, znear: f32) -> Mat4 {
    Mat4::perspective_infinite_reverse_rh(fov_y, aspect, znear)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_view() -> ViewData {
        // Camera at (0, 0, -5) looking toward +Z with a 90 degree FOV.
        let proj = perspective_reversed_z(std::f32::consts::FRAC_PI_2, 1.0, 0.1);
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, -5.0), Vec3::ZERO, Vec3::Y);
        ViewData::new(&proj, &view, Vec3::new(0.0, 0.0, -5.0), 0.1, 1000.0)
    }

    #[test]
    fn test_uniform_size() {
        assert_eq!(std::mem::size_of::<ViewData>(), ViewData::SIZE);
    }

    #[test]
    fn test_unit_sphere_at_origin_passes() {
        let view = test_view();
        assert!(sphere_in_frustum(&view.planes, Vec3::ZERO, 1.0));
    }

    #[test]
    fn test_sphere_behind_camera_fails() {
        let view = test_view();
        assert!(!sphere_in_frustum(&view.planes, Vec3::new(0.0, 0.0, -10.0), 1.0));
    }

    #[test]
    fn test_sphere_outside_side_plane_fails() {
        let view = test_view();
        // 90 degree FOV at distance 5: the frustum half-width at the
        // origin plane is 5, so a unit sphere at x = 10 is well outside.
        assert!(!sphere_in_frustum(&view.planes, Vec3::new(10.0, 0.0, 0.0), 1.0));
    }

    #[test]
    fn test_sphere_straddling_plane_passes() {
        let view = test_view();
        // Center outside the left plane but radius reaches back in.
        assert!(sphere_in_frustum(&view.planes, Vec3::new(6.0, 0.0, 0.0), 2.0));
    }

    #[test]
    fn test_proj_extract_terms() {
        let proj = perspective_reversed_z(std::f32::consts::FRAC_PI_2, 2.0, 0.1);
        let view = Mat4::IDENTITY;
        let data = ViewData::new(&proj, &view, Vec3::ZERO, 0.1, 1000.0);
        // P11 = 1 / tan(fov/2) = 1 for a 90 degree FOV, P00 = P11 / aspect.
        assert!((data.proj_extract[1] - 1.0).abs() < 1e-6);
        assert!((data.proj_extract[0] - 0.5).abs() < 1e-6);
    }
}
