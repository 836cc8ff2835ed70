use glam::{Mat4, Vec3, Vec4};

/// View frustum as six inward-facing clip planes
#[derive(Debug, Clone, Copy)]
pub struct Frustum {
    planes: [Vec4; 6],
}

impl Frustum {
    /// Extract the planes of a combined projection * view matrix
    pub fn from_matrix(m: Mat4) -> Self {
        let r0 = m.row(0);
        let r1 = m.row(1);
        let r2 = m.row(2);
        let r3 = m.row(3);
        let planes = [
            r3 + r0, // left
            r3 - r0, // right
            r3 + r1, // bottom
            r3 - r1, // top
            r3 + r2, // near
            r3 - r2, // far
        ]
        .map(normalize_plane);
        Self { planes }
    }

    /// Conservative box-vs-frustum test on a center/half-extents box
    pub fn intersects_aabb(&self, center: Vec3, extents: Vec3) -> bool {
        for plane in &self.planes {
            let n = Vec3::new(plane.x, plane.y, plane.z);
            let radius = extents.dot(n.abs());
            if n.dot(center) + plane.w + radius < 0.0 {
                return false;
            }
        }
        true
    }
}

fn normalize_plane(p: Vec4) -> Vec4 {
    let len = Vec3::new(p.x, p.y, p.z).length();
    if len <= f32::EPSILON {
        p
    } else {
        p / len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn look_down_z() -> Mat4 {
        let proj = Mat4::perspective_rh_gl(std::f32::consts::FRAC_PI_3, 1.0, 0.1, 100.0);
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, Vec3::Y);
        proj * view
    }

    #[test]
    fn test_box_at_origin_visible() {
        let frustum = Frustum::from_matrix(look_down_z());
        assert!(frustum.intersects_aabb(Vec3::ZERO, Vec3::splat(0.5)));
    }

    #[test]
    fn test_box_behind_camera_culled() {
        let frustum = Frustum::from_matrix(look_down_z());
        assert!(!frustum.intersects_aabb(Vec3::new(0.0, 0.0, 50.0), Vec3::splat(0.5)));
    }

    #[test]
    fn test_box_far_to_the_side_culled() {
        let frustum = Frustum::from_matrix(look_down_z());
        assert!(!frustum.intersects_aabb(Vec3::new(40.0, 0.0, 0.0), Vec3::splat(0.5)));
    }
}
