//! View-aligned proxy geometry.
//!
//! For every brick the generator emits a stack of textured slices that
//! sample the volume back-to-front. Slices land in the bin of their stack
//! axis; the emitted `order` permutation puts the axis most parallel to
//! the viewing direction last so the nearest planes are drawn last.

use glam::{Mat4, Vec3, Vec4};

use crate::constants::slicing::OBLIQUE_SCALE;
use crate::dataset::BrickMetadata;
use crate::error::{EngineError, EngineResult};
use crate::geometry::Plane;

/// Dominant object-space axis of a slice stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceAxis {
    X = 0,
    Y = 1,
    Z = 2,
}

impl SliceAxis {
    const ALL: [SliceAxis; 3] = [SliceAxis::X, SliceAxis::Y, SliceAxis::Z];
}

/// One proxy-geometry vertex: world position plus 3-D texture coordinate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliceVertex {
    pub position: Vec3,
    pub texcoord: Vec3,
}

/// Triangle streams of one brick, binned by stack axis
#[derive(Debug)]
pub struct SliceSet {
    /// Triangle vertices per axis bin, three vertices per triangle
    pub triangles: [Vec<SliceVertex>; 3],

    /// Bin traversal order, most view-parallel axis last
    pub order: [SliceAxis; 3],
}

impl SliceSet {
    /// Bins in traversal order
    pub fn ordered(&self) -> impl Iterator<Item = &[SliceVertex]> {
        self.order
            .into_iter()
            .map(move |axis| self.triangles[axis as usize].as_slice())
    }

    pub fn vertex_count(&self) -> usize {
        self.triangles.iter().map(Vec::len).sum()
    }
}

/// Slice-geometry generator
#[derive(Debug, Clone)]
pub struct SliceGenerator {
    sample_rate: f32,
    clip_plane: Option<Plane>,
}

impl SliceGenerator {
    pub fn new(sample_rate: f32) -> EngineResult<Self> {
        if !(sample_rate > 0.0) {
            return Err(EngineError::InvalidConfig {
                field: "sample_rate".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(Self {
            sample_rate,
            clip_plane: None,
        })
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) -> EngineResult<()> {
        if !(sample_rate > 0.0) {
            return Err(EngineError::InvalidConfig {
                field: "sample_rate".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        self.sample_rate = sample_rate;
        Ok(())
    }

    /// World-space clip plane; triangles in its positive half-space are
    /// discarded
    pub fn set_clip_plane(&mut self, plane: Option<Plane>) {
        self.clip_plane = plane.map(|p| p.normalized());
    }

    /// Generate the slice stack of one brick.
    ///
    /// `world` maps dataset space to world space, `view` maps world space
    /// to eye space. Slices are spaced `√2 / (sample_rate · max(n_voxels))`
    /// apart in texture coordinates and emitted back-to-front.
    pub fn slices_for_brick(
        &self,
        md: &BrickMetadata,
        world: &Mat4,
        view: &Mat4,
    ) -> SliceSet {
        let modelview = *view * *world;
        // Viewing direction expressed in dataset space; extents-weighted so
        // anisotropic bricks pick the visually dominant stack.
        let inv = modelview.inverse();
        let dir = (inv * Vec4::new(0.0, 0.0, -1.0, 0.0)).truncate();
        let weighted = dir / md.extents.max(Vec3::splat(f32::EPSILON));

        let mut order = SliceAxis::ALL;
        order.sort_by(|a, b| {
            let wa = weighted[*a as usize].abs();
            let wb = weighted[*b as usize].abs();
            wa.partial_cmp(&wb).unwrap_or(std::cmp::Ordering::Equal)
        });
        let axis = order[2] as usize;

        let max_voxels = md.n_voxels.max_element().max(1) as f32;
        let spacing = OBLIQUE_SCALE / (self.sample_rate * max_voxels);
        let span = (md.tex_max[axis] - md.tex_min[axis]).max(f32::EPSILON);
        let slice_count = (span / spacing).floor() as usize + 1;

        let back_to_front_descending = weighted[axis] > 0.0;

        let mut triangles = Vec::with_capacity(slice_count * 6);
        for i in 0..slice_count {
            let step = if back_to_front_descending {
                slice_count - 1 - i
            } else {
                i
            };
            let t = (md.tex_min[axis] + step as f32 * spacing).min(md.tex_max[axis]);
            self.emit_slice(md, world, axis, t, &mut triangles);
        }

        let mut set = SliceSet {
            triangles: [Vec::new(), Vec::new(), Vec::new()],
            order,
        };
        set.triangles[axis] = triangles;
        set
    }

    fn emit_slice(
        &self,
        md: &BrickMetadata,
        world: &Mat4,
        axis: usize,
        t: f32,
        out: &mut Vec<SliceVertex>,
    ) {
        let (b, c) = match axis {
            0 => (1, 2),
            1 => (0, 2),
            _ => (0, 1),
        };

        let corner = |tb: f32, tc: f32| {
            let mut tex = Vec3::ZERO;
            tex[axis] = t;
            tex[b] = tb;
            tex[c] = tc;
            SliceVertex {
                position: world.transform_point3(tex_to_position(md, tex)),
                texcoord: tex,
            }
        };

        let mut poly = vec![
            corner(md.tex_min[b], md.tex_min[c]),
            corner(md.tex_max[b], md.tex_min[c]),
            corner(md.tex_max[b], md.tex_max[c]),
            corner(md.tex_min[b], md.tex_max[c]),
        ];
        if let Some(plane) = &self.clip_plane {
            clip_polygon(&mut poly, plane);
        }
        if poly.len() < 3 {
            return;
        }
        for i in 1..poly.len() - 1 {
            out.push(poly[0]);
            out.push(poly[i]);
            out.push(poly[i + 1]);
        }
    }
}

/// Map a texture coordinate inside the clamp region to dataset space
fn tex_to_position(md: &BrickMetadata, tex: Vec3) -> Vec3 {
    let span = (md.tex_max - md.tex_min).max(Vec3::splat(f32::EPSILON));
    let s = (tex - md.tex_min) / span;
    md.center + (s * 2.0 - Vec3::ONE) * md.extents
}

/// Sutherland–Hodgman clip keeping the non-positive side of the plane
fn clip_polygon(poly: &mut Vec<SliceVertex>, plane: &Plane) {
    let input = std::mem::take(poly);
    for i in 0..input.len() {
        let cur = input[i];
        let next = input[(i + 1) % input.len()];
        let dc = plane.signed_distance(cur.position);
        let dn = plane.signed_distance(next.position);
        let inside_cur = dc <= 0.0;
        let inside_next = dn <= 0.0;
        if inside_cur {
            poly.push(cur);
        }
        if inside_cur != inside_next {
            let t = dc / (dc - dn);
            poly.push(SliceVertex {
                position: cur.position.lerp(next.position, t),
                texcoord: cur.texcoord.lerp(next.texcoord, t),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::UVec3;

    fn unit_brick(n: u32) -> BrickMetadata {
        BrickMetadata {
            center: Vec3::ZERO,
            extents: Vec3::splat(0.5),
            n_voxels: UVec3::splat(n),
            tex_min: Vec3::ZERO,
            tex_max: Vec3::ONE,
        }
    }

    fn view_from(eye: Vec3) -> Mat4 {
        Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y)
    }

    #[test]
    fn test_slice_count_matches_spacing() {
        let md = unit_brick(16);
        let generator = SliceGenerator::new(1.0).unwrap();
        let set = generator.slices_for_brick(&md, &Mat4::IDENTITY, &view_from(Vec3::new(0.0, 0.0, 3.0)));

        let spacing = OBLIQUE_SCALE / 16.0;
        let expected = (1.0f32 / spacing).floor() as usize + 1;
        // Two triangles, six vertices per unclipped slice.
        assert_eq!(set.vertex_count(), expected * 6);
    }

    #[test]
    fn test_dominant_axis_is_last_in_order() {
        let md = unit_brick(8);
        let generator = SliceGenerator::new(1.0).unwrap();

        let set = generator.slices_for_brick(&md, &Mat4::IDENTITY, &view_from(Vec3::new(0.0, 0.0, 3.0)));
        assert_eq!(set.order[2], SliceAxis::Z);
        assert!(!set.triangles[SliceAxis::Z as usize].is_empty());
        assert!(set.triangles[SliceAxis::X as usize].is_empty());

        let set = generator.slices_for_brick(&md, &Mat4::IDENTITY, &view_from(Vec3::new(3.0, 0.0, 0.0)));
        assert_eq!(set.order[2], SliceAxis::X);
    }

    #[test]
    fn test_count_stable_away_from_dominance_transition() {
        let md = unit_brick(16);
        let generator = SliceGenerator::new(1.0).unwrap();
        // Rotating within one dominance octant must not change the count.
        let a = generator.slices_for_brick(&md, &Mat4::IDENTITY, &view_from(Vec3::new(0.2, 0.1, 3.0)));
        let b = generator.slices_for_brick(&md, &Mat4::IDENTITY, &view_from(Vec3::new(0.4, 0.3, 2.0)));
        assert_eq!(a.vertex_count(), b.vertex_count());
    }

    #[test]
    fn test_back_to_front_monotonic() {
        let md = unit_brick(8);
        let generator = SliceGenerator::new(1.0).unwrap();
        let eye = Vec3::new(0.0, 0.0, 3.0);
        let set = generator.slices_for_brick(&md, &Mat4::IDENTITY, &view_from(eye));

        // Distances to the eye must shrink (weakly) across the stream.
        let verts = &set.triangles[SliceAxis::Z as usize];
        let mut last = f32::INFINITY;
        for slice in verts.chunks(6) {
            let d = (slice[0].position - eye).length();
            assert!(d <= last + 1e-5);
            last = d;
        }
    }

    #[test]
    fn test_clip_plane_removes_positive_half_space() {
        let md = unit_brick(8);
        let mut generator = SliceGenerator::new(1.0).unwrap();
        generator.set_clip_plane(Some(Plane::new(Vec3::X, 0.0)));
        // Eye along x so the clipped axis is the slicing axis too.
        let set = generator.slices_for_brick(&md, &Mat4::IDENTITY, &view_from(Vec3::new(3.0, 0.0, 0.0)));
        assert!(set.vertex_count() > 0);
        for bin in &set.triangles {
            for v in bin {
                assert!(v.position.x <= 1e-5, "vertex {} crosses the clip plane", v.position);
            }
        }
    }

    #[test]
    fn test_clip_plane_on_unit_brick_half() {
        // Unit cube centered at 0.5; plane x = 0.5 keeps the lower half.
        let md = BrickMetadata {
            center: Vec3::splat(0.5),
            extents: Vec3::splat(0.5),
            n_voxels: UVec3::splat(8),
            tex_min: Vec3::ZERO,
            tex_max: Vec3::ONE,
        };
        let mut generator = SliceGenerator::new(1.0).unwrap();
        generator.set_clip_plane(Some(Plane::new(Vec3::X, 0.5)));
        let set = generator.slices_for_brick(
            &md,
            &Mat4::IDENTITY,
            &view_from(Vec3::new(0.5, 0.5, 3.0)),
        );
        assert!(set.vertex_count() > 0);
        for bin in &set.triangles {
            for v in bin {
                assert!(v.position.x <= 0.5 + 1e-5);
            }
        }
    }
}
