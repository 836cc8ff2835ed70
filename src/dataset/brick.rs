use glam::{UVec3, Vec3};
use std::fmt;

/// Composite key identifying one brick within a dataset
///
/// The linear index is row-major into the per-LOD brick grid, x fastest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BrickKey {
    pub timestep: usize,
    pub lod: usize,
    pub index: usize,
}

impl BrickKey {
    pub fn new(timestep: usize, lod: usize, index: usize) -> Self {
        Self {
            timestep,
            lod,
            index,
        }
    }
}

impl fmt::Display for BrickKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(t{} lod{} #{})", self.timestep, self.lod, self.index)
    }
}

/// Spatial metadata of one brick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrickMetadata {
    /// World-space center of the brick
    pub center: Vec3,

    /// World-space half-extents
    pub extents: Vec3,

    /// Voxel counts including the one-voxel overlap on internal faces
    pub n_voxels: UVec3,

    /// Lower corner of the texture clamp region
    pub tex_min: Vec3,

    /// Upper corner of the texture clamp region
    pub tex_max: Vec3,
}

impl BrickMetadata {
    /// Total number of voxels stored for this brick
    pub fn voxel_count(&self) -> usize {
        self.n_voxels.x as usize * self.n_voxels.y as usize * self.n_voxels.z as usize
    }

    /// World-space bounding box corners
    pub fn aabb(&self) -> (Vec3, Vec3) {
        (self.center - self.extents, self.center + self.extents)
    }
}

/// Grid coordinates of a row-major linear index
pub fn grid_coords(index: usize, layout: UVec3) -> UVec3 {
    let nx = layout.x.max(1) as usize;
    let ny = layout.y.max(1) as usize;
    UVec3::new(
        (index % nx) as u32,
        ((index / nx) % ny) as u32,
        (index / (nx * ny)) as u32,
    )
}

/// Row-major linear index of grid coordinates
pub fn linear_index(coords: UVec3, layout: UVec3) -> usize {
    coords.x as usize
        + coords.y as usize * layout.x as usize
        + coords.z as usize * layout.x as usize * layout.y as usize
}

/// Voxel counts with the per-face overlap removed.
///
/// A brick shares one voxel with each neighbor it has; faces on the domain
/// boundary carry no overlap. The overlap therefore differs per face and
/// must be derived from the brick's position in the layout grid.
pub fn effective_size(n_voxels: UVec3, coords: UVec3, layout: UVec3) -> UVec3 {
    let axis = |n: u32, c: u32, total: u32| {
        let mut overlap = 0;
        if c > 0 {
            overlap += 1;
        }
        if c + 1 < total {
            overlap += 1;
        }
        n.saturating_sub(overlap)
    };
    UVec3::new(
        axis(n_voxels.x, coords.x, layout.x),
        axis(n_voxels.y, coords.y, layout.y),
        axis(n_voxels.z, coords.z, layout.z),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_roundtrip() {
        let layout = UVec3::new(4, 3, 2);
        for index in 0..24 {
            let coords = grid_coords(index, layout);
            assert_eq!(linear_index(coords, layout), index);
        }
    }

    #[test]
    fn test_effective_size_corner_brick() {
        // Corner brick of a 2x2x2 layout touches the domain on three faces,
        // so it only overlaps one neighbor per axis.
        let layout = UVec3::new(2, 2, 2);
        let n = UVec3::new(16, 16, 16);
        let eff = effective_size(n, UVec3::new(0, 0, 0), layout);
        assert_eq!(eff, UVec3::new(15, 15, 15));
    }

    #[test]
    fn test_effective_size_interior_brick() {
        let layout = UVec3::new(3, 3, 3);
        let n = UVec3::new(16, 16, 16);
        let eff = effective_size(n, UVec3::new(1, 1, 1), layout);
        assert_eq!(eff, UVec3::new(14, 14, 14));
    }

    #[test]
    fn test_effective_size_single_brick_lod() {
        // A 1x1x1 layout has no internal faces at all.
        let layout = UVec3::new(1, 1, 1);
        let n = UVec3::new(8, 8, 8);
        assert_eq!(effective_size(n, UVec3::ZERO, layout), n);
    }
}
