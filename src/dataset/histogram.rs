//! Scans over the whole brick set: histogram and gradient magnitude.
//!
//! Both are computed lazily by the dataset when no externally supplied
//! value is present; bricks are processed in parallel.

use glam::UVec3;
use rayon::prelude::*;

use crate::constants::histogram::BIN_COUNT;
use crate::dataset::BrickData;

/// Compute the 1-D histogram over every brick, normalized against `range`
pub fn compute_histogram(bricks: &[BrickData], range: (f64, f64)) -> Vec<u32> {
    bricks
        .par_iter()
        .map(|data| {
            let mut bins = vec![0u32; BIN_COUNT];
            data.accumulate_histogram(range, &mut bins);
            bins
        })
        .reduce(
            || vec![0u32; BIN_COUNT],
            |mut acc, bins| {
                for (a, b) in acc.iter_mut().zip(bins) {
                    *a += b;
                }
                acc
            },
        )
}

/// Largest central-difference gradient magnitude over all bricks.
///
/// Values are normalized against `range` so the result is comparable
/// across element types.
pub fn max_gradient_magnitude(
    bricks: &[(BrickData, UVec3)],
    range: (f64, f64),
) -> f32 {
    let span = (range.1 - range.0).max(f64::EPSILON);
    bricks
        .par_iter()
        .map(|(data, shape)| brick_max_gradient(data, *shape, span))
        .reduce(|| 0.0f64, f64::max) as f32
}

fn brick_max_gradient(data: &BrickData, shape: UVec3, span: f64) -> f64 {
    let (nx, ny, nz) = (shape.x as usize, shape.y as usize, shape.z as usize);
    if nx < 3 || ny < 3 || nz < 3 {
        return 0.0;
    }
    let at = |x: usize, y: usize, z: usize| data.value(x + y * nx + z * nx * ny) / span;

    let mut max_sq = 0.0f64;
    for z in 1..nz - 1 {
        for y in 1..ny - 1 {
            for x in 1..nx - 1 {
                let gx = (at(x + 1, y, z) - at(x - 1, y, z)) * 0.5;
                let gy = (at(x, y + 1, z) - at(x, y - 1, z)) * 0.5;
                let gz = (at(x, y, z + 1) - at(x, y, z - 1)) * 0.5;
                let sq = gx * gx + gy * gy + gz * gz;
                if sq > max_sq {
                    max_sq = sq;
                }
            }
        }
    }
    max_sq.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_histogram_total_count() {
        let bricks = vec![
            BrickData::U8(Arc::new(vec![0; 64])),
            BrickData::U8(Arc::new(vec![255; 64])),
        ];
        let bins = compute_histogram(&bricks, (0.0, 255.0));
        assert_eq!(bins.len(), BIN_COUNT);
        assert_eq!(bins.iter().map(|&b| b as usize).sum::<usize>(), 128);
        assert_eq!(bins[0], 64);
        assert_eq!(bins[BIN_COUNT - 1], 64);
    }

    #[test]
    fn test_gradient_of_constant_volume_is_zero() {
        let data = BrickData::F32(Arc::new(vec![0.5; 27]));
        let bricks = vec![(data, UVec3::splat(3))];
        assert_eq!(max_gradient_magnitude(&bricks, (0.0, 1.0)), 0.0);
    }

    #[test]
    fn test_gradient_of_ramp() {
        // Linear ramp along x with slope 1 per voxel over a unit range.
        let mut values = vec![0.0f32; 27];
        for z in 0..3 {
            for y in 0..3 {
                for x in 0..3 {
                    values[x + y * 3 + z * 9] = x as f32;
                }
            }
        }
        let bricks = vec![(BrickData::F32(Arc::new(values)), UVec3::splat(3))];
        let g = max_gradient_magnitude(&bricks, (0.0, 1.0));
        assert!((g - 1.0).abs() < 1e-6);
    }
}
