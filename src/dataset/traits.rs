//! Dataset facade consumed by the renderer.
//!
//! The frame scheduler only ever sees `&dyn Dataset`; in-process stores,
//! file-backed readers and the remote client all sit behind this trait and
//! are interchangeable.

use glam::{U64Vec3, UVec3, Vec3};

use crate::dataset::{
    brick::{effective_size, grid_coords},
    BrickData, BrickKey, BrickMetadata, Scalar, ScalarType,
};
use crate::error::{EngineError, EngineResult};

/// Bricked dataset contract
pub trait Dataset: Send + Sync {
    /// Total number of bricks across all LODs and timesteps
    fn brick_count(&self) -> usize;

    /// Number of LOD levels; level 0 is the finest
    fn lod_count(&self) -> usize;

    /// Brick-grid dimensions of one LOD
    fn brick_layout(&self, lod: usize) -> EngineResult<UVec3>;

    /// Every brick key currently known to the dataset
    fn brick_keys(&self) -> Vec<BrickKey>;

    fn brick_metadata(&self, key: &BrickKey) -> EngineResult<BrickMetadata>;

    /// Type-erased payload fetch; typed access goes through [`DatasetExt`]
    fn brick_data(&self, key: &BrickKey) -> EngineResult<BrickData>;

    /// Min/max of the values inside one brick
    fn brick_range(&self, key: &BrickKey) -> EngineResult<(f64, f64)>;

    /// Voxel counts with the per-face overlap removed.
    ///
    /// Overlap is one voxel on internal faces and zero on domain faces;
    /// the face-dependent value falls out of the brick's grid position.
    fn effective_brick_size(&self, key: &BrickKey) -> EngineResult<UVec3> {
        let md = self.brick_metadata(key)?;
        let layout = self.brick_layout(key.lod)?;
        Ok(effective_size(
            md.n_voxels,
            grid_coords(key.index, layout),
            layout,
        ))
    }

    /// Domain size in voxels at the finest LOD
    fn domain_size(&self) -> U64Vec3;

    /// Domain size in voxels at a coarser LOD
    fn domain_size_at_lod(&self, lod: usize) -> U64Vec3 {
        let d = self.domain_size();
        U64Vec3::new(
            (d.x >> lod).max(1),
            (d.y >> lod).max(1),
            (d.z >> lod).max(1),
        )
    }

    /// Per-axis voxel aspect
    fn scale(&self) -> Vec3;

    /// Global scalar range
    fn range(&self) -> (f64, f64);

    fn max_gradient_magnitude(&self) -> f32;

    /// Element type shared by every brick
    fn scalar_type(&self) -> EngineResult<ScalarType>;

    /// 1-D histogram, 1024 bins; supplied externally or computed lazily
    fn histogram(&self) -> EngineResult<Vec<u32>>;

    /// Components per voxel. Only single-component data is supported.
    fn component_count(&self) -> u32 {
        log::warn!("assuming single-component data");
        1
    }
}

/// Typed accessors layered over the object-safe [`Dataset`] surface
pub trait DatasetExt {
    /// Copy one brick out as `T`; fails with `WrongType` on tag mismatch
    fn get_brick<T: Scalar>(&self, key: &BrickKey) -> EngineResult<Vec<T>>;

    fn bit_width(&self) -> EngineResult<u32>;
    fn is_signed(&self) -> EngineResult<bool>;
    fn is_float(&self) -> EngineResult<bool>;
}

impl<D: Dataset + ?Sized> DatasetExt for D {
    fn get_brick<T: Scalar>(&self, key: &BrickKey) -> EngineResult<Vec<T>> {
        let data = self.brick_data(key)?;
        match T::from_data(&data) {
            Some(shared) => Ok(shared.as_ref().clone()),
            None => Err(EngineError::WrongType {
                requested: T::SCALAR_TYPE,
                actual: data.scalar_type(),
            }),
        }
    }

    fn bit_width(&self) -> EngineResult<u32> {
        Ok(self.scalar_type()?.bit_width())
    }

    fn is_signed(&self) -> EngineResult<bool> {
        Ok(self.scalar_type()?.is_signed())
    }

    fn is_float(&self) -> EngineResult<bool> {
        Ok(self.scalar_type()?.is_float())
    }
}
