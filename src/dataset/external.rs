//! Dataset fed by an external producer.
//!
//! Client applications that generate their own data push bricks in here
//! and the renderer draws them; payload ownership is shared between the
//! producer and the store. Writes are serialized against in-flight frames
//! by the interior locks.

use glam::{U64Vec3, UVec3, Vec3};
use parking_lot::RwLock;

use crate::dataset::{
    histogram::{compute_histogram, max_gradient_magnitude},
    BrickData, BrickKey, BrickMetadata, BrickStore, Dataset, ScalarType,
};
use crate::error::{EngineError, EngineResult};

#[derive(Debug)]
struct DatasetMeta {
    domain_size: U64Vec3,
    scale: Vec3,
    layouts: Vec<UVec3>,
    explicit_range: Option<(f64, f64)>,
    supplied_gradient: Option<f32>,
    computed_gradient: Option<f32>,
    histogram: Option<Vec<u32>>,
}

impl Default for DatasetMeta {
    fn default() -> Self {
        Self {
            domain_size: U64Vec3::ZERO,
            scale: Vec3::ONE,
            layouts: vec![UVec3::ONE],
            explicit_range: None,
            supplied_gradient: None,
            computed_gradient: None,
            histogram: None,
        }
    }
}

/// Bricked dataset whose bricks come from a source outside the engine
#[derive(Default)]
pub struct ExternalDataset {
    store: RwLock<BrickStore>,
    meta: RwLock<DatasetMeta>,
}

impl ExternalDataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Domain size in voxels at the finest LOD
    pub fn set_domain_size(&self, size: U64Vec3) {
        self.meta.write().domain_size = size;
    }

    /// Per-axis voxel aspect
    pub fn set_scale(&self, scale: Vec3) {
        self.meta.write().scale = scale;
    }

    /// Brick-grid dimensions per LOD, finest first
    pub fn set_brick_layouts(&self, layouts: Vec<UVec3>) {
        self.meta.write().layouts = layouts;
    }

    /// Add a brick, or replace the brick under the same key.
    ///
    /// `range` is the min/max of the payload; when the producer does not
    /// know it, it is computed here. Invalidates the cached histogram.
    pub fn add_brick(
        &self,
        key: BrickKey,
        metadata: BrickMetadata,
        data: BrickData,
        range: Option<(f64, f64)>,
    ) -> EngineResult<()> {
        let range = range.unwrap_or_else(|| data.min_max());
        self.store.write().insert(key, metadata, data, range)?;
        self.invalidate();
        Ok(())
    }

    /// Replace the payload of an existing brick; the shape is preserved.
    /// Shape changes require remove-then-add.
    pub fn update_data(&self, key: &BrickKey, data: BrickData) -> EngineResult<()> {
        self.store.write().update_data(key, data)?;
        self.invalidate();
        Ok(())
    }

    pub fn remove_brick(&self, key: &BrickKey) -> EngineResult<()> {
        self.store.write().remove(key)?;
        self.invalidate();
        Ok(())
    }

    /// Drop every brick
    pub fn clear(&self) {
        self.store.write().clear();
        self.invalidate();
    }

    /// Upload an external histogram. Doing this before pushing data avoids
    /// the implicit recomputation on first use.
    pub fn set_histogram(&self, bins: Vec<u32>) {
        self.meta.write().histogram = Some(bins);
    }

    pub fn set_range(&self, low: f64, high: f64) {
        let mut meta = self.meta.write();
        meta.explicit_range = Some((low, high));
        meta.histogram = None;
        meta.computed_gradient = None;
    }

    /// Gradient-magnitude range of the data, needed for correct 2-D
    /// transfer-function rendering
    pub fn set_gradient_magnitude_range(&self, _low: f32, high: f32) {
        self.meta.write().supplied_gradient = Some(high);
    }

    fn invalidate(&self) {
        let mut meta = self.meta.write();
        meta.histogram = None;
        meta.computed_gradient = None;
    }
}

impl Dataset for ExternalDataset {
    fn brick_count(&self) -> usize {
        self.store.read().len()
    }

    fn lod_count(&self) -> usize {
        self.meta.read().layouts.len()
    }

    fn brick_layout(&self, lod: usize) -> EngineResult<UVec3> {
        let meta = self.meta.read();
        meta.layouts
            .get(lod)
            .copied()
            .ok_or(EngineError::UnknownLod {
                lod,
                lod_count: meta.layouts.len(),
            })
    }

    fn brick_keys(&self) -> Vec<BrickKey> {
        self.store.read().keys().to_vec()
    }

    fn brick_metadata(&self, key: &BrickKey) -> EngineResult<BrickMetadata> {
        self.store.read().metadata(key)
    }

    fn brick_data(&self, key: &BrickKey) -> EngineResult<BrickData> {
        self.store.read().data(key)
    }

    fn brick_range(&self, key: &BrickKey) -> EngineResult<(f64, f64)> {
        self.store.read().range(key)
    }

    fn domain_size(&self) -> U64Vec3 {
        self.meta.read().domain_size
    }

    fn scale(&self) -> Vec3 {
        self.meta.read().scale
    }

    fn range(&self) -> (f64, f64) {
        if let Some(range) = self.meta.read().explicit_range {
            return range;
        }
        let store = self.store.read();
        match store.value_range() {
            Some(range) => range,
            None => store
                .scalar_type()
                .map(|t| t.default_range())
                .unwrap_or((0.0, 1.0)),
        }
    }

    fn max_gradient_magnitude(&self) -> f32 {
        {
            let meta = self.meta.read();
            if let Some(g) = meta.supplied_gradient {
                return g;
            }
            if let Some(g) = meta.computed_gradient {
                return g;
            }
        }
        let range = self.range();
        let bricks: Vec<(BrickData, UVec3)> = {
            let store = self.store.read();
            store
                .data_column()
                .iter()
                .cloned()
                .zip(store.metadata_column().iter().map(|m| m.n_voxels))
                .collect()
        };
        let g = max_gradient_magnitude(&bricks, range);
        self.meta.write().computed_gradient = Some(g);
        g
    }

    fn scalar_type(&self) -> EngineResult<ScalarType> {
        self.store
            .read()
            .scalar_type()
            .ok_or(EngineError::EmptyDataset)
    }

    fn histogram(&self) -> EngineResult<Vec<u32>> {
        if let Some(bins) = self.meta.read().histogram.clone() {
            return Ok(bins);
        }
        if self.store.read().is_empty() {
            return Err(EngineError::EmptyDataset);
        }
        let range = self.range();
        let bins = {
            let store = self.store.read();
            compute_histogram(store.data_column(), range)
        };
        self.meta.write().histogram = Some(bins.clone());
        Ok(bins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::histogram::BIN_COUNT;
    use crate::dataset::DatasetExt;
    use std::sync::Arc;

    fn md(n: u32) -> BrickMetadata {
        BrickMetadata {
            center: Vec3::ZERO,
            extents: Vec3::splat(0.5),
            n_voxels: UVec3::splat(n),
            tex_min: Vec3::ZERO,
            tex_max: Vec3::ONE,
        }
    }

    #[test]
    fn test_add_then_get_typed() {
        let ds = ExternalDataset::new();
        let key = BrickKey::new(0, 0, 0);
        let payload: Vec<u16> = (0..8).collect();
        ds.add_brick(
            key,
            md(2),
            BrickData::U16(Arc::new(payload.clone())),
            Some((0.0, 7.0)),
        )
        .unwrap();

        assert_eq!(ds.get_brick::<u16>(&key).unwrap(), payload);
        let err = ds.get_brick::<f32>(&key).unwrap_err();
        assert!(matches!(err, EngineError::WrongType { .. }));
        assert_eq!(ds.bit_width().unwrap(), 16);
        assert!(!ds.is_signed().unwrap());
    }

    #[test]
    fn test_histogram_supplied_sticky_until_write() {
        let ds = ExternalDataset::new();
        let key = BrickKey::new(0, 0, 0);
        ds.add_brick(key, md(2), BrickData::U8(Arc::new(vec![3; 8])), None)
            .unwrap();

        let supplied = vec![5u32; BIN_COUNT];
        ds.set_histogram(supplied.clone());
        assert_eq!(ds.histogram().unwrap(), supplied);
        assert_eq!(ds.histogram().unwrap(), supplied);

        // Any write invalidates the supplied histogram.
        ds.update_data(&key, BrickData::U8(Arc::new(vec![9; 8])))
            .unwrap();
        let recomputed = ds.histogram().unwrap();
        assert_ne!(recomputed, supplied);
        assert_eq!(recomputed.iter().map(|&b| b as usize).sum::<usize>(), 8);
    }

    #[test]
    fn test_histogram_lazy_and_cached() {
        let ds = ExternalDataset::new();
        assert!(matches!(
            ds.histogram().unwrap_err(),
            EngineError::EmptyDataset
        ));
        ds.add_brick(
            BrickKey::new(0, 0, 0),
            md(2),
            BrickData::U8(Arc::new(vec![0, 0, 0, 0, 255, 255, 255, 255])),
            None,
        )
        .unwrap();
        let bins = ds.histogram().unwrap();
        assert_eq!(bins[0], 4);
        assert_eq!(bins[BIN_COUNT - 1], 4);
    }

    #[test]
    fn test_effective_size_uses_per_face_overlap() {
        let ds = ExternalDataset::new();
        ds.set_brick_layouts(vec![UVec3::new(2, 2, 2), UVec3::ONE]);
        let corner = BrickKey::new(0, 0, 0);
        ds.add_brick(corner, md(4), BrickData::U8(Arc::new(vec![0; 64])), None)
            .unwrap();
        assert_eq!(
            ds.effective_brick_size(&corner).unwrap(),
            UVec3::splat(3)
        );

        let coarse = BrickKey::new(0, 1, 0);
        ds.add_brick(coarse, md(4), BrickData::U8(Arc::new(vec![0; 64])), None)
            .unwrap();
        assert_eq!(
            ds.effective_brick_size(&coarse).unwrap(),
            UVec3::splat(4)
        );
    }

    #[test]
    fn test_shared_payload_released_by_last_holder() {
        let producer = Arc::new(vec![1u8; 8]);
        let ds = ExternalDataset::new();
        let key = BrickKey::new(0, 0, 0);
        ds.add_brick(key, md(2), BrickData::U8(Arc::clone(&producer)), None)
            .unwrap();
        assert_eq!(Arc::strong_count(&producer), 2);
        ds.clear();
        assert_eq!(Arc::strong_count(&producer), 1);
    }

    #[test]
    fn test_range_follows_bricks_unless_set() {
        let ds = ExternalDataset::new();
        ds.add_brick(
            BrickKey::new(0, 0, 0),
            md(2),
            BrickData::U8(Arc::new(vec![10, 20, 30, 40, 50, 60, 70, 80])),
            None,
        )
        .unwrap();
        assert_eq!(ds.range(), (10.0, 80.0));
        ds.set_range(0.0, 255.0);
        assert_eq!(ds.range(), (0.0, 255.0));
    }
}
