//! Columnar brick store.
//!
//! Bricks live in parallel columns (key, metadata, payload, value range)
//! indexed by a row map. The store enforces the single-element-type rule:
//! the first inserted brick establishes the tag, later inserts with a
//! different tag are rejected.

use std::collections::HashMap;

use crate::dataset::{BrickData, BrickKey, BrickMetadata, ScalarType};
use crate::error::{EngineError, EngineResult};

/// In-memory brick table with columnar layout
#[derive(Debug, Default)]
pub struct BrickStore {
    keys: Vec<BrickKey>,
    metadata: Vec<BrickMetadata>,
    data: Vec<BrickData>,
    ranges: Vec<(f64, f64)>,
    rows: HashMap<BrickKey, usize>,
    scalar_type: Option<ScalarType>,
}

impl BrickStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Element type of the stored bricks, `None` while empty
    pub fn scalar_type(&self) -> Option<ScalarType> {
        self.scalar_type
    }

    pub fn keys(&self) -> &[BrickKey] {
        &self.keys
    }

    /// Payload column, in row order
    pub fn data_column(&self) -> &[BrickData] {
        &self.data
    }

    /// Metadata column, in row order
    pub fn metadata_column(&self) -> &[BrickMetadata] {
        &self.metadata
    }

    fn row(&self, key: &BrickKey) -> EngineResult<usize> {
        self.rows
            .get(key)
            .copied()
            .ok_or(EngineError::BrickNotFound { key: *key })
    }

    /// Insert a brick or replace an existing one under the same key.
    ///
    /// The payload length must match the metadata voxel count, and the
    /// element type must match the tag established by the first brick.
    pub fn insert(
        &mut self,
        key: BrickKey,
        metadata: BrickMetadata,
        data: BrickData,
        range: (f64, f64),
    ) -> EngineResult<()> {
        if let Some(expected) = self.scalar_type {
            if data.scalar_type() != expected {
                return Err(EngineError::WrongType {
                    requested: data.scalar_type(),
                    actual: expected,
                });
            }
        }
        if data.len() != metadata.voxel_count() {
            return Err(EngineError::ShapeMismatch {
                key,
                expected: metadata.voxel_count(),
                actual: data.len(),
            });
        }

        self.scalar_type = Some(data.scalar_type());
        match self.rows.get(&key) {
            Some(&row) => {
                self.metadata[row] = metadata;
                self.data[row] = data;
                self.ranges[row] = range;
            }
            None => {
                self.rows.insert(key, self.keys.len());
                self.keys.push(key);
                self.metadata.push(metadata);
                self.data.push(data);
                self.ranges.push(range);
            }
        }
        Ok(())
    }

    /// Replace the payload of an existing brick, keeping its shape.
    ///
    /// The per-brick value range is recomputed from the new payload.
    pub fn update_data(&mut self, key: &BrickKey, data: BrickData) -> EngineResult<()> {
        let row = self.row(key)?;
        if let Some(expected) = self.scalar_type {
            if data.scalar_type() != expected {
                return Err(EngineError::WrongType {
                    requested: data.scalar_type(),
                    actual: expected,
                });
            }
        }
        let expected = self.metadata[row].voxel_count();
        if data.len() != expected {
            return Err(EngineError::ShapeMismatch {
                key: *key,
                expected,
                actual: data.len(),
            });
        }
        self.ranges[row] = data.min_max();
        self.data[row] = data;
        Ok(())
    }

    /// Remove a brick. Shape changes are remove-then-add.
    pub fn remove(&mut self, key: &BrickKey) -> EngineResult<()> {
        let row = self.row(key)?;
        let last = self.keys.len() - 1;
        self.keys.swap_remove(row);
        self.metadata.swap_remove(row);
        self.data.swap_remove(row);
        self.ranges.swap_remove(row);
        self.rows.remove(key);
        if row != last {
            self.rows.insert(self.keys[row], row);
        }
        if self.keys.is_empty() {
            self.scalar_type = None;
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.keys.clear();
        self.metadata.clear();
        self.data.clear();
        self.ranges.clear();
        self.rows.clear();
        self.scalar_type = None;
    }

    pub fn contains(&self, key: &BrickKey) -> bool {
        self.rows.contains_key(key)
    }

    pub fn metadata(&self, key: &BrickKey) -> EngineResult<BrickMetadata> {
        Ok(self.metadata[self.row(key)?])
    }

    /// Shared handle to the payload; cloning bumps the refcount only
    pub fn data(&self, key: &BrickKey) -> EngineResult<BrickData> {
        Ok(self.data[self.row(key)?].clone())
    }

    pub fn range(&self, key: &BrickKey) -> EngineResult<(f64, f64)> {
        Ok(self.ranges[self.row(key)?])
    }

    /// Union of the per-brick value ranges
    pub fn value_range(&self) -> Option<(f64, f64)> {
        self.ranges
            .iter()
            .copied()
            .reduce(|a, b| (a.0.min(b.0), a.1.max(b.1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{UVec3, Vec3};
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

    fn brick(n: u32, value: u8) -> BrickData {
        BrickData::U8(Arc::new(vec![value; (n * n * n) as usize]))
    }

    #[test]
    fn test_insert_get_roundtrip() {
        let mut store = BrickStore::new();
        let key = BrickKey::new(0, 0, 0);
        store.insert(key, md(2), brick(2, 7), (7.0, 7.0)).unwrap();
        let data = store.data(&key).unwrap();
        assert_eq!(data.len(), 8);
        assert_eq!(data.value(3), 7.0);
        assert_eq!(store.range(&key).unwrap(), (7.0, 7.0));
    }

    #[test]
    fn test_mixed_types_rejected() {
        let mut store = BrickStore::new();
        store
            .insert(BrickKey::new(0, 0, 0), md(2), brick(2, 0), (0.0, 0.0))
            .unwrap();
        let err = store
            .insert(
                BrickKey::new(0, 0, 1),
                md(2),
                BrickData::U16(Arc::new(vec![0; 8])),
                (0.0, 0.0),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::WrongType { .. }));
    }

    #[test]
    fn test_update_preserves_shape() {
        let mut store = BrickStore::new();
        let key = BrickKey::new(0, 0, 0);
        store.insert(key, md(2), brick(2, 1), (1.0, 1.0)).unwrap();

        let err = store
            .update_data(&key, BrickData::U8(Arc::new(vec![0; 27])))
            .unwrap_err();
        assert!(matches!(err, EngineError::ShapeMismatch { .. }));

        store.update_data(&key, brick(2, 9)).unwrap();
        assert_eq!(store.range(&key).unwrap(), (9.0, 9.0));
    }

    #[test]
    fn test_remove_fixes_row_index() {
        let mut store = BrickStore::new();
        let a = BrickKey::new(0, 0, 0);
        let b = BrickKey::new(0, 0, 1);
        let c = BrickKey::new(0, 0, 2);
        for (i, key) in [a, b, c].into_iter().enumerate() {
            store.insert(key, md(2), brick(2, i as u8), (0.0, 9.0)).unwrap();
        }
        store.remove(&a).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.data(&c).unwrap().value(0), 2.0);
        assert!(store.data(&a).is_err());
    }

    #[test]
    fn test_unknown_key() {
        let store = BrickStore::new();
        let err = store.data(&BrickKey::new(0, 1, 5)).unwrap_err();
        assert!(matches!(err, EngineError::BrickNotFound { .. }));
    }
}
