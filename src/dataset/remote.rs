//! Remote dataset facade.
//!
//! Wraps a brick-server connection as a [`Dataset`], so the scheduler
//! cannot tell a remote volume from an in-process one. The brick catalog
//! arrives with the OPEN response; payloads are fetched per brick over the
//! socket, which may block inside `brick_data`.

use std::collections::HashMap;
use std::net::ToSocketAddrs;

use glam::{U64Vec3, UVec3, Vec3};
use parking_lot::{Mutex, RwLock};

use crate::dataset::{
    histogram::compute_histogram, BrickData, BrickKey, BrickMetadata, Dataset, ScalarType,
};
use crate::error::{EngineError, EngineResult};
use crate::net::{NetClient, NetDataType};

/// Dataset served by a remote brick server
pub struct RemoteDataset {
    client: Mutex<NetClient>,
    data_type: NetDataType,
    layouts: Vec<UVec3>,
    keys: Vec<BrickKey>,
    metadata: HashMap<BrickKey, BrickMetadata>,
    domain_size: U64Vec3,
    range: RwLock<(f64, f64)>,
    max_gradient: RwLock<f32>,
    histogram: RwLock<Option<Vec<u32>>>,
}

impl RemoteDataset {
    /// Connect and open `path` on the server. The catalog response carries
    /// no element-type information, so the expected payload type is part
    /// of the call.
    pub fn open(
        addr: impl ToSocketAddrs,
        path: &str,
        data_type: NetDataType,
    ) -> EngineResult<Self> {
        let mut client = NetClient::connect(addr)?;
        let catalog = client.open(path)?;

        let mut metadata = HashMap::with_capacity(catalog.bricks.len());
        let mut keys = Vec::with_capacity(catalog.bricks.len());
        for (key, md) in &catalog.bricks {
            keys.push(*key);
            metadata.insert(*key, *md);
        }

        // Domain size approximated from the finest layout; the catalog
        // does not transmit it directly.
        let finest = catalog.layouts.first().copied().unwrap_or(UVec3::ONE);
        let max_voxels = catalog
            .bricks
            .iter()
            .filter(|(k, _)| k.lod == 0)
            .map(|(_, md)| md.n_voxels)
            .fold(UVec3::ONE, UVec3::max);
        let domain_size = U64Vec3::new(
            finest.x as u64 * max_voxels.x as u64,
            finest.y as u64 * max_voxels.y as u64,
            finest.z as u64 * max_voxels.z as u64,
        );

        Ok(Self {
            client: Mutex::new(client),
            data_type,
            layouts: catalog.layouts,
            keys,
            metadata,
            domain_size,
            range: RwLock::new(data_type.to_scalar().default_range()),
            max_gradient: RwLock::new(1.0),
            histogram: RwLock::new(None),
        })
    }

    /// Override the value range the server-side catalog cannot carry
    pub fn set_range(&self, low: f64, high: f64) {
        *self.range.write() = (low, high);
        *self.histogram.write() = None;
    }

    pub fn set_gradient_magnitude_range(&self, _low: f32, high: f32) {
        *self.max_gradient.write() = high;
    }
}

impl Dataset for RemoteDataset {
    fn brick_count(&self) -> usize {
        self.keys.len()
    }

    fn lod_count(&self) -> usize {
        self.layouts.len()
    }

    fn brick_layout(&self, lod: usize) -> EngineResult<UVec3> {
        self.layouts
            .get(lod)
            .copied()
            .ok_or(EngineError::UnknownLod {
                lod,
                lod_count: self.layouts.len(),
            })
    }

    fn brick_keys(&self) -> Vec<BrickKey> {
        self.keys.clone()
    }

    fn brick_metadata(&self, key: &BrickKey) -> EngineResult<BrickMetadata> {
        self.metadata
            .get(key)
            .copied()
            .ok_or(EngineError::BrickNotFound { key: *key })
    }

    fn brick_data(&self, key: &BrickKey) -> EngineResult<BrickData> {
        if !self.metadata.contains_key(key) {
            return Err(EngineError::BrickNotFound { key: *key });
        }
        let frames = self.client.lock().fetch_brick(
            self.data_type,
            key.lod as u32,
            key.index as u32,
        )?;
        frames
            .into_iter()
            .find(|f| f.lod as usize == key.lod && f.index as usize == key.index)
            .map(|f| f.data)
            .ok_or(EngineError::BrickNotFound { key: *key })
    }

    /// The catalog carries no per-brick ranges; the dataset range keeps
    /// remote bricks conservative (never culled by the transfer function).
    fn brick_range(&self, key: &BrickKey) -> EngineResult<(f64, f64)> {
        if !self.metadata.contains_key(key) {
            return Err(EngineError::BrickNotFound { key: *key });
        }
        Ok(*self.range.read())
    }

    fn domain_size(&self) -> U64Vec3 {
        self.domain_size
    }

    fn scale(&self) -> Vec3 {
        Vec3::ONE
    }

    fn range(&self) -> (f64, f64) {
        *self.range.read()
    }

    fn max_gradient_magnitude(&self) -> f32 {
        *self.max_gradient.read()
    }

    fn scalar_type(&self) -> EngineResult<ScalarType> {
        Ok(self.data_type.to_scalar())
    }

    /// Computed from the coarsest LOD's bricks, which are cheap to pull
    /// over the wire, and cached afterwards.
    fn histogram(&self) -> EngineResult<Vec<u32>> {
        if let Some(bins) = self.histogram.read().clone() {
            return Ok(bins);
        }
        let coarsest = self.layouts.len().saturating_sub(1);
        let coarse_keys: Vec<BrickKey> = self
            .keys
            .iter()
            .copied()
            .filter(|k| k.lod == coarsest)
            .collect();
        if coarse_keys.is_empty() {
            return Err(EngineError::EmptyDataset);
        }
        let bricks = coarse_keys
            .iter()
            .map(|key| self.brick_data(key))
            .collect::<EngineResult<Vec<_>>>()?;
        let bins = compute_histogram(&bricks, self.range());
        *self.histogram.write() = Some(bins.clone());
        Ok(bins)
    }
}
