//! GPU brick cache.
//!
//! Bounded-budget residency manager for brick textures. Eviction follows
//! the lexicographic `(frame, intra-frame, insertion)` order, so the brick
//! touched longest ago goes first and equal frames fall back to FIFO.
//! Records touched in the current frame are pinned; when the pinned set
//! alone exceeds the budget the acquire fails and the scheduler drops to a
//! coarser LOD.

use std::collections::HashMap;

use glam::UVec3;

use crate::dataset::{BrickData, BrickKey, BrickMetadata, Dataset};
use crate::error::{EngineError, EngineResult};
use crate::render::gpu::{GpuContext, TextureHandle};

/// Bookkeeping for one resident brick texture
#[derive(Debug, Clone, Copy)]
pub struct ResidencyRecord {
    pub texture: TextureHandle,
    pub frame_used: u64,
    pub intra_frame: u64,
    pub insert_seq: u64,
    pub bytes: u64,
}

/// Bounded-capacity cache of uploaded brick textures
#[derive(Debug)]
pub struct GpuBrickCache {
    records: HashMap<BrickKey, ResidencyRecord>,
    capacity: u64,
    used: u64,
    insert_counter: u64,
}

impl GpuBrickCache {
    pub fn new(capacity: u64) -> Self {
        Self {
            records: HashMap::new(),
            capacity,
            used: 0,
            insert_counter: 0,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn resident_bytes(&self) -> u64 {
        self.used
    }

    pub fn resident_count(&self) -> usize {
        self.records.len()
    }

    pub fn contains(&self, key: &BrickKey) -> bool {
        self.records.contains_key(key)
    }

    pub fn record(&self, key: &BrickKey) -> Option<&ResidencyRecord> {
        self.records.get(key)
    }

    /// Change the byte budget, evicting immediately if it shrank
    pub fn set_capacity<G: GpuContext + ?Sized>(&mut self, ctx: &mut G, capacity: u64) {
        self.capacity = capacity;
        while self.used > self.capacity {
            // Nothing is pinned here; shrinking evicts whatever is oldest.
            if !self.evict_one(ctx, u64::MAX) {
                break;
            }
        }
    }

    /// Make one brick resident and return its texture.
    ///
    /// On a hit the record's `(frame, intra)` stamp is bumped to the
    /// caller-supplied values. On a miss the payload is fetched from the
    /// dataset (which may block on I/O), uploaded, and older records are
    /// evicted to make room.
    pub fn acquire<G: GpuContext + ?Sized>(
        &mut self,
        ctx: &mut G,
        dataset: &dyn Dataset,
        key: BrickKey,
        frame: u64,
        intra_frame: u64,
    ) -> EngineResult<TextureHandle> {
        if let Some(record) = self.records.get_mut(&key) {
            record.frame_used = frame;
            record.intra_frame = intra_frame;
            return Ok(record.texture);
        }

        let metadata = dataset.brick_metadata(&key)?;
        let data = dataset.brick_data(&key)?;
        self.admit(ctx, key, &metadata, &data, frame, intra_frame)
    }

    /// Upload an already-fetched payload (prefetch path shares this)
    pub fn admit<G: GpuContext + ?Sized>(
        &mut self,
        ctx: &mut G,
        key: BrickKey,
        metadata: &BrickMetadata,
        data: &BrickData,
        frame: u64,
        intra_frame: u64,
    ) -> EngineResult<TextureHandle> {
        if let Some(record) = self.records.get(&key) {
            return Ok(record.texture);
        }

        let bytes = data.byte_len();
        if bytes > self.capacity {
            return Err(EngineError::OutOfBudget {
                requested: bytes,
                capacity: self.capacity,
                pinned: self.pinned_bytes(frame),
            });
        }
        while self.used + bytes > self.capacity {
            if !self.evict_one(ctx, frame) {
                return Err(EngineError::OutOfBudget {
                    requested: bytes,
                    capacity: self.capacity,
                    pinned: self.pinned_bytes(frame),
                });
            }
        }

        let texture = ctx.create_texture_3d(data.scalar_type(), metadata.n_voxels)?;
        if let Err(e) = ctx.upload_texture_3d(texture, UVec3::ZERO, metadata.n_voxels, data.as_bytes()) {
            ctx.destroy_texture(texture);
            return Err(e);
        }

        self.insert_counter += 1;
        self.records.insert(
            key,
            ResidencyRecord {
                texture,
                frame_used: frame,
                intra_frame,
                insert_seq: self.insert_counter,
                bytes,
            },
        );
        self.used += bytes;
        log::debug!(
            "brick {} resident ({} bytes, {}/{} used)",
            key,
            bytes,
            self.used,
            self.capacity
        );
        Ok(texture)
    }

    /// Drop every resident texture
    pub fn release_all<G: GpuContext + ?Sized>(&mut self, ctx: &mut G) {
        for (_, record) in self.records.drain() {
            ctx.destroy_texture(record.texture);
        }
        self.used = 0;
    }

    fn pinned_bytes(&self, frame: u64) -> u64 {
        self.records
            .values()
            .filter(|r| r.frame_used == frame)
            .map(|r| r.bytes)
            .sum()
    }

    /// Evict the least-recently-used unpinned record. Returns false when
    /// everything left is pinned to `frame`.
    fn evict_one<G: GpuContext + ?Sized>(&mut self, ctx: &mut G, frame: u64) -> bool {
        let victim = self
            .records
            .iter()
            .filter(|(_, r)| r.frame_used != frame)
            .min_by_key(|(_, r)| (r.frame_used, r.intra_frame, r.insert_seq))
            .map(|(key, _)| *key);
        match victim {
            Some(key) => {
                if let Some(record) = self.records.remove(&key) {
                    ctx.destroy_texture(record.texture);
                    self.used -= record.bytes;
                    log::debug!("evicted brick {} ({} bytes)", key, record.bytes);
                }
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ExternalDataset;
    use crate::render::headless::HeadlessContext;
    use glam::{UVec3, Vec3};
    use std::sync::Arc;

    const MIB: u64 = 1024 * 1024;

    /// Dataset with `count` bricks of `mib` MiB each at LOD 0
    fn dataset_with(count: usize, mib: u64) -> ExternalDataset {
        let ds = ExternalDataset::new();
        // mib MiB of u8 voxels in a cubic-ish brick shape.
        let side = ((mib * MIB) as f64).cbrt() as u32;
        let n = UVec3::new(side, side, (mib * MIB / (side as u64 * side as u64)) as u32);
        let voxels = (n.x * n.y * n.z) as usize;
        for i in 0..count {
            let md = BrickMetadata {
                center: Vec3::new(i as f32, 0.0, 0.0),
                extents: Vec3::splat(0.5),
                n_voxels: n,
                tex_min: Vec3::ZERO,
                tex_max: Vec3::ONE,
            };
            ds.add_brick(
                BrickKey::new(0, 0, i),
                md,
                BrickData::U8(Arc::new(vec![0u8; voxels])),
                Some((0.0, 1.0)),
            )
            .unwrap();
        }
        ds
    }

    #[test]
    fn test_capacity_invariant_held() {
        let ds = dataset_with(8, 10);
        let brick_bytes = ds.brick_data(&BrickKey::new(0, 0, 0)).unwrap().byte_len();
        let mut ctx = HeadlessContext::new();
        let mut cache = GpuBrickCache::new(64 * MIB);

        // Across two frames the budget is never exceeded.
        for frame in 1..=2u64 {
            for i in 0..8 {
                let _ = cache.acquire(&mut ctx, &ds, BrickKey::new(0, 0, i), frame, i as u64);
                assert!(cache.resident_bytes() <= cache.capacity());
                assert_eq!(cache.resident_bytes(), ctx.live_texture_bytes());
            }
        }
        assert!(brick_bytes <= 10 * MIB);
    }

    #[test]
    fn test_pinned_bricks_refuse_eviction() {
        let ds = dataset_with(8, 10);
        let mut ctx = HeadlessContext::new();
        let mut cache = GpuBrickCache::new(64 * MIB);

        // Six 10 MiB bricks fit into 64 MiB; the seventh cannot evict any
        // of them because they are all pinned to the same frame.
        for i in 0..6 {
            cache
                .acquire(&mut ctx, &ds, BrickKey::new(0, 0, i), 1, i as u64)
                .unwrap();
        }
        assert_eq!(cache.resident_count(), 6);
        let err = cache
            .acquire(&mut ctx, &ds, BrickKey::new(0, 0, 6), 1, 6)
            .unwrap_err();
        assert!(matches!(err, EngineError::OutOfBudget { .. }));
        assert_eq!(cache.resident_count(), 6);
    }

    #[test]
    fn test_next_frame_evicts_lru_first() {
        let ds = dataset_with(8, 10);
        let mut ctx = HeadlessContext::new();
        let mut cache = GpuBrickCache::new(64 * MIB);

        for i in 0..6 {
            cache
                .acquire(&mut ctx, &ds, BrickKey::new(0, 0, i), 1, i as u64)
                .unwrap();
        }
        let first = cache.record(&BrickKey::new(0, 0, 0)).unwrap().texture;

        // Frame 2 touches brick 0 again, then admits a new one: brick 1
        // (oldest untouched) must be the victim, brick 0 must survive.
        cache
            .acquire(&mut ctx, &ds, BrickKey::new(0, 0, 0), 2, 0)
            .unwrap();
        cache
            .acquire(&mut ctx, &ds, BrickKey::new(0, 0, 6), 2, 1)
            .unwrap();
        assert!(cache.contains(&BrickKey::new(0, 0, 0)));
        assert!(!cache.contains(&BrickKey::new(0, 0, 1)));
        assert!(ctx.is_live(first));
    }

    #[test]
    fn test_fifo_tie_break() {
        let ds = dataset_with(8, 10);
        let mut ctx = HeadlessContext::new();
        let mut cache = GpuBrickCache::new(64 * MIB);

        // Equal (frame, intra) stamps: insertion order decides.
        for i in 0..6 {
            cache
                .acquire(&mut ctx, &ds, BrickKey::new(0, 0, i), 1, 0)
                .unwrap();
        }
        cache
            .acquire(&mut ctx, &ds, BrickKey::new(0, 0, 6), 2, 0)
            .unwrap();
        assert!(!cache.contains(&BrickKey::new(0, 0, 0)));
        assert!(cache.contains(&BrickKey::new(0, 0, 1)));
    }

    #[test]
    fn test_oversized_brick_refused() {
        let ds = dataset_with(1, 10);
        let mut ctx = HeadlessContext::new();
        let mut cache = GpuBrickCache::new(MIB);
        let err = cache
            .acquire(&mut ctx, &ds, BrickKey::new(0, 0, 0), 1, 0)
            .unwrap_err();
        assert!(matches!(err, EngineError::OutOfBudget { .. }));
        assert_eq!(cache.resident_count(), 0);
        assert_eq!(ctx.live_texture_count(), 0);
    }

    #[test]
    fn test_release_all_frees_textures() {
        let ds = dataset_with(4, 1);
        let mut ctx = HeadlessContext::new();
        let mut cache = GpuBrickCache::new(64 * MIB);
        for i in 0..4 {
            cache
                .acquire(&mut ctx, &ds, BrickKey::new(0, 0, i), 1, i as u64)
                .unwrap();
        }
        cache.release_all(&mut ctx);
        assert_eq!(cache.resident_bytes(), 0);
        assert_eq!(ctx.live_texture_count(), 0);
    }

    #[test]
    fn test_allocation_failure_surfaces() {
        let ds = dataset_with(2, 1);
        let mut ctx = HeadlessContext::new();
        ctx.texture_3d_budget = Some(1);
        let mut cache = GpuBrickCache::new(64 * MIB);
        cache
            .acquire(&mut ctx, &ds, BrickKey::new(0, 0, 0), 1, 0)
            .unwrap();
        let err = cache
            .acquire(&mut ctx, &ds, BrickKey::new(0, 0, 1), 1, 1)
            .unwrap_err();
        assert!(matches!(err, EngineError::GpuResourceExhausted { .. }));
    }
}
