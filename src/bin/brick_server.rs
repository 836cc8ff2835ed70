//! Standalone brick server.
//!
//! Serves procedurally generated volumes over the brick protocol, which is
//! enough to exercise remote rendering end to end without any on-disk
//! container format. Usage:
//!
//! ```text
//! brick_server [port] [worker_ranks]
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use glam::{U64Vec3, UVec3, Vec3};

use strata_engine::dataset::grid_coords;
use strata_engine::{
    BrickData, BrickKey, BrickMetadata, BrickServer, Dataset, DatasetProvider, EngineResult,
    ExternalDataset, ServerConfig,
};

/// Serves synthetic volumes; any path opens a fresh two-level dataset.
struct SyntheticProvider {
    brick_voxels: u32,
}

impl SyntheticProvider {
    fn build(&self) -> EngineResult<ExternalDataset> {
        let n = self.brick_voxels;
        let ds = ExternalDataset::new();
        let layouts = vec![UVec3::splat(2), UVec3::ONE];
        ds.set_brick_layouts(layouts.clone());
        ds.set_domain_size(U64Vec3::splat(2 * (n as u64 - 1)));

        for (lod, layout) in layouts.iter().enumerate() {
            let bricks = (layout.x * layout.y * layout.z) as usize;
            let half = 0.5 / layout.as_vec3();
            for index in 0..bricks {
                let coords = grid_coords(index, *layout);
                let center = (coords.as_vec3() + 0.5) / layout.as_vec3() - 0.5;
                let md = BrickMetadata {
                    center,
                    extents: half,
                    n_voxels: UVec3::splat(n),
                    tex_min: Vec3::ZERO,
                    tex_max: Vec3::ONE,
                };
                ds.add_brick(
                    BrickKey::new(0, lod, index),
                    md,
                    BrickData::U8(Arc::new(gradient_brick(n, center))),
                    None,
                )?;
            }
        }
        Ok(ds)
    }
}

/// Radial falloff around the volume center, enough structure to look at
fn gradient_brick(n: u32, center: Vec3) -> Vec<u8> {
    let mut voxels = Vec::with_capacity((n * n * n) as usize);
    for z in 0..n {
        for y in 0..n {
            for x in 0..n {
                let p = Vec3::new(x as f32, y as f32, z as f32) / (n - 1).max(1) as f32 - 0.5;
                let d = (p + center).length();
                voxels.push((255.0 * (1.0 - d).clamp(0.0, 1.0)) as u8);
            }
        }
    }
    voxels
}

impl DatasetProvider for SyntheticProvider {
    fn open(&self, path: &str) -> EngineResult<Box<dyn Dataset>> {
        log::info!("serving synthetic volume for '{}'", path);
        Ok(Box::new(self.build()?))
    }

    fn list(&self) -> Vec<String> {
        vec!["synthetic".to_string()]
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let mut config = ServerConfig::default();
    if let Some(port) = args.next() {
        config.port = port.parse().context("port must be a number")?;
    }
    if let Some(ranks) = args.next() {
        config.worker_ranks = ranks.parse().context("worker ranks must be a number")?;
    }

    let server = BrickServer::new(config, SyntheticProvider { brick_voxels: 32 });
    server.run().context("brick server failed")
}
