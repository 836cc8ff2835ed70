//! The remote dataset behind the facade: a scheduler rendering from a
//! brick server must behave exactly like one rendering in-process.

use std::net::TcpListener;
use std::sync::Arc;
use std::thread;

use glam::{Mat4, U64Vec3, UVec2, UVec3, Vec3};

use strata_engine::dataset::grid_coords;
use strata_engine::{
    BrickData, BrickKey, BrickMetadata, Dataset, DatasetExt, DatasetProvider, EngineResult,
    ExternalDataset, FrameScheduler, HeadlessContext, NetClient, NetDataType, RemoteDataset,
    RenderMode, SchedulerConfig, ServerConfig, ShaderCatalog, TransferFunction1D, ViewState,
};

struct Provider;

impl Provider {
    fn build() -> EngineResult<ExternalDataset> {
        let ds = ExternalDataset::new();
        ds.set_domain_size(U64Vec3::splat(8));
        ds.set_brick_layouts(vec![UVec3::splat(2), UVec3::ONE]);
        for (lod, layout) in [UVec3::splat(2), UVec3::ONE].iter().enumerate() {
            let count = (layout.x * layout.y * layout.z) as usize;
            for index in 0..count {
                let coords = grid_coords(index, *layout);
                let md = BrickMetadata {
                    center: (coords.as_vec3() + 0.5) / layout.as_vec3() - 0.5,
                    extents: 0.5 / layout.as_vec3(),
                    n_voxels: UVec3::splat(4),
                    tex_min: Vec3::ZERO,
                    tex_max: Vec3::ONE,
                };
                ds.add_brick(
                    BrickKey::new(0, lod, index),
                    md,
                    BrickData::U8(Arc::new(vec![(40 + 10 * index) as u8; 64])),
                    None,
                )?;
            }
        }
        Ok(ds)
    }
}

impl DatasetProvider for Provider {
    fn open(&self, _path: &str) -> EngineResult<Box<dyn Dataset>> {
        Ok(Box::new(Self::build()?))
    }

    fn list(&self) -> Vec<String> {
        Vec::new()
    }
}

fn spawn_server() -> (String, thread::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let server = strata_engine::BrickServer::new(ServerConfig::default(), Provider);
    let handle = thread::spawn(move || server.serve(listener).unwrap());
    (addr, handle)
}

#[test]
fn remote_dataset_mirrors_the_catalog() {
    let (addr, handle) = spawn_server();
    let remote = RemoteDataset::open(&addr, "vol", NetDataType::U8).unwrap();

    assert_eq!(remote.brick_count(), 9);
    assert_eq!(remote.lod_count(), 2);
    assert_eq!(remote.brick_layout(0).unwrap(), UVec3::splat(2));
    assert_eq!(remote.bit_width().unwrap(), 8);

    // Typed fetch round-trips through BRICK.
    let payload = remote.get_brick::<u8>(&BrickKey::new(0, 0, 2)).unwrap();
    assert_eq!(payload.len(), 64);
    assert!(payload.iter().all(|&v| v == 60));

    // Per-face overlap falls out of the catalog layouts.
    assert_eq!(
        remote
            .effective_brick_size(&BrickKey::new(0, 0, 0))
            .unwrap(),
        UVec3::splat(3)
    );
    assert_eq!(
        remote
            .effective_brick_size(&BrickKey::new(0, 1, 0))
            .unwrap(),
        UVec3::splat(4)
    );

    // The server handles one connection at a time; release the remote's
    // connection before the shutdown client can be served.
    drop(remote);
    NetClient::connect(&addr).unwrap().shutdown().unwrap();
    handle.join().unwrap();
}

#[test]
fn scheduler_renders_through_the_remote_facade() {
    let (addr, handle) = spawn_server();
    let remote = RemoteDataset::open(&addr, "vol", NetDataType::U8).unwrap();

    let mut ctx = HeadlessContext::new();
    let mut sched = FrameScheduler::new(
        &mut ctx,
        &ShaderCatalog::placeholder(),
        SchedulerConfig::default(),
        UVec2::splat(256),
    )
    .unwrap();
    sched.set_mode(RenderMode::Transfer1D);

    let view = ViewState {
        world: Mat4::IDENTITY,
        view: Mat4::look_at_rh(Vec3::new(0.0, 0.0, 2.5), Vec3::ZERO, Vec3::Y),
        projection: Mat4::perspective_rh_gl(std::f32::consts::FRAC_PI_3, 1.0, 0.1, 100.0),
        viewport: UVec2::splat(256),
    };
    let tf = TransferFunction1D::ramp(64);
    let stats = sched.render_frame(&mut ctx, &remote, &tf, &view).unwrap();
    assert!(stats.completed);
    assert_eq!(stats.bricks_drawn, 8);

    // A second frame is served entirely from the GPU cache.
    let uploads = ctx.uploads.len();
    let stats = sched.render_frame(&mut ctx, &remote, &tf, &view).unwrap();
    assert_eq!(stats.bricks_drawn, 8);
    assert_eq!(ctx.uploads.len(), uploads);

    // The server handles one connection at a time; release the remote's
    // connection before the shutdown client can be served.
    drop(remote);
    NetClient::connect(&addr).unwrap().shutdown().unwrap();
    handle.join().unwrap();
}

#[test]
fn remote_histogram_computed_from_coarse_bricks() {
    let (addr, handle) = spawn_server();
    let remote = RemoteDataset::open(&addr, "vol", NetDataType::U8).unwrap();

    let bins = remote.histogram().unwrap();
    assert_eq!(bins.len(), 1024);
    // One coarse brick of 64 constant voxels.
    assert_eq!(bins.iter().map(|&b| b as usize).sum::<usize>(), 64);

    // The server handles one connection at a time; release the remote's
    // connection before the shutdown client can be served.
    drop(remote);
    NetClient::connect(&addr).unwrap().shutdown().unwrap();
    handle.join().unwrap();
}
