//! Loopback tests of the brick server: catalog responses, typed brick
//! streams, the pre-OPEN failure mode and the broadcast fan-out.

use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use glam::{Mat4, U64Vec3, UVec3, Vec3};

use strata_engine::dataset::grid_coords;
use strata_engine::net::{read_brick_stream, OpenResponse, Request};
use strata_engine::{
    BrickData, BrickKey, BrickMetadata, BrickServer, Dataset, DatasetProvider, EngineResult,
    ExternalDataset, NetClient, NetDataType, ServerConfig,
};

/// Serves a 2-LOD u16 dataset: 2x2x2 fine bricks plus one coarse brick,
/// 4x4x4 voxels each. Counts every open across ranks.
struct TestProvider {
    opens: Arc<AtomicUsize>,
}

impl TestProvider {
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
                    BrickData::U16(Arc::new(vec![(index * 100) as u16; 64])),
                    None,
                )?;
            }
        }
        Ok(ds)
    }
}

impl DatasetProvider for TestProvider {
    fn open(&self, _path: &str) -> EngineResult<Box<dyn Dataset>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(Self::build()?))
    }

    fn list(&self) -> Vec<String> {
        vec!["alpha.uvf".to_string(), "beta.uvf".to_string()]
    }
}

/// Spawn a server on an ephemeral port; returns its address, the open
/// counter and the serving thread.
fn spawn_server(worker_ranks: usize) -> (String, Arc<AtomicUsize>, thread::JoinHandle<()>) {
    let opens = Arc::new(AtomicUsize::new(0));
    let provider = TestProvider {
        opens: Arc::clone(&opens),
    };
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let config = ServerConfig {
        worker_ranks,
        ..Default::default()
    };
    let server = BrickServer::new(config, provider);
    let handle = thread::spawn(move || {
        server.serve(listener).unwrap();
    });
    (addr, opens, handle)
}

/// View matrix looking at the volume from +z, column-major
fn view_matrix() -> [f32; 16] {
    Mat4::look_at_rh(Vec3::new(0.0, 0.0, 2.5), Vec3::ZERO, Vec3::Y).to_cols_array()
}

#[test]
fn open_reports_complete_catalog() {
    let (addr, _opens, handle) = spawn_server(0);
    let mut client = NetClient::connect(&addr).unwrap();

    let catalog = client.open("whatever.uvf").unwrap();
    assert_eq!(catalog.layouts.len(), 2);
    assert_eq!(catalog.layouts[0], UVec3::new(2, 2, 2));
    assert_eq!(catalog.layouts[1], UVec3::new(1, 1, 1));
    assert_eq!(catalog.bricks.len(), 9);
    for (key, md) in &catalog.bricks {
        assert_eq!(md.n_voxels, UVec3::splat(4));
        assert!(key.lod < 2);
    }

    client.shutdown().unwrap();
    handle.join().unwrap();
}

#[test]
fn list_files_and_single_brick_fetch() {
    let (addr, _opens, handle) = spawn_server(0);
    let mut client = NetClient::connect(&addr).unwrap();

    assert_eq!(client.list_files().unwrap(), vec!["alpha.uvf", "beta.uvf"]);

    client.open("a").unwrap();
    let frames = client.fetch_brick(NetDataType::U16, 0, 3).unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].lod, 0);
    assert_eq!(frames[0].index, 3);
    assert_eq!(frames[0].n_voxels, UVec3::splat(4));
    // 4x4x4 u16 voxels: 128 payload bytes.
    assert_eq!(frames[0].data.byte_len(), 128);
    assert_eq!(frames[0].data.value(0), 300.0);

    client.shutdown().unwrap();
    handle.join().unwrap();
}

#[test]
fn rotation_streams_visible_bricks_capped_by_batch() {
    let (addr, _opens, handle) = spawn_server(0);
    let mut client = NetClient::connect(&addr).unwrap();
    client.open("a").unwrap();

    // Everything visible; batch caps the response at two frames.
    client.set_batch_size(2).unwrap();
    let frames = client.rotate(view_matrix(), NetDataType::U16).unwrap();
    assert_eq!(frames.len(), 2);
    for frame in &frames {
        assert_eq!(frame.n_voxels, UVec3::splat(4));
        assert_eq!(frame.data.byte_len(), 128);
    }

    client.shutdown().unwrap();
    handle.join().unwrap();
}

#[test]
fn render_command_before_open_keeps_connection_alive() {
    let (addr, _opens, handle) = spawn_server(0);

    // Speak the raw protocol: BRICK before OPEN produces no response and
    // the connection resynchronizes at the next command boundary.
    let mut stream = TcpStream::connect(&addr).unwrap();
    Request::Brick {
        data_type: NetDataType::U16,
        lod: 0,
        index: 0,
    }
    .write_to(&mut stream)
    .unwrap();

    Request::Open {
        path: "a".to_string(),
    }
    .write_to(&mut stream)
    .unwrap();
    let catalog = OpenResponse::read_from(&mut stream).unwrap();
    assert_eq!(catalog.bricks.len(), 9);

    // Now the same command succeeds.
    Request::Brick {
        data_type: NetDataType::U16,
        lod: 1,
        index: 0,
    }
    .write_to(&mut stream)
    .unwrap();
    let frames = read_brick_stream(&mut stream, NetDataType::U16).unwrap();
    assert_eq!(frames.len(), 1);

    Request::Shutdown.write_to(&mut stream).unwrap();
    handle.join().unwrap();
}

#[test]
fn malformed_command_closes_connection_not_server() {
    let (addr, _opens, handle) = spawn_server(0);

    // Garbage command byte: the server drops this connection.
    {
        use std::io::{Read, Write};
        let mut stream = TcpStream::connect(&addr).unwrap();
        stream.write_all(&[0xab]).unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    // The server itself survives and accepts the next client.
    let mut client = NetClient::connect(&addr).unwrap();
    assert_eq!(client.list_files().unwrap().len(), 2);
    client.shutdown().unwrap();
    handle.join().unwrap();
}

#[test]
fn open_fans_out_to_every_worker_rank() {
    let (addr, opens, handle) = spawn_server(2);
    let mut client = NetClient::connect(&addr).unwrap();

    client.open("a").unwrap();
    // Rank 0 plus two workers each open their replica. The workers apply
    // the broadcast asynchronously, so give them a moment.
    let mut seen = opens.load(Ordering::SeqCst);
    for _ in 0..200 {
        if seen == 3 {
            break;
        }
        thread::sleep(std::time::Duration::from_millis(5));
        seen = opens.load(Ordering::SeqCst);
    }
    assert_eq!(seen, 3);

    client.shutdown().unwrap();
    handle.join().unwrap();
}

#[test]
fn wrong_payload_type_closes_connection() {
    let (addr, _opens, handle) = spawn_server(0);
    let mut client = NetClient::connect(&addr).unwrap();
    client.open("a").unwrap();

    // The dataset holds u16; asking for u8 is a client error.
    let err = client.fetch_brick(NetDataType::U8, 0, 0).unwrap_err();
    let _ = err;

    let mut fresh = NetClient::connect(&addr).unwrap();
    fresh.shutdown().unwrap();
    handle.join().unwrap();
}
