//! Remote brick server.
//!
//! Rank 0 owns the socket: it parses each request, broadcasts the typed
//! struct to the worker group, applies the request to its own session and
//! writes the response. Workers apply the same requests against their own
//! dataset replicas and stay silent. Per connection the session walks
//! `Listening -> Open -> {Rendering, Querying}`; render commands before
//! OPEN fail with `NoDataset` and the connection resynchronizes at the
//! next command boundary, while malformed bytes close it.

use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

use glam::{Mat4, UVec2};
use serde::{Deserialize, Serialize};

use crate::constants::net::{DEFAULT_BATCH_SIZE, DEFAULT_PORT};
use crate::dataset::{BrickKey, Dataset};
use crate::error::{EngineError, EngineResult, IoContext};
use crate::net::broadcast::{BroadcastGroup, RequestHandler};
use crate::net::protocol::{
    write_brick_stream, BrickFrame, CommandCode, NetDataType, OpenResponse, Request,
};
use crate::net::wire;
use crate::render::{choose_lod, enumerate_visible, ViewState};

/// Source of datasets the server can open; keeps the on-disk container
/// format out of the core.
pub trait DatasetProvider: Send + Sync {
    fn open(&self, path: &str) -> EngineResult<Box<dyn Dataset>>;

    /// Names the LIST_FILES command reports
    fn list(&self) -> Vec<String>;
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
    /// Worker ranks participating in the broadcast; zero runs single-ranked
    pub worker_ranks: usize,
    /// Viewport assumed when a ROTATION request drives visibility
    pub viewport: UVec2,
    pub batch_size: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            worker_ranks: 0,
            viewport: UVec2::splat(512),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

enum Flow {
    Closed,
    Shutdown,
}

/// Per-connection (and per-worker) protocol state
struct Session<P: DatasetProvider> {
    provider: Arc<P>,
    dataset: Option<Box<dyn Dataset>>,
    batch: u32,
    viewport: UVec2,
    rank: usize,
}

impl<P: DatasetProvider> Session<P> {
    fn new(provider: Arc<P>, rank: usize, viewport: UVec2, batch: u32) -> Self {
        Self {
            provider,
            dataset: None,
            batch,
            viewport,
            rank,
        }
    }

    /// Apply one request. Rank 0 passes the socket as `out`; workers pass
    /// `None` and produce no bytes.
    fn apply(&mut self, request: &Request, out: Option<&mut dyn Write>) -> EngineResult<()> {
        match request {
            Request::Open { path } => {
                if self.dataset.take().is_some() {
                    log::info!("rank {}: closing previous dataset before OPEN", self.rank);
                }
                let dataset = self.provider.open(path)?;
                if let Some(out) = out {
                    let response = catalog_of(dataset.as_ref())?;
                    let mut buf = Vec::new();
                    response.write_to(&mut buf)?;
                    out.write_all(&buf).io_context("OPEN response")?;
                }
                self.dataset = Some(dataset);
                Ok(())
            }
            Request::Close { path } => {
                log::info!("rank {}: CLOSE {}", self.rank, path);
                self.dataset = None;
                Ok(())
            }
            Request::ListFiles => {
                if let Some(out) = out {
                    let names = self.provider.list();
                    let mut buf = Vec::new();
                    wire::write_u16(&mut buf, names.len() as u16)?;
                    for name in &names {
                        wire::write_cstr(&mut buf, name)?;
                    }
                    out.write_all(&buf).io_context("LIST_FILES response")?;
                }
                Ok(())
            }
            Request::BatchSize { size } => {
                self.batch = *size;
                Ok(())
            }
            Request::Brick {
                data_type,
                lod,
                index,
            } => {
                let dataset = self.dataset.as_deref().ok_or(EngineError::NoDataset)?;
                let key = BrickKey::new(0, *lod as usize, *index as usize);
                if let Some(out) = out {
                    let frame = fetch_frame(dataset, &key, *data_type)?;
                    let mut buf = Vec::new();
                    write_brick_stream(&mut buf, *data_type, &[frame])?;
                    out.write_all(&buf).io_context("BRICK response")?;
                }
                Ok(())
            }
            Request::Rotation { matrix, data_type } => {
                let dataset = self.dataset.as_deref().ok_or(EngineError::NoDataset)?;
                let view = ViewState {
                    world: Mat4::IDENTITY,
                    view: Mat4::from_cols_array(matrix),
                    projection: Mat4::perspective_rh_gl(
                        std::f32::consts::FRAC_PI_3,
                        self.viewport.x as f32 / self.viewport.y.max(1) as f32,
                        0.01,
                        100.0,
                    ),
                    viewport: self.viewport,
                };
                let lod = choose_lod(dataset, &view);
                let mut keys = enumerate_visible(dataset, &view, lod, 0, None)?.bricks;
                keys.truncate(self.batch as usize);
                log::debug!(
                    "rank {}: ROTATION streams {} bricks at LOD {}",
                    self.rank,
                    keys.len(),
                    lod
                );
                if let Some(out) = out {
                    let frames = keys
                        .iter()
                        .map(|key| fetch_frame(dataset, key, *data_type))
                        .collect::<EngineResult<Vec<BrickFrame>>>()?;
                    let mut buf = Vec::new();
                    write_brick_stream(&mut buf, *data_type, &frames)?;
                    out.write_all(&buf).io_context("ROTATION response")?;
                }
                Ok(())
            }
            Request::Shutdown => Ok(()),
        }
    }
}

impl<P: DatasetProvider> RequestHandler for Session<P> {
    fn handle(&mut self, request: &Request) {
        if let Err(e) = self.apply(request, None) {
            log::debug!("rank {}: {}", self.rank, e);
        }
    }
}

/// Complete brick catalog sent in the OPEN response
fn catalog_of(dataset: &dyn Dataset) -> EngineResult<OpenResponse> {
    let layouts = (0..dataset.lod_count())
        .map(|lod| dataset.brick_layout(lod))
        .collect::<EngineResult<Vec<_>>>()?;
    let mut keys = dataset.brick_keys();
    keys.sort();
    let bricks = keys
        .into_iter()
        .map(|key| Ok((key, dataset.brick_metadata(&key)?)))
        .collect::<EngineResult<Vec<_>>>()?;
    Ok(OpenResponse { layouts, bricks })
}

fn fetch_frame(
    dataset: &dyn Dataset,
    key: &BrickKey,
    data_type: NetDataType,
) -> EngineResult<BrickFrame> {
    let md = dataset.brick_metadata(key)?;
    let data = dataset.brick_data(key)?;
    if data.scalar_type() != data_type.to_scalar() {
        return Err(EngineError::WrongType {
            requested: data_type.to_scalar(),
            actual: data.scalar_type(),
        });
    }
    Ok(BrickFrame {
        lod: key.lod as u32,
        index: key.index as u32,
        n_voxels: md.n_voxels,
        data,
    })
}

/// The brick server. Connections are served one at a time; each handler
/// is single-threaded per the protocol contract.
pub struct BrickServer<P: DatasetProvider> {
    config: ServerConfig,
    provider: Arc<P>,
}

impl<P: DatasetProvider + 'static> BrickServer<P> {
    pub fn new(config: ServerConfig, provider: P) -> Self {
        Self {
            config,
            provider: Arc::new(provider),
        }
    }

    /// Bind and serve until a SHUTDOWN request arrives
    pub fn run(&self) -> EngineResult<()> {
        let addr = format!("{}:{}", self.config.bind_addr, self.config.port);
        let listener = TcpListener::bind(&addr).io_context("bind brick server")?;
        self.serve(listener)
    }

    /// Serve on an already-bound listener (tests bind an ephemeral port)
    pub fn serve(&self, listener: TcpListener) -> EngineResult<()> {
        if let Ok(addr) = listener.local_addr() {
            log::info!("brick server listening on {}", addr);
        }
        let group = BroadcastGroup::spawn(self.config.worker_ranks, |rank| {
            Session::new(
                Arc::clone(&self.provider),
                rank,
                self.config.viewport,
                self.config.batch_size,
            )
        });

        let mut result = Ok(());
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => match self.handle_connection(stream, &group) {
                    Ok(Flow::Closed) => {}
                    Ok(Flow::Shutdown) => break,
                    Err(e) => {
                        result = Err(e);
                        break;
                    }
                },
                Err(e) => log::warn!("accept failed: {}", e),
            }
        }
        group.shutdown();
        log::info!("brick server exits");
        result
    }

    fn handle_connection(
        &self,
        mut stream: TcpStream,
        group: &BroadcastGroup,
    ) -> EngineResult<Flow> {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "<unknown>".to_string());
        log::info!("client {} connected", peer);

        let mut session = Session::new(
            Arc::clone(&self.provider),
            0,
            self.config.viewport,
            self.config.batch_size,
        );
        loop {
            // EOF between commands is a normal disconnect.
            let code_byte = match wire::read_u8(&mut stream) {
                Ok(byte) => byte,
                Err(_) => {
                    log::info!("client {} disconnected", peer);
                    return Ok(Flow::Closed);
                }
            };
            let request = match CommandCode::try_from(code_byte)
                .and_then(|code| Request::read_body(code, &mut stream))
            {
                Ok(request) => request,
                Err(e) => {
                    log::warn!("malformed request from {}: {}; closing", peer, e);
                    return Ok(Flow::Closed);
                }
            };
            log::debug!("{} -> {:?}", peer, request.code());

            group.broadcast(&request)?;
            let shutdown = matches!(request, Request::Shutdown);

            match session.apply(&request, Some(&mut stream)) {
                Ok(()) => {}
                Err(EngineError::NoDataset) => {
                    // The connection stays usable; the client resyncs at
                    // the next command boundary.
                    log::warn!("render command from {} before OPEN", peer);
                }
                Err(e) => {
                    log::warn!("request from {} failed: {}; closing", peer, e);
                    return Ok(Flow::Closed);
                }
            }

            if shutdown {
                log::info!("SHUTDOWN from {}", peer);
                return Ok(Flow::Shutdown);
            }
        }
    }
}
