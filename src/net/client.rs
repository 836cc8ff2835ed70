//! Client side of the brick-server protocol.

use std::net::{TcpStream, ToSocketAddrs};

use crate::error::{EngineResult, IoContext};
use crate::net::protocol::{read_brick_stream, BrickFrame, NetDataType, OpenResponse, Request};
use crate::net::wire;

/// Blocking protocol client over one TCP connection
pub struct NetClient {
    stream: TcpStream,
}

impl NetClient {
    pub fn connect(addr: impl ToSocketAddrs) -> EngineResult<Self> {
        let stream = TcpStream::connect(addr).io_context("connect to brick server")?;
        stream.set_nodelay(true).io_context("set nodelay")?;
        Ok(Self { stream })
    }

    fn send(&mut self, request: &Request) -> EngineResult<()> {
        let mut buf = Vec::new();
        request.write_to(&mut buf)?;
        wire::write_bytes(&mut self.stream, &buf)
    }

    /// OPEN: returns the server's brick catalog
    pub fn open(&mut self, path: &str) -> EngineResult<OpenResponse> {
        self.send(&Request::Open {
            path: path.to_string(),
        })?;
        OpenResponse::read_from(&mut self.stream)
    }

    pub fn close(&mut self, path: &str) -> EngineResult<()> {
        self.send(&Request::Close {
            path: path.to_string(),
        })
    }

    /// LIST_FILES: datasets the server can open
    pub fn list_files(&mut self) -> EngineResult<Vec<String>> {
        self.send(&Request::ListFiles)?;
        let count = wire::read_u16(&mut self.stream)? as usize;
        (0..count)
            .map(|_| wire::read_cstr(&mut self.stream))
            .collect()
    }

    /// BATCHSIZE: cap on bricks per ROTATION response
    pub fn set_batch_size(&mut self, size: u32) -> EngineResult<()> {
        self.send(&Request::BatchSize { size })
    }

    /// ROTATION: push a view matrix, receive the bricks it needs
    pub fn rotate(
        &mut self,
        matrix: [f32; 16],
        data_type: NetDataType,
    ) -> EngineResult<Vec<BrickFrame>> {
        self.send(&Request::Rotation { matrix, data_type })?;
        read_brick_stream(&mut self.stream, data_type)
    }

    /// BRICK: fetch a single brick payload
    pub fn fetch_brick(
        &mut self,
        data_type: NetDataType,
        lod: u32,
        index: u32,
    ) -> EngineResult<Vec<BrickFrame>> {
        self.send(&Request::Brick {
            data_type,
            lod,
            index,
        })?;
        read_brick_stream(&mut self.stream, data_type)
    }

    /// SHUTDOWN: stop the server process
    pub fn shutdown(mut self) -> EngineResult<()> {
        self.send(&Request::Shutdown)
    }
}
