//! Remote brick serving: wire codec, request protocol, broadcast
//! collective, the server and the protocol client.

pub mod broadcast;
pub mod client;
pub mod protocol;
pub mod server;
pub mod wire;

pub use broadcast::{BroadcastGroup, RequestHandler};
pub use client::NetClient;
pub use protocol::{
    read_brick_stream, write_brick_stream, BrickFrame, CommandCode, NetDataType, OpenResponse,
    Request,
};
pub use server::{BrickServer, DatasetProvider, ServerConfig};
