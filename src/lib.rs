//! Large-volume rendering core.
//!
//! Ingests bricked scalar volumes, streams the subvolumes a frame needs to
//! the GPU under a byte budget, and drives transfer-function, isosurface
//! and maximum-intensity renderings through view-aligned proxy geometry.
//! A separate process can serve as the dataset over a length-prefixed TCP
//! protocol with an MPI-style broadcast across worker ranks.
//!
//! The renderer consumes datasets only through [`dataset::Dataset`], so
//! in-process stores ([`dataset::ExternalDataset`]) and remote volumes
//! ([`dataset::RemoteDataset`]) are interchangeable.

pub mod constants;
pub mod dataset;
pub mod error;
pub mod geometry;
pub mod net;
pub mod render;

pub use dataset::{
    BrickData, BrickKey, BrickMetadata, Dataset, DatasetExt, ExternalDataset, RemoteDataset,
    Scalar, ScalarType,
};
pub use error::{EngineError, EngineResult};
pub use geometry::{Plane, SliceGenerator, SliceSet};
pub use render::{
    FrameScheduler, FrameStats, GpuBrickCache, GpuContext, HeadlessContext, RenderMode,
    SchedulerConfig, ShaderCatalog, TransferFunction, TransferFunction1D, TransferFunction2D,
    ViewState, WgpuContext,
};
pub use net::{BrickServer, DatasetProvider, NetClient, NetDataType, ServerConfig};
