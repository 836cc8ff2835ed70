//! The rendering pipeline: GPU abstraction, brick residency cache,
//! transfer functions, shader variants and the frame scheduler.

pub mod cache;
pub mod gpu;
pub mod headless;
pub mod mode;
pub mod prefetch;
pub mod scheduler;
pub mod shader;
pub mod transfer;
pub mod wgpu_backend;

pub use cache::{GpuBrickCache, ResidencyRecord};
pub use gpu::{
    BlendMode, GpuContext, ProgramDesc, ProgramHandle, RenderTargetHandle, TextureHandle,
    UniformType,
};
pub use headless::HeadlessContext;
pub use mode::RenderMode;
pub use prefetch::BrickPrefetcher;
pub use scheduler::{
    choose_lod, enumerate_visible, FrameScheduler, FrameStats, SchedulerConfig, ViewState,
    VisibleSet,
};
pub use shader::{ProgramSource, ShaderCatalog, ShaderSet, ShaderVariant};
pub use transfer::{TransferFunction, TransferFunction1D, TransferFunction2D};
pub use wgpu_backend::WgpuContext;
