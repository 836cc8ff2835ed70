// Engine-wide constants.
//
// Shared numeric contracts live here so that the renderer, the dataset
// layer and the wire protocol agree on them.

/// Histogram parameters
pub mod histogram {
    /// Number of bins in the 1-D scalar histogram
    pub const BIN_COUNT: usize = 1024;
}

/// Level-of-detail selection
pub mod lod {
    /// Upper bound on voxels per screen pixel before a coarser level is used
    pub const MAX_VOXELS_PER_PIXEL: f32 = 1.5;
}

/// Proxy-geometry slicing
pub mod slicing {
    /// Oblique-angle compensation applied to the slice spacing
    pub const OBLIQUE_SCALE: f32 = std::f32::consts::SQRT_2;

    /// Default sampling-rate modifier
    pub const DEFAULT_SAMPLE_RATE: f32 = 1.0;

    /// Sampling-rate divisor applied while the view is in motion
    pub const INTERACTIVE_DECIMATION: f32 = 2.0;
}

/// GPU brick cache
pub mod cache {
    /// Default byte budget for resident brick textures
    pub const DEFAULT_CAPACITY_BYTES: u64 = 512 * 1024 * 1024;
}

/// Remote brick serving
pub mod net {
    /// Default TCP port of the brick server
    pub const DEFAULT_PORT: u16 = 8679;

    /// Default number of brick frames per ROTATION response batch
    pub const DEFAULT_BATCH_SIZE: u32 = 16;

    /// Hard cap on float-vector lengths accepted from the wire
    pub const MAX_VECTOR_LEN: u32 = 1 << 24;
}
