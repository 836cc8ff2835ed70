//! Central error handling for the engine.
//!
//! Every subsystem reports through [`EngineError`]; recoverable conditions
//! (missing bricks, budget overruns) are plain variants the frame scheduler
//! matches on, everything else is surfaced to the caller.

use std::error::Error as StdError;
use std::fmt;

use crate::dataset::{BrickKey, ScalarType};

/// Main error type for the engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    // Dataset errors
    BrickNotFound {
        key: BrickKey,
    },
    WrongType {
        requested: ScalarType,
        actual: ScalarType,
    },
    ShapeMismatch {
        key: BrickKey,
        expected: usize,
        actual: usize,
    },
    UnknownLod {
        lod: usize,
        lod_count: usize,
    },
    EmptyDataset,

    // GPU cache errors
    OutOfBudget {
        requested: u64,
        capacity: u64,
        pinned: u64,
    },
    GpuResourceExhausted {
        operation: String,
        error: String,
    },
    UnsupportedOnGpu {
        scalar_type: ScalarType,
    },

    // Render errors
    ShaderCompileFailure {
        label: String,
        error: String,
    },
    InvalidRenderMode,
    InvalidConfig {
        field: String,
        reason: String,
    },

    // Wire protocol errors
    Protocol {
        message: String,
    },
    NoDataset,

    // Ambient errors
    Io {
        context: String,
        error: String,
    },
    LockPoisoned {
        resource: String,
    },
    ChannelClosed {
        name: String,
    },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::BrickNotFound { key } => write!(f, "brick not found: {}", key),
            EngineError::WrongType { requested, actual } => write!(
                f,
                "wrong element type: requested {}, dataset holds {}",
                requested, actual
            ),
            EngineError::ShapeMismatch {
                key,
                expected,
                actual,
            } => write!(
                f,
                "payload shape mismatch for {}: expected {} voxels, got {}",
                key, expected, actual
            ),
            EngineError::UnknownLod { lod, lod_count } => {
                write!(f, "LOD {} out of range (dataset has {})", lod, lod_count)
            }
            EngineError::EmptyDataset => write!(f, "dataset holds no bricks"),

            EngineError::OutOfBudget {
                requested,
                capacity,
                pinned,
            } => write!(
                f,
                "cache cannot admit {} bytes (capacity {}, {} pinned this frame)",
                requested, capacity, pinned
            ),
            EngineError::GpuResourceExhausted { operation, error } => {
                write!(f, "GPU operation '{}' exhausted resources: {}", operation, error)
            }
            EngineError::UnsupportedOnGpu { scalar_type } => {
                write!(f, "element type {} has no GPU texture format", scalar_type)
            }

            EngineError::ShaderCompileFailure { label, error } => {
                write!(f, "shader '{}' failed to compile: {}", label, error)
            }
            EngineError::InvalidRenderMode => write!(f, "invalid render mode in render path"),
            EngineError::InvalidConfig { field, reason } => {
                write!(f, "invalid config: {} ({})", field, reason)
            }

            EngineError::Protocol { message } => write!(f, "protocol error: {}", message),
            EngineError::NoDataset => write!(f, "render command received before OPEN"),

            EngineError::Io { context, error } => write!(f, "I/O error in {}: {}", context, error),
            EngineError::LockPoisoned { resource } => {
                write!(f, "lock poisoned for resource: {}", resource)
            }
            EngineError::ChannelClosed { name } => write!(f, "channel closed: {}", name),
        }
    }
}

impl StdError for EngineError {}

/// Type alias for results throughout the engine
pub type EngineResult<T> = Result<T, EngineError>;

impl From<std::io::Error> for EngineError {
    fn from(error: std::io::Error) -> Self {
        EngineError::Io {
            context: String::new(),
            error: error.to_string(),
        }
    }
}

impl From<crossbeam_channel::RecvError> for EngineError {
    fn from(_: crossbeam_channel::RecvError) -> Self {
        EngineError::ChannelClosed {
            name: "crossbeam".to_string(),
        }
    }
}

/// Extension trait for attaching a location to I/O errors
pub trait IoContext<T> {
    fn io_context(self, context: &str) -> EngineResult<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context(self, context: &str) -> EngineResult<T> {
        self.map_err(|e| EngineError::Io {
            context: context.to_string(),
            error: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::UnknownLod { lod: 4, lod_count: 2 };
        assert_eq!(err.to_string(), "LOD 4 out of range (dataset has 2)");
    }

    #[test]
    fn test_io_context() {
        let result: std::io::Result<()> = Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "short read",
        ));
        let err = result.io_context("wire header").unwrap_err();
        assert_eq!(
            err.to_string(),
            "I/O error in wire header: short read"
        );
    }
}
