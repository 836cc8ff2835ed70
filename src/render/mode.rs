use std::fmt;

/// Render mode of the volume pipeline.
///
/// `Invalid` is the unset state; reaching the render path with it is a
/// contract violation and fails the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderMode {
    Transfer1D,
    Transfer2D,
    Isosurface,
    Invalid,
}

impl Default for RenderMode {
    fn default() -> Self {
        RenderMode::Invalid
    }
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RenderMode::Transfer1D => "1d-transfer",
            RenderMode::Transfer2D => "2d-transfer",
            RenderMode::Isosurface => "isosurface",
            RenderMode::Invalid => "invalid",
        };
        write!(f, "{}", name)
    }
}
