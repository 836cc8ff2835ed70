//! View-dependent geometry: clip plane, view frustum and the slice
//! generator producing the proxy geometry.

pub mod frustum;
pub mod plane;
pub mod slicer;

pub use frustum::Frustum;
pub use plane::Plane;
pub use slicer::{SliceAxis, SliceGenerator, SliceSet, SliceVertex};
