//! Bricked datasets: the brick model, typed columnar storage, the dataset
//! facade the renderer consumes, and its in-process and remote
//! implementations.

pub mod brick;
pub mod external;
pub mod histogram;
pub mod remote;
pub mod scalar;
pub mod store;
pub mod traits;

pub use brick::{grid_coords, linear_index, BrickKey, BrickMetadata};
pub use external::ExternalDataset;
pub use remote::RemoteDataset;
pub use scalar::{BrickData, Scalar, ScalarType};
pub use store::BrickStore;
pub use traits::{Dataset, DatasetExt};
