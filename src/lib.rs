pub mod config;
pub mod dataset;
pub mod error;
pub mod model;
pub mod preprocess;

pub use config::BeautyConfig;
pub use dataset::{Dataset, ManifestRow, Split};
pub use error::{BeautyError, Result};
pub use model::BeautyModel;
