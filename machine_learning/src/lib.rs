pub mod arch;
pub mod error;
pub mod optimization;
mod param_manager;
pub mod preprocessing;
pub mod serialization;
pub mod training;

pub use error::{MlErr, Result};
pub use param_manager::{BackIter, FrontIter, ParamManager};
