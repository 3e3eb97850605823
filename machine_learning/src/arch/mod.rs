pub mod activations;
pub mod constraint;
mod init;
pub mod layers;
pub mod loss;
mod model;
mod sequential;
pub mod spec;

pub use init::ParamInit;
pub use model::Model;
pub use sequential::{Sequential, Summary};
