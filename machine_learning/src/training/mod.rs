mod history;
mod model_trainer;

pub use history::{EpochMetrics, Evaluation, History};
pub use model_trainer::{ModelTrainer, evaluate};
