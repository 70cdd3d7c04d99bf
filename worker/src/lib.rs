pub mod serve;
pub mod trainer;

pub use serve::serve;
pub use trainer::{FitOutput, FitParams, NoiseTrainer, Trainer};
