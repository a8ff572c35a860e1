pub mod error;
pub mod problem;
pub mod rl;

// Re-export commonly used types for convenience
pub use error::{Error, Result};
pub use problem::{Action, Instance, InstanceBatch, PdpDataset, PdpProblem, Problem, Tour};
pub use rl::{Actor, ActorConfig, ReinforceTrainer, TrainConfig};
