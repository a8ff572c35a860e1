//! Learned remove/reinsert improvement policy trained with REINFORCE
//!
//! Each episode starts from a feasible tour and performs one action per
//! dynamic pickup/delivery pair: the pair is removed and put back in the
//! positions the policy picks.
//!
//! # Architecture
//!
//! ```text
//! Tour + coordinates
//!     │
//!     ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  FeatureEmbedder                                            │
//! │  - Linear projection of node features                      │
//! │  - Rotary phase from each node's rank along the tour       │
//! └─────────────────────────────────────────────────────────────┘
//!     │
//!     ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Encoder                                                    │
//! │  - Stacked rotary self-attention + feed-forward layers     │
//! └─────────────────────────────────────────────────────────────┘
//!     │
//!     ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Decoder                                                    │
//! │  - Removal: pick an unprocessed pickup (masked)            │
//! │  - Reinsertion: pick a feasible (pickup, delivery) slot    │
//! └─────────────────────────────────────────────────────────────┘
//!     │
//!     ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Problem::step                                              │
//! │  - Apply the move, reward = cost decrease                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The [`critic`] is trained alongside but only reported; the policy
//! gradient uses the raw episode return.

// Building blocks
pub mod embedder;
pub mod encoder;
pub mod layers;
pub mod positional;

// Policy and training
pub mod checkpoint;
pub mod collective;
pub mod critic;
pub mod decoder;
pub mod metrics;
pub mod policy;
pub mod rollout;
pub mod train;

// Re-export commonly used types
pub use collective::{Collective, LocalCollective};
pub use critic::{Critic, CriticConfig};
pub use decoder::{
    ActionHistory, DecodeMode, DecodeOptions, Decision, EpsilonSchedule, ReinsertionStrategy,
    RemovalStrategy, StepContext,
};
pub use metrics::{CsvSink, MetricsSink, MultiSink, TracingSink, TrainingMetrics};
pub use policy::{Actor, ActorConfig};
pub use positional::StepInfo;
pub use rollout::{
    BaselineKind, Episode, EpisodeState, RolloutReport, Trajectory, rollout, run_episode,
};
pub use train::{ReinforceTrainer, TrainConfig, evaluate};
