//! REINFORCE training loop

use std::env;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use burn::grad_clipping::GradientClippingConfig;
use burn::module::AutodiffModule;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::problem::{InstanceBatch, PdpDataset, PdpProblem};

use super::checkpoint::{
    self, ACTOR_FILE, ACTOR_OPTIM_FILE, CRITIC_FILE, CRITIC_OPTIM_FILE, CheckpointState, RngState,
};
use super::collective::{Collective, LocalCollective};
use super::critic::{Critic, CriticConfig};
use super::decoder::{DecodeOptions, EpsilonSchedule, ReinsertionStrategy, RemovalStrategy};
use super::layers::to_host;
use super::metrics::{BatchStats, MetricsSink, TracingSink, TrainingMetrics, validation_scalars};
use super::policy::{Actor, ActorConfig};
use super::rollout::{BaselineKind, RolloutReport, rollout, run_episode};

/// Training configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Nodes per instance, root included
    pub graph_size: usize,
    /// Static nodes per instance, root included
    pub static_nodes: usize,
    /// First epoch to run
    pub epoch_start: usize,
    /// One past the last epoch
    pub epoch_end: usize,
    /// Training instances per epoch
    pub epoch_size: usize,
    /// Global minibatch size, split across workers
    pub batch_size: usize,
    /// Validation instances when none are loaded from disk
    pub val_size: usize,
    pub val_batch_size: usize,
    pub lr_model: f64,
    pub lr_critic: f64,
    /// Per-epoch multiplicative learning-rate decay
    pub lr_decay: f64,
    /// Reinsertion exploration rate at `epsilon_epoch_offset`
    pub epsilon: f64,
    pub epsilon_decay: f64,
    pub epsilon_epoch_offset: f64,
    /// Gradient norm clip; 0 disables clipping
    pub max_grad_norm: f32,
    pub seed: u64,
    /// Save every this many epochs (0 = only the last)
    pub checkpoint_epochs: usize,
    pub no_saving: bool,
    pub save_dir: String,
    /// Directory for CSV scalar logs
    pub log_dir: Option<String>,
    /// Log training scalars every this many gradient steps
    pub log_step: usize,
    /// JSON dataset to train on instead of fresh instances per epoch
    pub train_dataset: Option<String>,
    pub val_dataset: Option<String>,
    /// Checkpoint directory to resume from
    pub resume: Option<String>,
    pub actor: ActorConfig,
    pub critic: CriticConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            graph_size: 21,
            static_nodes: 11,
            epoch_start: 0,
            epoch_end: 200,
            epoch_size: 10240,
            batch_size: 512,
            val_size: 1000,
            val_batch_size: 1000,
            lr_model: 1e-4,
            lr_critic: 3e-5,
            lr_decay: 0.985,
            epsilon: 0.1,
            epsilon_decay: 0.001,
            epsilon_epoch_offset: 1000.0,
            max_grad_norm: 0.0,
            seed: 1234,
            checkpoint_epochs: 1,
            no_saving: false,
            save_dir: "outputs".to_string(),
            log_dir: None,
            log_step: 50,
            train_dataset: None,
            val_dataset: None,
            resume: None,
            actor: ActorConfig::default(),
            critic: CriticConfig::default(),
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{key}={raw} is not a valid value"))),
    }
}

macro_rules! overlay {
    ($lookup:expr, $( $key:literal => $field:expr ),+ $(,)?) => {
        $(
            if let Some(value) = parse_var($lookup, $key)? {
                $field = value;
            }
        )+
    };
}

impl TrainConfig {
    /// Defaults (or the JSON file named by `NEUROINS_CONFIG`) overlaid with
    /// `NEUROINS_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let base = match env::var("NEUROINS_CONFIG") {
            Ok(path) => Self::load(path)?,
            Err(_) => Self::default(),
        };
        base.overlay(|key| env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let lookup = &lookup;
        overlay!(lookup,
            "NEUROINS_GRAPH_SIZE" => self.graph_size,
            "NEUROINS_STATIC_NODES" => self.static_nodes,
            "NEUROINS_EPOCH_START" => self.epoch_start,
            "NEUROINS_EPOCHS" => self.epoch_end,
            "NEUROINS_EPOCH_SIZE" => self.epoch_size,
            "NEUROINS_BATCH_SIZE" => self.batch_size,
            "NEUROINS_VAL_SIZE" => self.val_size,
            "NEUROINS_VAL_BATCH_SIZE" => self.val_batch_size,
            "NEUROINS_LR_MODEL" => self.lr_model,
            "NEUROINS_LR_CRITIC" => self.lr_critic,
            "NEUROINS_LR_DECAY" => self.lr_decay,
            "NEUROINS_EPSILON" => self.epsilon,
            "NEUROINS_EPSILON_DECAY" => self.epsilon_decay,
            "NEUROINS_MAX_GRAD_NORM" => self.max_grad_norm,
            "NEUROINS_SEED" => self.seed,
            "NEUROINS_CHECKPOINT_EPOCHS" => self.checkpoint_epochs,
            "NEUROINS_NO_SAVING" => self.no_saving,
            "NEUROINS_SAVE_DIR" => self.save_dir,
            "NEUROINS_LOG_STEP" => self.log_step,
            "NEUROINS_EMBEDDING_DIM" => self.actor.embedding_dim,
            "NEUROINS_HIDDEN_DIM" => self.actor.hidden_dim,
            "NEUROINS_ENCODE_LAYERS" => self.actor.n_encode_layers,
        );
        if let Some(dir) = parse_var::<String>(lookup, "NEUROINS_LOG_DIR")? {
            self.log_dir = Some(dir);
        }
        if let Some(path) = parse_var::<String>(lookup, "NEUROINS_TRAIN_DATASET")? {
            self.train_dataset = Some(path);
        }
        if let Some(path) = parse_var::<String>(lookup, "NEUROINS_VAL_DATASET")? {
            self.val_dataset = Some(path);
        }
        if let Some(path) = parse_var::<String>(lookup, "NEUROINS_RESUME")? {
            self.resume = Some(path);
        }
        self.critic.embedding_dim = self.actor.embedding_dim;
        Ok(self)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path.as_ref())?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| -> Result<()> { Err(Error::Config(msg)) };
        if self.static_nodes == 0 || self.static_nodes >= self.graph_size {
            return fail(format!(
                "static_nodes {} must be in 1..{}",
                self.static_nodes, self.graph_size
            ));
        }
        if (self.graph_size - self.static_nodes) % 2 != 0 {
            return fail(format!(
                "{} dynamic nodes cannot form pickup/delivery pairs",
                self.graph_size - self.static_nodes
            ));
        }
        if self.batch_size == 0 || self.epoch_size == 0 || self.val_batch_size == 0 {
            return fail("batch, epoch and validation batch sizes must be positive".to_string());
        }
        if self.epoch_end <= self.epoch_start {
            return fail(format!(
                "epoch range {}..{} is empty",
                self.epoch_start, self.epoch_end
            ));
        }
        let actor = &self.actor;
        if actor.embedding_dim % 2 != 0 {
            return fail(format!("embedding_dim {} must be even", actor.embedding_dim));
        }
        for heads in [actor.n_heads_actor, actor.compat_heads] {
            if heads == 0 || actor.embedding_dim % heads != 0 {
                return fail(format!(
                    "embedding_dim {} not divisible by {} heads",
                    actor.embedding_dim, heads
                ));
            }
        }
        if self.critic.embedding_dim != actor.embedding_dim {
            return fail("critic and actor embedding widths differ".to_string());
        }
        if self.lr_model <= 0.0 || self.lr_critic <= 0.0 {
            return fail("learning rates must be positive".to_string());
        }
        Ok(())
    }

    pub fn actor_lr(&self, epoch: usize) -> f64 {
        self.lr_model * self.lr_decay.powi(epoch as i32)
    }

    pub fn critic_lr(&self, epoch: usize) -> f64 {
        self.lr_critic * self.lr_decay.powi(epoch as i32)
    }

    pub fn epsilon_schedule(&self) -> EpsilonSchedule {
        EpsilonSchedule::new(self.epsilon, self.epsilon_decay, self.epsilon_epoch_offset)
    }

    pub fn should_save(&self, epoch: usize) -> bool {
        !self.no_saving
            && ((self.checkpoint_epochs != 0 && epoch % self.checkpoint_epochs == 0)
                || epoch + 1 == self.epoch_end)
    }

    fn adam(&self) -> AdamConfig {
        let config = AdamConfig::new();
        if self.max_grad_norm > 0.0 {
            config.with_grad_clipping(Some(GradientClippingConfig::Norm(self.max_grad_norm)))
        } else {
            config
        }
    }
}

type ActorOptimizer<B> = OptimizerAdaptor<Adam, Actor<B>, B>;
type CriticOptimizer<B> = OptimizerAdaptor<Adam, Critic<B>, B>;

/// REINFORCE trainer: one gradient step per minibatch episode, loss
/// `mean(-R * Σ log π)` with the undiscounted episode return `R`.
pub struct ReinforceTrainer<B: AutodiffBackend, C: Collective = LocalCollective> {
    actor: Actor<B>,
    critic: Critic<B>,
    actor_optim: ActorOptimizer<B>,
    critic_optim: CriticOptimizer<B>,
    problem: PdpProblem,
    config: TrainConfig,
    collective: C,
    device: B::Device,
    rng: ChaCha8Rng,
    backend_seed: u64,
    metrics: TrainingMetrics,
    sink: Box<dyn MetricsSink>,
    start_epoch: usize,
}

impl<B: AutodiffBackend> ReinforceTrainer<B, LocalCollective> {
    pub fn new(device: B::Device, config: TrainConfig) -> Result<Self> {
        Self::with_collective(device, config, LocalCollective)
    }
}

impl<B: AutodiffBackend, C: Collective> ReinforceTrainer<B, C> {
    pub fn with_collective(device: B::Device, config: TrainConfig, collective: C) -> Result<Self> {
        config.validate()?;
        B::seed(config.seed);
        let actor = config.actor.init::<B>(&device);
        let critic = config.critic.init::<B>(&device);
        let actor_optim = config.adam().init::<B, Actor<B>>();
        let critic_optim = config.adam().init::<B, Critic<B>>();

        tracing::info!(
            "Trainer rank {}/{}: {} actor / {} critic parameters",
            collective.rank(),
            collective.world_size(),
            actor.num_params(),
            critic.num_params()
        );

        Ok(Self {
            actor,
            critic,
            actor_optim,
            critic_optim,
            problem: PdpProblem::new(),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            backend_seed: config.seed,
            start_epoch: config.epoch_start,
            config,
            collective,
            device,
            metrics: TrainingMetrics::default(),
            sink: Box::new(TracingSink),
        })
    }

    /// Replace where training scalars go.
    pub fn with_sink(mut self, sink: impl MetricsSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn actor(&self) -> &Actor<B> {
        &self.actor
    }

    pub fn critic(&self) -> &Critic<B> {
        &self.critic
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn metrics(&self) -> &TrainingMetrics {
        &self.metrics
    }

    pub fn start_epoch(&self) -> usize {
        self.start_epoch
    }

    fn has_learned_stage(&self) -> bool {
        self.actor.decoder().removal_strategy() == RemovalStrategy::Learned
            || self.actor.decoder().reinsertion_strategy() == ReinsertionStrategy::Learned
    }

    /// Sample one episode over `batch` and take one gradient step.
    pub fn train_batch(&mut self, batch: &InstanceBatch, epoch: usize) -> Result<BatchStats> {
        let epsilon = self.config.epsilon_schedule().at(epoch);
        let options = DecodeOptions::training(epsilon);
        let episode = run_episode(
            &self.actor,
            &self.problem,
            batch,
            &options,
            &mut self.rng,
            &self.device,
        )?;

        let returns = episode.trajectory.returns();
        let initial_costs = &episode.trajectory.initial_costs;
        let final_costs = episode.trajectory.final_costs();
        let log_likelihood = to_host(episode.log_likelihood.clone())?;

        // Diagnostic only: the loss below carries no baseline.
        let critic_value = match &episode.initial_embeddings {
            Some(h) => {
                let cost = Tensor::<B, 1>::from_floats(initial_costs.as_slice(), &self.device);
                mean(&to_host(self.critic.forward(h.clone().detach(), cost))?)
            }
            None => 0.0,
        };

        let returns_tensor = Tensor::<B, 1>::from_floats(returns.as_slice(), &self.device);
        let loss = (returns_tensor.neg() * episode.log_likelihood).mean();
        let loss_value = mean(&to_host(loss.clone())?);

        if self.has_learned_stage() {
            let mut grads = loss.backward();
            let actor_grads = GradientsParams::from_module(&mut grads, &self.actor);
            let critic_grads = GradientsParams::from_module(&mut grads, &self.critic);
            let actor_grads = self.collective.all_reduce(actor_grads)?;
            let critic_grads = self.collective.all_reduce(critic_grads)?;

            self.actor =
                self.actor_optim
                    .step(self.config.actor_lr(epoch), self.actor.clone(), actor_grads);
            self.critic =
                self.critic_optim
                    .step(self.config.critic_lr(epoch), self.critic.clone(), critic_grads);
        }

        Ok(BatchStats {
            batch_size: batch.len(),
            loss: loss_value,
            mean_return: mean(&returns),
            mean_log_likelihood: mean(&log_likelihood),
            mean_entropy: mean(&episode.entropy),
            mean_initial_cost: mean(initial_costs),
            mean_final_cost: mean(&final_costs),
            critic_value,
            greedy_agreement: episode.trajectory.greedy_agreement(),
        })
    }

    /// Train on this worker's shard of `dataset`.
    pub fn train_epoch(&mut self, epoch: usize, dataset: &PdpDataset) -> Result<()> {
        let batches = dataset.batches(
            self.config.batch_size,
            self.collective.rank(),
            self.collective.world_size(),
        )?;
        for batch in &batches {
            let stats = self.train_batch(batch, epoch)?;
            self.metrics.record_batch(&stats);
            tracing::debug!(
                "epoch {} step {}: loss={:.4} return={:.4} cost {:.4} -> {:.4}",
                epoch,
                self.metrics.step,
                stats.loss,
                stats.mean_return,
                stats.mean_initial_cost,
                stats.mean_final_cost
            );
            if self.collective.is_validator() && self.metrics.step % self.config.log_step.max(1) == 0 {
                self.metrics.log_to(self.sink.as_mut())?;
            }
        }
        Ok(())
    }

    fn epoch_dataset(&self, epoch: usize) -> Result<PdpDataset> {
        match &self.config.train_dataset {
            Some(path) => PdpDataset::load(path),
            None => PdpDataset::generate(
                self.config.epoch_size,
                self.config.graph_size,
                self.config.static_nodes,
                self.config.seed.wrapping_add(epoch as u64 + 1),
            ),
        }
    }

    /// Validation set from `val_dataset` or generated from the seed.
    pub fn validation_dataset(&self) -> Result<PdpDataset> {
        match &self.config.val_dataset {
            Some(path) => PdpDataset::load(path),
            None => PdpDataset::generate(
                self.config.val_size,
                self.config.graph_size,
                self.config.static_nodes,
                self.config.seed.wrapping_mul(31).wrapping_add(7),
            ),
        }
    }

    /// Run every epoch from `start_epoch` to `epoch_end`.
    pub fn train(&mut self, val_dataset: &PdpDataset) -> Result<()> {
        tracing::info!(
            "Starting training: epochs {}..{}, batch size {}",
            self.start_epoch,
            self.config.epoch_end,
            self.config.batch_size
        );
        self.collective.barrier()?;

        for epoch in self.start_epoch..self.config.epoch_end {
            if self.collective.is_validator() {
                tracing::info!(
                    "Training epoch {} with actor lr={:.3e} critic lr={:.3e}",
                    epoch,
                    self.config.actor_lr(epoch),
                    self.config.critic_lr(epoch)
                );
            }
            let dataset = self.epoch_dataset(epoch)?;
            self.train_epoch(epoch, &dataset)?;

            if self.collective.is_saver() && self.config.should_save(epoch) {
                self.save_checkpoint(epoch)?;
            }
            self.collective.barrier()?;
            if self.collective.is_validator() {
                self.validate(val_dataset, epoch)?;
            }
        }

        tracing::info!("Training complete!");
        Ok(())
    }

    /// Greedy rollout of the current policy over `dataset`.
    pub fn validate(&mut self, dataset: &PdpDataset, step: usize) -> Result<RolloutReport> {
        let report = evaluate(
            &self.actor.valid(),
            &self.problem,
            dataset,
            self.config.val_batch_size,
            self.config.seed,
            &self.device,
        )?;
        log_report(&report);
        self.sink.log_scalars(step, &validation_scalars(&report))?;
        Ok(report)
    }

    pub fn save_checkpoint(&self, epoch: usize) -> Result<PathBuf> {
        let dir = checkpoint::epoch_dir(&self.config.save_dir, epoch);
        fs::create_dir_all(&dir)?;
        checkpoint::save_module(&self.actor, &dir, ACTOR_FILE)?;
        checkpoint::save_module(&self.critic, &dir, CRITIC_FILE)?;
        checkpoint::save_record::<B, _>(self.actor_optim.to_record(), &dir, ACTOR_OPTIM_FILE)?;
        checkpoint::save_record::<B, _>(self.critic_optim.to_record(), &dir, CRITIC_OPTIM_FILE)?;
        CheckpointState {
            epoch,
            rng: RngState::capture(&self.rng),
            backend_seed: self.backend_seed,
        }
        .save(&dir)?;
        tracing::info!("Saved checkpoint to {}", dir.display());
        Ok(dir)
    }

    /// Resume from a checkpoint directory. Training continues at the epoch
    /// after the one saved.
    pub fn load_checkpoint(&mut self, dir: impl AsRef<Path>) -> Result<usize> {
        let dir = dir.as_ref();
        checkpoint::ensure_dir(dir)?;
        let state = CheckpointState::load(dir)?;

        self.actor = checkpoint::load_module(self.actor.clone(), dir, ACTOR_FILE, &self.device)?;
        self.critic = checkpoint::load_module(self.critic.clone(), dir, CRITIC_FILE, &self.device)?;
        if let Some(record) = checkpoint::load_record::<B, _>(dir, ACTOR_OPTIM_FILE, &self.device)? {
            let optim = std::mem::replace(&mut self.actor_optim, self.config.adam().init());
            self.actor_optim = optim.load_record(record);
        }
        if let Some(record) = checkpoint::load_record::<B, _>(dir, CRITIC_OPTIM_FILE, &self.device)? {
            let optim = std::mem::replace(&mut self.critic_optim, self.config.adam().init());
            self.critic_optim = optim.load_record(record);
        }

        self.rng = state.rng.restore();
        self.backend_seed = state.backend_seed;
        B::seed(state.backend_seed);
        self.start_epoch = state.epoch + 1;
        tracing::info!(
            "Loaded checkpoint from {} (epoch {})",
            dir.display(),
            state.epoch
        );
        Ok(state.epoch)
    }
}

/// Greedy evaluation of an inference-mode actor over a whole dataset.
pub fn evaluate<B: Backend>(
    actor: &Actor<B>,
    problem: &PdpProblem,
    dataset: &PdpDataset,
    batch_size: usize,
    seed: u64,
    device: &B::Device,
) -> Result<RolloutReport> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut report = RolloutReport::default();
    for batch in dataset.batches(batch_size, 0, 1)? {
        report.extend(rollout(
            actor,
            problem,
            &batch,
            &DecodeOptions::greedy(),
            &mut rng,
            device,
        )?);
    }
    Ok(report)
}

/// Validation summary in the log
pub fn log_report(report: &RolloutReport) {
    tracing::info!(
        "Validation over {} instances: cost {:.4} -> {:.4}",
        report.len(),
        report.mean_initial_cost(),
        report.mean_cost()
    );
    for (name, kind) in [
        ("greedy insertion", BaselineKind::Greedy),
        ("cheapest insertion", BaselineKind::Cheapest),
    ] {
        if let Some(cmp) = report.compare(kind) {
            tracing::info!(
                "  vs {}: {}/{} not worse, mean gap {:.2}%",
                name,
                cmp.count_not_worse,
                report.len(),
                cmp.mean_gap * 100.0
            );
        }
    }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_train_config_default() {
        let config = TrainConfig::default();
        assert_eq!(config.graph_size, 21);
        assert_eq!(config.static_nodes, 11);
        assert!((config.epsilon_epoch_offset - 1000.0).abs() < 1e-12);
        config.validate().unwrap();
    }

    #[test]
    fn test_overlay_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("NEUROINS_BATCH_SIZE", "16"),
            ("NEUROINS_LR_MODEL", "0.001"),
            ("NEUROINS_SAVE_DIR", "/tmp/run"),
            ("NEUROINS_EMBEDDING_DIM", "64"),
            ("NEUROINS_VAL_DATASET", "val.json"),
        ]
        .into_iter()
        .collect();
        let config = TrainConfig::default()
            .overlay(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.batch_size, 16);
        assert!((config.lr_model - 0.001).abs() < 1e-12);
        assert_eq!(config.save_dir, "/tmp/run");
        assert_eq!(config.critic.embedding_dim, 64);
        assert_eq!(config.val_dataset.as_deref(), Some("val.json"));
    }

    #[test]
    fn test_overlay_rejects_garbage() {
        let result = TrainConfig::default().overlay(|key| {
            (key == "NEUROINS_EPOCHS").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_odd_dynamic_count() {
        let config = TrainConfig {
            graph_size: 10,
            static_nodes: 3,
            ..TrainConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_lr_decay_and_save_schedule() {
        let config = TrainConfig {
            lr_model: 1.0,
            lr_decay: 0.5,
            checkpoint_epochs: 3,
            epoch_end: 8,
            ..TrainConfig::default()
        };
        assert!((config.actor_lr(2) - 0.25).abs() < 1e-12);
        assert!(config.should_save(0));
        assert!(!config.should_save(1));
        assert!(config.should_save(3));
        assert!(config.should_save(7));
    }

    #[test]
    fn test_config_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = TrainConfig {
            batch_size: 8,
            ..TrainConfig::default()
        };
        config.save(&path).unwrap();
        let loaded = TrainConfig::load(&path).unwrap();
        assert_eq!(loaded.batch_size, 8);
        assert_eq!(loaded.actor.embedding_dim, config.actor.embedding_dim);
    }
}
