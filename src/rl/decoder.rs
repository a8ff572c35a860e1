//! Two-stage masked action head: pick a pair to remove, then where to put
//! it back.
//!
//! ```text
//!   h [B, N, D]
//!     │
//!     ├─► removal score  tanh(Linear(h)) * range ─► mask ─► pickup p
//!     │                                              (history marks p, d)
//!     │
//!     └─► reinsertion table [B, N, N]
//!           pre/post compat of p and d against every predecessor
//!           ─► aggregator ─► diagonal override ─► mask ─► (i, j)
//! ```
//!
//! Distributions are built on the device, actions are drawn on the host
//! from a seeded generator so decoding stays reproducible across backends.

use burn::module::Ignored;
use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::{log_softmax, softmax, tanh};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::problem::{Action, InstanceBatch, Problem, ROOT, Tour};

use super::layers::{MultiHeadCompat, Mlp, NEG_LOGIT, bool_tensor, node_index, to_host};
use super::positional::StepInfo;

/// How the pair to remove is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RemovalStrategy {
    /// Learned linear score over node embeddings
    #[default]
    Learned,
    /// Uniform over the unprocessed pairs
    Random,
    /// Lowest-index unprocessed pair
    Sequential,
}

/// How the reinsertion slots are chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReinsertionStrategy {
    /// Learned compatibility table
    #[default]
    Learned,
    /// Uniform over feasible slots
    Random,
    /// Cheapest feasible slot by insertion cost
    Greedy,
}

/// Action selection rule for the learned distributions
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecodeMode {
    /// Arg-max everywhere
    Greedy,
    /// Sample both stages
    Sample,
    /// Sample the removal; sample the reinsertion with probability `ε`,
    /// otherwise take its arg-max
    EpsilonGreedy(f64),
}

#[derive(Debug, Clone, Copy)]
pub struct DecodeOptions {
    pub mode: DecodeMode,
    /// Record log-probabilities for the gradient
    pub training: bool,
    /// Also return the reinsertion entropy (training only)
    pub require_entropy: bool,
}

impl DecodeOptions {
    pub fn greedy() -> Self {
        Self {
            mode: DecodeMode::Greedy,
            training: false,
            require_entropy: false,
        }
    }

    pub fn training(epsilon: f64) -> Self {
        Self {
            mode: DecodeMode::EpsilonGreedy(epsilon),
            training: true,
            require_entropy: true,
        }
    }
}

/// Exploration rate `ε · exp(-decay · (epoch - offset))`, capped at 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpsilonSchedule {
    pub epsilon: f64,
    pub decay: f64,
    pub epoch_offset: f64,
}

impl EpsilonSchedule {
    pub fn new(epsilon: f64, decay: f64, epoch_offset: f64) -> Self {
        Self {
            epsilon,
            decay,
            epoch_offset,
        }
    }

    pub fn at(&self, epoch: usize) -> f64 {
        let shifted = epoch as f64 - self.epoch_offset;
        (self.epsilon * (-self.decay * shifted).exp()).clamp(0.0, 1.0)
    }
}

/// Which nodes have already been moved this episode, per instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionHistory {
    processed: Vec<bool>,
    graph_size: usize,
}

impl ActionHistory {
    pub fn new(batch: usize, graph_size: usize) -> Self {
        Self {
            processed: vec![false; batch * graph_size],
            graph_size,
        }
    }

    pub fn mark(&mut self, instance: usize, node: usize) {
        self.processed[instance * self.graph_size + node] = true;
    }

    pub fn is_processed(&self, instance: usize, node: usize) -> bool {
        self.processed[instance * self.graph_size + node]
    }

    /// Processed nodes of one instance
    pub fn count(&self, instance: usize) -> usize {
        self.row(instance).iter().filter(|&&p| p).count()
    }

    pub fn row(&self, instance: usize) -> &[bool] {
        let start = instance * self.graph_size;
        &self.processed[start..start + self.graph_size]
    }

    pub fn reset(&mut self) {
        self.processed.fill(false);
    }
}

/// What the decoder sees of the environment for one step
pub struct StepContext<'a, P: Problem> {
    pub problem: &'a P,
    pub batch: &'a InstanceBatch,
    pub tours: &'a [Tour],
    pub info: StepInfo,
}

/// Output of one decoding step
#[derive(Debug)]
pub struct Decision<B: Backend> {
    pub actions: Vec<Action>,
    /// Sum of both stages' log-probabilities, `[batch]`; zeros unless
    /// training with a learned stage
    pub log_likelihood: Tensor<B, 1>,
    /// Reinsertion entropy, `[batch]`
    pub entropy: Option<Tensor<B, 1>>,
    /// Cost-based insertion for the same removals, for comparison only
    pub greedy_actions: Vec<Action>,
}

/// Learned `N × N` placement scores for a removed pair.
#[derive(Module, Debug)]
pub struct Reinsertion<B: Backend> {
    compat_pre: MultiHeadCompat<B>,
    compat_post: MultiHeadCompat<B>,
    aggregate: Mlp<B>,
}

impl<B: Backend> Reinsertion<B> {
    pub fn new(device: &B::Device, n_heads: usize, embedding_dim: usize) -> Self {
        let key_dim = embedding_dim / n_heads.max(1);
        Self {
            compat_pre: MultiHeadCompat::new(device, n_heads, embedding_dim, key_dim),
            compat_post: MultiHeadCompat::new(device, n_heads, embedding_dim, key_dim),
            aggregate: Mlp::new(device, 4 * n_heads, 32, 32, 1, 0.0),
        }
    }

    /// `[batch, heads, 1, n]` compat as rows `[batch, n, 1, heads]`
    fn as_rows(compat: Tensor<B, 4>) -> Tensor<B, 4> {
        compat.permute([0, 3, 2, 1])
    }

    /// `[batch, heads, 1, n]` compat as columns `[batch, 1, n, heads]`
    fn as_columns(compat: Tensor<B, 4>) -> Tensor<B, 4> {
        compat.permute([0, 2, 3, 1])
    }

    /// `h`: `[batch, n, dim]`; `successors`: every tour's `next`, flattened.
    /// Row `i` scores the pickup going after node `i`, column `j` the
    /// delivery going after node `j`.
    pub fn forward(
        &self,
        h: Tensor<B, 3>,
        pickups: &[usize],
        deliveries: &[usize],
        successors: &[usize],
    ) -> Tensor<B, 3> {
        let [batch, n, dim] = h.dims();
        let device = h.device();

        let h_pickup = h.clone().gather(1, node_index(pickups, batch, dim, &device));
        let h_delivery = h.clone().gather(1, node_index(deliveries, batch, dim, &device));
        let h_next = h.clone().gather(1, node_index(successors, batch, dim, &device));

        // A predecessor whose successor is the root ends the open route; the
        // inserted node itself stands in for the missing successor.
        let terminal: Vec<bool> = successors
            .iter()
            .flat_map(|&succ| std::iter::repeat_n(succ == ROOT, dim))
            .collect();
        let terminal = bool_tensor::<B, 3>(&terminal, [batch, n, dim], &device);
        let h_next_p = h_next
            .clone()
            .mask_where(terminal.clone(), h_pickup.clone().expand([batch, n, dim]));
        let h_next_d = h_next.mask_where(terminal, h_delivery.clone().expand([batch, n, dim]));

        let heads = self.aggregate_width();
        let shape = [batch, n, n, heads];
        let pickup_pre =
            Self::as_rows(self.compat_pre.forward(h_pickup.clone(), h.clone())).expand(shape);
        let pickup_post =
            Self::as_rows(self.compat_post.forward(h_pickup.clone(), h_next_p)).expand(shape);
        let delivery_pre =
            Self::as_columns(self.compat_pre.forward(h_delivery.clone(), h)).expand(shape);
        let delivery_post =
            Self::as_columns(self.compat_post.forward(h_delivery.clone(), h_next_d)).expand(shape);

        let general = self
            .aggregate
            .forward(Tensor::cat(
                vec![
                    pickup_pre.clone(),
                    pickup_post,
                    delivery_pre,
                    delivery_post.clone(),
                ],
                3,
            ))
            .reshape([batch, n, n]);

        // Same predecessor: the delivery follows the pickup directly.
        let pickup_to_delivery =
            Self::as_rows(self.compat_post.forward(h_pickup, h_delivery)).expand(shape);
        let same_node = self
            .aggregate
            .forward(Tensor::cat(
                vec![
                    pickup_pre,
                    pickup_to_delivery,
                    Tensor::zeros(shape, &device),
                    delivery_post,
                ],
                3,
            ))
            .reshape([batch, n, n]);

        let diagonal: Vec<bool> = (0..batch * n * n)
            .map(|idx| {
                let cell = idx % (n * n);
                cell / n == cell % n
            })
            .collect();
        general.mask_where(bool_tensor(&diagonal, [batch, n, n], &device), same_node)
    }

    fn aggregate_width(&self) -> usize {
        self.compat_pre.n_heads()
    }
}

/// The two-stage policy head.
#[derive(Module, Debug)]
pub struct Decoder<B: Backend> {
    removal: Linear<B>,
    reinsertion: Reinsertion<B>,
    v_range: f64,
    removal_strategy: Ignored<RemovalStrategy>,
    reinsertion_strategy: Ignored<ReinsertionStrategy>,
}

impl<B: Backend> Decoder<B> {
    pub fn new(
        device: &B::Device,
        embedding_dim: usize,
        compat_heads: usize,
        v_range: f64,
        removal_strategy: RemovalStrategy,
        reinsertion_strategy: ReinsertionStrategy,
    ) -> Self {
        Self {
            removal: LinearConfig::new(embedding_dim, 1)
                .with_bias(false)
                .init(device),
            reinsertion: Reinsertion::new(device, compat_heads, embedding_dim),
            v_range,
            removal_strategy: Ignored(removal_strategy),
            reinsertion_strategy: Ignored(reinsertion_strategy),
        }
    }

    pub fn removal_strategy(&self) -> RemovalStrategy {
        self.removal_strategy.0
    }

    pub fn reinsertion_strategy(&self) -> ReinsertionStrategy {
        self.reinsertion_strategy.0
    }

    /// Decode one action per instance and record the pair as processed.
    ///
    /// `fixed` replays given actions instead of selecting: the returned
    /// log-likelihood is then that of the replayed actions.
    pub fn forward<P: Problem>(
        &self,
        ctx: &StepContext<'_, P>,
        h: Tensor<B, 3>,
        history: &mut ActionHistory,
        options: &DecodeOptions,
        fixed: Option<&[Action]>,
        rng: &mut impl Rng,
    ) -> Result<Decision<B>> {
        let [batch, n, _] = h.dims();
        let device = h.device();
        if ctx.batch.len() != batch || ctx.tours.len() != batch || ctx.batch.graph_size() != n {
            return Err(Error::Shape(format!(
                "decoder got {batch}x{n} embeddings for {} instances of {} nodes and {} tours",
                ctx.batch.len(),
                ctx.batch.graph_size(),
                ctx.tours.len()
            )));
        }
        if let Some(fixed) = fixed {
            if fixed.len() != batch {
                return Err(Error::Shape(format!(
                    "{} fixed actions for a batch of {batch}",
                    fixed.len()
                )));
            }
            if let Some((b, action)) = fixed.iter().enumerate().find(|(_, a)| {
                a.removed >= n || a.pickup_after >= n || a.delivery_after >= n
            }) {
                return Err(Error::Shape(format!(
                    "fixed action {action:?} for instance {b} is outside {n} nodes"
                )));
            }
        }

        // Stage 1: removal
        let mut eligible = Vec::with_capacity(batch * n);
        for (b, instance) in ctx.batch.iter().enumerate() {
            eligible.extend((0..n).map(|node| instance.is_pickup(node) && !history.is_processed(b, node)));
        }
        let removal_logits = self.removal_logits(h.clone(), &eligible);

        let removed: Vec<usize> = match fixed {
            Some(actions) => actions.iter().map(|a| a.removed).collect(),
            None => self.select_removal(removal_logits.clone(), &eligible, batch, n, options, rng)?,
        };
        for (b, &pickup) in removed.iter().enumerate() {
            if !eligible[b * n + pickup] {
                return Err(Error::InvalidAction(format!(
                    "node {pickup} is not an unprocessed pickup of instance {b}"
                )));
            }
        }
        let removal_ll = match (options.training, self.removal_strategy()) {
            (true, RemovalStrategy::Learned) => {
                Some(pick(log_softmax(removal_logits, 1), &removed, &device))
            }
            _ => None,
        };

        let mut deliveries = Vec::with_capacity(batch);
        for (b, (instance, &pickup)) in ctx.batch.iter().zip(removed.iter()).enumerate() {
            let delivery = instance.delivery_of(pickup)?;
            history.mark(b, pickup);
            history.mark(b, delivery);
            deliveries.push(delivery);
        }

        // Stage 2: reinsertion
        let mut mask = Vec::with_capacity(batch * n * n);
        let mut greedy_actions = Vec::with_capacity(batch);
        let mut greedy_tables = Vec::new();
        for (b, ((instance, tour), &pickup)) in
            ctx.batch.iter().zip(ctx.tours).zip(removed.iter()).enumerate()
        {
            let processed = history.row(b);
            mask.extend(ctx.problem.reinsertion_mask(instance, tour, pickup, &ctx.info, processed));
            let table = ctx
                .problem
                .greedy_insertion_table(instance, tour, pickup, &ctx.info, processed);
            greedy_actions.push(Action::from_pair_index(pickup, argmax(&table), n));
            greedy_tables.push(table);
        }

        let (reinsertion_logits, learned) = match self.reinsertion_strategy() {
            ReinsertionStrategy::Learned => {
                let successors: Vec<usize> = ctx
                    .tours
                    .iter()
                    .flat_map(|tour| tour.successors().iter().copied())
                    .collect();
                let table = self
                    .reinsertion
                    .forward(h, &removed, &deliveries, &successors);
                (tanh(table).mul_scalar(self.v_range), true)
            }
            _ => (Tensor::zeros([batch, n, n], &device), false),
        };
        let reinsertion_logits = reinsertion_logits
            .mask_fill(bool_tensor(&mask, [batch, n, n], &device), NEG_LOGIT)
            .reshape([batch, n * n]);

        let pair_indices: Vec<usize> = match fixed {
            Some(actions) => actions.iter().map(|a| a.pair_index(n)).collect(),
            None => match self.reinsertion_strategy() {
                ReinsertionStrategy::Greedy => greedy_tables.iter().map(|t| argmax(t)).collect(),
                ReinsertionStrategy::Random => {
                    sample_rows(&to_host(softmax(reinsertion_logits.clone(), 1))?, batch, rng)
                }
                ReinsertionStrategy::Learned => {
                    let probs = to_host(softmax(reinsertion_logits.clone(), 1))?;
                    let width = n * n;
                    probs
                        .chunks(width)
                        .map(|row| match options.mode {
                            DecodeMode::Greedy => argmax(row),
                            DecodeMode::Sample => sample_index(row, rng),
                            DecodeMode::EpsilonGreedy(epsilon) => {
                                if rng.random::<f64>() < epsilon {
                                    sample_index(row, rng)
                                } else {
                                    argmax(row)
                                }
                            }
                        })
                        .collect()
                }
            },
        };
        for (b, &idx) in pair_indices.iter().enumerate() {
            if mask[b * n * n + idx] {
                return Err(Error::InvalidAction(format!(
                    "reinsertion slot {idx} is forbidden for instance {b}"
                )));
            }
        }

        let mut log_likelihood = removal_ll.unwrap_or_else(|| Tensor::zeros([batch], &device));
        let mut entropy = None;
        if options.training && learned {
            let log_probs = log_softmax(reinsertion_logits, 1);
            if options.require_entropy {
                let probs = log_probs.clone().exp();
                entropy = Some((probs * log_probs.clone()).sum_dim(1).reshape([batch]).neg());
            }
            log_likelihood = pick(log_probs, &pair_indices, &device) + log_likelihood;
        }

        let actions = removed
            .iter()
            .zip(pair_indices.iter())
            .map(|(&pickup, &idx)| Action::from_pair_index(pickup, idx, n))
            .collect();

        Ok(Decision {
            actions,
            log_likelihood,
            entropy,
            greedy_actions,
        })
    }

    /// `tanh(score) * range` per node, ineligible nodes masked; `[batch, n]`
    fn removal_logits(&self, h: Tensor<B, 3>, eligible: &[bool]) -> Tensor<B, 2> {
        let [batch, n, _] = h.dims();
        let device = h.device();
        let scores = tanh(self.removal.forward(h).reshape([batch, n])).mul_scalar(self.v_range);
        let forbidden: Vec<bool> = eligible.iter().map(|&e| !e).collect();
        scores.mask_fill(bool_tensor(&forbidden, [batch, n], &device), NEG_LOGIT)
    }

    fn select_removal(
        &self,
        logits: Tensor<B, 2>,
        eligible: &[bool],
        batch: usize,
        n: usize,
        options: &DecodeOptions,
        rng: &mut impl Rng,
    ) -> Result<Vec<usize>> {
        let rows: Vec<&[bool]> = eligible.chunks(n).collect();
        if let Some(b) = rows.iter().position(|row| !row.contains(&true)) {
            return Err(Error::InvalidAction(format!(
                "instance {b} has no unprocessed pair left"
            )));
        }
        Ok(match self.removal_strategy() {
            RemovalStrategy::Sequential => rows
                .iter()
                .map(|row| row.iter().position(|&e| e).unwrap_or(0))
                .collect(),
            RemovalStrategy::Random => rows
                .iter()
                .map(|row| {
                    let candidates: Vec<usize> = (0..n).filter(|&k| row[k]).collect();
                    candidates[rng.random_range(0..candidates.len())]
                })
                .collect(),
            RemovalStrategy::Learned => {
                let probs = to_host(softmax(logits, 1))?;
                match options.mode {
                    DecodeMode::Greedy => probs.chunks(n).map(argmax).collect(),
                    _ => sample_rows(&probs, batch, rng),
                }
            }
        })
    }
}

/// Gather one entry per row of `[batch, k]` log-probabilities.
fn pick<B: Backend>(log_probs: Tensor<B, 2>, indices: &[usize], device: &B::Device) -> Tensor<B, 1> {
    let batch = indices.len();
    let flat: Vec<i64> = indices.iter().map(|&i| i as i64).collect();
    let index = Tensor::<B, 1, Int>::from_ints(flat.as_slice(), device).reshape([batch, 1]);
    log_probs.gather(1, index).reshape([batch])
}

/// Index of the largest value, first one on ties
pub fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best, best_value), (idx, &value)| {
            if value > best_value { (idx, value) } else { (best, best_value) }
        })
        .0
}

/// Inverse-CDF draw from a probability row. Zero-mass entries are never
/// returned.
pub fn sample_index(probs: &[f32], rng: &mut impl Rng) -> usize {
    let total: f32 = probs.iter().sum();
    let target = rng.random::<f32>() * total;
    let mut acc = 0.0;
    let mut last_positive = argmax(probs);
    for (idx, &p) in probs.iter().enumerate() {
        if p <= 0.0 {
            continue;
        }
        acc += p;
        last_positive = idx;
        if acc > target {
            return idx;
        }
    }
    last_positive
}

fn sample_rows(probs: &[f32], batch: usize, rng: &mut impl Rng) -> Vec<usize> {
    let width = probs.len() / batch.max(1);
    probs
        .chunks(width)
        .map(|row| sample_index(row, rng))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::{Instance, PdpProblem};
    use burn::backend::NdArray;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    type TestBackend = NdArray;

    fn batch() -> InstanceBatch {
        let instance = instance();
        InstanceBatch::new(vec![instance.clone(), instance]).unwrap()
    }

    fn instance() -> Instance {
        Instance::new(
            vec![
                [0.0, 0.0],
                [0.5, 0.9],
                [0.1, 0.8],
                [0.7, 0.2],
                [0.9, 0.9],
                [0.3, 0.1],
            ],
            2,
        )
        .unwrap()
    }

    fn decoder(removal: RemovalStrategy, reinsertion: ReinsertionStrategy) -> Decoder<TestBackend> {
        Decoder::new(&Default::default(), 8, 4, 6.0, removal, reinsertion)
    }

    fn embeddings() -> Tensor<TestBackend, 3> {
        Tensor::random(
            [2, 6, 8],
            burn::tensor::Distribution::Uniform(-1.0, 1.0),
            &Default::default(),
        )
    }

    #[test]
    fn test_epsilon_schedule() {
        let schedule = EpsilonSchedule::new(0.1, 0.01, 1000.0);
        assert!((schedule.at(1000) - 0.1).abs() < 1e-12);
        assert!(schedule.at(1100) < schedule.at(1000));
        assert_eq!(schedule.at(0), 1.0);
    }

    #[test]
    fn test_argmax_and_sampling_skip_zero_mass() {
        assert_eq!(argmax(&[0.1, 0.7, 0.7, 0.2]), 1);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..200 {
            let idx = sample_index(&[0.0, 0.5, 0.0, 0.5], &mut rng);
            assert!(idx == 1 || idx == 3);
        }
    }

    #[test]
    fn test_reinsertion_table_shape() {
        let device = Default::default();
        let module = Reinsertion::<TestBackend>::new(&device, 4, 8);
        let table = module.forward(embeddings(), &[2, 3], &[4, 5], &[1, 2, 4, 5, 3, 0, 1, 2, 4, 5, 3, 0]);
        assert_eq!(table.dims(), [2, 6, 6]);
    }

    #[test]
    fn test_decoded_actions_respect_masks() {
        let problem = PdpProblem::new();
        let batch = batch();
        let tours: Vec<Tour> = batch
            .iter()
            .map(|i| problem.initial_tour(i).unwrap())
            .collect();
        let ctx = StepContext {
            problem: &problem,
            batch: &batch,
            tours: &tours,
            info: StepInfo::new(4, 0),
        };
        let decoder = decoder(RemovalStrategy::Learned, ReinsertionStrategy::Learned);
        let mut history = ActionHistory::new(2, 6);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let decision = decoder
            .forward(
                &ctx,
                embeddings(),
                &mut history,
                &DecodeOptions {
                    mode: DecodeMode::Sample,
                    training: true,
                    require_entropy: true,
                },
                None,
                &mut rng,
            )
            .unwrap();

        for (b, action) in decision.actions.iter().enumerate() {
            assert!(batch.instances()[b].is_pickup(action.removed));
            let mask = problem.reinsertion_mask(
                &batch.instances()[b],
                &tours[b],
                action.removed,
                &ctx.info,
                history.row(b),
            );
            assert!(!mask[action.pair_index(6)]);
            assert_eq!(history.count(b), 2);
        }
        let ll = to_host(decision.log_likelihood).unwrap();
        assert!(ll.iter().all(|x| x.is_finite() && *x <= 0.0));
        let entropy = to_host(decision.entropy.unwrap()).unwrap();
        assert!(entropy.iter().all(|x| x.is_finite() && *x >= 0.0));
    }

    #[test]
    fn test_processed_pairs_are_not_removed_again() {
        let problem = PdpProblem::new();
        let batch = batch();
        let tours: Vec<Tour> = batch
            .iter()
            .map(|i| problem.initial_tour(i).unwrap())
            .collect();
        let ctx = StepContext {
            problem: &problem,
            batch: &batch,
            tours: &tours,
            info: StepInfo::new(4, 1),
        };
        let decoder = decoder(RemovalStrategy::Learned, ReinsertionStrategy::Greedy);
        let mut history = ActionHistory::new(2, 6);
        history.mark(0, 2);
        history.mark(0, 4);
        history.mark(1, 3);
        history.mark(1, 5);
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let decision = decoder
            .forward(&ctx, embeddings(), &mut history, &DecodeOptions::greedy(), None, &mut rng)
            .unwrap();
        assert_eq!(decision.actions[0].removed, 3);
        assert_eq!(decision.actions[1].removed, 2);
        assert_eq!(decision.actions, decision.greedy_actions);

        // Nothing left to remove.
        let err = decoder.forward(&ctx, embeddings(), &mut history, &DecodeOptions::greedy(), None, &mut rng);
        assert!(matches!(err, Err(Error::InvalidAction(_))));
    }

    #[test]
    fn test_fixed_actions_are_replayed() {
        let problem = PdpProblem::new();
        let batch = batch();
        let tours: Vec<Tour> = batch
            .iter()
            .map(|i| problem.initial_tour(i).unwrap())
            .collect();
        let ctx = StepContext {
            problem: &problem,
            batch: &batch,
            tours: &tours,
            info: StepInfo::new(4, 0),
        };
        let decoder = decoder(RemovalStrategy::Sequential, ReinsertionStrategy::Learned);
        let fixed = vec![Action::new(2, 0, 1), Action::new(3, 1, 1)];
        let mut history = ActionHistory::new(2, 6);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let decision = decoder
            .forward(
                &ctx,
                embeddings(),
                &mut history,
                &DecodeOptions::training(0.0),
                Some(&fixed),
                &mut rng,
            )
            .unwrap();
        assert_eq!(decision.actions, fixed);
        assert!(history.is_processed(1, 5));
    }

    #[test]
    fn test_epsilon_greedy_ends_of_schedule() {
        let problem = PdpProblem::new();
        let batch = InstanceBatch::new(vec![instance()]).unwrap();
        let tours = vec![problem.initial_tour(&batch.instances()[0]).unwrap()];
        let ctx = StepContext {
            problem: &problem,
            batch: &batch,
            tours: &tours,
            info: StepInfo::new(4, 0),
        };
        let decoder = decoder(RemovalStrategy::Sequential, ReinsertionStrategy::Learned);
        let h: Tensor<TestBackend, 3> = Tensor::random(
            [1, 6, 8],
            burn::tensor::Distribution::Uniform(-1.0, 1.0),
            &Default::default(),
        );
        let decode = |mode: DecodeMode, rng: &mut ChaCha8Rng| {
            let mut history = ActionHistory::new(1, 6);
            let options = DecodeOptions {
                mode,
                training: false,
                require_entropy: false,
            };
            decoder
                .forward(&ctx, h.clone(), &mut history, &options, None, rng)
                .unwrap()
                .actions
        };

        for seed in 0..8 {
            // ε = 0 never explores.
            let greedy = decode(DecodeMode::Greedy, &mut ChaCha8Rng::seed_from_u64(seed));
            let exploit = decode(DecodeMode::EpsilonGreedy(0.0), &mut ChaCha8Rng::seed_from_u64(seed));
            assert_eq!(exploit, greedy);

            // ε = 1 always samples: one coin flip, then the same draw as
            // plain sampling.
            let explore = decode(DecodeMode::EpsilonGreedy(1.0), &mut ChaCha8Rng::seed_from_u64(seed));
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let _coin: f64 = rng.random();
            assert_eq!(explore, decode(DecodeMode::Sample, &mut rng));
        }
    }

    #[test]
    fn test_fixed_actions_out_of_range_are_rejected() {
        let problem = PdpProblem::new();
        let batch = batch();
        let tours: Vec<Tour> = batch
            .iter()
            .map(|i| problem.initial_tour(i).unwrap())
            .collect();
        let ctx = StepContext {
            problem: &problem,
            batch: &batch,
            tours: &tours,
            info: StepInfo::new(4, 0),
        };
        let decoder = decoder(RemovalStrategy::Sequential, ReinsertionStrategy::Learned);
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        for fixed in [
            vec![Action::new(2, 0, 0), Action::new(6, 0, 0)],
            vec![Action::new(2, 0, 0), Action::new(3, 6, 0)],
            vec![Action::new(2, 0, 7), Action::new(3, 0, 0)],
        ] {
            let mut history = ActionHistory::new(2, 6);
            let err = decoder.forward(
                &ctx,
                embeddings(),
                &mut history,
                &DecodeOptions::training(0.0),
                Some(&fixed),
                &mut rng,
            );
            assert!(matches!(err, Err(Error::Shape(_))));
            assert_eq!(history.count(0), 0);
        }
    }
}
