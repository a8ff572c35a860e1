//! Episode driver: repeated decode + step over a batch, trajectory
//! bookkeeping and baseline comparison

use burn::prelude::*;
use rand::Rng;

use crate::error::{Error, Result};
use crate::problem::{Action, Baselines, InstanceBatch, Problem, Tour};

use super::decoder::{ActionHistory, DecodeOptions, StepContext};
use super::layers::to_host;
use super::policy::Actor;
use super::positional::StepInfo;

/// Per-episode state, owned by whoever drives the episode.
#[derive(Debug, Clone)]
pub struct EpisodeState {
    pub tours: Vec<Tour>,
    /// Running open-route cost per instance
    pub costs: Vec<f32>,
    pub history: ActionHistory,
    pub info: StepInfo,
}

impl EpisodeState {
    pub fn new<P: Problem>(problem: &P, batch: &InstanceBatch) -> Result<Self> {
        let tours = batch
            .iter()
            .map(|instance| problem.initial_tour(instance))
            .collect::<Result<Vec<_>>>()?;
        let costs = batch
            .iter()
            .zip(tours.iter())
            .map(|(instance, tour)| problem.cost(instance, tour, false))
            .collect();
        Ok(Self {
            tours,
            costs,
            history: ActionHistory::new(batch.len(), batch.graph_size()),
            info: StepInfo::new(batch.dy_size(), 0),
        })
    }

    /// Steps in a full episode
    pub fn horizon(&self) -> usize {
        StepInfo::episode_length(self.info.dy_size)
    }

    pub fn is_done(&self) -> bool {
        self.info.step >= self.horizon()
    }

    pub fn context<'a, P: Problem>(
        &'a self,
        problem: &'a P,
        batch: &'a InstanceBatch,
    ) -> StepContext<'a, P> {
        StepContext {
            problem,
            batch,
            tours: &self.tours,
            info: self.info,
        }
    }

    /// Apply one action per instance and advance the step counter.
    /// Returns the per-instance rewards.
    pub fn apply<P: Problem>(
        &mut self,
        problem: &P,
        batch: &InstanceBatch,
        actions: &[Action],
    ) -> Result<Vec<f32>> {
        if actions.len() != batch.len() {
            return Err(Error::Shape(format!(
                "{} actions for a batch of {}",
                actions.len(),
                batch.len()
            )));
        }
        let mut rewards = Vec::with_capacity(actions.len());
        for (b, (instance, action)) in batch.iter().zip(actions.iter()).enumerate() {
            let outcome = problem.step(instance, self.tours[b].clone(), action, self.costs[b])?;
            self.tours[b] = outcome.tour;
            self.costs[b] = outcome.cost;
            rewards.push(outcome.reward);
        }
        self.info.step += 1;
        Ok(rewards)
    }
}

/// One decoding step as recorded on the host
#[derive(Debug, Clone)]
pub struct TrajectoryStep {
    /// Tours the actions were decoded from
    pub tours: Vec<Tour>,
    pub actions: Vec<Action>,
    pub greedy_actions: Vec<Action>,
    pub log_likelihood: Vec<f32>,
    pub rewards: Vec<f32>,
    /// Running cost after the step
    pub costs: Vec<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct Trajectory {
    pub initial_costs: Vec<f32>,
    pub steps: Vec<TrajectoryStep>,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Sum of rewards per instance
    pub fn returns(&self) -> Vec<f32> {
        let mut returns = vec![0.0; self.initial_costs.len()];
        for step in &self.steps {
            for (ret, reward) in returns.iter_mut().zip(step.rewards.iter()) {
                *ret += reward;
            }
        }
        returns
    }

    pub fn final_costs(&self) -> Vec<f32> {
        self.steps
            .last()
            .map_or_else(|| self.initial_costs.clone(), |step| step.costs.clone())
    }

    /// Fraction of steps, over the batch, where the learned reinsertion
    /// agreed with cost-based insertion
    pub fn greedy_agreement(&self) -> f32 {
        let (mut same, mut total) = (0usize, 0usize);
        for step in &self.steps {
            for (a, g) in step.actions.iter().zip(step.greedy_actions.iter()) {
                same += usize::from(a == g);
                total += 1;
            }
        }
        if total == 0 { 0.0 } else { same as f32 / total as f32 }
    }
}

/// A completed episode with the autodiff-side accumulators
#[derive(Debug)]
pub struct Episode<B: Backend> {
    pub state: EpisodeState,
    pub trajectory: Trajectory,
    /// Summed log-likelihood over all steps, `[batch]`
    pub log_likelihood: Tensor<B, 1>,
    /// Mean reinsertion entropy per step
    pub entropy: Vec<f32>,
    /// Encoder output at the first step
    pub initial_embeddings: Option<Tensor<B, 3>>,
}

/// Run a full episode over `batch`: `dy_size / 2` decode + step rounds.
pub fn run_episode<B: Backend, P: Problem>(
    actor: &Actor<B>,
    problem: &P,
    batch: &InstanceBatch,
    options: &DecodeOptions,
    rng: &mut impl Rng,
    device: &B::Device,
) -> Result<Episode<B>> {
    let features = problem.encode_features::<B>(batch, device);
    let mut state = EpisodeState::new(problem, batch)?;
    let mut trajectory = Trajectory {
        initial_costs: state.costs.clone(),
        steps: Vec::with_capacity(state.horizon()),
    };
    let mut log_likelihood = Tensor::<B, 1>::zeros([batch.len()], device);
    let mut entropy = Vec::new();
    let mut initial_embeddings = None;

    while !state.is_done() {
        let ctx = state.context(problem, batch);
        let mut history = state.history.clone();
        let (decision, h) = actor.forward(&ctx, features.clone(), &mut history, options, None, rng)?;
        if initial_embeddings.is_none() {
            initial_embeddings = Some(h);
        }
        if let Some(step_entropy) = decision.entropy {
            let values = to_host(step_entropy)?;
            entropy.push(values.iter().sum::<f32>() / values.len().max(1) as f32);
        }

        let tours = state.tours.clone();
        let step_ll = to_host(decision.log_likelihood.clone())?;
        log_likelihood = log_likelihood + decision.log_likelihood;

        state.history = history;
        let rewards = state.apply(problem, batch, &decision.actions)?;
        trajectory.steps.push(TrajectoryStep {
            tours,
            actions: decision.actions,
            greedy_actions: decision.greedy_actions,
            log_likelihood: step_ll,
            rewards,
            costs: state.costs.clone(),
        });
    }

    Ok(Episode {
        state,
        trajectory,
        log_likelihood,
        entropy,
        initial_embeddings,
    })
}

/// Which reference heuristic a result is compared to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaselineKind {
    Greedy,
    Cheapest,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BaselineComparison {
    /// Per instance: strictly better than the baseline
    pub better: Vec<bool>,
    /// Instances at or below the baseline
    pub count_not_worse: usize,
    /// Mean of `(final - baseline) / baseline`
    pub mean_gap: f32,
}

/// Outcome of greedy or sampled evaluation over one or more batches
#[derive(Debug, Clone, Default)]
pub struct RolloutReport {
    pub tours: Vec<Tour>,
    /// Open-route cost at episode end
    pub final_costs: Vec<f32>,
    /// Cost including the edge back to the root
    pub closed_costs: Vec<f32>,
    pub initial_costs: Vec<f32>,
    pub baselines: Vec<Option<Baselines>>,
}

impl RolloutReport {
    pub fn len(&self) -> usize {
        self.final_costs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.final_costs.is_empty()
    }

    pub fn extend(&mut self, other: RolloutReport) {
        self.tours.extend(other.tours);
        self.final_costs.extend(other.final_costs);
        self.closed_costs.extend(other.closed_costs);
        self.initial_costs.extend(other.initial_costs);
        self.baselines.extend(other.baselines);
    }

    pub fn mean_cost(&self) -> f32 {
        mean(&self.final_costs)
    }

    pub fn mean_initial_cost(&self) -> f32 {
        mean(&self.initial_costs)
    }

    /// `None` when any instance lacks precomputed baselines
    pub fn compare(&self, kind: BaselineKind) -> Option<BaselineComparison> {
        if self.is_empty() {
            return None;
        }
        let reference = self
            .baselines
            .iter()
            .map(|b| {
                b.map(|b| match kind {
                    BaselineKind::Greedy => b.greedy,
                    BaselineKind::Cheapest => b.cheapest,
                })
            })
            .collect::<Option<Vec<f32>>>()?;

        let better = self
            .final_costs
            .iter()
            .zip(reference.iter())
            .map(|(cost, base)| cost < base)
            .collect();
        let count_not_worse = self
            .final_costs
            .iter()
            .zip(reference.iter())
            .filter(|(cost, base)| cost <= base)
            .count();
        let gaps: Vec<f32> = self
            .final_costs
            .iter()
            .zip(reference.iter())
            .map(|(cost, base)| (cost - base) / base)
            .collect();
        Some(BaselineComparison {
            better,
            count_not_worse,
            mean_gap: mean(&gaps),
        })
    }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}

/// Evaluate `actor` on one batch without recording gradients.
pub fn rollout<B: Backend, P: Problem>(
    actor: &Actor<B>,
    problem: &P,
    batch: &InstanceBatch,
    options: &DecodeOptions,
    rng: &mut impl Rng,
    device: &B::Device,
) -> Result<RolloutReport> {
    let options = DecodeOptions {
        training: false,
        require_entropy: false,
        ..*options
    };
    let episode = run_episode(actor, problem, batch, &options, rng, device)?;
    let closed_costs = batch
        .iter()
        .zip(episode.state.tours.iter())
        .map(|(instance, tour)| problem.cost(instance, tour, true))
        .collect();
    Ok(RolloutReport {
        final_costs: episode.state.costs,
        tours: episode.state.tours,
        closed_costs,
        initial_costs: episode.trajectory.initial_costs,
        baselines: batch.iter().map(|instance| instance.baselines).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::{Instance, PdpDataset, PdpProblem};
    use crate::rl::decoder::{DecodeMode, ReinsertionStrategy, RemovalStrategy};
    use crate::rl::policy::ActorConfig;
    use burn::backend::NdArray;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    type TestBackend = NdArray;

    fn small_actor() -> Actor<TestBackend> {
        ActorConfig {
            embedding_dim: 8,
            hidden_dim: 8,
            n_encode_layers: 1,
            ..ActorConfig::default()
        }
        .init(&Default::default())
    }

    #[test]
    fn test_episode_state_applies_actions() {
        let problem = PdpProblem::new();
        let instance =
            Instance::new(vec![[0.0, 0.0], [1.0, 1.0], [0.0, 1.0], [1.0, 0.0]], 2).unwrap();
        let batch = InstanceBatch::new(vec![instance]).unwrap();
        let mut state = EpisodeState::new(&problem, &batch).unwrap();
        assert_eq!(state.horizon(), 1);
        let before = state.costs[0];
        let rewards = state
            .apply(&problem, &batch, &[Action::new(2, 0, 0)])
            .unwrap();
        assert!(state.is_done());
        assert!((rewards[0] - (before - state.costs[0])).abs() < 1e-6);
    }

    #[test]
    fn test_episode_covers_every_pair_once() {
        let problem = PdpProblem::new();
        let dataset = PdpDataset::generate(3, 10, 2, 4).unwrap();
        let batch = InstanceBatch::new(dataset.instances().to_vec()).unwrap();
        let actor = small_actor();
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let options = DecodeOptions {
            mode: DecodeMode::Sample,
            training: false,
            require_entropy: false,
        };
        let episode = run_episode(&actor, &problem, &batch, &options, &mut rng, &Default::default())
            .unwrap();
        assert_eq!(episode.trajectory.len(), 4);
        for b in 0..batch.len() {
            assert_eq!(episode.state.history.count(b), 8);
            let mut removed: Vec<usize> = episode
                .trajectory
                .steps
                .iter()
                .map(|step| step.actions[b].removed)
                .collect();
            removed.sort_unstable();
            assert_eq!(removed, vec![2, 3, 4, 5]);
        }
    }

    #[test]
    fn test_report_compares_against_baselines() {
        let problem = PdpProblem::new();
        let dataset = PdpDataset::generate(4, 8, 2, 2).unwrap();
        let batch = InstanceBatch::new(dataset.instances().to_vec()).unwrap();
        let actor = ActorConfig {
            embedding_dim: 8,
            hidden_dim: 8,
            n_encode_layers: 1,
            removal: RemovalStrategy::Sequential,
            reinsertion: ReinsertionStrategy::Greedy,
            ..ActorConfig::default()
        }
        .init::<TestBackend>(&Default::default());
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let report = rollout(
            &actor,
            &problem,
            &batch,
            &DecodeOptions::greedy(),
            &mut rng,
            &Default::default(),
        )
        .unwrap();
        assert_eq!(report.len(), 4);
        for (open, closed) in report.final_costs.iter().zip(report.closed_costs.iter()) {
            assert!(closed >= open);
        }
        let comparison = report.compare(BaselineKind::Greedy).unwrap();
        assert_eq!(comparison.better.len(), 4);
        assert!(comparison.mean_gap.is_finite());
    }
}
