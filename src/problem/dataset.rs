//! Instance generation, JSON persistence and insertion baselines

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::{Instance, InstanceBatch, ROOT, Tour};

/// Reference costs reported next to the learned policy's result
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baselines {
    /// Pairs inserted in index order, each at its cheapest slot
    pub greedy: f32,
    /// Globally cheapest pair inserted first, repeated until done
    pub cheapest: f32,
}

impl Baselines {
    pub fn compute(instance: &Instance) -> Result<Self> {
        Ok(Self {
            greedy: greedy_insertion(instance)?,
            cheapest: cheapest_insertion(instance)?,
        })
    }
}

/// Cheapest slot for one pair in a partial route: `(delta, a, b)` where the
/// pickup goes after `route[a]` and the delivery after `route[b]` (right
/// after the pickup when `a == b`).
fn best_slot(instance: &Instance, route: &[usize], pickup: usize) -> (f32, usize, usize) {
    let delivery = pickup + instance.num_pairs();
    let succ = |k: usize| route.get(k + 1).copied().unwrap_or(ROOT);
    let mut best = (f32::INFINITY, 0, 0);
    for a in 0..route.len() {
        let (ra, sa) = (route[a], succ(a));
        let pickup_cost = instance.edge(ra, pickup) + instance.edge(pickup, sa) - instance.edge(ra, sa);
        for b in a..route.len() {
            let delta = if a == b {
                instance.edge(ra, pickup) + instance.dist(pickup, delivery) + instance.edge(delivery, sa)
                    - instance.edge(ra, sa)
            } else {
                let (rb, sb) = (route[b], succ(b));
                pickup_cost + instance.edge(rb, delivery) + instance.edge(delivery, sb)
                    - instance.edge(rb, sb)
            };
            if delta < best.0 {
                best = (delta, a, b);
            }
        }
    }
    best
}

fn insert_pair(route: &mut Vec<usize>, pickup: usize, delivery: usize, a: usize, b: usize) {
    if a == b {
        route.insert(a + 1, pickup);
        route.insert(a + 2, delivery);
    } else {
        route.insert(b + 1, delivery);
        route.insert(a + 1, pickup);
    }
}

fn route_cost(instance: &Instance, route: &[usize]) -> Result<f32> {
    Ok(Tour::from_order(route)?.cost(instance, false))
}

/// Insert the dynamic pairs in index order, each at its cheapest slot.
pub fn greedy_insertion(instance: &Instance) -> Result<f32> {
    let mut route: Vec<usize> = (0..instance.static_nodes).collect();
    for pickup in instance.pickups() {
        let (_, a, b) = best_slot(instance, &route, pickup);
        insert_pair(&mut route, pickup, pickup + instance.num_pairs(), a, b);
    }
    route_cost(instance, &route)
}

/// Repeatedly insert whichever remaining pair is cheapest to insert.
pub fn cheapest_insertion(instance: &Instance) -> Result<f32> {
    let mut route: Vec<usize> = (0..instance.static_nodes).collect();
    let mut remaining: Vec<usize> = instance.pickups().collect();
    while !remaining.is_empty() {
        let (idx, (_, a, b)) = remaining
            .iter()
            .map(|&pickup| best_slot(instance, &route, pickup))
            .enumerate()
            .min_by(|(_, x), (_, y)| x.0.total_cmp(&y.0))
            .ok_or_else(|| Error::Shape("no pair left to insert".to_string()))?;
        let pickup = remaining.remove(idx);
        insert_pair(&mut route, pickup, pickup + instance.num_pairs(), a, b);
    }
    route_cost(instance, &route)
}

/// A fixed collection of instances with their baselines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdpDataset {
    instances: Vec<Instance>,
}

impl PdpDataset {
    pub fn new(instances: Vec<Instance>) -> Self {
        Self { instances }
    }

    /// Uniform random instances in the unit square.
    pub fn generate(
        count: usize,
        graph_size: usize,
        static_nodes: usize,
        seed: u64,
    ) -> Result<Self> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut instances = Vec::with_capacity(count);
        for _ in 0..count {
            let coords = (0..graph_size)
                .map(|_| [rng.random::<f32>(), rng.random::<f32>()])
                .collect();
            let mut instance = Instance::new(coords, static_nodes)?;
            instance.baselines = Some(Baselines::compute(&instance)?);
            instances.push(instance);
        }
        tracing::debug!(
            "Generated {} instances of {} nodes ({} static)",
            count,
            graph_size,
            static_nodes
        );
        Ok(Self { instances })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let mut dataset: Self = serde_json::from_reader(BufReader::new(file))?;
        for instance in dataset.instances.iter_mut() {
            if instance.baselines.is_none() {
                instance.baselines = Some(Baselines::compute(instance)?);
            }
        }
        tracing::info!(
            "Loaded {} instances from {}",
            dataset.len(),
            path.as_ref().display()
        );
        Ok(dataset)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path.as_ref())?;
        serde_json::to_writer(BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    /// Minibatches for one worker: instances are sharded round-robin by
    /// rank, then chunked into `batch_size / world_size` per batch.
    pub fn batches(
        &self,
        batch_size: usize,
        rank: usize,
        world_size: usize,
    ) -> Result<Vec<InstanceBatch>> {
        if world_size == 0 || rank >= world_size {
            return Err(Error::Config(format!(
                "rank {rank} invalid for world size {world_size}"
            )));
        }
        let per_worker = batch_size / world_size;
        if per_worker == 0 {
            return Err(Error::Config(format!(
                "batch size {batch_size} smaller than world size {world_size}"
            )));
        }
        let shard: Vec<Instance> = self
            .instances
            .iter()
            .skip(rank)
            .step_by(world_size)
            .cloned()
            .collect();
        shard
            .chunks(per_worker)
            .map(|chunk| InstanceBatch::new(chunk.to_vec()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_seeded() {
        let a = PdpDataset::generate(3, 8, 2, 7).unwrap();
        let b = PdpDataset::generate(3, 8, 2, 7).unwrap();
        assert_eq!(a.instances(), b.instances());
        assert!(a.instances().iter().all(|i| i.baselines.is_some()));
    }

    #[test]
    fn test_cheapest_never_worse_than_single_pair_greedy() {
        let instance =
            Instance::new(vec![[0.0, 0.0], [1.0, 1.0], [0.0, 1.0], [1.0, 0.0]], 2).unwrap();
        let baselines = Baselines::compute(&instance).unwrap();
        // With a single pair both heuristics make the same choice.
        assert!((baselines.greedy - baselines.cheapest).abs() < 1e-6);
    }

    #[test]
    fn test_baseline_matches_best_full_enumeration() {
        let instance =
            Instance::new(vec![[0.0, 0.0], [1.0, 1.0], [0.0, 1.0], [1.0, 0.0]], 2).unwrap();
        // Feasible routes for one pair after the static prefix 0, 1.
        let candidates: [&[usize]; 3] = [&[0, 2, 3, 1], &[0, 2, 1, 3], &[0, 1, 2, 3]];
        let best = candidates
            .iter()
            .map(|route| route_cost(&instance, route).unwrap())
            .fold(f32::INFINITY, f32::min);
        assert!((greedy_insertion(&instance).unwrap() - best).abs() < 1e-6);
    }

    #[test]
    fn test_batches_shard_by_rank() {
        let dataset = PdpDataset::generate(8, 6, 2, 1).unwrap();
        let rank0 = dataset.batches(4, 0, 2).unwrap();
        let rank1 = dataset.batches(4, 1, 2).unwrap();
        assert_eq!(rank0.len(), 2);
        assert_eq!(rank1.len(), 2);
        assert_eq!(rank0[0].len(), 2);
        assert_eq!(rank0[0].instances()[1], dataset.instances()[2]);
        assert_eq!(rank1[0].instances()[0], dataset.instances()[1]);
        assert!(dataset.batches(1, 0, 2).is_err());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dataset = PdpDataset::generate(2, 6, 2, 3).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("val.json");
        dataset.save(&path).unwrap();
        let loaded = PdpDataset::load(&path).unwrap();
        assert_eq!(loaded.instances(), dataset.instances());
    }
}
