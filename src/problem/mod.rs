//! Pickup-delivery problem layer
//!
//! Everything the policy treats as an external collaborator lives here:
//! instances and their node layout, the successor-array [`Tour`], the
//! rules that decide which reinsertions are feasible, and the dataset
//! generator with its reporting baselines.
//!
//! Node layout for an instance with `n` nodes of which `s` are static:
//!
//! ```text
//!  0 .. s                 static nodes (node 0 is the root)
//!  s .. s + dy/2          dynamic pickups
//!  s + dy/2 .. n          dynamic deliveries (delivery = pickup + dy/2)
//! ```

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub mod dataset;
pub mod pdp;
pub mod tour;

pub use dataset::{Baselines, PdpDataset};
pub use pdp::PdpProblem;
pub use tour::Tour;

/// Index of the root node every tour starts from.
pub const ROOT: usize = 0;

/// A single problem instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    /// Node coordinates in the plane
    pub coords: Vec<[f32; 2]>,
    /// Number of static nodes (root included)
    pub static_nodes: usize,
    /// Precomputed baseline costs, used for reporting only
    #[serde(default)]
    pub baselines: Option<Baselines>,
}

impl Instance {
    pub fn new(coords: Vec<[f32; 2]>, static_nodes: usize) -> Result<Self> {
        let instance = Self {
            coords,
            static_nodes,
            baselines: None,
        };
        instance.check()?;
        Ok(instance)
    }

    fn check(&self) -> Result<()> {
        let n = self.coords.len();
        if self.static_nodes == 0 || self.static_nodes > n {
            return Err(Error::Shape(format!(
                "static node count {} out of range for {} nodes",
                self.static_nodes, n
            )));
        }
        if (n - self.static_nodes) % 2 != 0 {
            return Err(Error::Shape(format!(
                "dynamic node count {} is odd",
                n - self.static_nodes
            )));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    /// Number of dynamic nodes (pickups plus deliveries)
    pub fn dy_size(&self) -> usize {
        self.coords.len() - self.static_nodes
    }

    /// Number of dynamic pickup/delivery pairs
    pub fn num_pairs(&self) -> usize {
        self.dy_size() / 2
    }

    pub fn is_static(&self, node: usize) -> bool {
        node < self.static_nodes
    }

    pub fn is_pickup(&self, node: usize) -> bool {
        node >= self.static_nodes && node < self.static_nodes + self.num_pairs()
    }

    /// Delivery paired with a dynamic pickup
    pub fn delivery_of(&self, pickup: usize) -> Result<usize> {
        if !self.is_pickup(pickup) {
            return Err(Error::InvalidAction(format!(
                "node {pickup} is not a dynamic pickup"
            )));
        }
        Ok(pickup + self.num_pairs())
    }

    pub fn pickups(&self) -> std::ops::Range<usize> {
        self.static_nodes..self.static_nodes + self.num_pairs()
    }

    pub fn dist(&self, a: usize, b: usize) -> f32 {
        let [ax, ay] = self.coords[a];
        let [bx, by] = self.coords[b];
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }

    /// Cost of travelling `a -> b` while the route is open: arriving back
    /// at the root is free.
    pub fn edge(&self, a: usize, b: usize) -> f32 {
        if b == ROOT { 0.0 } else { self.dist(a, b) }
    }
}

/// A minibatch of equally sized instances evaluated in lockstep.
#[derive(Debug, Clone)]
pub struct InstanceBatch {
    instances: Vec<Instance>,
}

impl InstanceBatch {
    pub fn new(instances: Vec<Instance>) -> Result<Self> {
        let first = instances
            .first()
            .ok_or_else(|| Error::Shape("empty batch".to_string()))?;
        let (n, s) = (first.len(), first.static_nodes);
        for (idx, instance) in instances.iter().enumerate() {
            instance.check()?;
            if instance.len() != n || instance.static_nodes != s {
                return Err(Error::Shape(format!(
                    "instance {idx} has {} nodes / {} static, expected {n} / {s}",
                    instance.len(),
                    instance.static_nodes
                )));
            }
        }
        Ok(Self { instances })
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Nodes per instance
    pub fn graph_size(&self) -> usize {
        self.instances[0].len()
    }

    pub fn dy_size(&self) -> usize {
        self.instances[0].dy_size()
    }

    pub fn static_nodes(&self) -> usize {
        self.instances[0].static_nodes
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instance> {
        self.instances.iter()
    }
}

/// A remove-and-reinsert move: take the pair whose pickup is `removed`
/// out of the tour, put the pickup after `pickup_after` and the delivery
/// after `delivery_after`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Action {
    pub removed: usize,
    pub pickup_after: usize,
    pub delivery_after: usize,
}

impl Action {
    pub fn new(removed: usize, pickup_after: usize, delivery_after: usize) -> Self {
        Self {
            removed,
            pickup_after,
            delivery_after,
        }
    }

    /// Build from a flat index into the `n * n` reinsertion table
    pub fn from_pair_index(removed: usize, pair_index: usize, graph_size: usize) -> Self {
        Self::new(removed, pair_index / graph_size, pair_index % graph_size)
    }

    pub fn pair_index(&self, graph_size: usize) -> usize {
        self.pickup_after * graph_size + self.delivery_after
    }
}

/// Result of applying one action to one tour
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub tour: Tour,
    /// `old_cost - new_cost`; positive when the tour got shorter
    pub reward: f32,
    pub cost: f32,
}

/// Where an episode currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepInfo {
    /// Number of dynamic nodes in the instance
    pub dy_size: usize,
    /// Decoding step within the episode, starting at 0
    pub step: usize,
}

impl StepInfo {
    pub fn new(dy_size: usize, step: usize) -> Self {
        Self { dy_size, step }
    }

    /// Hops walked from the root when ranking nodes: the static part of the
    /// route plus one more pair per completed step.
    pub fn valid_seq_length(&self, graph_size: usize) -> usize {
        (graph_size - self.dy_size + 2 * self.step).clamp(1, graph_size)
    }

    /// Number of steps in a full episode
    pub fn episode_length(dy_size: usize) -> usize {
        dy_size / 2
    }
}

/// Problem rules consumed by the policy and the rollout.
///
/// The policy never inspects coordinates or tours directly beyond what
/// these calls return, so a different routing variant only needs a new
/// implementation of this trait.
pub trait Problem {
    /// Raw node features, `[batch, graph_size, 2]`
    fn encode_features<B: Backend>(&self, batch: &InstanceBatch, device: &B::Device)
    -> Tensor<B, 3>;

    /// Feasible starting tour covering every node
    fn initial_tour(&self, instance: &Instance) -> Result<Tour>;

    /// Tour length; `finished` adds the closing edge back to the root
    fn cost(&self, instance: &Instance, tour: &Tour, finished: bool) -> f32;

    /// Apply one action, returning the new tour and the incremental reward
    fn step(
        &self,
        instance: &Instance,
        tour: Tour,
        action: &Action,
        running_cost: f32,
    ) -> Result<StepOutcome>;

    /// Row-major `n * n` table of forbidden `(pickup_after, delivery_after)`
    /// placements for the pair whose pickup is `removed`; `true` = forbidden.
    ///
    /// `processed` flags the nodes handled so far in the episode, the
    /// removed pair included. Anchors must lie in the settled prefix: the
    /// first `info.valid_seq_length` nodes from the root, holding only
    /// static nodes and processed pairs.
    fn reinsertion_mask(
        &self,
        instance: &Instance,
        tour: &Tour,
        removed: usize,
        info: &StepInfo,
        processed: &[bool],
    ) -> Vec<bool>;

    /// Cost-based insertion scores for the same table, higher is better.
    /// Forbidden entries hold `f32::NEG_INFINITY`.
    fn greedy_insertion_table(
        &self,
        instance: &Instance,
        tour: &Tour,
        removed: usize,
        info: &StepInfo,
        processed: &[bool],
    ) -> Vec<f32>;
}
