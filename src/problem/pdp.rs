//! Pickup-delivery rules: starting tour, step transition, feasibility mask

use burn::prelude::*;

use crate::error::{Error, Result};

use super::{Action, Instance, InstanceBatch, Problem, ROOT, StepInfo, StepOutcome, Tour};

/// Pickup-delivery TSP with an open route rooted at node 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdpProblem;

impl PdpProblem {
    pub fn new() -> Self {
        Self
    }

    /// Insertion cost of `node` between `pred` and its current successor
    fn insertion_cost(instance: &Instance, tour: &Tour, pred: usize, node: usize) -> f32 {
        let succ = tour.next(pred);
        instance.edge(pred, node) + instance.edge(node, succ) - instance.edge(pred, succ)
    }
}

impl Problem for PdpProblem {
    fn encode_features<B: Backend>(
        &self,
        batch: &InstanceBatch,
        device: &B::Device,
    ) -> Tensor<B, 3> {
        let flat: Vec<f32> = batch
            .iter()
            .flat_map(|instance| instance.coords.iter().flatten().copied())
            .collect();
        Tensor::<B, 1>::from_floats(flat.as_slice(), device).reshape([
            batch.len(),
            batch.graph_size(),
            2,
        ])
    }

    fn initial_tour(&self, instance: &Instance) -> Result<Tour> {
        let mut order: Vec<usize> = (0..instance.static_nodes).collect();
        for pickup in instance.pickups() {
            order.push(pickup);
            order.push(pickup + instance.num_pairs());
        }
        Tour::from_order(&order)
    }

    fn cost(&self, instance: &Instance, tour: &Tour, finished: bool) -> f32 {
        tour.cost(instance, finished)
    }

    fn step(
        &self,
        instance: &Instance,
        mut tour: Tour,
        action: &Action,
        running_cost: f32,
    ) -> Result<StepOutcome> {
        let pickup = action.removed;
        let delivery = instance.delivery_of(pickup)?;
        let (after_p, after_d) = (action.pickup_after, action.delivery_after);
        let n = instance.len();
        if tour.len() != n || after_p >= n || after_d >= n {
            return Err(Error::Shape(format!(
                "action {action:?} does not fit a tour of {} nodes",
                tour.len()
            )));
        }
        if [after_p, after_d]
            .iter()
            .any(|&anchor| anchor == pickup || anchor == delivery)
        {
            return Err(Error::InvalidAction(format!(
                "{action:?} anchors on the pair being moved"
            )));
        }

        let mut delta = tour.excise(instance, pickup);
        delta += tour.excise(instance, delivery);

        // Remaining nodes keep their relative order, so the route walk from
        // the root only has to skip the two detached self-loops.
        let mut position = vec![usize::MAX; n];
        let mut node = ROOT;
        for k in 0..n - 2 {
            position[node] = k;
            node = tour.next(node);
        }
        if position[after_d] < position[after_p] {
            return Err(Error::InvalidAction(format!(
                "{action:?} places the delivery before its pickup"
            )));
        }

        delta += tour.insert_after(instance, after_p, pickup);
        let delivery_anchor = if after_p == after_d { pickup } else { after_d };
        delta += tour.insert_after(instance, delivery_anchor, delivery);

        let cost = running_cost + delta;
        Ok(StepOutcome {
            tour,
            reward: running_cost - cost,
            cost,
        })
    }

    fn reinsertion_mask(
        &self,
        instance: &Instance,
        tour: &Tour,
        removed: usize,
        info: &StepInfo,
        processed: &[bool],
    ) -> Vec<bool> {
        let n = instance.len();
        let delivery = removed + instance.num_pairs();
        let position = tour.positions();
        let prefix = info.valid_seq_length(n);
        let anchor = |node: usize| {
            node != removed
                && node != delivery
                && position[node] < prefix
                && (instance.is_static(node) || processed.get(node).copied().unwrap_or(false))
        };

        let mut mask = vec![true; n * n];
        for after_p in (0..n).filter(|&node| anchor(node)) {
            for after_d in (0..n).filter(|&node| anchor(node)) {
                mask[after_p * n + after_d] = position[after_d] < position[after_p];
            }
        }
        mask
    }

    fn greedy_insertion_table(
        &self,
        instance: &Instance,
        tour: &Tour,
        removed: usize,
        info: &StepInfo,
        processed: &[bool],
    ) -> Vec<f32> {
        let n = instance.len();
        let pickup = removed;
        let delivery = removed + instance.num_pairs();
        let mask = self.reinsertion_mask(instance, tour, removed, info, processed);

        let cost_p: Vec<f32> = (0..n)
            .map(|pred| Self::insertion_cost(instance, tour, pred, pickup))
            .collect();
        let cost_d: Vec<f32> = (0..n)
            .map(|pred| Self::insertion_cost(instance, tour, pred, delivery))
            .collect();

        let mut table = vec![f32::NEG_INFINITY; n * n];
        for after_p in 0..n {
            for after_d in 0..n {
                let idx = after_p * n + after_d;
                if mask[idx] {
                    continue;
                }
                table[idx] = if after_p == after_d {
                    let succ = tour.next(after_p);
                    -(instance.edge(after_p, pickup) + instance.dist(pickup, delivery)
                        + instance.edge(delivery, succ)
                        - instance.edge(after_p, succ))
                } else {
                    -(cost_p[after_p] + cost_d[after_d])
                };
            }
        }
        table
    }
}
