//! Successor-array tour representation

use crate::error::{Error, Result};

use super::{Instance, ROOT};

/// A single cycle over all nodes of one instance, stored as `next[node]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tour {
    next: Vec<usize>,
}

impl Tour {
    /// Build the cycle that visits `order` in sequence and closes back to
    /// its first element, which must be the root.
    pub fn from_order(order: &[usize]) -> Result<Self> {
        if order.first() != Some(&ROOT) {
            return Err(Error::Shape("route must start at the root".to_string()));
        }
        let n = order.len();
        let mut next = vec![usize::MAX; n];
        for (k, &node) in order.iter().enumerate() {
            if node >= n {
                return Err(Error::Shape(format!("node {node} out of range {n}")));
            }
            next[node] = order[(k + 1) % n];
        }
        let tour = Self { next };
        tour.validate()?;
        Ok(tour)
    }

    pub fn from_successors(next: Vec<usize>) -> Result<Self> {
        let tour = Self { next };
        tour.validate()?;
        Ok(tour)
    }

    /// Check that `next` is a permutation forming exactly one cycle.
    pub fn validate(&self) -> Result<()> {
        let n = self.next.len();
        if n == 0 {
            return Err(Error::Shape("empty tour".to_string()));
        }
        let mut seen = vec![false; n];
        for &succ in &self.next {
            if succ >= n || std::mem::replace(&mut seen[succ], true) {
                return Err(Error::Shape(format!(
                    "successor array is not a permutation: {:?}",
                    self.next
                )));
            }
        }
        let mut node = ROOT;
        for hop in 1..=n {
            node = self.next[node];
            if node == ROOT && hop != n {
                return Err(Error::Shape(format!(
                    "cycle through the root closes after {hop} of {n} nodes"
                )));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.next.len()
    }

    pub fn is_empty(&self) -> bool {
        self.next.is_empty()
    }

    pub fn next(&self, node: usize) -> usize {
        self.next[node]
    }

    pub fn successors(&self) -> &[usize] {
        &self.next
    }

    pub fn predecessor(&self, node: usize) -> usize {
        self.next
            .iter()
            .position(|&succ| succ == node)
            .unwrap_or(node)
    }

    /// Nodes in route order, starting at the root
    pub fn order(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.next.len());
        let mut node = ROOT;
        for _ in 0..self.next.len() {
            order.push(node);
            node = self.next[node];
        }
        order
    }

    /// Visit-order rank of every node after walking `hops` steps from the
    /// root: the k-th node reached gets rank k, nodes not reached get 0.
    pub fn ranks_within(&self, hops: usize) -> Vec<usize> {
        let mut ranks = vec![0; self.next.len()];
        let mut node = ROOT;
        for k in 1..=hops.min(self.next.len()) {
            node = self.next[node];
            ranks[node] = k;
        }
        ranks
    }

    /// Full visit-order ranks, a permutation of `1..=n` (the root is
    /// reached last and gets `n`).
    pub fn visit_order(&self) -> Vec<usize> {
        self.ranks_within(self.next.len())
    }

    /// Route position of every node, with the root at position 0
    pub fn positions(&self) -> Vec<usize> {
        let n = self.next.len();
        self.visit_order().into_iter().map(|rank| rank % n).collect()
    }

    /// Open-route length; `finished` adds the edge back to the root.
    pub fn cost(&self, instance: &Instance, finished: bool) -> f32 {
        self.next
            .iter()
            .enumerate()
            .map(|(node, &succ)| {
                if finished {
                    instance.dist(node, succ)
                } else {
                    instance.edge(node, succ)
                }
            })
            .sum()
    }

    /// Unlink `node` from the cycle, leaving it as a self-loop. Returns the
    /// change in open-route cost.
    pub(crate) fn excise(&mut self, instance: &Instance, node: usize) -> f32 {
        let pred = self.predecessor(node);
        let succ = self.next[node];
        self.next[pred] = succ;
        self.next[node] = node;
        instance.edge(pred, succ) - instance.edge(pred, node) - instance.edge(node, succ)
    }

    /// Splice a detached `node` in right after `anchor`. Returns the change
    /// in open-route cost.
    pub(crate) fn insert_after(&mut self, instance: &Instance, anchor: usize, node: usize) -> f32 {
        let succ = self.next[anchor];
        self.next[node] = succ;
        self.next[anchor] = node;
        instance.edge(anchor, node) + instance.edge(node, succ) - instance.edge(anchor, succ)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(n: usize) -> Instance {
        let coords = (0..n).map(|i| [i as f32, 0.0]).collect();
        Instance::new(coords, n % 2 + 2).unwrap()
    }

    #[test]
    fn test_from_order_and_walk() {
        let tour = Tour::from_order(&[0, 2, 1, 3]).unwrap();
        assert_eq!(tour.next(0), 2);
        assert_eq!(tour.next(3), 0);
        assert_eq!(tour.order(), vec![0, 2, 1, 3]);
        assert_eq!(tour.visit_order(), vec![4, 2, 1, 3]);
        assert_eq!(tour.positions(), vec![0, 2, 1, 3]);
        assert_eq!(tour.predecessor(1), 2);
    }

    #[test]
    fn test_partial_walk_leaves_unreached_at_zero() {
        let tour = Tour::from_order(&[0, 1, 2, 3, 4, 5]).unwrap();
        assert_eq!(tour.ranks_within(3), vec![0, 1, 2, 3, 0, 0]);
    }

    #[test]
    fn test_validate_rejects_two_cycles() {
        assert!(Tour::from_successors(vec![1, 0, 3, 2]).is_err());
        assert!(Tour::from_successors(vec![1, 1, 3, 0]).is_err());
        assert!(Tour::from_successors(vec![1, 2, 3, 0]).is_ok());
    }

    #[test]
    fn test_cost_open_and_closed() {
        let instance = line(4);
        let tour = Tour::from_order(&[0, 1, 2, 3]).unwrap();
        assert!((tour.cost(&instance, false) - 3.0).abs() < 1e-6);
        assert!((tour.cost(&instance, true) - 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_excise_then_insert_restores_cycle() {
        let instance = line(4);
        let mut tour = Tour::from_order(&[0, 1, 2, 3]).unwrap();
        let before = tour.cost(&instance, false);
        let d1 = tour.excise(&instance, 2);
        let d2 = tour.insert_after(&instance, 1, 2);
        tour.validate().unwrap();
        assert_eq!(tour.order(), vec![0, 1, 2, 3]);
        assert!((d1 + d2).abs() < 1e-6);
        assert!((tour.cost(&instance, false) - before).abs() < 1e-6);
    }
}
