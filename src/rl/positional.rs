//! Rotary positional signal derived from the current visit order
//!
//! Tours change every decoding step, so the position a node is encoded at
//! is its rank along the current route from the root, not its index in the
//! input. The rank drives a rotation of query/key channel pairs inside
//! attention; relative visit order then shows up directly in the dot
//! products.

use burn::prelude::*;

use crate::problem::Tour;
pub use crate::problem::StepInfo;

/// Base of the geometric frequency ladder
pub const ROTARY_THETA: f32 = 10000.0;

/// Rank each node by walking `valid_seq_length` hops from the root and
/// reduce the ranks modulo that length. Nodes beyond the walk get 0.
pub fn rotary_index(tour: &Tour, info: &StepInfo) -> Vec<usize> {
    let valid = info.valid_seq_length(tour.len());
    tour.ranks_within(valid)
        .into_iter()
        .map(|rank| rank % valid)
        .collect()
}

/// Per-node rotation, `[batch, nodes, dim / 2]` cosines and sines.
#[derive(Debug, Clone)]
pub struct RotaryPhase<B: Backend> {
    pub cos: Tensor<B, 3>,
    pub sin: Tensor<B, 3>,
}

impl<B: Backend> RotaryPhase<B> {
    /// Frequency `k` of a `dim`-wide embedding turns by
    /// `index * theta^(-2k / dim)`.
    pub fn from_indices(indices: &[Vec<usize>], dim: usize, device: &B::Device) -> Self {
        let batch = indices.len();
        let nodes = indices.first().map_or(0, Vec::len);
        let half = dim / 2;
        let inv_freq: Vec<f32> = (0..half)
            .map(|k| ROTARY_THETA.powf(-((2 * k) as f32) / dim as f32))
            .collect();

        let mut cos = Vec::with_capacity(batch * nodes * half);
        let mut sin = Vec::with_capacity(batch * nodes * half);
        for &index in indices.iter().flatten() {
            for freq in &inv_freq {
                let angle = index as f32 * freq;
                cos.push(angle.cos());
                sin.push(angle.sin());
            }
        }

        Self {
            cos: Tensor::<B, 1>::from_floats(cos.as_slice(), device).reshape([batch, nodes, half]),
            sin: Tensor::<B, 1>::from_floats(sin.as_slice(), device).reshape([batch, nodes, half]),
        }
    }

    pub fn from_tours(tours: &[Tour], info: &StepInfo, dim: usize, device: &B::Device) -> Self {
        let indices: Vec<Vec<usize>> = tours.iter().map(|tour| rotary_index(tour, info)).collect();
        Self::from_indices(&indices, dim, device)
    }

    /// Rotate consecutive channel pairs `(x[2k], x[2k + 1])` of `x`,
    /// `[batch, nodes, dim]`, by the per-node phase.
    pub fn rotate(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, nodes, dim] = x.dims();
        let half = dim / 2;
        let pairs = x.reshape([batch, nodes, half, 2]);
        let even = pairs
            .clone()
            .slice([0..batch, 0..nodes, 0..half, 0..1])
            .reshape([batch, nodes, half]);
        let odd = pairs
            .slice([0..batch, 0..nodes, 0..half, 1..2])
            .reshape([batch, nodes, half]);

        let real = even.clone() * self.cos.clone() - odd.clone() * self.sin.clone();
        let imag = even * self.sin.clone() + odd * self.cos.clone();
        Tensor::stack::<4>(vec![real, imag], 3).reshape([batch, nodes, dim])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rl::layers::to_host;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_valid_seq_length_grows_by_two() {
        let info = StepInfo::new(6, 0);
        assert_eq!(info.valid_seq_length(10), 4);
        assert_eq!(StepInfo::new(6, 2).valid_seq_length(10), 8);
        assert_eq!(StepInfo::episode_length(6), 3);
    }

    #[test]
    fn test_rotary_index_wraps_root() {
        let tour = Tour::from_order(&[0, 3, 1, 2]).unwrap();
        // Full walk: 3 -> 1, 1 -> 2, 2 -> 3, root -> 4 which wraps to 0.
        let index = rotary_index(&tour, &StepInfo::new(0, 0));
        assert_eq!(index, vec![0, 2, 3, 1]);

        // Two static nodes at step 0: only the first two hops are ranked.
        let index = rotary_index(&tour, &StepInfo::new(2, 0));
        assert_eq!(index, vec![0, 0, 0, 1]);
    }

    #[test]
    fn test_zero_index_is_identity_rotation() {
        let device = Default::default();
        let phase = RotaryPhase::<TestBackend>::from_indices(&[vec![0, 0]], 4, &device);
        let x = Tensor::<TestBackend, 1>::from_floats(
            [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0].as_slice(),
            &device,
        )
        .reshape([1, 2, 4]);
        let rotated = to_host(phase.rotate(x.clone())).unwrap();
        let original = to_host(x).unwrap();
        for (a, b) in rotated.iter().zip(original.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_rotation_preserves_norm_and_relative_phase() {
        let device = Default::default();
        let phase = RotaryPhase::<TestBackend>::from_indices(&[vec![1, 3]], 2, &device);
        let x = Tensor::<TestBackend, 1>::from_floats([1.0, 0.0, 1.0, 0.0].as_slice(), &device)
            .reshape([1, 2, 2]);
        let rotated = to_host(phase.rotate(x)).unwrap();
        // dim 2 has a single frequency of 1: node 0 turns by 1 rad, node 1 by 3.
        assert!((rotated[0] - 1f32.cos()).abs() < 1e-6);
        assert!((rotated[1] - 1f32.sin()).abs() < 1e-6);
        let dot = rotated[0] * rotated[2] + rotated[1] * rotated[3];
        assert!((dot - 2f32.cos()).abs() < 1e-5);
    }
}
