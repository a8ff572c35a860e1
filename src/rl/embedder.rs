//! Node feature embedding plus the rotary phase of the current tour

use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;

use crate::problem::Tour;

use super::positional::{RotaryPhase, StepInfo};

/// Projects raw node features to the embedding width and derives the
/// positional rotation from each tour's visit order.
#[derive(Module, Debug)]
pub struct FeatureEmbedder<B: Backend> {
    projection: Linear<B>,
    embedding_dim: usize,
}

impl<B: Backend> FeatureEmbedder<B> {
    pub fn new(device: &B::Device, node_dim: usize, embedding_dim: usize) -> Self {
        Self {
            projection: LinearConfig::new(node_dim, embedding_dim)
                .with_bias(false)
                .init(device),
            embedding_dim,
        }
    }

    /// `features`: `[batch, nodes, node_dim]`. Returns the node embeddings
    /// `[batch, nodes, embedding_dim]` and the phase for `tours`.
    pub fn forward(
        &self,
        features: Tensor<B, 3>,
        tours: &[Tour],
        info: &StepInfo,
    ) -> (Tensor<B, 3>, RotaryPhase<B>) {
        let device = features.device();
        let embedded = self.projection.forward(features);
        let phase = RotaryPhase::from_tours(tours, info, self.embedding_dim, &device);
        (embedded, phase)
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_embedding_shapes() {
        let device = Default::default();
        let embedder = FeatureEmbedder::<TestBackend>::new(&device, 2, 8);
        let tours = vec![Tour::from_order(&[0, 1, 2, 3]).unwrap(); 3];
        let features = Tensor::<TestBackend, 3>::ones([3, 4, 2], &device);
        let (h, phase) = embedder.forward(features, &tours, &StepInfo::new(2, 0));
        assert_eq!(h.dims(), [3, 4, 8]);
        assert_eq!(phase.cos.dims(), [3, 4, 4]);
        assert_eq!(phase.sin.dims(), [3, 4, 4]);
    }
}
