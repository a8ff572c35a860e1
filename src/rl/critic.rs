//! Value estimator over pooled encoder output

use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;

use super::layers::Mlp;

/// Configuration for the critic
#[derive(Debug, Config)]
pub struct CriticConfig {
    /// Width of the encoder output it reads
    pub embedding_dim: usize,
    /// Hidden width of the value head
    pub hidden_dim: usize,
    /// Dropout inside the value head
    pub dropout: f64,
}

impl Default for CriticConfig {
    fn default() -> Self {
        Self {
            embedding_dim: 128,
            hidden_dim: 64,
            dropout: 0.01,
        }
    }
}

impl CriticConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Critic<B> {
        Critic::new(device, self)
    }
}

/// Regresses one value per instance from node embeddings and the running
/// tour cost. Its output is reported, never fed into the policy loss.
#[derive(Module, Debug)]
pub struct Critic<B: Backend> {
    project_graph: Linear<B>,
    project_node: Linear<B>,
    value_head: Mlp<B>,
}

impl<B: Backend> Critic<B> {
    pub fn new(device: &B::Device, config: &CriticConfig) -> Self {
        let d = config.embedding_dim;
        Self {
            project_graph: LinearConfig::new(d, d / 2).init(device),
            project_node: LinearConfig::new(d, d / 2).init(device),
            value_head: Mlp::new(device, 2 * (d / 2) + 1, d, config.hidden_dim, 1, config.dropout),
        }
    }

    /// `h`: `[batch, nodes, embed]`, `cost`: `[batch]`. Returns `[batch]`.
    pub fn forward(&self, h: Tensor<B, 3>, cost: Tensor<B, 1>) -> Tensor<B, 1> {
        let [batch, nodes, _] = h.dims();
        let graph = self.project_graph.forward(h.clone().mean_dim(1));
        let node = self.project_node.forward(h);
        let [_, _, half] = node.dims();
        let fusion = node + graph.expand([batch, nodes, half]);

        let pooled = Tensor::cat(
            vec![
                fusion.clone().mean_dim(1).reshape([batch, half]),
                fusion.max_dim(1).reshape([batch, half]),
                cost.reshape([batch, 1]),
            ],
            1,
        );
        self.value_head.forward(pooled).reshape([batch])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_critic_default_config() {
        let config = CriticConfig::default();
        assert_eq!(config.embedding_dim, 128);
        assert!((config.dropout - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_value_per_instance() {
        let device = Default::default();
        let critic = CriticConfig::new(8, 16, 0.0).init::<TestBackend>(&device);
        let h = Tensor::<TestBackend, 3>::ones([3, 5, 8], &device);
        let cost = Tensor::<TestBackend, 1>::from_floats([1.0, 2.0, 3.0].as_slice(), &device);
        assert_eq!(critic.forward(h, cost).dims(), [3]);
    }
}
