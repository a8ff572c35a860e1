//! Shared building blocks: normalization, feed-forward stacks, compatibility
//! heads and host/device tensor helpers

use burn::module::Param;
use burn::nn::{Dropout, DropoutConfig, LayerNorm, LayerNormConfig, Linear, LinearConfig, Relu};
use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Logit assigned to masked entries. Large enough that softmax gives them
/// exactly zero mass, finite so `p * log p` stays zero instead of NaN.
pub const NEG_LOGIT: f32 = -1e20;

/// Which statistics the encoder normalizes over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NormKind {
    /// Per node, across the embedding channels
    #[default]
    Layer,
    /// Per channel, across the nodes of one instance
    Instance,
}

/// Normalization sublayer. Exactly one of the two variants is populated.
#[derive(Module, Debug)]
pub struct Normalization<B: Backend> {
    layer: Option<LayerNorm<B>>,
    instance_gamma: Option<Param<Tensor<B, 1>>>,
    instance_beta: Option<Param<Tensor<B, 1>>>,
}

impl<B: Backend> Normalization<B> {
    pub fn new(device: &B::Device, kind: NormKind, embed_dim: usize) -> Self {
        match kind {
            NormKind::Layer => Self {
                layer: Some(LayerNormConfig::new(embed_dim).init(device)),
                instance_gamma: None,
                instance_beta: None,
            },
            NormKind::Instance => Self {
                layer: None,
                instance_gamma: Some(Param::from_tensor(Tensor::ones([embed_dim], device))),
                instance_beta: Some(Param::from_tensor(Tensor::zeros([embed_dim], device))),
            },
        }
    }

    /// `x`: `[batch, nodes, embed]`
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        if let Some(layer) = &self.layer {
            return layer.forward(x);
        }
        let [_, _, embed] = x.dims();
        let mean = x.clone().mean_dim(1);
        let centered = x - mean;
        let var = centered.clone().powf_scalar(2.0).mean_dim(1);
        let normed = centered / var.add_scalar(1e-5).sqrt();
        match (&self.instance_gamma, &self.instance_beta) {
            (Some(gamma), Some(beta)) => {
                normed * gamma.val().reshape([1, 1, embed]) + beta.val().reshape([1, 1, embed])
            }
            _ => normed,
        }
    }
}

/// Three-layer perceptron with ReLU and dropout after the first layer
#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    fc1: Linear<B>,
    fc2: Linear<B>,
    fc3: Linear<B>,
    dropout: Dropout,
    activation: Relu,
}

impl<B: Backend> Mlp<B> {
    pub fn new(
        device: &B::Device,
        input_dim: usize,
        feed_forward_dim: usize,
        embedding_dim: usize,
        output_dim: usize,
        dropout: f64,
    ) -> Self {
        Self {
            fc1: LinearConfig::new(input_dim, feed_forward_dim).init(device),
            fc2: LinearConfig::new(feed_forward_dim, embedding_dim).init(device),
            fc3: LinearConfig::new(embedding_dim, output_dim).init(device),
            dropout: DropoutConfig::new(dropout).init(),
            activation: Relu::new(),
        }
    }

    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let x = self.activation.forward(self.fc1.forward(x));
        let x = self.dropout.forward(x);
        let x = self.activation.forward(self.fc2.forward(x));
        self.fc3.forward(x)
    }
}

/// Position-wise feed-forward sublayer (bias-free)
#[derive(Module, Debug)]
pub struct FeedForward<B: Backend> {
    input: Linear<B>,
    output: Linear<B>,
    activation: Relu,
}

impl<B: Backend> FeedForward<B> {
    pub fn new(device: &B::Device, embed_dim: usize, hidden_dim: usize) -> Self {
        let hidden_dim = hidden_dim.max(1);
        Self {
            input: LinearConfig::new(embed_dim, hidden_dim)
                .with_bias(false)
                .init(device),
            output: LinearConfig::new(hidden_dim, embed_dim)
                .with_bias(false)
                .init(device),
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        self.output
            .forward(self.activation.forward(self.input.forward(x)))
    }
}

/// Multi-head query/key compatibility without values: scores how well each
/// query node fits next to each key node.
#[derive(Module, Debug)]
pub struct MultiHeadCompat<B: Backend> {
    query: Linear<B>,
    key: Linear<B>,
    n_heads: usize,
    key_dim: usize,
}

impl<B: Backend> MultiHeadCompat<B> {
    pub fn new(device: &B::Device, n_heads: usize, input_dim: usize, key_dim: usize) -> Self {
        Self {
            query: LinearConfig::new(input_dim, n_heads * key_dim)
                .with_bias(false)
                .init(device),
            key: LinearConfig::new(input_dim, n_heads * key_dim)
                .with_bias(false)
                .init(device),
            n_heads,
            key_dim,
        }
    }

    pub fn n_heads(&self) -> usize {
        self.n_heads
    }

    fn heads(&self, x: Tensor<B, 3>) -> Tensor<B, 4> {
        let [batch, nodes, _] = x.dims();
        x.reshape([batch, nodes, self.n_heads, self.key_dim])
            .swap_dims(1, 2)
    }

    /// `q`: `[batch, n_query, input]`, `h`: `[batch, n_key, input]`.
    /// Returns `[batch, heads, n_query, n_key]`.
    pub fn forward(&self, q: Tensor<B, 3>, h: Tensor<B, 3>) -> Tensor<B, 4> {
        let queries = self.heads(self.query.forward(q));
        let keys = self.heads(self.key.forward(h));
        queries.matmul(keys.swap_dims(2, 3))
    }
}

/// Read a tensor back to the host as `f32`.
pub fn to_host<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    Ok(tensor.into_data().convert::<f32>().to_vec::<f32>()?)
}

/// Boolean tensor of the given shape from a host mask.
pub fn bool_tensor<B: Backend, const D: usize>(
    mask: &[bool],
    shape: [usize; D],
    device: &B::Device,
) -> Tensor<B, D, Bool> {
    let flat: Vec<f32> = mask.iter().map(|&m| if m { 1.0 } else { 0.0 }).collect();
    Tensor::<B, 1>::from_floats(flat.as_slice(), device)
        .reshape(shape)
        .greater_elem(0.5)
}

/// Index tensor `[batch, rows, width]` for `gather` along dim 1, where each
/// of the `batch * rows` node ids is repeated across the last dimension.
pub fn node_index<B: Backend>(
    nodes: &[usize],
    batch: usize,
    width: usize,
    device: &B::Device,
) -> Tensor<B, 3, Int> {
    let rows = nodes.len() / batch.max(1);
    let flat: Vec<i64> = nodes
        .iter()
        .flat_map(|&node| std::iter::repeat_n(node as i64, width))
        .collect();
    Tensor::<B, 1, Int>::from_ints(flat.as_slice(), device).reshape([batch, rows, width])
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_instance_normalization_zero_mean() {
        let device = Default::default();
        let norm = Normalization::<TestBackend>::new(&device, NormKind::Instance, 4);
        let x = Tensor::<TestBackend, 1>::from_floats(
            [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 9.0].as_slice(),
            &device,
        )
        .reshape([1, 2, 4]);
        let y = norm.forward(x);
        let mean = to_host(y.mean_dim(1)).unwrap();
        assert!(mean.iter().all(|m| m.abs() < 1e-5));
    }

    #[test]
    fn test_compat_shape() {
        let device = Default::default();
        let compat = MultiHeadCompat::<TestBackend>::new(&device, 4, 8, 2);
        let q = Tensor::<TestBackend, 3>::ones([3, 1, 8], &device);
        let h = Tensor::<TestBackend, 3>::ones([3, 5, 8], &device);
        assert_eq!(compat.forward(q, h).dims(), [3, 4, 1, 5]);
    }

    #[test]
    fn test_node_index_gathers_rows() {
        let device = Default::default();
        let h = Tensor::<TestBackend, 1>::from_floats(
            [0.0, 0.1, 1.0, 1.1, 2.0, 2.1].as_slice(),
            &device,
        )
        .reshape([1, 3, 2]);
        let index = node_index::<TestBackend>(&[2, 0], 1, 2, &device);
        let picked = to_host(h.gather(1, index)).unwrap();
        assert_eq!(picked, vec![2.0, 2.1, 0.0, 0.1]);
    }

    #[test]
    fn test_bool_tensor_masks() {
        let device = Default::default();
        let mask = bool_tensor::<TestBackend, 2>(&[true, false, false, true], [2, 2], &device);
        let x = Tensor::<TestBackend, 2>::zeros([2, 2], &device).mask_fill(mask, 1.0);
        assert_eq!(to_host(x).unwrap(), vec![1.0, 0.0, 0.0, 1.0]);
    }
}
