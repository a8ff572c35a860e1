//! Self-attention encoder with rotary position mixing

use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::softmax;

use super::layers::{FeedForward, NormKind, Normalization};
use super::positional::RotaryPhase;

/// Multi-head self-attention whose queries and keys are rotated by the
/// visit-order phase before the dot product.
#[derive(Module, Debug)]
pub struct RotaryAttention<B: Backend> {
    query: Linear<B>,
    key: Linear<B>,
    value: Linear<B>,
    output: Linear<B>,
    n_heads: usize,
    head_dim: usize,
}

impl<B: Backend> RotaryAttention<B> {
    pub fn new(device: &B::Device, n_heads: usize, embedding_dim: usize) -> Self {
        let projection = |from, to| LinearConfig::new(from, to).with_bias(false).init(device);
        Self {
            query: projection(embedding_dim, embedding_dim),
            key: projection(embedding_dim, embedding_dim),
            value: projection(embedding_dim, embedding_dim),
            output: projection(embedding_dim, embedding_dim),
            n_heads,
            head_dim: embedding_dim / n_heads.max(1),
        }
    }

    fn split_heads(&self, x: Tensor<B, 3>) -> Tensor<B, 4> {
        let [batch, nodes, _] = x.dims();
        x.reshape([batch, nodes, self.n_heads, self.head_dim])
            .swap_dims(1, 2)
    }

    /// `h`: `[batch, nodes, embed]`
    pub fn forward(&self, h: Tensor<B, 3>, phase: &RotaryPhase<B>) -> Tensor<B, 3> {
        let [batch, nodes, embed] = h.dims();
        let q = self.split_heads(phase.rotate(self.query.forward(h.clone())));
        let k = self.split_heads(phase.rotate(self.key.forward(h.clone())));
        let v = self.split_heads(self.value.forward(h));

        let scale = (self.head_dim as f64).sqrt();
        let scores = q.matmul(k.swap_dims(2, 3)).div_scalar(scale);
        let attn = softmax(scores, 3);
        let heads = attn.matmul(v);
        self.output
            .forward(heads.swap_dims(1, 2).reshape([batch, nodes, embed]))
    }
}

/// Attention then feed-forward, each with a residual and normalization.
#[derive(Module, Debug)]
pub struct EncoderLayer<B: Backend> {
    attention: RotaryAttention<B>,
    attention_norm: Normalization<B>,
    feed_forward: FeedForward<B>,
    feed_forward_norm: Normalization<B>,
}

impl<B: Backend> EncoderLayer<B> {
    pub fn new(
        device: &B::Device,
        n_heads: usize,
        embedding_dim: usize,
        hidden_dim: usize,
        norm: NormKind,
    ) -> Self {
        Self {
            attention: RotaryAttention::new(device, n_heads, embedding_dim),
            attention_norm: Normalization::new(device, norm, embedding_dim),
            feed_forward: FeedForward::new(device, embedding_dim, hidden_dim),
            feed_forward_norm: Normalization::new(device, norm, embedding_dim),
        }
    }

    pub fn forward(&self, h: Tensor<B, 3>, phase: &RotaryPhase<B>) -> Tensor<B, 3> {
        let h = self
            .attention_norm
            .forward(h.clone() + self.attention.forward(h, phase));
        self.feed_forward_norm
            .forward(h.clone() + self.feed_forward.forward(h))
    }
}

/// Stack of encoder layers sharing one phase per forward pass.
#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    layers: Vec<EncoderLayer<B>>,
}

impl<B: Backend> Encoder<B> {
    pub fn new(
        device: &B::Device,
        n_layers: usize,
        n_heads: usize,
        embedding_dim: usize,
        hidden_dim: usize,
        norm: NormKind,
    ) -> Self {
        let layers = (0..n_layers)
            .map(|_| EncoderLayer::new(device, n_heads, embedding_dim, hidden_dim, norm))
            .collect();
        Self { layers }
    }

    pub fn forward(&self, h: Tensor<B, 3>, phase: &RotaryPhase<B>) -> Tensor<B, 3> {
        self.layers
            .iter()
            .fold(h, |h, layer| layer.forward(h, phase))
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}
