//! Actor network: embedder, rotary encoder and two-stage decoder

use burn::module::Module;
use burn::prelude::*;
use rand::Rng;

use crate::problem::{Action, Problem};

use super::decoder::{
    ActionHistory, DecodeOptions, Decision, Decoder, ReinsertionStrategy, RemovalStrategy,
    StepContext,
};
use super::embedder::FeatureEmbedder;
use super::encoder::Encoder;
use super::layers::NormKind;

/// Configuration for the actor
#[derive(Debug, Config)]
pub struct ActorConfig {
    /// Width of node embeddings
    pub embedding_dim: usize,
    /// Hidden width of the encoder feed-forward sublayers
    pub hidden_dim: usize,
    /// Attention heads per encoder layer
    pub n_heads_actor: usize,
    /// Number of encoder layers
    pub n_encode_layers: usize,
    /// Normalization used inside the encoder
    pub normalization: NormKind,
    /// Logits are squashed to `[-v_range, v_range]`
    pub v_range: f64,
    /// Heads of the reinsertion compatibility scores
    pub compat_heads: usize,
    /// Raw feature width per node
    pub node_dim: usize,
    pub removal: RemovalStrategy,
    pub reinsertion: ReinsertionStrategy,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            embedding_dim: 128,
            hidden_dim: 128,
            n_heads_actor: 1,
            n_encode_layers: 3,
            normalization: NormKind::Layer,
            v_range: 6.0,
            compat_heads: 4,
            node_dim: 2,
            removal: RemovalStrategy::Learned,
            reinsertion: ReinsertionStrategy::Learned,
        }
    }
}

impl ActorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Actor<B> {
        Actor::new(device, self)
    }
}

/// The policy: embeds the current tours, encodes them and decodes one
/// remove/reinsert action per instance.
#[derive(Module, Debug)]
pub struct Actor<B: Backend> {
    embedder: FeatureEmbedder<B>,
    encoder: Encoder<B>,
    decoder: Decoder<B>,
}

impl<B: Backend> Actor<B> {
    pub fn new(device: &B::Device, config: &ActorConfig) -> Self {
        let actor = Self {
            embedder: FeatureEmbedder::new(device, config.node_dim, config.embedding_dim),
            encoder: Encoder::new(
                device,
                config.n_encode_layers,
                config.n_heads_actor,
                config.embedding_dim,
                config.hidden_dim,
                config.normalization,
            ),
            decoder: Decoder::new(
                device,
                config.embedding_dim,
                config.compat_heads,
                config.v_range,
                config.removal,
                config.reinsertion,
            ),
        };
        tracing::debug!(
            "Actor: {} encoder layers, {} parameters",
            actor.encoder.num_layers(),
            actor.num_params()
        );
        actor
    }

    /// Contextual node embeddings for the current tours, `[batch, n, embed]`
    pub fn encode<P: Problem>(&self, ctx: &StepContext<'_, P>, features: Tensor<B, 3>) -> Tensor<B, 3> {
        let (h, phase) = self.embedder.forward(features, ctx.tours, &ctx.info);
        self.encoder.forward(h, &phase)
    }

    /// One decoding step. Also returns the encoder output so callers can
    /// feed it to the critic.
    pub fn forward<P: Problem>(
        &self,
        ctx: &StepContext<'_, P>,
        features: Tensor<B, 3>,
        history: &mut ActionHistory,
        options: &DecodeOptions,
        fixed: Option<&[Action]>,
        rng: &mut impl Rng,
    ) -> crate::Result<(Decision<B>, Tensor<B, 3>)> {
        let h = self.encode(ctx, features);
        let decision = self
            .decoder
            .forward(ctx, h.clone(), history, options, fixed, rng)?;
        Ok((decision, h))
    }

    pub fn decoder(&self) -> &Decoder<B> {
        &self.decoder
    }
}
