//! Transformer encoder of wav2vec2.
//!
//! Two layouts exist in released checkpoints. Base models use post-norm
//! layers with a layer norm in front of the stack; large "stable" models
//! (`do_stable_layer_norm`) use pre-norm layers and normalize at the end.

use crate::config::{Activation, Wav2Vec2Config};
use crate::modules::linear::{apply_layer_norm_3d, apply_linear_3d, merge_heads, split_heads};
use crate::modules::params::{activate, set_layer_norm_param, set_linear_param};
use crate::modules::positional_conv::PositionalConv;
use crate::weights::TensorData;
use anyhow::Result;
use burn::tensor::{backend::Backend, module::attention, Tensor};
use burn_nn::{LayerNorm, LayerNormConfig, Linear, LinearConfig};

/// Bidirectional multi-head self-attention.
#[derive(Debug, Clone)]
pub struct SelfAttention<B: Backend> {
    pub q_proj: Linear<B>,
    pub k_proj: Linear<B>,
    pub v_proj: Linear<B>,
    pub out_proj: Linear<B>,
    pub num_heads: usize,
}

impl<B: Backend> SelfAttention<B> {
    fn new(config: &Wav2Vec2Config, device: &B::Device) -> Self {
        let proj = || LinearConfig::new(config.hidden_size, config.hidden_size).init::<B>(device);
        Self {
            q_proj: proj(),
            k_proj: proj(),
            v_proj: proj(),
            out_proj: proj(),
            num_heads: config.num_attention_heads,
        }
    }

    fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        let q = split_heads(apply_linear_3d(&self.q_proj, input.clone()), self.num_heads);
        let k = split_heads(apply_linear_3d(&self.k_proj, input.clone()), self.num_heads);
        let v = split_heads(apply_linear_3d(&self.v_proj, input), self.num_heads);
        let attended = attention(q, k, v, None);
        apply_linear_3d(&self.out_proj, merge_heads(attended))
    }

    fn projection_mut(&mut self, name: &str) -> Option<&mut Linear<B>> {
        match name {
            "q_proj" => Some(&mut self.q_proj),
            "k_proj" => Some(&mut self.k_proj),
            "v_proj" => Some(&mut self.v_proj),
            "out_proj" => Some(&mut self.out_proj),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedForward<B: Backend> {
    pub intermediate_dense: Linear<B>,
    pub output_dense: Linear<B>,
    pub activation: Activation,
}

impl<B: Backend> FeedForward<B> {
    fn new(config: &Wav2Vec2Config, device: &B::Device) -> Self {
        Self {
            intermediate_dense: LinearConfig::new(config.hidden_size, config.intermediate_size)
                .init::<B>(device),
            output_dense: LinearConfig::new(config.intermediate_size, config.hidden_size)
                .init::<B>(device),
            activation: config.hidden_act,
        }
    }

    fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        let hidden = apply_linear_3d(&self.intermediate_dense, input);
        let hidden = activate(hidden, self.activation);
        apply_linear_3d(&self.output_dense, hidden)
    }
}

/// One encoder layer. Parameter names follow the checkpoint layout.
#[derive(Debug, Clone)]
pub struct EncoderLayer<B: Backend> {
    pub attention: SelfAttention<B>,
    pub layer_norm: LayerNorm<B>,
    pub feed_forward: FeedForward<B>,
    pub final_layer_norm: LayerNorm<B>,
    pub pre_norm: bool,
}

impl<B: Backend> EncoderLayer<B> {
    fn new(config: &Wav2Vec2Config, device: &B::Device) -> Self {
        Self {
            attention: SelfAttention::new(config, device),
            layer_norm: layer_norm(config, device),
            feed_forward: FeedForward::new(config, device),
            final_layer_norm: layer_norm(config, device),
            pre_norm: config.do_stable_layer_norm,
        }
    }

    pub fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        if self.pre_norm {
            let normalized = apply_layer_norm_3d(&self.layer_norm, input.clone());
            let hidden = input.add(self.attention.forward(normalized));
            let ffn_input = apply_layer_norm_3d(&self.final_layer_norm, hidden.clone());
            hidden.add(self.feed_forward.forward(ffn_input))
        } else {
            let hidden = input.clone().add(self.attention.forward(input));
            let hidden = apply_layer_norm_3d(&self.layer_norm, hidden);
            let hidden = hidden.clone().add(self.feed_forward.forward(hidden));
            apply_layer_norm_3d(&self.final_layer_norm, hidden)
        }
    }

    fn load_param(
        &mut self,
        name: &str,
        tail: &[&str],
        tensor: &TensorData,
        device: &B::Device,
    ) -> Result<bool> {
        match tail {
            ["attention", proj, param] => match self.attention.projection_mut(proj) {
                Some(linear) => set_linear_param(name, param, linear, tensor, device),
                None => Ok(false),
            },
            ["layer_norm", param] => set_layer_norm_param(name, param, &mut self.layer_norm, tensor, device),
            ["final_layer_norm", param] => {
                set_layer_norm_param(name, param, &mut self.final_layer_norm, tensor, device)
            }
            ["feed_forward", "intermediate_dense", param] => set_linear_param(
                name,
                param,
                &mut self.feed_forward.intermediate_dense,
                tensor,
                device,
            ),
            ["feed_forward", "output_dense", param] => set_linear_param(
                name,
                param,
                &mut self.feed_forward.output_dense,
                tensor,
                device,
            ),
            _ => Ok(false),
        }
    }
}

fn layer_norm<B: Backend>(config: &Wav2Vec2Config, device: &B::Device) -> LayerNorm<B> {
    LayerNormConfig::new(config.hidden_size)
        .with_epsilon(config.layer_norm_eps)
        .init::<B>(device)
}

/// Encoder output: the last hidden state, plus every intermediate state when requested.
#[derive(Debug, Clone)]
pub struct EncoderOutput<B: Backend> {
    /// `[batch, frames, hidden]`
    pub last_hidden_state: Tensor<B, 3>,
    /// `num_layers + 1` states: the layer inputs followed by the final output.
    pub hidden_states: Option<Vec<Tensor<B, 3>>>,
}

#[derive(Debug, Clone)]
pub struct Encoder<B: Backend> {
    pub pos_conv: PositionalConv<B>,
    pub norm: LayerNorm<B>,
    pub layers: Vec<EncoderLayer<B>>,
    pub pre_norm: bool,
}

impl<B: Backend> Encoder<B> {
    pub fn new(config: &Wav2Vec2Config, device: &B::Device) -> Self {
        Self {
            pos_conv: PositionalConv::new(config, device),
            norm: layer_norm(config, device),
            layers: (0..config.num_hidden_layers)
                .map(|_| EncoderLayer::new(config, device))
                .collect(),
            pre_norm: config.do_stable_layer_norm,
        }
    }

    /// Run the stack over projected features `[batch, frames, hidden]`.
    pub fn forward(&self, input: Tensor<B, 3>, keep_hidden_states: bool) -> EncoderOutput<B> {
        let mut hidden = input.clone().add(self.pos_conv.forward(input));
        if !self.pre_norm {
            hidden = apply_layer_norm_3d(&self.norm, hidden);
        }

        let mut states = keep_hidden_states.then(|| Vec::with_capacity(self.layers.len() + 1));
        for layer in &self.layers {
            if let Some(states) = states.as_mut() {
                states.push(hidden.clone());
            }
            hidden = layer.forward(hidden);
        }

        if self.pre_norm {
            hidden = apply_layer_norm_3d(&self.norm, hidden);
        }
        if let Some(states) = states.as_mut() {
            states.push(hidden.clone());
        }

        EncoderOutput {
            last_hidden_state: hidden,
            hidden_states: states,
        }
    }

    pub fn parameter_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .pos_conv
            .parameter_names()
            .into_iter()
            .map(|param| format!("pos_conv.{param}"))
            .collect();
        names.extend(["norm.weight".to_string(), "norm.bias".to_string()]);
        for idx in 0..self.layers.len() {
            for proj in ["q_proj", "k_proj", "v_proj", "out_proj"] {
                for param in ["weight", "bias"] {
                    names.push(format!("layers.{idx}.attention.{proj}.{param}"));
                }
            }
            for module in [
                "layer_norm",
                "final_layer_norm",
                "feed_forward.intermediate_dense",
                "feed_forward.output_dense",
            ] {
                for param in ["weight", "bias"] {
                    names.push(format!("layers.{idx}.{module}.{param}"));
                }
            }
        }
        names
    }

    /// Assign one checkpoint tensor named relative to this module.
    pub fn load_param(
        &mut self,
        name: &str,
        rest: &str,
        tensor: &TensorData,
        device: &B::Device,
    ) -> Result<bool> {
        if let Some(param) = rest.strip_prefix("pos_conv.") {
            return self.pos_conv.load_param(name, param, tensor, device);
        }
        if let Some(param) = rest.strip_prefix("norm.") {
            return set_layer_norm_param(name, param, &mut self.norm, tensor, device);
        }
        let Some(rest) = rest.strip_prefix("layers.") else {
            return Ok(false);
        };
        let mut parts = rest.split('.');
        let idx: usize = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("missing encoder layer index in {name}"))?
            .parse()?;
        let layer = self
            .layers
            .get_mut(idx)
            .ok_or_else(|| anyhow::anyhow!("invalid encoder layer index {idx} in {name}"))?;
        let tail: Vec<&str> = parts.collect();
        layer.load_param(name, &tail, tensor, device)
    }
}
