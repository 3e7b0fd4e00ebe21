//! Convolutional feature encoder: raw waveform to latent frames.
//!
//! A stack of strided 1D convolutions turns 16 kHz samples into 512-channel
//! frames at roughly 50 Hz. Checkpoints come in two flavours: group norm after
//! the first convolution only (`feat_extract_norm = "group"`), or layer norm
//! over channels after every convolution (`"layer"`).

use crate::config::{Activation, FeatExtractNorm, Wav2Vec2Config};
use crate::modules::params::{activate, replace_tensor, set_layer_norm_param};
use crate::weights::TensorData;
use anyhow::Result;
use burn::tensor::{
    backend::Backend, module::conv1d, ops::ConvOptions, Distribution, Tensor,
};
use burn_nn::{LayerNorm, LayerNormConfig};

const CONV_NORM_EPS: f32 = 1e-5;

/// Per-channel normalization over time (a group norm with one channel per group).
#[derive(Debug, Clone)]
pub struct ChannelGroupNorm<B: Backend> {
    pub weight: Tensor<B, 1>,
    pub bias: Tensor<B, 1>,
    pub epsilon: f32,
}

impl<B: Backend> ChannelGroupNorm<B> {
    pub fn new(channels: usize, device: &B::Device) -> Self {
        Self {
            weight: Tensor::ones([channels], device),
            bias: Tensor::zeros([channels], device),
            epsilon: CONV_NORM_EPS,
        }
    }

    /// Normalize `[batch, channels, time]` along time.
    pub fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        let channels = self.weight.dims()[0];
        let mean = input.clone().mean_dim(2);
        let centered = input.sub(mean);
        let var = centered.clone().powf_scalar(2.0).mean_dim(2);
        let normalized = centered.div(var.add_scalar(self.epsilon).sqrt());
        let weight = self.weight.clone().reshape([1, channels, 1]);
        let bias = self.bias.clone().reshape([1, channels, 1]);
        normalized.mul(weight).add(bias)
    }
}

/// Normalization following a feature-encoder convolution.
#[derive(Debug, Clone)]
pub enum ConvNorm<B: Backend> {
    None,
    Group(ChannelGroupNorm<B>),
    Layer(LayerNorm<B>),
}

/// One convolution block of the feature encoder.
#[derive(Debug, Clone)]
pub struct FeatureEncoderLayer<B: Backend> {
    /// `[out_channels, in_channels, kernel]`
    pub weight: Tensor<B, 3>,
    pub bias: Option<Tensor<B, 1>>,
    pub stride: usize,
    pub norm: ConvNorm<B>,
    pub activation: Activation,
}

impl<B: Backend> FeatureEncoderLayer<B> {
    fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        norm: ConvNorm<B>,
        config: &Wav2Vec2Config,
        device: &B::Device,
    ) -> Self {
        let std = (1.0 / (in_channels * kernel) as f64).sqrt();
        Self {
            weight: Tensor::random(
                [out_channels, in_channels, kernel],
                Distribution::Normal(0.0, std),
                device,
            ),
            bias: config.conv_bias.then(|| Tensor::zeros([out_channels], device)),
            stride,
            norm,
            activation: config.feat_extract_activation,
        }
    }

    /// `[batch, in_channels, time]` -> `[batch, out_channels, frames]`.
    pub fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        let hidden = conv1d(
            input,
            self.weight.clone(),
            self.bias.clone(),
            ConvOptions::new([self.stride], [0], [1], 1),
        );
        let hidden = match &self.norm {
            ConvNorm::None => hidden,
            ConvNorm::Group(norm) => norm.forward(hidden),
            ConvNorm::Layer(norm) => norm.forward(hidden.swap_dims(1, 2)).swap_dims(1, 2),
        };
        activate(hidden, self.activation)
    }
}

/// The full convolution stack.
#[derive(Debug, Clone)]
pub struct FeatureEncoder<B: Backend> {
    pub layers: Vec<FeatureEncoderLayer<B>>,
}

impl<B: Backend> FeatureEncoder<B> {
    pub fn new(config: &Wav2Vec2Config, device: &B::Device) -> Self {
        let mut layers = Vec::with_capacity(config.conv_dim.len());
        let mut in_channels = 1;
        for (idx, ((&out_channels, &kernel), &stride)) in config
            .conv_dim
            .iter()
            .zip(&config.conv_kernel)
            .zip(&config.conv_stride)
            .enumerate()
        {
            let norm = match config.feat_extract_norm {
                FeatExtractNorm::Layer => ConvNorm::Layer(
                    LayerNormConfig::new(out_channels)
                        .with_epsilon(CONV_NORM_EPS as f64)
                        .init::<B>(device),
                ),
                FeatExtractNorm::Group if idx == 0 => {
                    ConvNorm::Group(ChannelGroupNorm::new(out_channels, device))
                }
                FeatExtractNorm::Group => ConvNorm::None,
            };
            layers.push(FeatureEncoderLayer::new(
                in_channels,
                out_channels,
                kernel,
                stride,
                norm,
                config,
                device,
            ));
            in_channels = out_channels;
        }
        Self { layers }
    }

    /// `[batch, samples]` -> `[batch, channels, frames]`.
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 3> {
        let mut hidden = input.unsqueeze_dim::<3>(1);
        for layer in &self.layers {
            hidden = layer.forward(hidden);
        }
        hidden
    }

    /// Checkpoint names this module expects, relative to its prefix.
    pub fn parameter_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for (idx, layer) in self.layers.iter().enumerate() {
            names.push(format!("layers.{idx}.conv.weight"));
            if layer.bias.is_some() {
                names.push(format!("layers.{idx}.conv.bias"));
            }
            if !matches!(layer.norm, ConvNorm::None) {
                names.push(format!("layers.{idx}.layer_norm.weight"));
                names.push(format!("layers.{idx}.layer_norm.bias"));
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
        let mut parts = rest.split('.');
        if parts.next() != Some("layers") {
            return Ok(false);
        }
        let idx: usize = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("missing conv layer index in {name}"))?
            .parse()?;
        let layer = self
            .layers
            .get_mut(idx)
            .ok_or_else(|| anyhow::anyhow!("invalid conv layer index {idx} in {name}"))?;
        let tail: Vec<&str> = parts.collect();
        match (&mut layer.norm, tail.as_slice()) {
            (_, ["conv", "weight"]) => {
                layer.weight = replace_tensor(name, &layer.weight, tensor, device)?;
            }
            (_, ["conv", "bias"]) => {
                let Some(bias) = layer.bias.as_ref() else {
                    return Ok(false);
                };
                let loaded = replace_tensor(name, bias, tensor, device)?;
                layer.bias = Some(loaded);
            }
            (ConvNorm::Layer(norm), ["layer_norm", param]) => {
                return set_layer_norm_param(name, param, norm, tensor, device);
            }
            (ConvNorm::Group(norm), ["layer_norm", "weight"]) => {
                norm.weight = replace_tensor(name, &norm.weight, tensor, device)?;
            }
            (ConvNorm::Group(norm), ["layer_norm", "bias"]) => {
                norm.bias = replace_tensor(name, &norm.bias, tensor, device)?;
            }
            _ => return Ok(false),
        }
        Ok(true)
    }
}
