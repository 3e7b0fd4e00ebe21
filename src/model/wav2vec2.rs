//! The wav2vec2 backbone: feature encoder, feature projection, transformer.

use crate::config::Wav2Vec2Config;
use crate::error::PipelineError;
use crate::modules::encoder::{Encoder, EncoderOutput};
use crate::modules::feature_encoder::FeatureEncoder;
use crate::modules::linear::{apply_layer_norm_3d, apply_linear_3d};
use crate::modules::params::{set_layer_norm_param, set_linear_param};
use crate::perf::{self, Metric};
use crate::weights::TensorData;
use anyhow::Result;
use burn::tensor::{backend::Backend, Tensor};
use burn_nn::{LayerNorm, LayerNormConfig, Linear, LinearConfig};

/// Layer norm then linear from conv channels to the model width.
#[derive(Debug, Clone)]
pub struct FeatureProjection<B: Backend> {
    pub norm: LayerNorm<B>,
    pub projection: Linear<B>,
}

impl<B: Backend> FeatureProjection<B> {
    fn new(config: &Wav2Vec2Config, device: &B::Device) -> Self {
        let conv_channels = config.conv_dim.last().copied().unwrap_or(config.hidden_size);
        Self {
            norm: LayerNormConfig::new(conv_channels)
                .with_epsilon(config.layer_norm_eps)
                .init::<B>(device),
            projection: LinearConfig::new(conv_channels, config.hidden_size).init::<B>(device),
        }
    }

    fn forward(&self, features: Tensor<B, 3>) -> Tensor<B, 3> {
        apply_linear_3d(&self.projection, apply_layer_norm_3d(&self.norm, features))
    }
}

#[derive(Debug, Clone)]
pub struct Wav2Vec2Model<B: Backend> {
    pub feature_encoder: FeatureEncoder<B>,
    pub feature_projection: FeatureProjection<B>,
    pub encoder: Encoder<B>,
    receptive_field: usize,
}

impl<B: Backend> Wav2Vec2Model<B> {
    pub fn new(config: &Wav2Vec2Config, device: &B::Device) -> Self {
        Self {
            feature_encoder: FeatureEncoder::new(config, device),
            feature_projection: FeatureProjection::new(config, device),
            encoder: Encoder::new(config, device),
            receptive_field: config.receptive_field(),
        }
    }

    /// Shortest input, in samples, the model accepts.
    pub fn receptive_field(&self) -> usize {
        self.receptive_field
    }

    /// Encode `[batch, samples]` into contextual frames.
    ///
    /// Inputs shorter than the receptive field produce no frames and are
    /// rejected with [`PipelineError::Inference`].
    pub fn forward(
        &self,
        input_values: Tensor<B, 2>,
        keep_hidden_states: bool,
    ) -> Result<EncoderOutput<B>> {
        let [batch, samples] = input_values.dims();
        if batch == 0 || samples == 0 {
            return Err(PipelineError::inference("input waveform is empty").into());
        }
        if samples < self.receptive_field {
            return Err(PipelineError::inference(format!(
                "input of {samples} samples is shorter than the model's receptive field of {} samples",
                self.receptive_field
            ))
            .into());
        }

        let features = {
            let _span = perf::span(Metric::FeatureEncoder);
            self.feature_encoder.forward(input_values).swap_dims(1, 2)
        };
        perf::add_count(Metric::ModelFrames, features.dims()[1] as u64);

        let _span = perf::span(Metric::Encoder);
        let hidden = self.feature_projection.forward(features);
        Ok(self.encoder.forward(hidden, keep_hidden_states))
    }

    pub fn parameter_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .feature_encoder
            .parameter_names()
            .into_iter()
            .map(|name| format!("feature_encoder.{name}"))
            .collect();
        for module in ["norm", "projection"] {
            for param in ["weight", "bias"] {
                names.push(format!("feature_projection.{module}.{param}"));
            }
        }
        names.extend(
            self.encoder
                .parameter_names()
                .into_iter()
                .map(|name| format!("encoder.{name}")),
        );
        names
    }

    /// Assign one backbone tensor. Returns false for names outside the backbone.
    pub fn load_param(&mut self, name: &str, tensor: &TensorData, device: &B::Device) -> Result<bool> {
        if let Some(rest) = name.strip_prefix("feature_encoder.") {
            return self.feature_encoder.load_param(name, rest, tensor, device);
        }
        if let Some(param) = name.strip_prefix("feature_projection.norm.") {
            return set_layer_norm_param(name, param, &mut self.feature_projection.norm, tensor, device);
        }
        if let Some(param) = name.strip_prefix("feature_projection.projection.") {
            return set_linear_param(
                name,
                param,
                &mut self.feature_projection.projection,
                tensor,
                device,
            );
        }
        if let Some(rest) = name.strip_prefix("encoder.") {
            return self.encoder.load_param(name, rest, tensor, device);
        }
        Ok(false)
    }
}
