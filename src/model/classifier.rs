//! Sequence classification head on top of the wav2vec2 backbone.
//!
//! Frames are projected to `classifier_proj_size`, mean pooled over time and
//! mapped to one logit per label. Checkpoints trained with
//! `use_weighted_layer_sum` pool a softmax-weighted mix of every hidden state
//! instead of the last one.

use crate::config::Wav2Vec2Config;
use crate::model::wav2vec2::Wav2Vec2Model;
use crate::modules::linear::apply_linear_3d;
use crate::modules::params::{replace_tensor, set_linear_param};
use crate::perf::{self, Metric};
use crate::weights::TensorData;
use anyhow::Result;
use burn::tensor::{activation::softmax, backend::Backend, Tensor};
use burn_nn::{Linear, LinearConfig};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct Wav2Vec2ForSequenceClassification<B: Backend> {
    pub wav2vec2: Wav2Vec2Model<B>,
    pub projector: Linear<B>,
    pub classifier: Linear<B>,
    /// Mixing weights over `num_hidden_layers + 1` states, when enabled.
    pub layer_weights: Option<Tensor<B, 1>>,
    num_labels: usize,
}

impl<B: Backend> Wav2Vec2ForSequenceClassification<B> {
    /// Build a randomly initialized model; call [`Self::load_state_dict`] to import weights.
    pub fn from_config(config: &Wav2Vec2Config, device: &B::Device) -> Result<Self> {
        config.validate()?;
        let num_labels = config.num_labels();
        let num_states = config.num_hidden_layers + 1;
        Ok(Self {
            wav2vec2: Wav2Vec2Model::new(config, device),
            projector: LinearConfig::new(config.hidden_size, config.classifier_proj_size)
                .init::<B>(device),
            classifier: LinearConfig::new(config.classifier_proj_size, num_labels).init::<B>(device),
            layer_weights: config
                .use_weighted_layer_sum
                .then(|| Tensor::ones([num_states], device).div_scalar(num_states as f32)),
            num_labels,
        })
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    /// Shortest input, in samples, the model accepts.
    pub fn min_input_len(&self) -> usize {
        self.wav2vec2.receptive_field()
    }

    /// Compute logits `[batch, num_labels]` for normalized input `[batch, samples]`.
    pub fn forward(&self, input_values: Tensor<B, 2>) -> Result<Tensor<B, 2>> {
        let output = self
            .wav2vec2
            .forward(input_values, self.layer_weights.is_some())?;

        let _span = perf::span(Metric::ClassifierHead);
        let hidden = match (&self.layer_weights, output.hidden_states) {
            (Some(weights), Some(states)) => {
                let num_states = states.len();
                let [batch, frames, width] = output.last_hidden_state.dims();
                let stacked: Tensor<B, 4> = Tensor::stack(states, 0);
                let weights = softmax(weights.clone(), 0).reshape([num_states, 1, 1, 1]);
                stacked
                    .mul(weights)
                    .sum_dim(0)
                    .reshape([batch, frames, width])
            }
            _ => output.last_hidden_state,
        };

        let projected = apply_linear_3d(&self.projector, hidden);
        let [batch, _, width] = projected.dims();
        let pooled = projected.mean_dim(1).reshape([batch, width]);
        Ok(self.classifier.forward(pooled))
    }

    /// Every checkpoint name the model expects, in loader naming.
    pub fn parameter_names(&self) -> Vec<String> {
        let mut names = self.wav2vec2.parameter_names();
        for module in ["projector", "classifier"] {
            for param in ["weight", "bias"] {
                names.push(format!("head.{module}.{param}"));
            }
        }
        if self.layer_weights.is_some() {
            names.push("head.layer_weights".to_string());
        }
        names
    }

    /// Import a mapped state dict (see [`crate::weights::load_classifier_state_dict`]).
    ///
    /// Shape mismatches are errors. Parameters absent from the checkpoint keep
    /// their initial values and are reported as a warning; a checkpoint that
    /// matches nothing at all is rejected.
    pub fn load_state_dict(
        &mut self,
        state: &HashMap<String, TensorData>,
        device: &B::Device,
    ) -> Result<()> {
        let mut loaded = HashSet::new();
        for (name, tensor) in state {
            if self.load_param(name, tensor, device)? {
                loaded.insert(name.as_str());
            } else {
                log::debug!("Unused checkpoint tensor {name}");
            }
        }

        if loaded.is_empty() {
            anyhow::bail!("Checkpoint does not contain any wav2vec2 classifier weights");
        }
        let missing: Vec<String> = self
            .parameter_names()
            .into_iter()
            .filter(|name| !loaded.contains(name.as_str()))
            .collect();
        if !missing.is_empty() {
            log::warn!(
                "{} model parameters missing from checkpoint, keeping initial values: {}",
                missing.len(),
                missing.join(", ")
            );
        }
        log::info!("Loaded {} checkpoint tensors", loaded.len());
        Ok(())
    }

    fn load_param(&mut self, name: &str, tensor: &TensorData, device: &B::Device) -> Result<bool> {
        if let Some(param) = name.strip_prefix("head.projector.") {
            return set_linear_param(name, param, &mut self.projector, tensor, device);
        }
        if let Some(param) = name.strip_prefix("head.classifier.") {
            return set_linear_param(name, param, &mut self.classifier, tensor, device);
        }
        if name == "head.layer_weights" {
            return match &self.layer_weights {
                Some(current) => {
                    let weights = replace_tensor(name, current, tensor, device)?;
                    self.layer_weights = Some(weights);
                    Ok(true)
                }
                None => Ok(false),
            };
        }
        self.wav2vec2.load_param(name, tensor, device)
    }
}
