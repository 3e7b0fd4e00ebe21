//! Audio classification pipeline.
//!
//! Owns the model and everything around it: resampling to the model rate,
//! feature extraction, the forward pass and turning logits into ranked
//! `(label, score)` pairs.

use crate::audio::io::AudioIo;
use crate::audio::resample::AudioResampler;
use crate::config::{load_config, Config, PreprocessorConfig, ScoreFunction};
use crate::feature_extractor::FeatureExtractor;
use crate::model::Wav2Vec2ForSequenceClassification;
use crate::perf::{self, Metric};
use crate::weights::load_classifier_state_dict;
use anyhow::{Context, Result};
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One ranked label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: String,
    pub score: f32,
}

#[derive(Debug)]
pub struct AudioClassificationPipeline<B: Backend> {
    model: Wav2Vec2ForSequenceClassification<B>,
    labels: Vec<String>,
    feature_extractor: FeatureExtractor,
    top_k: usize,
    function_to_apply: ScoreFunction,
    device: B::Device,
}

impl<B: Backend> AudioClassificationPipeline<B> {
    /// Assemble a pipeline from an already-built model.
    pub fn new(
        model: Wav2Vec2ForSequenceClassification<B>,
        labels: Vec<String>,
        preprocessor: PreprocessorConfig,
        top_k: usize,
        function_to_apply: ScoreFunction,
        device: B::Device,
    ) -> Result<Self> {
        if labels.len() != model.num_labels() {
            anyhow::bail!(
                "Model has {} outputs but {} labels were given",
                model.num_labels(),
                labels.len()
            );
        }
        if top_k == 0 {
            anyhow::bail!("top_k must be at least 1");
        }
        Ok(Self {
            model,
            labels,
            feature_extractor: FeatureExtractor::new(preprocessor),
            top_k,
            function_to_apply,
            device,
        })
    }

    /// Load a pipeline from a YAML config file.
    pub fn from_config_path(path: impl AsRef<Path>, device: &B::Device) -> Result<Self> {
        let path = path.as_ref();
        let config = load_config(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?;
        Self::from_config(&config, device)
    }

    /// Build the model described by `config` and load its weights.
    pub fn from_config(config: &Config, device: &B::Device) -> Result<Self> {
        let _span = perf::span(Metric::PipelineLoad);
        let model_config = config
            .load_model_config()
            .with_context(|| format!("Failed to load model config {}", config.model_config_path))?;
        let labels = model_config.labels()?;
        let mut model = Wav2Vec2ForSequenceClassification::from_config(&model_config, device)?;

        let weights_path = config.fetch_weights()?;
        let state = load_classifier_state_dict(&weights_path)
            .with_context(|| format!("Failed to read weights {}", weights_path.display()))?;
        model.load_state_dict(&state, device)?;

        Self::new(
            model,
            labels,
            config.preprocessor.clone(),
            config.top_k,
            config.function_to_apply,
            device.clone(),
        )
    }

    /// Label names ordered by class index.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Maximum number of results returned (before clipping to the label count).
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Sample rate the model expects.
    pub fn sampling_rate(&self) -> u32 {
        self.feature_extractor.sampling_rate()
    }

    /// Classify a mono waveform recorded at `sample_rate`.
    pub fn classify_samples(&self, samples: &[f32], sample_rate: u32) -> Result<Vec<Classification>> {
        let _span = perf::span(Metric::PipelineClassify);
        let target_rate = self.sampling_rate();
        let samples = if sample_rate == target_rate {
            samples.to_vec()
        } else {
            log::info!("Resampling from {sample_rate} Hz to {target_rate} Hz");
            AudioResampler::resample_mono(samples.to_vec(), sample_rate, target_rate)?
        };

        let input = self
            .feature_extractor
            .extract::<B>(&samples, target_rate, &self.device)?;
        let logits = self
            .model
            .forward(input)?
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("Failed to read logits: {e:?}"))?;
        log::debug!("Logits: {logits:?}");

        Ok(rank(&logits, &self.labels, self.function_to_apply, self.top_k))
    }

    /// Decode an audio file, downmix it and classify it.
    pub fn classify_path(&self, path: impl AsRef<Path>) -> Result<Vec<Classification>> {
        let (samples, sample_rate) = AudioIo::read_mono(path)?;
        self.classify_samples(&samples, sample_rate)
    }
}

/// Apply the score function, sort by descending score and keep `top_k`.
pub fn rank(
    logits: &[f32],
    labels: &[String],
    function_to_apply: ScoreFunction,
    top_k: usize,
) -> Vec<Classification> {
    let scores = match function_to_apply {
        ScoreFunction::Softmax => softmax(logits),
        ScoreFunction::Sigmoid => logits.iter().map(|&v| 1.0 / (1.0 + (-v).exp())).collect(),
        ScoreFunction::None => logits.to_vec(),
    };
    let mut ranked: Vec<Classification> = labels
        .iter()
        .zip(scores)
        .map(|(label, score)| Classification {
            label: label.clone(),
            score,
        })
        .collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked.truncate(top_k);
    ranked
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / sum).collect()
}
