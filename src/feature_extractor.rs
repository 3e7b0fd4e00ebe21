//! Waveform preprocessing for wav2vec2 models.

use crate::config::PreprocessorConfig;
use crate::error::PipelineError;
use crate::perf::{self, Metric};
use anyhow::Result;
use burn::tensor::{backend::Backend, Tensor, TensorData};

const NORMALIZE_EPS: f32 = 1e-7;

/// Turns a mono waveform at the model rate into the model's input tensor.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    config: PreprocessorConfig,
}

impl FeatureExtractor {
    pub fn new(config: PreprocessorConfig) -> Self {
        Self { config }
    }

    pub fn sampling_rate(&self) -> u32 {
        self.config.sampling_rate
    }

    /// Prepare `samples` recorded at `sample_rate` as a `[1, samples]` tensor.
    pub fn extract<B: Backend>(
        &self,
        samples: &[f32],
        sample_rate: u32,
        device: &B::Device,
    ) -> Result<Tensor<B, 2>> {
        if sample_rate != self.config.sampling_rate {
            anyhow::bail!(
                "Feature extractor expects {} Hz audio, got {sample_rate} Hz",
                self.config.sampling_rate
            );
        }
        if samples.is_empty() {
            return Err(PipelineError::inference("input waveform is empty").into());
        }

        let _span = perf::span(Metric::FeatureExtract);
        let values = if self.config.do_normalize {
            normalize(samples)
        } else {
            samples.to_vec()
        };
        let len = values.len();
        Ok(Tensor::from_data(TensorData::new(values, [1, len]), device))
    }
}

/// Zero mean, unit variance (population variance).
pub fn normalize(samples: &[f32]) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    let len = samples.len() as f64;
    let mean = samples.iter().map(|&v| v as f64).sum::<f64>() / len;
    let var = samples
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / len;
    let scale = 1.0 / (var + NORMALIZE_EPS as f64).sqrt();
    samples
        .iter()
        .map(|&v| ((v as f64 - mean) * scale) as f32)
        .collect()
}
