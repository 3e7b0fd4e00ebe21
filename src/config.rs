//! Configuration types for the classifier pipeline and the wav2vec2 model.
//!
//! Two files are involved: the crate's own YAML config (where the weights
//! live, how audio is preprocessed, how scores are reported) and the Hugging
//! Face `config.json` shipped with the model, which carries the architecture
//! hyperparameters and the label names.

use crate::download::download_if_necessary;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Built-in config for the pretrained gender-recognition model.
pub const DEFAULT_CONFIG_YAML: &str = include_str!("../configs/gender-recognition.yaml");

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
/// Audio preprocessing settings (mirrors the wav2vec2 feature extractor).
pub struct PreprocessorConfig {
    /// Sample rate the model was trained on.
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: u32,
    /// Normalize each input to zero mean and unit variance.
    #[serde(default = "default_true")]
    pub do_normalize: bool,
    /// Value used when padding inputs.
    #[serde(default)]
    pub padding_value: f32,
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self {
            sampling_rate: default_sampling_rate(),
            do_normalize: true,
            padding_value: 0.0,
        }
    }
}

fn default_sampling_rate() -> u32 {
    16000
}

fn default_true() -> bool {
    true
}

/// Function applied to the logits before ranking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreFunction {
    /// Probabilities over mutually exclusive labels.
    #[default]
    Softmax,
    /// Independent per-label probabilities.
    Sigmoid,
    /// Raw logits.
    None,
}

/// Top-level pipeline configuration.
///
/// Paths can be local files (relative to the YAML file), `http(s)://` URLs, or
/// HuggingFace Hub references of the form `hf://owner/repo/file[@revision]`.
///
/// # Example YAML
///
/// ```yaml
/// model_config_path: "hf://alefiury/wav2vec2-large-xlsr-53-gender-recognition-librispeech/config.json"
/// weights_path: "hf://alefiury/wav2vec2-large-xlsr-53-gender-recognition-librispeech/model.safetensors"
/// fallback_weights_path: "hf://alefiury/wav2vec2-large-xlsr-53-gender-recognition-librispeech/pytorch_model.bin"
/// preprocessor: { sampling_rate: 16000, do_normalize: true }
/// top_k: 5
/// function_to_apply: softmax
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HuggingFace `config.json` describing the model.
    pub model_config_path: String,
    /// Checkpoint: SafeTensors, or a PyTorch `pytorch_model.bin`.
    pub weights_path: String,
    /// Checkpoint tried when `weights_path` cannot be fetched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_weights_path: Option<String>,
    /// Audio preprocessing.
    #[serde(default)]
    pub preprocessor: PreprocessorConfig,
    /// Maximum number of labels reported.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Score function applied to logits.
    #[serde(default)]
    pub function_to_apply: ScoreFunction,
}

fn default_top_k() -> usize {
    5
}

impl Config {
    /// Parse a YAML config without touching the filesystem.
    pub fn from_yaml(data: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(data)?;
        if config.top_k == 0 {
            anyhow::bail!("top_k must be at least 1");
        }
        if config.preprocessor.sampling_rate == 0 {
            anyhow::bail!("preprocessor.sampling_rate must be positive");
        }
        Ok(config)
    }

    /// The config embedded in the binary.
    pub fn builtin() -> anyhow::Result<Self> {
        Self::from_yaml(DEFAULT_CONFIG_YAML)
    }

    /// Fetch and parse the referenced HuggingFace model config.
    pub fn load_model_config(&self) -> anyhow::Result<Wav2Vec2Config> {
        let path = download_if_necessary(&self.model_config_path)?;
        Wav2Vec2Config::from_json_file(path)
    }

    /// Fetch the checkpoint, trying `fallback_weights_path` if the primary is unavailable.
    pub fn fetch_weights(&self) -> anyhow::Result<PathBuf> {
        let primary = download_if_necessary(&self.weights_path)
            .with_context(|| format!("Failed to fetch weights {}", self.weights_path));
        match (primary, &self.fallback_weights_path) {
            (Ok(path), _) => Ok(path),
            (Err(err), Some(fallback)) => {
                log::warn!("{err:#}; trying {fallback}");
                download_if_necessary(fallback)
                    .with_context(|| format!("Failed to fetch weights {fallback} (after: {err:#})"))
            }
            (Err(err), None) => Err(err),
        }
    }
}

/// Load a pipeline configuration from a YAML file.
///
/// Relative local paths inside the file are resolved against its directory.
///
/// # Errors
///
/// Returns an error if the file doesn't exist or contains invalid YAML.
pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        anyhow::bail!("Config file not found: {}", path.display());
    }

    let data = fs::read_to_string(path)?;
    let mut config = Config::from_yaml(&data)?;
    config.model_config_path = resolve_relative_path(path, &config.model_config_path);
    config.weights_path = resolve_relative_path(path, &config.weights_path);
    config.fallback_weights_path = config
        .fallback_weights_path
        .map(|fallback| resolve_relative_path(path, &fallback));
    Ok(config)
}

/// Resolve a possibly relative local path against a config file location.
///
/// Remote references (`hf://`, `http://`, `https://`) are returned unchanged.
pub fn resolve_relative_path(config_path: &Path, maybe_relative: &str) -> String {
    if is_remote(maybe_relative) {
        return maybe_relative.to_string();
    }
    let candidate = Path::new(maybe_relative);
    if candidate.is_absolute() {
        return maybe_relative.to_string();
    }
    config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(candidate)
        .to_string_lossy()
        .into_owned()
}

fn is_remote(path: &str) -> bool {
    ["hf://", "http://", "https://"]
        .iter()
        .any(|scheme| path.starts_with(scheme))
}

/// Normalization applied inside the convolutional feature encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatExtractNorm {
    /// Group norm after the first convolution only.
    Group,
    /// Layer norm after every convolution.
    Layer,
}

/// Activation functions accepted in `hidden_act` / `feat_extract_activation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    #[serde(rename = "gelu")]
    Gelu,
    #[serde(rename = "gelu_new", alias = "gelu_pytorch_tanh")]
    GeluTanh,
    #[serde(rename = "relu")]
    Relu,
    #[serde(rename = "silu", alias = "swish")]
    Silu,
}

/// Wav2Vec2 hyperparameters as found in a HuggingFace `config.json`.
///
/// Keys missing from the file fall back to the HuggingFace defaults; keys this
/// crate does not use (dropout rates, masking settings, ...) are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Wav2Vec2Config {
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    pub hidden_act: Activation,
    pub layer_norm_eps: f64,
    pub feat_extract_norm: FeatExtractNorm,
    pub feat_extract_activation: Activation,
    pub conv_dim: Vec<usize>,
    pub conv_stride: Vec<usize>,
    pub conv_kernel: Vec<usize>,
    pub conv_bias: bool,
    pub num_conv_pos_embeddings: usize,
    pub num_conv_pos_embedding_groups: usize,
    pub do_stable_layer_norm: bool,
    pub classifier_proj_size: usize,
    pub use_weighted_layer_sum: bool,
    /// Label names keyed by stringified class index.
    pub id2label: HashMap<String, String>,
}

impl Default for Wav2Vec2Config {
    fn default() -> Self {
        Self {
            hidden_size: 768,
            num_hidden_layers: 12,
            num_attention_heads: 12,
            intermediate_size: 3072,
            hidden_act: Activation::Gelu,
            layer_norm_eps: 1e-5,
            feat_extract_norm: FeatExtractNorm::Group,
            feat_extract_activation: Activation::Gelu,
            conv_dim: vec![512; 7],
            conv_stride: vec![5, 2, 2, 2, 2, 2, 2],
            conv_kernel: vec![10, 3, 3, 3, 3, 2, 2],
            conv_bias: false,
            num_conv_pos_embeddings: 128,
            num_conv_pos_embedding_groups: 16,
            do_stable_layer_norm: false,
            classifier_proj_size: 256,
            use_weighted_layer_sum: false,
            id2label: (0..2)
                .map(|idx| (idx.to_string(), format!("LABEL_{idx}")))
                .collect(),
        }
    }
}

impl Wav2Vec2Config {
    /// Parse and validate a `config.json` file.
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;
        Self::from_json_str(&data)
    }

    /// Parse and validate a `config.json` payload.
    pub fn from_json_str(data: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the hyperparameters describe a buildable model.
    pub fn validate(&self) -> anyhow::Result<()> {
        let layers = self.conv_dim.len();
        if layers == 0 {
            anyhow::bail!("conv_dim must not be empty");
        }
        if self.conv_stride.len() != layers || self.conv_kernel.len() != layers {
            anyhow::bail!(
                "conv_dim, conv_stride and conv_kernel must have the same length ({} / {} / {})",
                layers,
                self.conv_stride.len(),
                self.conv_kernel.len()
            );
        }
        if self.conv_stride.contains(&0) || self.conv_kernel.contains(&0) {
            anyhow::bail!("conv_stride and conv_kernel entries must be positive");
        }
        if self.num_attention_heads == 0 || self.hidden_size % self.num_attention_heads != 0 {
            anyhow::bail!(
                "hidden_size {} is not divisible by num_attention_heads {}",
                self.hidden_size,
                self.num_attention_heads
            );
        }
        if self.num_conv_pos_embedding_groups == 0
            || self.hidden_size % self.num_conv_pos_embedding_groups != 0
        {
            anyhow::bail!(
                "hidden_size {} is not divisible by num_conv_pos_embedding_groups {}",
                self.hidden_size,
                self.num_conv_pos_embedding_groups
            );
        }
        self.labels()?;
        Ok(())
    }

    /// Label names ordered by class index.
    pub fn labels(&self) -> anyhow::Result<Vec<String>> {
        if self.id2label.is_empty() {
            anyhow::bail!("id2label must contain at least one label");
        }
        let mut labels = vec![None; self.id2label.len()];
        for (id, label) in &self.id2label {
            let idx: usize = id
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid label id {id:?} in id2label"))?;
            let slot = labels
                .get_mut(idx)
                .ok_or_else(|| anyhow::anyhow!("Label ids in id2label are not contiguous"))?;
            *slot = Some(label.clone());
        }
        labels
            .into_iter()
            .map(|label| label.ok_or_else(|| anyhow::anyhow!("Duplicate label id in id2label")))
            .collect()
    }

    /// Number of output classes.
    pub fn num_labels(&self) -> usize {
        self.id2label.len()
    }

    /// Number of frames the feature encoder produces for `input_len` samples.
    pub fn output_frames(&self, input_len: usize) -> usize {
        let mut len = input_len;
        for (&kernel, &stride) in self.conv_kernel.iter().zip(&self.conv_stride) {
            if len < kernel {
                return 0;
            }
            len = (len - kernel) / stride + 1;
        }
        len
    }

    /// Shortest input (in samples) that yields at least one frame.
    pub fn receptive_field(&self) -> usize {
        self.conv_kernel
            .iter()
            .zip(&self.conv_stride)
            .rev()
            .fold(1, |len, (&kernel, &stride)| (len - 1) * stride + kernel)
    }
}
