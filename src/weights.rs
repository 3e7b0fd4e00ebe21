//! Checkpoint loading (SafeTensors and PyTorch) and name mapping utilities.
//!
//! HuggingFace wav2vec2 checkpoints are keyed by the PyTorch module tree
//! (`wav2vec2.encoder.layers.3.attention.q_proj.weight`). These helpers
//! translate those keys into the Rust module layout used by this crate and
//! drop tensors only needed for pretraining or CTC heads.

use crate::perf::{self, Metric};
use anyhow::Result;
use burn_store::pytorch::PytorchReader;
use safetensors::{Dtype, SafeTensors};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

/// Raw tensor payload extracted from a SafeTensors file.
#[derive(Debug, Clone)]
pub struct TensorData {
    /// Scalar dtype in the file.
    pub dtype: Dtype,
    /// Shape as a list of dimensions.
    pub shape: Vec<usize>,
    /// Raw byte buffer in row-major order.
    pub data: Vec<u8>,
}

impl TensorData {
    /// Create TensorData from a safetensors TensorView.
    pub fn from_safetensor(tensor: safetensors::tensor::TensorView<'_>) -> Self {
        Self {
            dtype: tensor.dtype(),
            shape: tensor.shape().to_vec(),
            data: tensor.data().to_vec(),
        }
    }

    /// Build an f32 tensor payload (used by tests and tooling).
    pub fn from_f32(shape: Vec<usize>, values: &[f32]) -> Self {
        Self {
            dtype: Dtype::F32,
            shape,
            data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    /// Number of scalar elements.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Decode the payload to f32, widening half-precision formats.
    pub fn to_f32_vec(&self) -> Result<Vec<f32>> {
        let values: Vec<f32> = match self.dtype {
            Dtype::F32 => self
                .data
                .chunks_exact(4)
                .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .collect(),
            Dtype::F16 => self
                .data
                .chunks_exact(2)
                .map(|chunk| half::f16::from_le_bytes([chunk[0], chunk[1]]).to_f32())
                .collect(),
            Dtype::BF16 => self
                .data
                .chunks_exact(2)
                .map(|chunk| half::bf16::from_le_bytes([chunk[0], chunk[1]]).to_f32())
                .collect(),
            other => anyhow::bail!("Unsupported dtype {:?}", other),
        };
        if values.len() != self.numel() {
            anyhow::bail!(
                "Tensor payload holds {} values but shape {:?} needs {}",
                values.len(),
                self.shape,
                self.numel()
            );
        }
        Ok(values)
    }
}

/// On-disk checkpoint formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointFormat {
    /// `model.safetensors`
    SafeTensors,
    /// `pytorch_model.bin` written by `torch.save` (zip or legacy pickle).
    PyTorch,
}

impl CheckpointFormat {
    /// Pick the format from the extension, or from the leading bytes when the
    /// extension is unknown.
    pub fn detect(path: &Path) -> Result<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("safetensors") => return Ok(Self::SafeTensors),
            Some("bin" | "pt" | "pth") => return Ok(Self::PyTorch),
            _ => {}
        }
        let mut head = [0u8; 4];
        let read = File::open(path)
            .and_then(|mut file| file.read(&mut head))
            .map_err(|e| anyhow::anyhow!("Failed to read weights {}: {e}", path.display()))?;
        // Zip archive (torch >= 1.6) or a pickle protocol opcode (legacy torch.save).
        let head = &head[..read];
        if head.starts_with(b"PK\x03\x04") || head.first() == Some(&0x80) {
            Ok(Self::PyTorch)
        } else {
            Ok(Self::SafeTensors)
        }
    }
}

/// Load a sequence-classification checkpoint and map names into Rust module paths.
pub fn load_classifier_state_dict(path: impl AsRef<Path>) -> Result<HashMap<String, TensorData>> {
    let _span = perf::span(Metric::WeightsLoad);
    let path = path.as_ref();
    let tensors = match CheckpointFormat::detect(path)? {
        CheckpointFormat::SafeTensors => read_safetensors(path)?,
        CheckpointFormat::PyTorch => read_pytorch(path)?,
    };

    let mut state = HashMap::new();
    for (name, tensor) in tensors {
        if let Some(mapped) = map_checkpoint_name(&name) {
            state.insert(mapped, tensor);
        } else {
            log::debug!("Ignoring checkpoint tensor {name}");
        }
    }

    Ok(state)
}

fn read_safetensors(path: &Path) -> Result<Vec<(String, TensorData)>> {
    let bytes = fs::read(path)
        .map_err(|e| anyhow::anyhow!("Failed to read weights {}: {e}", path.display()))?;
    let tensors = SafeTensors::deserialize(&bytes)?;
    tensors
        .names()
        .into_iter()
        .map(|name| -> Result<(String, TensorData)> {
            Ok((name.clone(), TensorData::from_safetensor(tensors.tensor(name)?)))
        })
        .collect()
}

/// Read a `torch.save` state dict; every floating tensor is widened to f32.
fn read_pytorch(path: &Path) -> Result<Vec<(String, TensorData)>> {
    let reader = PytorchReader::new(path).map_err(|e| {
        anyhow::anyhow!("Failed to read PyTorch checkpoint {}: {e}", path.display())
    })?;
    reader
        .into_tensors()
        .into_iter()
        .map(|(name, snapshot)| -> Result<(String, TensorData)> {
            let data = snapshot
                .to_data()
                .map_err(|e| anyhow::anyhow!("Failed to load tensor {name}: {e}"))?;
            let shape = data.shape.clone();
            let values = data
                .convert::<f32>()
                .to_vec::<f32>()
                .map_err(|e| anyhow::anyhow!("Failed to convert tensor {name}: {e:?}"))?;
            Ok((name, TensorData::from_f32(shape, &values)))
        })
        .collect()
}

/// Map a checkpoint tensor name into a Rust module path.
fn map_checkpoint_name(name: &str) -> Option<String> {
    // Mapping rules are explicit so a missing weight is easy to trace back.
    const SKIP_EXACT: &[&str] = &["masked_spec_embed"];
    const SKIP_PREFIXES: &[&str] = &[
        "quantizer.",
        "project_q.",
        "project_hid.",
        "lm_head.",
        "adapter.",
        "dropout_features.",
    ];
    const RENAME_EXACT: &[(&str, &str)] = &[
        ("encoder.pos_conv_embed.conv.weight_g", "encoder.pos_conv.weight_g"),
        ("encoder.pos_conv_embed.conv.weight_v", "encoder.pos_conv.weight_v"),
        (
            "encoder.pos_conv_embed.conv.parametrizations.weight.original0",
            "encoder.pos_conv.weight_g",
        ),
        (
            "encoder.pos_conv_embed.conv.parametrizations.weight.original1",
            "encoder.pos_conv.weight_v",
        ),
        ("encoder.pos_conv_embed.conv.bias", "encoder.pos_conv.bias"),
    ];
    const PREFIX_MAP: &[(&str, &str)] = &[
        ("feature_extractor.conv_layers.", "feature_encoder.layers."),
        ("feature_projection.layer_norm.", "feature_projection.norm."),
        ("feature_projection.projection.", "feature_projection.projection."),
        ("encoder.layer_norm.", "encoder.norm."),
        ("encoder.layers.", "encoder.layers."),
        ("projector.", "head.projector."),
        ("classifier.", "head.classifier."),
    ];

    let name = name.strip_prefix("wav2vec2.").unwrap_or(name);
    if name == "layer_weights" {
        return Some("head.layer_weights".to_string());
    }

    if SKIP_EXACT.contains(&name) || SKIP_PREFIXES.iter().any(|prefix| name.starts_with(prefix)) {
        return None;
    }

    if let Some(mapped) = map_exact(name, RENAME_EXACT) {
        return Some(mapped);
    }

    map_prefix(name, PREFIX_MAP).map(|mapped| rename_legacy_norm(&mapped))
}

/// Apply exact-match rename rules.
fn map_exact(name: &str, rules: &[(&str, &str)]) -> Option<String> {
    rules
        .iter()
        .find(|(from, _)| *from == name)
        .map(|(_, to)| (*to).to_string())
}

/// Apply prefix-based rename rules.
fn map_prefix(name: &str, rules: &[(&str, &str)]) -> Option<String> {
    for (prefix, target) in rules {
        if let Some(rest) = name.strip_prefix(prefix) {
            return Some(format!("{target}{rest}"));
        }
    }
    None
}

/// Old fairseq exports name layer norm parameters `gamma`/`beta`.
fn rename_legacy_norm(name: &str) -> String {
    if let Some(stem) = name.strip_suffix(".gamma") {
        format!("{stem}.weight")
    } else if let Some(stem) = name.strip_suffix(".beta") {
        format!("{stem}.bias")
    } else {
        name.to_string()
    }
}
