//! Shared test utilities: a tiny offline wav2vec2 checkpoint and WAV fixtures.
#![allow(dead_code)]

use burn::tensor::TensorData;
use burn_ndarray::NdArray;
use detect_gender::audio::io::AudioIo;
use safetensors::tensor::TensorView;
use safetensors::Dtype;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub type TestBackend = NdArray<f32>;

const FIXTURE_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

/// Load a JSON fixture from `tests/fixtures`.
pub fn read_fixture<T: for<'de> Deserialize<'de>>(name: &str) -> T {
    let path = format!("{FIXTURE_DIR}/{name}");
    let data = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("failed to read fixture {path}: {e}"));
    serde_json::from_str(&data).unwrap_or_else(|e| panic!("failed to parse fixture {path}: {e}"))
}

/// Assert two tensor data slices are element-wise close within tolerance.
pub fn assert_close(a: &TensorData, b: &TensorData, tol: f32) {
    let a_slice = a.as_slice::<f32>().expect("a slice");
    let b_slice = b.as_slice::<f32>().expect("b slice");
    assert_eq!(a_slice.len(), b_slice.len(), "tensor length mismatch");
    for (idx, (x, y)) in a_slice.iter().zip(b_slice.iter()).enumerate() {
        if (x - y).abs() > tol {
            panic!("mismatch at {idx}: {x} vs {y} (diff: {}, tol: {tol})", (x - y).abs());
        }
    }
}

/// Hugging Face style `config.json` for a two-layer classifier.
pub const TINY_MODEL_CONFIG: &str = r#"{
    "architectures": ["Wav2Vec2ForSequenceClassification"],
    "hidden_size": 16,
    "num_hidden_layers": 2,
    "num_attention_heads": 2,
    "intermediate_size": 32,
    "hidden_act": "gelu",
    "layer_norm_eps": 1e-5,
    "feat_extract_norm": "layer",
    "feat_extract_activation": "gelu",
    "conv_dim": [8, 8],
    "conv_kernel": [10, 3],
    "conv_stride": [5, 2],
    "conv_bias": true,
    "num_conv_pos_embeddings": 4,
    "num_conv_pos_embedding_groups": 2,
    "do_stable_layer_norm": true,
    "classifier_proj_size": 8,
    "use_weighted_layer_sum": false,
    "id2label": {"0": "female", "1": "male"},
    "label2id": {"female": 0, "male": 1}
}"#;

/// Shortest input the tiny model accepts.
pub const TINY_RECEPTIVE_FIELD: usize = 20;

/// Tensor names and shapes of the tiny checkpoint, in Hugging Face naming.
pub fn tiny_checkpoint_shapes() -> Vec<(String, Vec<usize>)> {
    let (hidden, conv, ffn, proj) = (16, 8, 32, 8);
    let mut shapes = vec![("wav2vec2.masked_spec_embed".to_string(), vec![hidden])];
    for (idx, (in_channels, kernel)) in [(1, 10), (conv, 3)].into_iter().enumerate() {
        let prefix = format!("wav2vec2.feature_extractor.conv_layers.{idx}");
        shapes.push((format!("{prefix}.conv.weight"), vec![conv, in_channels, kernel]));
        shapes.push((format!("{prefix}.conv.bias"), vec![conv]));
        shapes.push((format!("{prefix}.layer_norm.weight"), vec![conv]));
        shapes.push((format!("{prefix}.layer_norm.bias"), vec![conv]));
    }
    shapes.extend([
        ("wav2vec2.feature_projection.layer_norm.weight".to_string(), vec![conv]),
        ("wav2vec2.feature_projection.layer_norm.bias".to_string(), vec![conv]),
        ("wav2vec2.feature_projection.projection.weight".to_string(), vec![hidden, conv]),
        ("wav2vec2.feature_projection.projection.bias".to_string(), vec![hidden]),
        (
            "wav2vec2.encoder.pos_conv_embed.conv.parametrizations.weight.original0".to_string(),
            vec![1, 1, 4],
        ),
        (
            "wav2vec2.encoder.pos_conv_embed.conv.parametrizations.weight.original1".to_string(),
            vec![hidden, hidden / 2, 4],
        ),
        ("wav2vec2.encoder.pos_conv_embed.conv.bias".to_string(), vec![hidden]),
        ("wav2vec2.encoder.layer_norm.weight".to_string(), vec![hidden]),
        ("wav2vec2.encoder.layer_norm.bias".to_string(), vec![hidden]),
    ]);
    for layer in 0..2 {
        let prefix = format!("wav2vec2.encoder.layers.{layer}");
        for proj_name in ["q_proj", "k_proj", "v_proj", "out_proj"] {
            shapes.push((format!("{prefix}.attention.{proj_name}.weight"), vec![hidden, hidden]));
            shapes.push((format!("{prefix}.attention.{proj_name}.bias"), vec![hidden]));
        }
        for norm in ["layer_norm", "final_layer_norm"] {
            shapes.push((format!("{prefix}.{norm}.weight"), vec![hidden]));
            shapes.push((format!("{prefix}.{norm}.bias"), vec![hidden]));
        }
        shapes.push((format!("{prefix}.feed_forward.intermediate_dense.weight"), vec![ffn, hidden]));
        shapes.push((format!("{prefix}.feed_forward.intermediate_dense.bias"), vec![ffn]));
        shapes.push((format!("{prefix}.feed_forward.output_dense.weight"), vec![hidden, ffn]));
        shapes.push((format!("{prefix}.feed_forward.output_dense.bias"), vec![hidden]));
    }
    shapes.extend([
        ("projector.weight".to_string(), vec![proj, hidden]),
        ("projector.bias".to_string(), vec![proj]),
        ("classifier.weight".to_string(), vec![2, proj]),
        ("classifier.bias".to_string(), vec![2]),
    ]);
    shapes
}

/// Deterministic small values; norm scales are ones and norm shifts zeros.
fn tensor_values(name: &str, numel: usize, seed: usize) -> Vec<f32> {
    if name.ends_with("layer_norm.weight") {
        return vec![1.0; numel];
    }
    if name.ends_with("layer_norm.bias") {
        return vec![0.0; numel];
    }
    (0..numel)
        .map(|i| (((i * 7919 + seed * 104_729) % 1000) as f32 / 1000.0 - 0.5) * 0.2)
        .collect()
}

/// Write a SafeTensors file with the given HF-named shapes.
pub fn write_checkpoint(path: &Path, shapes: &[(String, Vec<usize>)]) {
    let tensors: Vec<(String, Vec<usize>, Vec<f32>)> = shapes
        .iter()
        .enumerate()
        .map(|(seed, (name, shape))| {
            let numel = shape.iter().product();
            (name.clone(), shape.clone(), tensor_values(name, numel, seed))
        })
        .collect();
    write_f32_safetensors(path, &tensors);
}

/// Write named f32 tensors as a SafeTensors file.
pub fn write_f32_safetensors(path: &Path, tensors: &[(String, Vec<usize>, Vec<f32>)]) {
    let buffers: Vec<(String, Vec<usize>, Vec<u8>)> = tensors
        .iter()
        .map(|(name, shape, values)| {
            let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
            (name.clone(), shape.clone(), bytes)
        })
        .collect();
    let views: HashMap<String, TensorView<'_>> = buffers
        .iter()
        .map(|(name, shape, bytes)| {
            let view = TensorView::new(Dtype::F32, shape.clone(), bytes).expect("tensor view");
            (name.clone(), view)
        })
        .collect();
    let data = safetensors::serialize(&views, &None).expect("serialize checkpoint");
    std::fs::write(path, data).expect("write checkpoint");
}

/// Write config.json, model.safetensors and pipeline.yaml into `dir`.
///
/// Returns the YAML path to pass as `--config`.
pub fn write_tiny_model(dir: &Path) -> PathBuf {
    std::fs::write(dir.join("config.json"), TINY_MODEL_CONFIG).expect("write config.json");
    write_checkpoint(&dir.join("model.safetensors"), &tiny_checkpoint_shapes());
    let yaml = dir.join("pipeline.yaml");
    std::fs::write(
        &yaml,
        "model_config_path: config.json\n\
         weights_path: model.safetensors\n\
         preprocessor:\n  sampling_rate: 16000\n  do_normalize: true\n\
         top_k: 5\n\
         function_to_apply: softmax\n",
    )
    .expect("write pipeline.yaml");
    yaml
}

/// A sine tone, identical on every channel.
pub fn tone(seconds: f32, sample_rate: u32, channels: usize) -> Vec<Vec<f32>> {
    let len = (seconds * sample_rate as f32) as usize;
    let channel: Vec<f32> = (0..len)
        .map(|i| 0.4 * (2.0 * std::f32::consts::PI * 180.0 * i as f32 / sample_rate as f32).sin())
        .collect();
    vec![channel; channels]
}

/// Write a 16-bit WAV file and return its path.
pub fn write_wav(dir: &Path, name: &str, samples: &[Vec<f32>], sample_rate: u32) -> PathBuf {
    let path = dir.join(name);
    AudioIo::write_wav(&path, samples, sample_rate).expect("write wav");
    path
}
