//! # detect-gender - speaker gender classification from audio files
//!
//! A small inference stack around a wav2vec2 sequence-classification model
//! (by default `alefiury/wav2vec2-large-xlsr-53-gender-recognition-librispeech`),
//! running on burn.
//!
//! ## Pipeline
//!
//! 1. **Decoding** ([`audio::io::AudioIo`]): any container/codec symphonia
//!    understands, downmixed to mono.
//! 2. **Preprocessing**: resampling to the model rate and zero-mean /
//!    unit-variance normalization ([`feature_extractor::FeatureExtractor`]).
//! 3. **Model** ([`model::Wav2Vec2ForSequenceClassification`]): convolutional
//!    feature encoder, transformer encoder, mean-pooled classification head.
//! 4. **Postprocessing**: softmax, ranking and top-k ([`pipeline::rank`]).
//!
//! ## Quick Start
//!
//! ```no_run
//! use burn_ndarray::{NdArray, NdArrayDevice};
//! use detect_gender::{AudioClassificationPipeline, Config};
//!
//! let config = Config::builtin().unwrap();
//! let device = NdArrayDevice::default();
//! let pipeline =
//!     AudioClassificationPipeline::<NdArray<f32>>::from_config(&config, &device).unwrap();
//! for result in pipeline.classify_path("speech.wav").unwrap() {
//!     println!("{}: {:.3}", result.label, result.score);
//! }
//! ```
//!
//! ## Configuration
//!
//! Pipelines are configured via YAML files that point at a Hugging Face
//! `config.json` and a SafeTensors checkpoint. Both can be local files,
//! `http(s)://` URLs, or `hf://owner/repo/file` references fetched through the
//! Hub cache. See [`Config`].

pub mod audio;
pub mod config;
pub mod download;
pub mod error;
pub mod feature_extractor;
pub mod perf;
pub mod pipeline;

// Internal modules - exposed for integration tests but not part of stable API.
#[doc(hidden)]
pub mod model;
#[doc(hidden)]
pub mod modules;
#[doc(hidden)]
pub mod weights;

pub use config::{load_config, Config, Wav2Vec2Config};
pub use download::download_if_necessary;
pub use error::PipelineError;
pub use pipeline::{AudioClassificationPipeline, Classification};
