//! Neural network building blocks for wav2vec2.
//!
//! Everything here is a plain struct of burn tensors/layers with an explicit
//! `forward` and a `load_param` hook used when importing checkpoints.

pub mod encoder;
pub mod feature_encoder;
pub mod linear;
pub mod params;
pub mod positional_conv;
