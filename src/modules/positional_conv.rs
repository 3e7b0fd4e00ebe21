//! Convolutional relative positional embedding.
//!
//! wav2vec2 has no positional table; instead a wide grouped convolution over
//! the hidden states is added back to them. The kernel is stored weight
//! normalized (`w = g * v / ||v||`, norm taken per kernel tap) and fused on
//! every forward.

use crate::config::{Activation, Wav2Vec2Config};
use crate::modules::params::{activate, replace_tensor};
use crate::weights::TensorData;
use anyhow::Result;
use burn::tensor::{
    backend::Backend, module::conv1d, ops::ConvOptions, Distribution, Tensor,
};

#[derive(Debug, Clone)]
pub struct PositionalConv<B: Backend> {
    /// Magnitude, `[1, 1, kernel]`.
    pub weight_g: Tensor<B, 3>,
    /// Direction, `[hidden, hidden / groups, kernel]`.
    pub weight_v: Tensor<B, 3>,
    pub bias: Tensor<B, 1>,
    pub kernel: usize,
    pub groups: usize,
    pub activation: Activation,
}

impl<B: Backend> PositionalConv<B> {
    pub fn new(config: &Wav2Vec2Config, device: &B::Device) -> Self {
        let hidden = config.hidden_size;
        let kernel = config.num_conv_pos_embeddings;
        let groups = config.num_conv_pos_embedding_groups;
        let std = (1.0 / (kernel * hidden / groups) as f64).sqrt();
        let weight_v = Tensor::random(
            [hidden, hidden / groups, kernel],
            Distribution::Normal(0.0, std),
            device,
        );
        let weight_g = tap_norm(weight_v.clone());
        Self {
            weight_g,
            weight_v,
            bias: Tensor::zeros([hidden], device),
            kernel,
            groups,
            activation: config.feat_extract_activation,
        }
    }

    /// The effective convolution kernel.
    pub fn fused_weight(&self) -> Tensor<B, 3> {
        let norm = tap_norm(self.weight_v.clone());
        self.weight_v
            .clone()
            .mul(self.weight_g.clone().div(norm.clamp_min(1e-12)))
    }

    /// `[batch, frames, hidden]` -> positional term of the same shape.
    pub fn forward(&self, hidden: Tensor<B, 3>) -> Tensor<B, 3> {
        let frames = hidden.dims()[1];
        let output = conv1d(
            hidden.swap_dims(1, 2),
            self.fused_weight(),
            Some(self.bias.clone()),
            ConvOptions::new([1], [self.kernel / 2], [1], self.groups),
        );
        // An even kernel yields one extra frame.
        let output = output.narrow(2, 0, frames);
        activate(output, self.activation).swap_dims(1, 2)
    }

    pub fn parameter_names(&self) -> Vec<String> {
        ["weight_g", "weight_v", "bias"]
            .iter()
            .map(|param| (*param).to_string())
            .collect()
    }

    pub fn load_param(
        &mut self,
        name: &str,
        param: &str,
        tensor: &TensorData,
        device: &B::Device,
    ) -> Result<bool> {
        match param {
            "weight_g" => self.weight_g = replace_tensor(name, &self.weight_g, tensor, device)?,
            "weight_v" => self.weight_v = replace_tensor(name, &self.weight_v, tensor, device)?,
            "bias" => self.bias = replace_tensor(name, &self.bias, tensor, device)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// L2 norm of `v` over every axis except the kernel axis: `[1, 1, kernel]`.
fn tap_norm<B: Backend>(v: Tensor<B, 3>) -> Tensor<B, 3> {
    v.powf_scalar(2.0).sum_dim(0).sum_dim(1).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData as BurnTensorData;
    use burn_ndarray::{NdArray, NdArrayDevice};

    type TestBackend = NdArray<f32>;

    fn tiny_config(kernel: usize) -> Wav2Vec2Config {
        Wav2Vec2Config {
            hidden_size: 8,
            num_conv_pos_embeddings: kernel,
            num_conv_pos_embedding_groups: 2,
            ..Wav2Vec2Config::default()
        }
    }

    #[test]
    fn preserves_frame_count_for_odd_and_even_kernels() {
        let device = NdArrayDevice::default();
        for kernel in [3, 4] {
            let conv = PositionalConv::<TestBackend>::new(&tiny_config(kernel), &device);
            let hidden = Tensor::<TestBackend, 3>::random([1, 5, 8], Distribution::Default, &device);
            assert_eq!(conv.forward(hidden).dims(), [1, 5, 8]);
        }
    }

    #[test]
    fn fused_weight_rescales_each_tap() {
        let device = NdArrayDevice::default();
        let mut conv = PositionalConv::<TestBackend>::new(
            &Wav2Vec2Config {
                hidden_size: 2,
                num_conv_pos_embeddings: 2,
                num_conv_pos_embedding_groups: 2,
                ..Wav2Vec2Config::default()
            },
            &device,
        );
        // v: [2, 1, 2], tap 0 = (3, 4), tap 1 = (1, 0)
        conv.weight_v = Tensor::from_data(
            BurnTensorData::new(vec![3.0_f32, 1.0, 4.0, 0.0], [2, 1, 2]),
            &device,
        );
        conv.weight_g = Tensor::from_data(BurnTensorData::new(vec![10.0_f32, 2.0], [1, 1, 2]), &device);
        let fused = conv.fused_weight().into_data().to_vec::<f32>().unwrap();
        let expected = [6.0, 2.0, 8.0, 0.0];
        for (got, want) in fused.iter().zip(expected) {
            assert!((got - want).abs() < 1e-5, "{fused:?}");
        }
    }
}
