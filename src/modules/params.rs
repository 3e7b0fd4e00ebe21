//! Helpers for moving checkpoint tensors into burn parameters.
//!
//! Every setter checks the incoming shape against the parameter it replaces,
//! so a checkpoint built for a different architecture fails loudly instead of
//! producing garbage scores.

use crate::config::Activation;
use crate::weights::TensorData;
use anyhow::Result;
use burn::module::Param;
use burn::tensor::activation::{gelu, relu, silu};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData as BurnTensorData};
use burn_nn::{LayerNorm, Linear};

/// Convert a checkpoint tensor into a burn tensor of rank `D`.
pub fn tensor_from_data<B: Backend, const D: usize>(
    tensor: &TensorData,
    device: &B::Device,
) -> Result<Tensor<B, D>> {
    let shape: [usize; D] = tensor
        .shape
        .clone()
        .try_into()
        .map_err(|_| anyhow::anyhow!("Expected {D}D tensor, got shape {:?}", tensor.shape))?;
    let values = tensor.to_f32_vec()?;
    Ok(Tensor::from_data(BurnTensorData::new(values, shape), device))
}

/// Fail unless `actual` matches `expected`.
pub fn check_shape(name: &str, expected: &[usize], actual: &[usize]) -> Result<()> {
    if expected != actual {
        anyhow::bail!("Shape mismatch for {name}: expected {expected:?}, got {actual:?}");
    }
    Ok(())
}

/// Load a rank-`D` tensor after checking it against the shape it replaces.
pub fn replace_tensor<B: Backend, const D: usize>(
    name: &str,
    current: &Tensor<B, D>,
    tensor: &TensorData,
    device: &B::Device,
) -> Result<Tensor<B, D>> {
    check_shape(name, &current.dims(), &tensor.shape)?;
    tensor_from_data(tensor, device)
}

/// Assign a PyTorch `[out, in]` weight to a burn `[in, out]` linear layer.
pub fn set_linear_weight<B: Backend>(
    name: &str,
    linear: &mut Linear<B>,
    tensor: &TensorData,
    device: &B::Device,
) -> Result<()> {
    let [d_in, d_out] = linear.weight.val().dims();
    check_shape(name, &[d_out, d_in], &tensor.shape)?;
    let weight: Tensor<B, 2> = tensor_from_data(tensor, device)?;
    linear.weight = Param::from_tensor(weight.transpose());
    Ok(())
}

pub fn set_linear_bias<B: Backend>(
    name: &str,
    linear: &mut Linear<B>,
    tensor: &TensorData,
    device: &B::Device,
) -> Result<()> {
    let d_out = linear.weight.val().dims()[1];
    check_shape(name, &[d_out], &tensor.shape)?;
    linear.bias = Some(Param::from_tensor(tensor_from_data(tensor, device)?));
    Ok(())
}

/// Assign a linear parameter addressed by its last name component.
pub fn set_linear_param<B: Backend>(
    name: &str,
    param: &str,
    linear: &mut Linear<B>,
    tensor: &TensorData,
    device: &B::Device,
) -> Result<bool> {
    match param {
        "weight" => set_linear_weight(name, linear, tensor, device)?,
        "bias" => set_linear_bias(name, linear, tensor, device)?,
        _ => return Ok(false),
    }
    Ok(true)
}

/// Assign a layer norm parameter addressed by its last name component.
pub fn set_layer_norm_param<B: Backend>(
    name: &str,
    param: &str,
    norm: &mut LayerNorm<B>,
    tensor: &TensorData,
    device: &B::Device,
) -> Result<bool> {
    let dim = norm.gamma.val().dims()[0];
    check_shape(name, &[dim], &tensor.shape)?;
    let value = Param::from_tensor(tensor_from_data(tensor, device)?);
    match param {
        "weight" => norm.gamma = value,
        "bias" => norm.beta = Some(value),
        _ => return Ok(false),
    }
    Ok(true)
}

/// Apply one of the activations wav2vec2 configs can name.
pub fn activate<B: Backend, const D: usize>(input: Tensor<B, D>, activation: Activation) -> Tensor<B, D> {
    match activation {
        Activation::Gelu => gelu(input),
        Activation::GeluTanh => {
            let cubic = input.clone().powf_scalar(3.0).mul_scalar(0.044_715);
            let inner = input
                .clone()
                .add(cubic)
                .mul_scalar((2.0 / std::f32::consts::PI).sqrt())
                .tanh();
            input.mul(inner.add_scalar(1.0)).mul_scalar(0.5)
        }
        Activation::Relu => relu(input),
        Activation::Silu => silu(input),
    }
}
