use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use burn_nn::{LayerNorm, Linear};

/// Apply a linear layer to `[batch, seq, in]`, tolerating empty sequences.
pub fn apply_linear_3d<B: Backend>(linear: &Linear<B>, input: Tensor<B, 3>) -> Tensor<B, 3> {
    let [batch, seq, in_dim] = input.dims();
    let [_in_dim, out_dim] = linear.weight.val().dims();
    if batch == 0 || seq == 0 || in_dim == 0 {
        return Tensor::from_data(
            TensorData::new(Vec::<f32>::new(), [batch, seq, out_dim]),
            &input.device(),
        );
    }

    let reshaped = input.reshape([batch * seq, in_dim]);
    linear.forward(reshaped).reshape([batch, seq, out_dim])
}

/// Layer norm over the last axis of `[batch, seq, dim]`.
pub fn apply_layer_norm_3d<B: Backend>(norm: &LayerNorm<B>, input: Tensor<B, 3>) -> Tensor<B, 3> {
    let [batch, seq, dim] = input.dims();
    if batch == 0 || seq == 0 || dim == 0 {
        return input;
    }
    let flat = input.reshape([batch * seq, dim]);
    norm.forward(flat).reshape([batch, seq, dim])
}

/// `[batch, seq, heads * dim]` -> `[batch, heads, seq, dim]`.
pub fn split_heads<B: Backend>(input: Tensor<B, 3>, num_heads: usize) -> Tensor<B, 4> {
    let [batch, seq, width] = input.dims();
    input
        .reshape([batch, seq, num_heads, width / num_heads])
        .swap_dims(1, 2)
}

/// `[batch, heads, seq, dim]` -> `[batch, seq, heads * dim]`.
pub fn merge_heads<B: Backend>(input: Tensor<B, 4>) -> Tensor<B, 3> {
    let [batch, heads, seq, dim] = input.dims();
    input.swap_dims(1, 2).reshape([batch, seq, heads * dim])
}
