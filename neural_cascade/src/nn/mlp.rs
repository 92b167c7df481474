//! Point-wise shared MLP building block.

use burn::module::Module;
use burn::nn::{Linear, LinearConfig, Relu};
use burn::prelude::*;

use crate::config::SharedMlpConfig;

impl SharedMlpConfig {
    /// Initialize the MLP.
    pub fn init<B: Backend>(&self, device: &B::Device) -> SharedMlp<B> {
        let mut layers = Vec::with_capacity(self.widths.len());
        let mut in_dim = self.input_dim;

        for &out_dim in &self.widths {
            layers.push(LinearConfig::new(in_dim, out_dim).init(device));
            in_dim = out_dim;
        }

        SharedMlp {
            layers,
            activation: Relu::new(),
        }
    }
}

/// A stack of Linear + ReLU layers applied independently to every point.
///
/// Equivalent to a stack of 1x1 convolutions over the channel dimension.
/// With no layers the module is the identity.
#[derive(Module, Debug)]
pub struct SharedMlp<B: Backend> {
    /// Layers, in order.
    layers: Vec<Linear<B>>,
    /// Activation after every layer.
    activation: Relu,
}

impl<B: Backend> SharedMlp<B> {
    /// Number of layers.
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Forward pass over the last dimension.
    ///
    /// Input shape: [..., input_dim]
    /// Output shape: [..., output_dim]
    pub fn forward<const D: usize>(&self, mut x: Tensor<B, D>) -> Tensor<B, D> {
        for layer in &self.layers {
            x = layer.forward(x);
            x = self.activation.forward(x);
        }
        x
    }

    /// Forward pass on channels-first features.
    ///
    /// Input shape: [batch, input_dim, points]
    /// Output shape: [batch, output_dim, points]
    pub fn forward_channels_first(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        if self.layers.is_empty() {
            return x;
        }
        self.forward(x.swap_dims(1, 2)).swap_dims(1, 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_shared_mlp_forward() {
        let device = Default::default();
        let mlp = SharedMlpConfig::new(6)
            .with_widths(vec![16, 32])
            .init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 4>::zeros([2, 8, 4, 6], &device);
        assert_eq!(mlp.forward(input).dims(), [2, 8, 4, 32]);
    }

    #[test]
    fn test_channels_first_layout() {
        let device = Default::default();
        let mlp = SharedMlpConfig::new(5)
            .with_widths(vec![12])
            .init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 3>::ones([3, 5, 10], &device);
        assert_eq!(mlp.forward_channels_first(input).dims(), [3, 12, 10]);
    }

    #[test]
    fn test_empty_mlp_is_identity() {
        let device = Default::default();
        let mlp = SharedMlpConfig::new(4).init::<TestBackend>(&device);
        assert_eq!(mlp.num_layers(), 0);

        let input = Tensor::<TestBackend, 3>::from_data(
            TensorData::new((0..8).map(|v| v as f32).collect::<Vec<_>>(), [1, 4, 2]),
            &device,
        );
        let output = mlp.forward_channels_first(input.clone());
        let diff: f32 = (output - input).abs().sum().into_scalar();
        assert_eq!(diff, 0.0);
    }

    #[test]
    fn test_outputs_are_non_negative() {
        let device = Default::default();
        let mlp = SharedMlpConfig::new(3)
            .with_widths(vec![8])
            .init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![1.0f32, -2.0, 3.0, -4.0, 5.0, -6.0], [2, 3]),
            &device,
        );
        let min: f32 = mlp.forward(input).min().into_scalar();
        assert!(min >= 0.0);
    }
}
