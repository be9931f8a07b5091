//! Small from-scratch CNN baseline.

use burn::module::Module;
use burn::nn;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::PaddingConfig2d;
use burn::tensor::activation::relu;
use burn::tensor::{backend::Backend, Tensor};

use crate::{ImageClassifier, RunMode};

#[derive(Debug, Clone)]
pub struct ScratchNetConfig {
    pub num_classes: usize,
    /// Square input side. The scratch variant skips cropping, so train and
    /// eval both feed this size.
    pub input_size: usize,
    pub hidden: usize,
    pub dropout: f64,
}

impl Default for ScratchNetConfig {
    fn default() -> Self {
        Self {
            num_classes: 20,
            input_size: 256,
            hidden: 1024,
            dropout: 0.4,
        }
    }
}

/// Two conv+pool stages, one hidden dense layer with dropout, linear head.
#[derive(Debug, Module)]
pub struct ScratchNet<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    pool: MaxPool2d,
    fc1: nn::Linear<B>,
    dropout: nn::Dropout,
    head: nn::Linear<B>,
}

impl<B: Backend> ScratchNet<B> {
    pub fn new(cfg: ScratchNetConfig, device: &B::Device) -> Self {
        let conv1 = Conv2dConfig::new([3, 32], [5, 5])
            .with_padding(PaddingConfig2d::Same)
            .init(device);
        let conv2 = Conv2dConfig::new([32, 64], [5, 5])
            .with_padding(PaddingConfig2d::Same)
            .init(device);
        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();
        // Two 2x2/s2 pools quarter each spatial side.
        let flat = 64 * (cfg.input_size / 4) * (cfg.input_size / 4);
        let fc1 = nn::LinearConfig::new(flat, cfg.hidden).init(device);
        let dropout = nn::DropoutConfig::new(cfg.dropout).init();
        let head = nn::LinearConfig::new(cfg.hidden, cfg.num_classes).init(device);
        Self {
            conv1,
            conv2,
            pool,
            fc1,
            dropout,
            head,
        }
    }
}

impl<B: Backend> ImageClassifier<B> for ScratchNet<B> {
    fn forward(&self, images: Tensor<B, 4>, mode: RunMode) -> Tensor<B, 2> {
        let x = self.pool.forward(relu(self.conv1.forward(images)));
        let x = self.pool.forward(relu(self.conv2.forward(x)));
        let [batch, c, h, w] = x.dims();
        let x = relu(self.fc1.forward(x.reshape([batch, c * h * w])));
        let x = if mode.is_train() {
            self.dropout.forward(x)
        } else {
            x
        };
        self.head.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn forward_emits_per_class_logits() {
        let device = Default::default();
        let cfg = ScratchNetConfig {
            num_classes: 5,
            input_size: 16,
            hidden: 8,
            ..Default::default()
        };
        let model = ScratchNet::<B>::new(cfg, &device);
        let images = Tensor::zeros([2, 3, 16, 16], &device);
        let logits = model.forward(images, RunMode::Predict);
        assert_eq!(logits.dims(), [2, 5]);
    }
}
