//! VGG-16-style classifier and the shared conv-stack builder.

use burn::module::Module;
use burn::nn;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::PaddingConfig2d;
use burn::tensor::activation::relu;
use burn::tensor::{backend::Backend, Tensor};

use crate::transplant::{conv_from_archive, linear_from_archive, NamedTensors, TransplantError};
use crate::{ImageClassifier, RunMode};

/// Conv layers per block; every layer is 3x3 stride 1 same-padding + ReLU,
/// every block ends with a 2x2 stride-2 max pool.
pub const VGG_BLOCKS: [usize; 5] = [2, 2, 3, 3, 3];
pub const VGG_CHANNELS: [usize; 5] = [64, 128, 256, 512, 512];

/// Canonical layer names, `conv1/conv1_1` through `conv5/conv5_3`. Pretrained
/// archives are addressed as `vgg_16/<name>/weights` / `vgg_16/<name>/biases`.
pub fn conv_layer_names() -> Vec<String> {
    let mut names = Vec::new();
    for (block, &layers) in VGG_BLOCKS.iter().enumerate() {
        for layer in 0..layers {
            names.push(format!("conv{b}/conv{b}_{l}", b = block + 1, l = layer + 1));
        }
    }
    names
}

/// Build the 13-layer conv stack with random initialization.
pub fn build_conv_stack<B: Backend>(device: &B::Device) -> Vec<Conv2d<B>> {
    let mut convs = Vec::new();
    let mut in_channels = 3;
    for (block, &layers) in VGG_BLOCKS.iter().enumerate() {
        let out_channels = VGG_CHANNELS[block];
        for _ in 0..layers {
            convs.push(
                Conv2dConfig::new([in_channels, out_channels], [3, 3])
                    .with_padding(PaddingConfig2d::Same)
                    .init(device),
            );
            in_channels = out_channels;
        }
    }
    convs
}

/// Run the conv stack, pooling at each block boundary.
pub fn forward_conv_stack<B: Backend>(
    convs: &[Conv2d<B>],
    pool: &MaxPool2d,
    images: Tensor<B, 4>,
) -> Tensor<B, 4> {
    let mut x = images;
    let mut next = 0;
    for &layers in VGG_BLOCKS.iter() {
        for conv in &convs[next..next + layers] {
            x = relu(conv.forward(x));
        }
        next += layers;
        x = pool.forward(x);
    }
    x
}

pub fn block_pool() -> MaxPool2d {
    MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init()
}

#[derive(Debug, Clone)]
pub struct Vgg16Config {
    pub num_classes: usize,
    /// Square input side seen by the conv stack (after cropping).
    pub input_size: usize,
    pub dropout: f64,
}

impl Default for Vgg16Config {
    fn default() -> Self {
        Self {
            num_classes: 20,
            input_size: 224,
            dropout: 0.5,
        }
    }
}

#[derive(Debug, Module)]
pub struct Vgg16<B: Backend> {
    convs: Vec<Conv2d<B>>,
    pool: MaxPool2d,
    fc6: nn::Linear<B>,
    fc7: nn::Linear<B>,
    head: nn::Linear<B>,
    dropout: nn::Dropout,
}

impl<B: Backend> Vgg16<B> {
    pub fn new(cfg: Vgg16Config, device: &B::Device) -> Self {
        let convs = build_conv_stack(device);
        // Five pools shrink the input side by 2^5.
        let spatial = cfg.input_size / 32;
        let fc6 = nn::LinearConfig::new(512 * spatial * spatial, 4096).init(device);
        let fc7 = nn::LinearConfig::new(4096, 4096).init(device);
        let head = nn::LinearConfig::new(4096, cfg.num_classes).init(device);
        Self {
            convs,
            pool: block_pool(),
            fc6,
            fc7,
            head,
            dropout: nn::DropoutConfig::new(cfg.dropout).init(),
        }
    }

    /// Build with every conv layer and both dense layers initialized from a
    /// pretrained archive, layer by layer. Any missing tensor or shape
    /// mismatch is fatal; the classification head keeps its random
    /// initialization (its class count differs from the archive's).
    pub fn from_pretrained(
        cfg: Vgg16Config,
        archive: &NamedTensors,
        device: &B::Device,
    ) -> Result<Self, TransplantError> {
        let mut model = Self::new(cfg, device);
        let convs = std::mem::take(&mut model.convs);
        let mut initialized = Vec::with_capacity(convs.len());
        for (conv, name) in convs.into_iter().zip(conv_layer_names()) {
            initialized.push(conv_from_archive(conv, archive, &format!("vgg_16/{name}"))?);
        }
        model.convs = initialized;
        model.fc6 = linear_from_archive(model.fc6, archive, "vgg_16/fc6")?;
        model.fc7 = linear_from_archive(model.fc7, archive, "vgg_16/fc7")?;
        Ok(model)
    }
}

impl<B: Backend> ImageClassifier<B> for Vgg16<B> {
    fn forward(&self, images: Tensor<B, 4>, mode: RunMode) -> Tensor<B, 2> {
        let x = forward_conv_stack(&self.convs, &self.pool, images);
        let [batch, c, h, w] = x.dims();
        let x = x.reshape([batch, c * h * w]);
        let x = relu(self.fc6.forward(x));
        let x = if mode.is_train() {
            self.dropout.forward(x)
        } else {
            x
        };
        let x = relu(self.fc7.forward(x));
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

    #[test]
    fn layer_names_follow_block_structure() {
        let names = conv_layer_names();
        assert_eq!(names.len(), 13);
        assert_eq!(names[0], "conv1/conv1_1");
        assert_eq!(names[4], "conv3/conv3_1");
        assert_eq!(names[12], "conv5/conv5_3");
    }
}
