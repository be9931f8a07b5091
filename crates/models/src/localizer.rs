//! Weakly-supervised localizer: VGG conv stack with a per-class heatmap head.
//!
//! Instead of dense layers, a 1x1 conv maps the last conv stage to one
//! spatial activation map per class. The image-level score aggregates the
//! heatmap at three granularities: a global max over the raw map, a global
//! max after a 3x3 average pool, and a global max after a further 3x3
//! stride-2 average pool. Summing the three rewards activation that stays
//! concentrated across granularities instead of a single outlier pixel.

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AvgPool2d, AvgPool2dConfig, MaxPool2d};
use burn::tensor::{backend::Backend, Tensor};

use crate::transplant::{conv_from_archive_if_present, NamedTensors, TransplantReport};
use crate::vgg::{block_pool, build_conv_stack, conv_layer_names, forward_conv_stack};
use crate::{ImageClassifier, RunMode};

/// The two average-pool stages of the multi-scale aggregation. Window sizes
/// and strides are fixed so that on a 7x7 heatmap every window stays interior
/// (7x7 -> 5x5 -> 2x2).
pub fn multiscale_pools() -> (AvgPool2d, AvgPool2d) {
    let avg1 = AvgPool2dConfig::new([3, 3]).with_strides([1, 1]).init();
    let avg2 = AvgPool2dConfig::new([3, 3]).with_strides([2, 2]).init();
    (avg1, avg2)
}

/// Reduce a heatmap to per-class scores: global max of the raw map plus the
/// global maxima of the two successively average-pooled maps. For a constant
/// map of value k every stage contributes k, so the score is 3k.
pub fn aggregate_heatmap<B: Backend>(
    heatmap: Tensor<B, 4>,
    avg1: &AvgPool2d,
    avg2: &AvgPool2d,
) -> Tensor<B, 2> {
    let coarse = avg1.forward(heatmap.clone());
    let coarser = avg2.forward(coarse.clone());
    global_max(heatmap) + global_max(coarse) + global_max(coarser)
}

fn global_max<B: Backend>(map: Tensor<B, 4>) -> Tensor<B, 2> {
    let [batch, classes, _, _] = map.dims();
    map.max_dim(3).max_dim(2).reshape([batch, classes])
}

#[derive(Debug, Clone)]
pub struct Vgg16LocalizerConfig {
    pub num_classes: usize,
    pub input_size: usize,
}

impl Default for Vgg16LocalizerConfig {
    fn default() -> Self {
        Self {
            num_classes: 20,
            input_size: 224,
        }
    }
}

#[derive(Debug, Module)]
pub struct Vgg16Localizer<B: Backend> {
    convs: Vec<Conv2d<B>>,
    pool: MaxPool2d,
    score_conv: Conv2d<B>,
    avg1: AvgPool2d,
    avg2: AvgPool2d,
}

impl<B: Backend> Vgg16Localizer<B> {
    pub fn new(cfg: Vgg16LocalizerConfig, device: &B::Device) -> Self {
        let convs = build_conv_stack(device);
        let score_conv = Conv2dConfig::new([512, cfg.num_classes], [1, 1]).init(device);
        let (avg1, avg2) = multiscale_pools();
        Self {
            convs,
            pool: block_pool(),
            score_conv,
            avg1,
            avg2,
        }
    }

    /// Bulk partial initialization: copy every conv-stack layer whose name
    /// and shape match the archive, silently leaving the rest (including the
    /// score head) at random initialization.
    pub fn with_pretrained_features(mut self, archive: &NamedTensors) -> (Self, TransplantReport) {
        let mut report = TransplantReport::default();
        let convs = std::mem::take(&mut self.convs);
        let mut initialized = Vec::with_capacity(convs.len());
        for (conv, name) in convs.into_iter().zip(conv_layer_names()) {
            let name = format!("vgg_16/{name}");
            initialized.push(conv_from_archive_if_present(conv, archive, &name, &mut report));
        }
        self.convs = initialized;
        (self, report)
    }

    /// The retained spatial per-class map, shape [batch, classes, h, w].
    pub fn forward_heatmap(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = forward_conv_stack(&self.convs, &self.pool, images);
        self.score_conv.forward(x)
    }
}

impl<B: Backend> ImageClassifier<B> for Vgg16Localizer<B> {
    fn forward(&self, images: Tensor<B, 4>, _mode: RunMode) -> Tensor<B, 2> {
        // No dropout anywhere in this variant; all modes share one path.
        aggregate_heatmap(self.forward_heatmap(images), &self.avg1, &self.avg2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn constant_heatmap_scores_three_k() {
        let device = Default::default();
        let k = 2.5f32;
        let heatmap = Tensor::<B, 4>::from_data(
            TensorData::new(vec![k; 2 * 3 * 7 * 7], [2, 3, 7, 7]),
            &device,
        );
        let (avg1, avg2) = multiscale_pools();
        let scores = aggregate_heatmap(heatmap, &avg1, &avg2);
        assert_eq!(scores.dims(), [2, 3]);
        for v in scores.into_data().to_vec::<f32>().unwrap() {
            assert!((v - 3.0 * k).abs() < 1e-5);
        }
    }

    #[test]
    fn peak_activation_dominates_only_the_raw_scale() {
        // A single hot pixel on a zero background: the raw global max sees
        // the full value, the averaged stages see it diluted.
        let device = Default::default();
        let mut values = vec![0.0f32; 7 * 7];
        values[3 * 7 + 3] = 9.0;
        let heatmap =
            Tensor::<B, 4>::from_data(TensorData::new(values, [1, 1, 7, 7]), &device);
        let (avg1, avg2) = multiscale_pools();
        let score = aggregate_heatmap(heatmap, &avg1, &avg2)
            .into_data()
            .to_vec::<f32>()
            .unwrap()[0];
        // 9.0 raw + 1.0 from the 3x3 average + its further dilution.
        assert!(score > 9.0 && score < 3.0 * 9.0);
    }
}
