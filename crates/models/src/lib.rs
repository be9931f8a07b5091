//! Burn models for multi-label image classification.
//!
//! Three architectures share the [`ImageClassifier`] forward contract:
//! - [`ScratchNet`]: small two-stage CNN trained from scratch.
//! - [`Vgg16`]: VGG-16-style classifier, optionally built layer by layer from
//!   a pretrained named-tensor archive.
//! - [`Vgg16Localizer`]: the VGG conv stack ending in a per-class spatial
//!   heatmap, scored by multi-scale pooling.
//!
//! These are pure Burn Modules; dataset handling and the training loop live
//! in their own crates.

pub mod localizer;
pub mod scratch;
pub mod transplant;
pub mod vgg;

use burn::tensor::activation::sigmoid;
use burn::tensor::{backend::Backend, Tensor};

pub use localizer::{aggregate_heatmap, Vgg16Localizer, Vgg16LocalizerConfig};
pub use scratch::{ScratchNet, ScratchNetConfig};
pub use transplant::{
    load_safetensors, transplant_matching, NamedTensors, TensorEntry, TransplantError,
    TransplantReport,
};
pub use vgg::{Vgg16, Vgg16Config};

/// Which branch of a model's forward computation to run.
///
/// Train enables dropout (and any other stochastic train-only behavior);
/// Eval and Predict are deterministic and never touch parameters. Predict is
/// the mode used for metric computation over a held-out split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Train,
    Eval,
    Predict,
}

impl RunMode {
    pub fn is_train(self) -> bool {
        matches!(self, RunMode::Train)
    }
}

/// Forward contract shared by all classifier variants: a batch of CHW images
/// to raw per-class logits of shape [batch, num_classes].
pub trait ImageClassifier<B: Backend> {
    fn forward(&self, images: Tensor<B, 4>, mode: RunMode) -> Tensor<B, 2>;
}

/// Sigmoid cross-entropy on raw logits, masked per entry by `weights` and
/// averaged over the weighted entries only. Classes are independent
/// (multi-label); a weight of 0 removes that (sample, class) entry from the
/// loss entirely.
pub fn masked_sigmoid_cross_entropy<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 2>,
    weights: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let prob = sigmoid(logits).clamp(1e-6, 1.0 - 1e-6);
    let ones = Tensor::ones_like(&targets);
    let per_entry = (targets.clone() * prob.clone().log()
        + (ones.clone() - targets) * (ones - prob).log())
    .neg();
    let masked = per_entry * weights.clone();
    masked.sum() / weights.sum().clamp_min(1e-6)
}
