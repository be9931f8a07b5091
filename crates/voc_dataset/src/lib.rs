//! PASCAL-VOC-style multi-label dataset loading for the classifier stack.
//!
//! This crate provides:
//! - Annotation parsing into dense label/weight matrices (`labels`)
//! - Image decode, resize, normalization, and crop/flip augmentation (`pipeline`)
//! - Shuffled infinite-epoch batch sampling (`batch`)
//!
//! Tensors are plain `Vec<f32>` buffers in CHW layout; the training crate owns
//! the conversion into backend tensors.

pub mod batch;
pub mod labels;
pub mod pipeline;
pub mod types;

pub use batch::{train_batch_arrays, BatchSampler};
pub use labels::{load_image_ids, load_label_table, LabelTable};
pub use pipeline::{load_split, summarize, DatasetSummary, LoadMode, PipelineConfig, VocSplit};
pub use types::{LabelPolicy, VocDataError, VocResult, CLASS_NAMES, NUM_CLASSES};
