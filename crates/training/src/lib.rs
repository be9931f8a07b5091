//! Training and evaluation engine for the VOC multi-label classifiers.

pub mod checkpoint;
pub mod metrics;
pub mod trainer;

pub use checkpoint::{load_meta, save_meta, CheckpointMeta, CheckpointPaths};
pub use metrics::{average_precision, localization_score, mean_ap};
pub use trainer::{
    evaluate, load_model_checkpoint, run_train, EvalPoint, LrSchedule, ModelKind, TrainArgs,
    TrainState,
};

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;
