//! Image decode, resize, normalization, and split loading.
//!
//! Every image is decoded, resized to the canonical square size, mean
//! subtracted per channel, and rescaled to [-1, 1], producing a CHW f32
//! buffer. Cropping to the smaller network input size is split dependent:
//! eval/test images get a deterministic center crop here at load time, while
//! train images stay at canonical size so the batch sampler can take a fresh
//! random flip + crop each time a sample is drawn.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

use crate::labels::{load_image_ids, load_label_table};
use crate::types::{LabelPolicy, VocDataError, VocResult, NUM_CLASSES};

/// Per-channel RGB mean subtracted before rescaling, as used by the VGG-era
/// preprocessing convention.
pub const CHANNEL_MEAN: [f32; 3] = [123.0, 116.0, 103.0];

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Square size every image is resized to after decode.
    pub canonical_size: u32,
    /// Network input size when cropping is enabled for the variant. `None`
    /// feeds the canonical size in both train and eval branches.
    pub crop_size: Option<u32>,
    pub mean: [f32; 3],
    /// Decode worker pool size; 0 lets rayon pick.
    pub workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            canonical_size: 256,
            crop_size: Some(224),
            mean: CHANNEL_MEAN,
            workers: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    Train,
    Eval,
}

/// One fully loaded split: images, labels, and weights positionally aligned.
#[derive(Debug, Clone)]
pub struct VocSplit {
    pub ids: Vec<String>,
    /// CHW f32 buffers, all of side `side`.
    pub images: Vec<Vec<f32>>,
    pub side: usize,
    /// Row-major samples x classes.
    pub labels: Vec<f32>,
    pub weights: Vec<f32>,
    pub num_classes: usize,
}

impl VocSplit {
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// Decode and normalize one image file to CHW at `side` x `side`.
pub fn load_image_chw(path: &Path, side: u32, mean: [f32; 3]) -> VocResult<Vec<f32>> {
    let img = image::open(path).map_err(|source| VocDataError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    let rgb = img
        .resize_exact(side, side, FilterType::Triangle)
        .to_rgb8();
    let side = side as usize;
    let mut chw = vec![0.0f32; 3 * side * side];
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            chw[c * side * side + y * side + x] =
                ((pixel[c] as f32 - mean[c]) / 255.0 - 0.5) * 2.0;
        }
    }
    Ok(chw)
}

/// Deterministic center crop of a CHW buffer.
pub fn center_crop_chw(chw: &[f32], side: usize, crop: usize) -> Vec<f32> {
    let margin = (side - crop) / 2;
    crop_chw(chw, side, crop, margin, margin)
}

/// Crop a CHW buffer at the given top-left corner.
pub fn crop_chw(chw: &[f32], side: usize, crop: usize, top: usize, left: usize) -> Vec<f32> {
    debug_assert!(top + crop <= side && left + crop <= side);
    let mut out = vec![0.0f32; 3 * crop * crop];
    for c in 0..3 {
        for y in 0..crop {
            let src = c * side * side + (top + y) * side + left;
            let dst = c * crop * crop + y * crop;
            out[dst..dst + crop].copy_from_slice(&chw[src..src + crop]);
        }
    }
    out
}

/// Horizontal mirror of a CHW buffer.
pub fn hflip_chw(chw: &[f32], side: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; chw.len()];
    for c in 0..3 {
        for y in 0..side {
            let row = c * side * side + y * side;
            for x in 0..side {
                out[row + x] = chw[row + (side - 1 - x)];
            }
        }
    }
    out
}

fn image_path(data_dir: &Path, id: &str) -> PathBuf {
    data_dir.join("JPEGImages").join(format!("{id}.jpg"))
}

/// Load an entire split: master list, label/weight matrices, and every image.
///
/// Decoding runs across a rayon pool of `cfg.workers` threads; any decode
/// failure aborts the whole load. In [`LoadMode::Eval`] images are center
/// cropped to `cfg.crop_size` here; in [`LoadMode::Train`] they are kept at
/// canonical size for per-draw augmentation.
pub fn load_split(
    data_dir: &Path,
    split: &str,
    cfg: &PipelineConfig,
    mode: LoadMode,
    policy: LabelPolicy,
) -> VocResult<VocSplit> {
    let ids = load_image_ids(data_dir, split)?;
    let table = load_label_table(data_dir, split, &ids, policy)?;

    let bar = ProgressBar::new(ids.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.set_message(format!("loading {split}"));

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(cfg.workers)
        .build()
        .map_err(|e| VocDataError::Other(format!("decode pool: {e}")))?;

    let canonical = cfg.canonical_size;
    let mean = cfg.mean;
    let images: VocResult<Vec<Vec<f32>>> = pool.install(|| {
        ids.par_iter()
            .map(|id| {
                let chw = load_image_chw(&image_path(data_dir, id), canonical, mean)?;
                bar.inc(1);
                Ok(match (mode, cfg.crop_size) {
                    (LoadMode::Eval, Some(crop)) => {
                        center_crop_chw(&chw, canonical as usize, crop as usize)
                    }
                    _ => chw,
                })
            })
            .collect()
    });
    let images = images?;
    bar.finish_and_clear();

    let side = match (mode, cfg.crop_size) {
        (LoadMode::Eval, Some(crop)) => crop as usize,
        _ => canonical as usize,
    };

    Ok(VocSplit {
        ids,
        images,
        side,
        labels: table.labels,
        weights: table.weights,
        num_classes: NUM_CLASSES,
    })
}

/// Per-class positive/ignored counts for operator logging.
#[derive(Debug, Clone)]
pub struct DatasetSummary {
    pub samples: usize,
    pub positives: Vec<usize>,
    pub ignored: Vec<usize>,
}

pub fn summarize(split: &VocSplit) -> DatasetSummary {
    let c = split.num_classes;
    let mut positives = vec![0usize; c];
    let mut ignored = vec![0usize; c];
    for s in 0..split.len() {
        for k in 0..c {
            if split.weights[s * c + k] == 0.0 {
                ignored[k] += 1;
            } else if split.labels[s * c + k] == 1.0 {
                positives[k] += 1;
            }
        }
    }
    DatasetSummary {
        samples: split.len(),
        positives,
        ignored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_crop_takes_the_middle_window() {
        // 1 channel worth of distinct values replicated over RGB.
        let side = 4;
        let mut chw = vec![0.0f32; 3 * side * side];
        for c in 0..3 {
            for i in 0..side * side {
                chw[c * side * side + i] = i as f32;
            }
        }
        let out = center_crop_chw(&chw, side, 2);
        // Rows 1..3, cols 1..3 of a 4x4 grid.
        assert_eq!(&out[0..4], &[5.0, 6.0, 9.0, 10.0]);
        assert_eq!(out.len(), 3 * 2 * 2);
    }

    #[test]
    fn hflip_mirrors_rows() {
        let side = 2;
        let chw: Vec<f32> = (0..12).map(|v| v as f32).collect();
        let out = hflip_chw(&chw, side);
        assert_eq!(&out[0..4], &[1.0, 0.0, 3.0, 2.0]);
        assert_eq!(&out[4..8], &[5.0, 4.0, 7.0, 6.0]);
    }
}
