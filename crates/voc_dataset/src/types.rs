//! Core types and error definitions for voc_dataset.

use std::path::PathBuf;
use thiserror::Error;

/// The 20 VOC object classes, in canonical annotation-file order.
///
/// Label and weight matrix columns follow this order exactly; the per-class
/// annotation files are read in this same order, which keeps every column
/// aligned with the master image list.
pub const CLASS_NAMES: [&str; 20] = [
    "aeroplane",
    "bicycle",
    "bird",
    "boat",
    "bottle",
    "bus",
    "car",
    "cat",
    "chair",
    "cow",
    "diningtable",
    "dog",
    "horse",
    "motorbike",
    "person",
    "pottedplant",
    "sheep",
    "sofa",
    "train",
    "tvmonitor",
];

pub const NUM_CLASSES: usize = CLASS_NAMES.len();

pub type VocResult<T> = Result<T, VocDataError>;

#[derive(Debug, Error)]
pub enum VocDataError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("annotation file {path} line {line}: cannot parse label value {token:?}")]
    MalformedRow {
        path: PathBuf,
        line: usize,
        token: String,
    },
    #[error("annotation file {path} has {found} rows, master list has {expected}")]
    RowCountMismatch {
        path: PathBuf,
        expected: usize,
        found: usize,
    },
    #[error("annotation file {path} line {line}: image id {found:?} does not match master list id {expected:?}")]
    RowOrderMismatch {
        path: PathBuf,
        line: usize,
        expected: String,
        found: String,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("split {split:?} has no images")]
    EmptySplit { split: String },
    #[error("{0}")]
    Other(String),
}

/// How a raw annotation value of 0 ("explicitly absent") is encoded.
///
/// Raw value 1 is always a confirmed positive (label 1, weight 1) and raw
/// value -1 (or any other unlisted value) is always excluded (weight 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelPolicy {
    /// 0 maps to label 1, weight 1. Reproduces the historical encoding where
    /// every weighted entry carries a positive label bit.
    InclusiveZero,
    /// 0 maps to label 0, weight 1: a confirmed negative.
    StrictZero,
}
