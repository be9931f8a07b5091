//! Partial parameter initialization from external named-tensor archives.
//!
//! A pretrained archive is exposed as a flat name -> (shape, f32 data) map
//! loaded from a safetensors file. Two transplant paths exist:
//!
//! - the bulk path ([`transplant_matching`], [`conv_from_archive_if_present`])
//!   copies every tensor whose renamed name and exact shape match the
//!   destination and silently skips everything else, giving intentional
//!   partial initialization;
//! - the explicit path ([`conv_from_archive`], [`linear_from_archive`]) builds
//!   a layer from named tensors and fails loudly when a required tensor is
//!   absent or shaped wrong.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use burn::nn::conv::Conv2d;
use burn::nn::Linear;
use burn::tensor::{backend::Backend, Tensor, TensorData};
use safetensors::tensor::Dtype;
use safetensors::SafeTensors;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct TensorEntry {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

pub type NamedTensors = BTreeMap<String, TensorEntry>;

#[derive(Debug, Error)]
pub enum TransplantError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse safetensors archive {path}: {msg}")]
    Parse { path: PathBuf, msg: String },
    #[error("archive tensor {name} has dtype {dtype:?}, expected F32")]
    Dtype { name: String, dtype: Dtype },
    #[error("required tensor {name} is absent from the archive")]
    MissingTensor { name: String },
    #[error("tensor {name} has shape {found:?}, destination expects {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
}

/// Read a safetensors archive into a [`NamedTensors`] map. Only F32 tensors
/// are accepted; the archive is consumed read-only.
pub fn load_safetensors(path: &Path) -> Result<NamedTensors, TransplantError> {
    let bytes = fs::read(path).map_err(|source| TransplantError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let archive = SafeTensors::deserialize(&bytes).map_err(|e| TransplantError::Parse {
        path: path.to_path_buf(),
        msg: e.to_string(),
    })?;

    let mut out = NamedTensors::new();
    for (name, view) in archive.tensors() {
        if view.dtype() != Dtype::F32 {
            return Err(TransplantError::Dtype {
                name,
                dtype: view.dtype(),
            });
        }
        let data = view
            .data()
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        out.insert(
            name,
            TensorEntry {
                shape: view.shape().to_vec(),
                data,
            },
        );
    }
    Ok(out)
}

/// Outcome of a bulk transplant: which destination names were overwritten and
/// which source tensors found no matching destination (wrong name or shape).
#[derive(Debug, Default, Clone)]
pub struct TransplantReport {
    pub copied: Vec<String>,
    pub skipped: Vec<String>,
}

/// Bulk path over plain maps: for every source tensor, apply `rename` (None
/// filters the tensor out, e.g. a name-prefix filter); when the renamed name
/// exists in `dst` with the exact same shape, overwrite it. Everything else
/// is skipped without error.
pub fn transplant_matching<F>(
    dst: &mut NamedTensors,
    src: &NamedTensors,
    rename: F,
) -> TransplantReport
where
    F: Fn(&str) -> Option<String>,
{
    let mut report = TransplantReport::default();
    for (src_name, entry) in src {
        let Some(dst_name) = rename(src_name) else {
            report.skipped.push(src_name.clone());
            continue;
        };
        match dst.get_mut(&dst_name) {
            Some(existing) if existing.shape == entry.shape => {
                existing.data = entry.data.clone();
                report.copied.push(dst_name);
            }
            _ => report.skipped.push(src_name.clone()),
        }
    }
    report
}

pub fn require<'a>(src: &'a NamedTensors, name: &str) -> Result<&'a TensorEntry, TransplantError> {
    src.get(name).ok_or_else(|| TransplantError::MissingTensor {
        name: name.to_string(),
    })
}

fn checked<'a>(
    src: &'a NamedTensors,
    name: &str,
    expected: &[usize],
) -> Result<&'a TensorEntry, TransplantError> {
    let entry = require(src, name)?;
    if entry.shape != expected {
        return Err(TransplantError::ShapeMismatch {
            name: name.to_string(),
            expected: expected.to_vec(),
            found: entry.shape.clone(),
        });
    }
    Ok(entry)
}

/// Initialize a conv layer from `<name>/weights` and `<name>/biases`; both
/// tensors are required. Weight layout is [out, in, kh, kw].
pub fn conv_from_archive<B: Backend>(
    mut conv: Conv2d<B>,
    src: &NamedTensors,
    name: &str,
) -> Result<Conv2d<B>, TransplantError> {
    let w_dims = conv.weight.val().dims();
    let w = checked(src, &format!("{name}/weights"), &w_dims)?.clone();
    conv.weight = conv
        .weight
        .map(|t| Tensor::from_data(TensorData::new(w.data.clone(), w_dims), &t.device()));

    if let Some(bias) = conv.bias.take() {
        let b_dims = bias.val().dims();
        let b = checked(src, &format!("{name}/biases"), &b_dims)?.clone();
        conv.bias = Some(
            bias.map(|t| Tensor::from_data(TensorData::new(b.data.clone(), b_dims), &t.device())),
        );
    }
    Ok(conv)
}

/// Bulk variant of [`conv_from_archive`]: absent or wrong-shaped tensors
/// leave the layer untouched, recording the skip in `report`.
pub fn conv_from_archive_if_present<B: Backend>(
    conv: Conv2d<B>,
    src: &NamedTensors,
    name: &str,
    report: &mut TransplantReport,
) -> Conv2d<B> {
    match conv_from_archive(conv.clone(), src, name) {
        Ok(initialized) => {
            report.copied.push(name.to_string());
            initialized
        }
        Err(_) => {
            report.skipped.push(name.to_string());
            conv
        }
    }
}

/// Initialize a dense layer from `<name>/weights` ([in, out]) and
/// `<name>/biases`; both tensors are required.
pub fn linear_from_archive<B: Backend>(
    mut linear: Linear<B>,
    src: &NamedTensors,
    name: &str,
) -> Result<Linear<B>, TransplantError> {
    let w_dims = linear.weight.val().dims();
    let w = checked(src, &format!("{name}/weights"), &w_dims)?.clone();
    linear.weight = linear
        .weight
        .map(|t| Tensor::from_data(TensorData::new(w.data.clone(), w_dims), &t.device()));

    if let Some(bias) = linear.bias.take() {
        let b_dims = bias.val().dims();
        let b = checked(src, &format!("{name}/biases"), &b_dims)?.clone();
        linear.bias = Some(
            bias.map(|t| Tensor::from_data(TensorData::new(b.data.clone(), b_dims), &t.device())),
        );
    }
    Ok(linear)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(shape: &[usize], fill: f32) -> TensorEntry {
        TensorEntry {
            shape: shape.to_vec(),
            data: vec![fill; shape.iter().product()],
        }
    }

    #[test]
    fn bulk_copy_matches_by_name_and_shape_only() {
        let mut dst = NamedTensors::new();
        dst.insert("A".into(), entry(&[3, 3], 0.0));
        dst.insert("B".into(), entry(&[5, 5], 0.5));

        let mut src = NamedTensors::new();
        src.insert("A".into(), entry(&[3, 3], 1.0));
        src.insert("C".into(), entry(&[3, 3], 2.0));

        let report = transplant_matching(&mut dst, &src, |n| Some(n.to_string()));

        assert!(dst["A"].data.iter().all(|v| *v == 1.0));
        assert!(dst["B"].data.iter().all(|v| *v == 0.5));
        assert_eq!(report.copied, vec!["A".to_string()]);
        assert_eq!(report.skipped, vec!["C".to_string()]);
    }

    #[test]
    fn bulk_copy_skips_shape_mismatches_silently() {
        let mut dst = NamedTensors::new();
        dst.insert("A".into(), entry(&[3, 3], 0.0));
        let mut src = NamedTensors::new();
        src.insert("A".into(), entry(&[2, 2], 1.0));

        let report = transplant_matching(&mut dst, &src, |n| Some(n.to_string()));
        assert!(report.copied.is_empty());
        assert!(dst["A"].data.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn prefix_filter_drops_non_feature_tensors() {
        let mut dst = NamedTensors::new();
        dst.insert("features/w".into(), entry(&[2], 0.0));
        dst.insert("classifier/w".into(), entry(&[2], 0.0));
        let mut src = NamedTensors::new();
        src.insert("features/w".into(), entry(&[2], 1.0));
        src.insert("classifier/w".into(), entry(&[2], 1.0));

        let report = transplant_matching(&mut dst, &src, |n| {
            n.starts_with("features/").then(|| n.to_string())
        });
        assert_eq!(report.copied, vec!["features/w".to_string()]);
        assert!(dst["classifier/w"].data.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn required_lookup_reports_missing_name() {
        let src = NamedTensors::new();
        let err = require(&src, "vgg_16/fc6/weights").unwrap_err();
        assert!(matches!(err, TransplantError::MissingTensor { .. }));
    }
}
