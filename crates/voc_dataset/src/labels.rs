//! Annotation parsing: per-class list files into dense label/weight matrices.
//!
//! A split is described by `ImageSets/Main/<split>.txt` (master image-id list,
//! one id per line, defines sample order) and one `<class>_<split>.txt` per
//! class with lines of the form `<image-id> <value>`, value in {-1, 0, 1}.

use std::fs;
use std::path::{Path, PathBuf};

use crate::types::{LabelPolicy, VocDataError, VocResult, CLASS_NAMES, NUM_CLASSES};

/// Dense label/weight matrices for one split, row-major samples x classes.
///
/// Invariant: rows are ordered exactly as the master image list; columns are
/// ordered as [`CLASS_NAMES`]. An entry is either definitely labeled
/// (weight 1) or excluded from loss and metrics (weight 0).
#[derive(Debug, Clone)]
pub struct LabelTable {
    pub labels: Vec<f32>,
    pub weights: Vec<f32>,
    pub num_samples: usize,
    pub num_classes: usize,
}

impl LabelTable {
    pub fn label(&self, sample: usize, class: usize) -> f32 {
        self.labels[sample * self.num_classes + class]
    }

    pub fn weight(&self, sample: usize, class: usize) -> f32 {
        self.weights[sample * self.num_classes + class]
    }
}

fn read_lines(path: &Path) -> VocResult<Vec<String>> {
    let text = fs::read_to_string(path).map_err(|source| VocDataError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.to_string())
        .collect())
}

fn annotation_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("ImageSets").join("Main")
}

/// Read the master image-id list for a split. The returned order is the
/// sample order for every matrix produced from this split.
pub fn load_image_ids(data_dir: &Path, split: &str) -> VocResult<Vec<String>> {
    let path = annotation_dir(data_dir).join(format!("{split}.txt"));
    let ids: Vec<String> = read_lines(&path)?
        .into_iter()
        // Per-class rows are "<id> <value>"; the master list is id-only, but
        // tolerate trailing columns by keeping the first token.
        .map(|l| l.split_whitespace().next().unwrap_or_default().to_string())
        .collect();
    if ids.is_empty() {
        return Err(VocDataError::EmptySplit {
            split: split.to_string(),
        });
    }
    Ok(ids)
}

/// Parse every per-class annotation file for `split` into a [`LabelTable`].
///
/// `ids` is the master list from [`load_image_ids`]; each class file must
/// carry exactly one row per master id, in the same order. Any structural
/// problem (missing file, row count mismatch, id mismatch, unparseable value)
/// is fatal for the split.
pub fn load_label_table(
    data_dir: &Path,
    split: &str,
    ids: &[String],
    policy: LabelPolicy,
) -> VocResult<LabelTable> {
    let num_samples = ids.len();
    let mut labels = vec![0.0f32; num_samples * NUM_CLASSES];
    let mut weights = vec![0.0f32; num_samples * NUM_CLASSES];

    for (class_idx, class_name) in CLASS_NAMES.iter().enumerate() {
        let path = annotation_dir(data_dir).join(format!("{class_name}_{split}.txt"));
        let lines = read_lines(&path)?;
        if lines.len() != num_samples {
            return Err(VocDataError::RowCountMismatch {
                path,
                expected: num_samples,
                found: lines.len(),
            });
        }
        for (row, line) in lines.iter().enumerate() {
            let mut parts = line.split_whitespace();
            let id = parts.next().unwrap_or_default();
            if id != ids[row] {
                return Err(VocDataError::RowOrderMismatch {
                    path,
                    line: row + 1,
                    expected: ids[row].clone(),
                    found: id.to_string(),
                });
            }
            let token = parts.next().unwrap_or_default();
            let value: i32 = token.parse().map_err(|_| VocDataError::MalformedRow {
                path: path.clone(),
                line: row + 1,
                token: token.to_string(),
            })?;
            let (label, weight) = encode(value, policy);
            labels[row * NUM_CLASSES + class_idx] = label;
            weights[row * NUM_CLASSES + class_idx] = weight;
        }
    }

    Ok(LabelTable {
        labels,
        weights,
        num_samples,
        num_classes: NUM_CLASSES,
    })
}

/// Map one raw annotation value to (label, weight) under `policy`.
///
/// 1 is a confirmed positive and -1 (or any unrecognized integer, e.g. the
/// "difficult" encoding) is excluded, under both policies. Only the meaning
/// of 0 is policy dependent.
pub fn encode(value: i32, policy: LabelPolicy) -> (f32, f32) {
    match (value, policy) {
        (1, _) => (1.0, 1.0),
        (0, LabelPolicy::InclusiveZero) => (1.0, 1.0),
        (0, LabelPolicy::StrictZero) => (0.0, 1.0),
        (_, LabelPolicy::InclusiveZero) => (1.0, 0.0),
        (_, LabelPolicy::StrictZero) => (0.0, 0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmed_positive_under_both_policies() {
        assert_eq!(encode(1, LabelPolicy::InclusiveZero), (1.0, 1.0));
        assert_eq!(encode(1, LabelPolicy::StrictZero), (1.0, 1.0));
    }

    #[test]
    fn difficult_is_excluded_under_both_policies() {
        let (_, w) = encode(-1, LabelPolicy::InclusiveZero);
        assert_eq!(w, 0.0);
        let (_, w) = encode(-1, LabelPolicy::StrictZero);
        assert_eq!(w, 0.0);
        // Unrecognized values take the same exclusion path.
        let (_, w) = encode(7, LabelPolicy::StrictZero);
        assert_eq!(w, 0.0);
    }

    #[test]
    fn explicit_absent_is_policy_dependent() {
        assert_eq!(encode(0, LabelPolicy::InclusiveZero), (1.0, 1.0));
        assert_eq!(encode(0, LabelPolicy::StrictZero), (0.0, 1.0));
    }
}
