//! Checkpoint layout and metadata persistence.
//!
//! A checkpoint is three files sharing one prefix: the model record and the
//! optimizer record (both Burn `BinFileRecorder` files) and a JSON metadata
//! sidecar carrying {epoch, global step, best mAP}. Together they round-trip
//! everything needed to resume training or run inference.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub epoch: usize,
    pub step: usize,
    pub best_map: f32,
}

/// File locations derived from a checkpoint prefix such as
/// `checkpoints/vgg_best`.
#[derive(Debug, Clone)]
pub struct CheckpointPaths {
    pub prefix: PathBuf,
}

impl CheckpointPaths {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Recorder appends its own extension.
    pub fn model_path(&self) -> PathBuf {
        self.with_suffix("model")
    }

    pub fn optim_path(&self) -> PathBuf {
        self.with_suffix("optim")
    }

    pub fn meta_path(&self) -> PathBuf {
        let mut path = self.with_suffix("meta");
        path.set_extension("json");
        path
    }

    fn with_suffix(&self, suffix: &str) -> PathBuf {
        let stem = self
            .prefix
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.prefix.with_file_name(format!("{stem}_{suffix}"))
    }
}

pub fn save_meta(path: &Path, meta: &CheckpointMeta) -> anyhow::Result<()> {
    let json = serde_json::to_vec_pretty(meta)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}

pub fn load_meta(path: &Path) -> anyhow::Result<CheckpointMeta> {
    let bytes =
        fs::read(path).with_context(|| format!("missing checkpoint metadata {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("corrupt checkpoint metadata {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_round_trips() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("ckpt_meta.json");
        let meta = CheckpointMeta {
            epoch: 3,
            step: 1200,
            best_map: 0.41,
        };
        save_meta(&path, &meta).unwrap();
        let loaded = load_meta(&path).unwrap();
        assert_eq!(loaded.epoch, 3);
        assert_eq!(loaded.step, 1200);
        assert!((loaded.best_map - 0.41).abs() < 1e-6);
    }

    #[test]
    fn missing_meta_is_an_error() {
        assert!(load_meta(Path::new("/nonexistent/ckpt_meta.json")).is_err());
    }

    #[test]
    fn paths_share_the_prefix() {
        let paths = CheckpointPaths::new("out/vgg_best");
        assert_eq!(paths.model_path(), PathBuf::from("out/vgg_best_model"));
        assert_eq!(paths.meta_path(), PathBuf::from("out/vgg_best_meta.json"));
    }
}
