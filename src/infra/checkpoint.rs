// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores model weights with Burn's full-precision
// NamedMpkGzFileRecorder, plus the JSON pipeline config needed
// to rebuild the model before loading weights into it.
//
// Layout under <checkpoint_dir>/<project>/:
//
//   train_config.json      ← pipeline + hyperparameters
//   best_model.mpk.gz      ← weights selected by the trainer
//   best_optimizer.mpk.gz  ← Adam moments saved alongside them
//   model_epoch_1.mpk.gz   ← every-epoch policy only
//   ...
//
// Every write goes to a temporary sibling first and is renamed
// into place, so a crash never leaves a half-written file under
// the final name.

use std::{
    fs,
    path::{Path, PathBuf},
};

use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkGzFileRecorder, Record, Recorder},
};
use serde::{de::DeserializeOwned, Serialize};

use crate::domain::error::{LineDpError, Result};
use crate::ml::model::DefectModel;

pub const BEST_MODEL: &str = "best_model";
pub const BEST_OPTIMIZER: &str = "best_optimizer";
const CONFIG_FILE: &str = "train_config.json";
const RECORD_EXT: &str = "mpk.gz";

type ModelRecorder = NamedMpkGzFileRecorder<FullPrecisionSettings>;

pub fn epoch_model_name(epoch: usize) -> String {
    format!("model_epoch_{epoch}")
}

pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Creates the directory if it doesn't already exist.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| LineDpError::persistence(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn model_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{RECORD_EXT}"))
    }

    pub fn has_model(&self, name: &str) -> bool {
        self.model_path(name).is_file()
    }

    /// Write `{dir}/{name}.mpk.gz`.
    pub fn save_model<B: Backend>(&self, model: &DefectModel<B>, name: &str) -> Result<()> {
        self.record_atomic::<B, _>(model.clone().into_record(), name)
    }

    /// Load `{dir}/{name}.mpk.gz` into `model`, which must have the
    /// architecture the checkpoint was written from.
    pub fn load_model<B: Backend>(
        &self,
        model:  DefectModel<B>,
        name:   &str,
        device: &B::Device,
    ) -> Result<DefectModel<B>> {
        let record = self.load_record::<B, _>(name, device)?;
        Ok(model.load_record(record))
    }

    /// Write an optimizer record (`optim.to_record()`) under `name`.
    pub fn save_optimizer<B: Backend, R: Record<B>>(&self, record: R, name: &str) -> Result<()> {
        self.record_atomic::<B, R>(record, name)
    }

    /// Read back an optimizer record for `optim.load_record(..)`.
    pub fn load_optimizer<B: Backend, R: Record<B>>(&self, name: &str, device: &B::Device) -> Result<R> {
        self.load_record::<B, R>(name, device)
    }

    fn record_atomic<B: Backend, R: Record<B>>(&self, record: R, name: &str) -> Result<()> {
        // the recorder appends the extension itself
        let partial = self.dir.join(format!("{name}-partial"));
        <ModelRecorder as Recorder<B>>::record(&ModelRecorder::new(), record, partial.clone())
            .map_err(|e| LineDpError::persistence(&partial, format!("{e:?}")))?;

        let from = self.dir.join(format!("{name}-partial.{RECORD_EXT}"));
        let to   = self.model_path(name);
        fs::rename(&from, &to).map_err(|e| LineDpError::persistence(&to, e))?;

        tracing::debug!("Saved checkpoint '{}'", to.display());
        Ok(())
    }

    fn load_record<B: Backend, R: Record<B>>(&self, name: &str, device: &B::Device) -> Result<R> {
        let path = self.model_path(name);
        if !path.is_file() {
            return Err(LineDpError::persistence(&path, "checkpoint not found; run 'train' first"));
        }
        let record = <ModelRecorder as Recorder<B>>::load(&ModelRecorder::new(), self.dir.join(name), device)
            .map_err(|e| LineDpError::persistence(&path, format!("{e:?}")))?;

        tracing::info!("Loaded checkpoint '{}'", path.display());
        Ok(record)
    }

    pub fn save_config<T: Serialize>(&self, cfg: &T) -> Result<()> {
        let path = self.dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(cfg).map_err(|e| LineDpError::persistence(&path, e))?;
        write_atomic(&path, json.as_bytes())?;
        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(())
    }

    pub fn load_config<T: DeserializeOwned>(&self) -> Result<T> {
        let path = self.dir.join(CONFIG_FILE);
        let json = fs::read_to_string(&path).map_err(|e| LineDpError::persistence(&path, e))?;
        serde_json::from_str(&json).map_err(|e| LineDpError::persistence(&path, e))
    }
}

/// Write `bytes` to a hidden temporary sibling of `path`, then rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let name = path
        .file_name()
        .ok_or_else(|| LineDpError::persistence(path, "path has no file name"))?;
    let tmp = path.with_file_name(format!(".{}.tmp", name.to_string_lossy()));

    fs::write(&tmp, bytes).map_err(|e| LineDpError::persistence(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| LineDpError::persistence(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::batcher::{tensor_to_vec, FileBatcher};
    use crate::ml::model::DefectModelConfig;
    use crate::test_support::{sample, toy_embedder, TestBackend, TestDevice};

    fn config() -> DefectModelConfig {
        DefectModelConfig::new()
            .with_embed_dim(2)
            .with_gru_hidden_dim(3)
            .with_bafn_hidden_dim(4)
    }

    #[test]
    fn test_save_load_gives_identical_outputs() {
        let tmp    = tempfile::tempdir().unwrap();
        let device = TestDevice::default();
        let ckpt   = CheckpointManager::new(tmp.path().join("proj")).unwrap();

        let model = config().init::<TestBackend>(&device).unwrap();
        ckpt.save_model(&model, BEST_MODEL).unwrap();
        assert!(ckpt.has_model(BEST_MODEL));
        assert!(!tmp.path().join("proj/best_model-partial.mpk.gz").exists());

        let fresh    = config().init::<TestBackend>(&device).unwrap();
        let restored = ckpt.load_model(fresh, BEST_MODEL, &device).unwrap();

        let batch = FileBatcher::<TestBackend>::new(device, toy_embedder()).assemble(&[
            sample("a", None, &[(2, false), (1, false)]),
            sample("b", None, &[(3, false)]),
        ]);
        let before = model.forward_batch(&batch).unwrap();
        let after  = restored.forward_batch(&batch).unwrap();
        for (x, y) in tensor_to_vec(before.probabilities).unwrap().iter()
            .zip(tensor_to_vec(after.probabilities).unwrap())
        {
            assert!((x - y).abs() < 1e-6);
        }
        for (x, y) in tensor_to_vec(before.line_attention).unwrap().iter()
            .zip(tensor_to_vec(after.line_attention).unwrap())
        {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn test_missing_checkpoint_is_persistence_error() {
        let tmp    = tempfile::tempdir().unwrap();
        let device = TestDevice::default();
        let ckpt   = CheckpointManager::new(tmp.path()).unwrap();
        let model  = config().init::<TestBackend>(&device).unwrap();
        assert!(matches!(
            ckpt.load_model(model, &epoch_model_name(3), &device),
            Err(LineDpError::Persistence { .. })
        ));
    }

    #[test]
    fn test_config_round_trip() {
        let tmp  = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(tmp.path()).unwrap();
        let cfg  = config().with_gru_num_layers(2);
        ckpt.save_config(&cfg).unwrap();

        let back: DefectModelConfig = ckpt.load_config().unwrap();
        assert_eq!(back.gru_num_layers, 2);
        assert_eq!(back.bafn_hidden_dim, 4);
        assert!(!tmp.path().join(".train_config.json.tmp").exists());
    }

    #[test]
    fn test_write_atomic_replaces_contents() {
        let tmp  = tempfile::tempdir().unwrap();
        let path = tmp.path().join("log.csv");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
    }
}
