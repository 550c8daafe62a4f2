use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use hf_hub::api::sync::{ApiBuilder, ApiError};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{ImscoreError, Result};

pub const CONFIG_FILENAME: &str = "config.json";
pub const TOKENIZER_FILENAME: &str = "tokenizer.json";
pub const WEIGHTS_FILENAME: &str = "model.safetensors";
pub const WEIGHTS_INDEX_FILENAME: &str = "model.safetensors.index.json";

/// A set of model files addressed either by a Hugging Face repo id or by a
/// local directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    id: String,
    local: Option<PathBuf>,
}

impl Checkpoint {
    pub fn open(id: &str) -> Self {
        let path = Path::new(id);
        let local = path.is_dir().then(|| path.to_path_buf());

        Checkpoint {
            id: id.to_string(),
            local,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn file(&self, filename: &str) -> Result<PathBuf> {
        if let Some(dir) = &self.local {
            let path = dir.join(filename);
            if path.is_file() {
                return Ok(path);
            }
            return Err(ImscoreError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found in {}", filename, dir.display()),
            )));
        }

        debug!("fetching {} from {}", filename, self.id);
        let api = ApiBuilder::new().with_progress(false).build()?;
        Ok(api.model(self.id.clone()).get(filename)?)
    }

    pub fn config<T: DeserializeOwned>(&self) -> Result<T> {
        let path = self.file(CONFIG_FILENAME)?;
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Single-file weights first, then the shards listed by the index. Only a
    /// missing single file falls through to the index.
    pub fn weights(&self) -> Result<Vec<PathBuf>> {
        match self.file(WEIGHTS_FILENAME) {
            Ok(path) => return Ok(vec![path]),
            Err(err) if is_not_found(&err) => {
                debug!("{} has no {}, reading the shard index", self.id, WEIGHTS_FILENAME)
            }
            Err(err) => return Err(err),
        }

        let index = self.file(WEIGHTS_INDEX_FILENAME)?;
        let index: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(index)?)?;
        let shards = index
            .get("weight_map")
            .and_then(|map| map.as_object())
            .ok_or_else(|| {
                ImscoreError::Msg(format!("{} has no weight_map", WEIGHTS_INDEX_FILENAME))
            })?
            .values()
            .filter_map(|shard| shard.as_str())
            .collect::<BTreeSet<_>>();

        shards.into_iter().map(|shard| self.file(shard)).collect()
    }

    pub fn var_builder(&self, dtype: DType, device: &Device) -> Result<VarBuilder<'static>> {
        let weights = self.weights()?;
        let vs = unsafe { VarBuilder::from_mmaped_safetensors(&weights, dtype, device)? };
        Ok(vs)
    }

    pub fn tokenizer(&self) -> Result<tokenizers::Tokenizer> {
        let path = self.file(TOKENIZER_FILENAME)?;
        Ok(tokenizers::Tokenizer::from_file(path)?)
    }
}

fn is_not_found(err: &ImscoreError) -> bool {
    match err {
        ImscoreError::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
        ImscoreError::Hub(ApiError::RequestError(err)) => {
            matches!(err.as_ref(), ureq::Error::Status(404, _))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_directory_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILENAME), r#"{"backbone": "x"}"#).unwrap();

        let ckpt = Checkpoint::open(dir.path().to_str().unwrap());
        assert!(ckpt.local.is_some());
        let config: serde_json::Value = ckpt.config().unwrap();
        assert_eq!(config["backbone"], "x");
        assert!(matches!(
            ckpt.file(WEIGHTS_FILENAME),
            Err(ImscoreError::Io(_))
        ));
    }

    #[test]
    fn shards_come_from_the_index() {
        let dir = tempfile::tempdir().unwrap();
        let index = r#"{"weight_map": {
            "a.weight": "model-00002-of-00002.safetensors",
            "b.weight": "model-00001-of-00002.safetensors",
            "c.weight": "model-00001-of-00002.safetensors"
        }}"#;
        std::fs::write(dir.path().join(WEIGHTS_INDEX_FILENAME), index).unwrap();
        for shard in ["model-00001-of-00002.safetensors", "model-00002-of-00002.safetensors"] {
            std::fs::write(dir.path().join(shard), b"").unwrap();
        }

        let weights = Checkpoint::open(dir.path().to_str().unwrap()).weights().unwrap();
        let names: Vec<_> = weights
            .iter()
            .map(|path| path.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec!["model-00001-of-00002.safetensors", "model-00002-of-00002.safetensors"]
        );
    }

    #[test]
    fn only_missing_files_fall_back() {
        let missing = ImscoreError::Io(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(is_not_found(&missing));

        let denied = ImscoreError::Io(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert!(!is_not_found(&denied));

        let response = ureq::Response::new(404, "Not Found", "").unwrap();
        let gone = ApiError::RequestError(Box::new(ureq::Error::Status(404, response)));
        assert!(is_not_found(&ImscoreError::Hub(gone)));

        let response = ureq::Response::new(503, "Service Unavailable", "").unwrap();
        let down = ApiError::RequestError(Box::new(ureq::Error::Status(503, response)));
        assert!(!is_not_found(&ImscoreError::Hub(down)));
    }

    #[test]
    fn repo_ids_are_remote() {
        assert!(Checkpoint::open("RE-N-Y/hpsv21").local.is_none());
    }
}
