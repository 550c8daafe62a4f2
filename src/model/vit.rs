use std::collections::BTreeMap;

use candle_core::{IndexOp, Module, Result, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::vit;
use serde::Deserialize;

use crate::preprocess::{Preprocess, HALF};

/// Label and input-size fields of a `ViTForImageClassification` config.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierDims {
    #[serde(default)]
    pub id2label: BTreeMap<String, String>,
    #[serde(default = "default_image_size")]
    pub image_size: usize,
}

fn default_image_size() -> usize {
    224
}

impl ClassifierDims {
    pub fn num_labels(&self) -> usize {
        self.id2label.len().max(1)
    }

    /// Index of `label`, falling back to the first class.
    pub fn label_index(&self, label: &str) -> usize {
        self.id2label
            .iter()
            .find(|(_, name)| name.as_str() == label)
            .and_then(|(id, _)| id.parse().ok())
            .unwrap_or(0)
    }
}

/// ViT image classifier reduced to the logit of one label.
pub struct VitClassifier {
    model: vit::Model,
    preprocess: Preprocess,
    label: usize,
}

impl VitClassifier {
    pub fn new(vs: VarBuilder, config: &serde_json::Value, label: &str) -> Result<Self> {
        let dims: ClassifierDims =
            serde_json::from_value(config.clone()).map_err(candle_core::Error::wrap)?;
        let cfg: vit::Config =
            serde_json::from_value(config.clone()).map_err(candle_core::Error::wrap)?;
        let model = vit::Model::new(&cfg, dims.num_labels(), vs)?;

        Ok(VitClassifier {
            model,
            preprocess: Preprocess::new(dims.image_size, HALF, HALF),
            label: dims.label_index(label),
        })
    }

    pub fn forward(&self, pixels: &Tensor) -> Result<Tensor> {
        let xs = self.preprocess.forward(pixels)?;
        self.model.forward(&xs)?.i((.., self.label))?.contiguous()
    }
}
