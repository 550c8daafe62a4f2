use candle_core::{Module, Result, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::siglip;
use serde::Deserialize;

use crate::model::clip::l2_normalize;
use crate::preprocess::Preprocess;

/// The handful of `config.json` values the wrappers need on top of
/// `siglip::Config`.
#[derive(Debug, Clone, Deserialize)]
pub struct SiglipDims {
    #[serde(default)]
    pub text_config: SiglipTextDims,
    #[serde(default)]
    pub vision_config: SiglipVisionDims,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiglipTextDims {
    #[serde(default = "default_max_position")]
    pub max_position_embeddings: usize,
    #[serde(default = "default_pad_token")]
    pub pad_token_id: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiglipVisionDims {
    #[serde(default = "default_hidden")]
    pub hidden_size: usize,
    #[serde(default = "default_image_size")]
    pub image_size: usize,
}

fn default_max_position() -> usize {
    64
}
fn default_pad_token() -> u32 {
    1
}
fn default_hidden() -> usize {
    768
}
fn default_image_size() -> usize {
    224
}

impl Default for SiglipTextDims {
    fn default() -> Self {
        SiglipTextDims {
            max_position_embeddings: default_max_position(),
            pad_token_id: default_pad_token(),
        }
    }
}

impl Default for SiglipVisionDims {
    fn default() -> Self {
        SiglipVisionDims {
            hidden_size: default_hidden(),
            image_size: default_image_size(),
        }
    }
}

/// Pooled, normalised image embeddings from the SigLIP vision tower.
pub struct SiglipVision {
    vision_model: siglip::VisionModel,
    preprocess: Preprocess,
    hidden_size: usize,
}

impl SiglipVision {
    pub fn new(vs: VarBuilder, config: &serde_json::Value) -> Result<Self> {
        let dims: SiglipDims =
            serde_json::from_value(config.clone()).map_err(candle_core::Error::wrap)?;
        let vision: siglip::VisionConfig = serde_json::from_value(
            config
                .get("vision_config")
                .cloned()
                .unwrap_or(serde_json::Value::Object(Default::default())),
        )
        .map_err(candle_core::Error::wrap)?;
        let vision_model = siglip::VisionModel::new(&vision, true, vs.pp("vision_model"))?;

        Ok(SiglipVision {
            vision_model,
            preprocess: Preprocess::half(dims.vision_config.image_size),
            hidden_size: dims.vision_config.hidden_size,
        })
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn forward(&self, pixels: &Tensor) -> Result<Tensor> {
        let xs = self.preprocess.forward(pixels)?;
        l2_normalize(&self.vision_model.forward(&xs)?)
    }
}

/// Both SigLIP towers with the learned scale and bias.
pub struct SiglipBackbone {
    model: siglip::Model,
    logit_scale: Tensor,
    logit_bias: Tensor,
    preprocess: Preprocess,
    dims: SiglipDims,
}

impl SiglipBackbone {
    pub fn new(vs: VarBuilder, config: &serde_json::Value) -> Result<Self> {
        let dims: SiglipDims =
            serde_json::from_value(config.clone()).map_err(candle_core::Error::wrap)?;
        let cfg: siglip::Config =
            serde_json::from_value(config.clone()).map_err(candle_core::Error::wrap)?;
        let model = siglip::Model::new(&cfg, vs.clone())?;
        let logit_scale = vs.get(1, "logit_scale")?;
        let logit_bias = vs.get(1, "logit_bias")?;

        Ok(SiglipBackbone {
            model,
            logit_scale,
            logit_bias,
            preprocess: Preprocess::half(dims.vision_config.image_size),
            dims,
        })
    }

    pub fn max_len(&self) -> usize {
        self.dims.text_config.max_position_embeddings
    }

    pub fn pad_id(&self) -> u32 {
        self.dims.text_config.pad_token_id
    }

    /// `exp(logit_scale) * cos(image_i, prompt_i) + logit_bias` per pair.
    pub fn forward(&self, pixels: &Tensor, input_ids: &Tensor) -> Result<Tensor> {
        let xs = self.preprocess.forward(pixels)?;
        let image_embeds = l2_normalize(&self.model.get_image_features(&xs)?)?;
        let text_embeds = l2_normalize(&self.model.get_text_features(input_ids)?)?;
        let sims = (image_embeds * text_embeds)?.sum(1)?;
        sims
            .broadcast_mul(&self.logit_scale.exp()?)?
            .broadcast_add(&self.logit_bias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dims_default_to_base_patch16() {
        let dims: SiglipDims = serde_json::from_str("{}").unwrap();
        assert_eq!(dims.text_config.max_position_embeddings, 64);
        assert_eq!(dims.text_config.pad_token_id, 1);
        assert_eq!(dims.vision_config.image_size, 224);

        let dims: SiglipDims =
            serde_json::from_str(r#"{"vision_config": {"image_size": 384, "hidden_size": 1152}}"#)
                .unwrap();
        assert_eq!(dims.vision_config.image_size, 384);
        assert_eq!(dims.vision_config.hidden_size, 1152);
    }
}
