use candle_core::{DType, Device, Tensor};

use crate::model::clip::{ClipBackbone, HfClipConfig};
use crate::model::siglip::SiglipBackbone;
use crate::model::{FromPretrained, Resolved, Scorer, Source};
use crate::tokenizer::PromptEncoder;
use crate::Result;

pub const CLIP_H_PROCESSOR: &str = "laion/CLIP-ViT-H-14-laion2B-s32B-b79K";
pub const CLIP_L_PROCESSOR: &str = "openai/clip-vit-large-patch14";
pub const SIGLIP_PREFERENCE_CHECKPOINT: &str = "RE-N-Y/pickscore-siglip";
pub const SIGLIP_PROCESSOR: &str = "google/siglip-base-patch16-224";

/// Where a CLIP-family preference scorer looks for its weights and, when the
/// checkpoint ships none, its tokenizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipDefaults {
    pub checkpoint: &'static str,
    pub processor: &'static str,
}

pub const HPSV2: ClipDefaults = ClipDefaults {
    checkpoint: "RE-N-Y/hpsv21",
    processor: CLIP_H_PROCESSOR,
};

pub const MPS: ClipDefaults = ClipDefaults {
    checkpoint: "RE-N-Y/mpsv1",
    processor: CLIP_H_PROCESSOR,
};

pub const PICKSCORE: ClipDefaults = ClipDefaults {
    checkpoint: "yuvalkirstain/PickScore_v1",
    processor: CLIP_H_PROCESSOR,
};

pub const CLIP_PREFERENCE: ClipDefaults = ClipDefaults {
    checkpoint: "RE-N-Y/pickscore-clip",
    processor: CLIP_L_PROCESSOR,
};

/// Temperature-scaled cosine similarity between each image and its prompt.
pub struct ClipPreferenceScorer {
    backbone: ClipBackbone,
    encoder: PromptEncoder,
}

impl ClipPreferenceScorer {
    pub fn new(backbone: ClipBackbone, encoder: PromptEncoder) -> Self {
        ClipPreferenceScorer { backbone, encoder }
    }

    /// Base models and checkpoints resolve the same way: both carry the
    /// complete `CLIPModel`.
    pub fn load(
        source: &Source,
        defaults: &ClipDefaults,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        match source {
            Source::Default => Self::from_checkpoint(defaults.checkpoint, defaults, device, dtype),
            Source::Pretrained(id) | Source::Base(id) => {
                Self::from_checkpoint(id, defaults, device, dtype)
            }
        }
    }

    fn from_checkpoint(
        id: &str,
        defaults: &ClipDefaults,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let resolved = Resolved::pretrained(id, device, dtype)?;
        let config: HfClipConfig = serde_json::from_value(resolved.backbone_config()?)?;
        let tokenizer = resolved.tokenizer(defaults.processor)?;
        let backbone = ClipBackbone::new(resolved.backbone, &config)?;

        Ok(Self::new(
            backbone,
            PromptEncoder::new(tokenizer, config.text_config.max_position_embeddings),
        ))
    }
}

impl FromPretrained for ClipPreferenceScorer {
    fn from_pretrained(checkpoint: &str, device: &Device, dtype: DType) -> Result<Self> {
        Self::from_checkpoint(checkpoint, &CLIP_PREFERENCE, device, dtype)
    }
}

impl Scorer for ClipPreferenceScorer {
    fn score(&self, pixels: &Tensor, prompts: &[String]) -> Result<Tensor> {
        let input_ids = self.encoder.encode(prompts, pixels.device())?;
        Ok(self.backbone.forward(pixels, &input_ids)?)
    }
}

/// Sigmoid-loss counterpart of [`ClipPreferenceScorer`].
pub struct SiglipPreferenceScorer {
    backbone: SiglipBackbone,
    encoder: PromptEncoder,
}

impl SiglipPreferenceScorer {
    pub fn new(backbone: SiglipBackbone, encoder: PromptEncoder) -> Self {
        SiglipPreferenceScorer { backbone, encoder }
    }

    pub fn load(source: &Source, device: &Device, dtype: DType) -> Result<Self> {
        match source {
            Source::Default => Self::from_pretrained(SIGLIP_PREFERENCE_CHECKPOINT, device, dtype),
            Source::Pretrained(id) | Source::Base(id) => Self::from_pretrained(id, device, dtype),
        }
    }
}

impl FromPretrained for SiglipPreferenceScorer {
    fn from_pretrained(checkpoint: &str, device: &Device, dtype: DType) -> Result<Self> {
        let resolved = Resolved::pretrained(checkpoint, device, dtype)?;
        let config = resolved.backbone_config()?;
        let tokenizer = resolved.tokenizer(SIGLIP_PROCESSOR)?;
        let backbone = SiglipBackbone::new(resolved.backbone, &config)?;
        let encoder =
            PromptEncoder::new(tokenizer, backbone.max_len()).with_pad_id(backbone.pad_id());

        Ok(Self::new(backbone, encoder))
    }
}

impl Scorer for SiglipPreferenceScorer {
    fn score(&self, pixels: &Tensor, prompts: &[String]) -> Result<Tensor> {
        let input_ids = self.encoder.encode(prompts, pixels.device())?;
        Ok(self.backbone.forward(pixels, &input_ids)?)
    }
}
