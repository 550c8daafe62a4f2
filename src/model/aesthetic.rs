use candle_core::{DType, Device, Module, Tensor};
use candle_nn::VarBuilder;
use tracing::debug;

use crate::hub::Checkpoint;
use crate::model::clip::{ClipVision, HfClipConfig};
use crate::model::dinov2::{self, Dinov2};
use crate::model::head::{HeadConfig, RewardHead};
use crate::model::siglip::SiglipVision;
use crate::model::vit::VitClassifier;
use crate::model::{FromPretrained, Resolved, Scorer, Source};
use crate::{ImscoreError, Result};

pub const CLIP_BASE: &str = "openai/clip-vit-large-patch14";
pub const SIGLIP_BASE: &str = "google/siglip-base-patch16-224";
pub const DINOV2_BASE: &str = "facebook/dinov2-base";
pub const LAION_CHECKPOINT: &str = "RE-N-Y/laion-aesthetic";
pub const SHADOW_CHECKPOINT: &str = "shadowlilac/aesthetic-shadow-v2";

/// Image backbone whose pooled embedding feeds a reward head.
pub trait ImageEncoder: Sized {
    fn load(vs: VarBuilder, config: &serde_json::Value) -> candle_core::Result<Self>;

    fn embed_dim(&self) -> usize;

    fn encode(&self, pixels: &Tensor) -> candle_core::Result<Tensor>;
}

impl ImageEncoder for ClipVision {
    fn load(vs: VarBuilder, config: &serde_json::Value) -> candle_core::Result<Self> {
        let config: HfClipConfig =
            serde_json::from_value(config.clone()).map_err(candle_core::Error::wrap)?;
        ClipVision::new(vs, &config)
    }

    fn embed_dim(&self) -> usize {
        self.projection_dim()
    }

    fn encode(&self, pixels: &Tensor) -> candle_core::Result<Tensor> {
        self.forward(pixels)
    }
}

impl ImageEncoder for SiglipVision {
    fn load(vs: VarBuilder, config: &serde_json::Value) -> candle_core::Result<Self> {
        SiglipVision::new(vs, config)
    }

    fn embed_dim(&self) -> usize {
        self.hidden_size()
    }

    fn encode(&self, pixels: &Tensor) -> candle_core::Result<Tensor> {
        self.forward(pixels)
    }
}

impl ImageEncoder for Dinov2 {
    fn load(vs: VarBuilder, config: &serde_json::Value) -> candle_core::Result<Self> {
        let config: dinov2::Config =
            serde_json::from_value(config.clone()).map_err(candle_core::Error::wrap)?;
        Dinov2::new(vs, &config)
    }

    fn embed_dim(&self) -> usize {
        self.hidden_size()
    }

    fn encode(&self, pixels: &Tensor) -> candle_core::Result<Tensor> {
        self.forward(pixels)
    }
}

/// Prompt-free scorer: backbone embedding, then an MLP reward head.
pub struct AestheticScorer<E> {
    encoder: E,
    head: RewardHead,
}

pub type ClipAestheticScorer = AestheticScorer<ClipVision>;
pub type SiglipAestheticScorer = AestheticScorer<SiglipVision>;
pub type Dinov2AestheticScorer = AestheticScorer<Dinov2>;
/// The LAION predictor is the CLIP ViT-L/14 layout with its own checkpoint.
pub type LaionAestheticScorer = AestheticScorer<ClipVision>;

impl<E: ImageEncoder> AestheticScorer<E> {
    pub fn new(encoder: E, head: RewardHead) -> Self {
        AestheticScorer { encoder, head }
    }

    fn from_resolved(resolved: Resolved) -> Result<Self> {
        let backbone_config = resolved.backbone_config()?;
        let head_config: HeadConfig = match resolved.config.get("head") {
            Some(head) => serde_json::from_value(head.clone())?,
            None => HeadConfig::default(),
        };
        let dtype = resolved.backbone.dtype();
        let device = resolved.backbone.device().clone();
        let encoder = E::load(resolved.backbone, &backbone_config)?;
        let embed_dim = encoder.embed_dim();

        let head = match resolved.head {
            Some(vs) => RewardHead::new(vs, embed_dim, &head_config)?,
            None => {
                debug!("fresh {}-wide reward head", embed_dim);
                RewardHead::fresh(embed_dim, &head_config, dtype, &device)?
            }
        };
        Ok(Self::new(encoder, head))
    }

    /// Explicit base model, fresh reward head.
    pub fn with_base(base_model: &str, device: &Device, dtype: DType) -> Result<Self> {
        debug!("aesthetic head over base model {}", base_model);
        Self::from_resolved(Resolved::base(base_model, device, dtype)?)
    }

    /// `Default` falls back to `default`: a base model for the backbone
    /// scorers, a full checkpoint for LAION.
    pub fn load(source: &Source, default: Source, device: &Device, dtype: DType) -> Result<Self> {
        match source.or(default) {
            Source::Pretrained(id) => Self::from_pretrained(&id, device, dtype),
            Source::Base(id) => Self::with_base(&id, device, dtype),
            Source::Default => Err(ImscoreError::InvalidArgument(
                "aesthetic scorers need a checkpoint or a base model".to_string(),
            )),
        }
    }
}

impl<E: ImageEncoder> FromPretrained for AestheticScorer<E> {
    fn from_pretrained(checkpoint: &str, device: &Device, dtype: DType) -> Result<Self> {
        Self::from_resolved(Resolved::pretrained(checkpoint, device, dtype)?)
    }
}

impl<E: ImageEncoder> Scorer for AestheticScorer<E> {
    fn score(&self, pixels: &Tensor, _prompts: &[String]) -> Result<Tensor> {
        let embeds = self.encoder.encode(pixels)?;
        Ok(self.head.forward(&embeds)?)
    }
}

/// ViT classifier trained on high/low quality labels; the score is the
/// `hq` logit.
pub struct ShadowAesthetic {
    classifier: VitClassifier,
}

impl ShadowAesthetic {
    pub fn new(device: &Device, dtype: DType) -> Result<Self> {
        Self::from_pretrained(SHADOW_CHECKPOINT, device, dtype)
    }

    pub fn load(source: &Source, device: &Device, dtype: DType) -> Result<Self> {
        match source {
            Source::Default => Self::new(device, dtype),
            Source::Pretrained(id) | Source::Base(id) => Self::from_pretrained(id, device, dtype),
        }
    }
}

impl FromPretrained for ShadowAesthetic {
    fn from_pretrained(checkpoint: &str, device: &Device, dtype: DType) -> Result<Self> {
        let checkpoint = Checkpoint::open(checkpoint);
        let config: serde_json::Value = checkpoint.config()?;
        if config.get("id2label").is_none() {
            return Err(ImscoreError::InvalidArgument(format!(
                "{} is not an image classifier",
                checkpoint.id()
            )));
        }
        let vs = checkpoint.var_builder(dtype, device)?;

        Ok(ShadowAesthetic {
            classifier: VitClassifier::new(vs, &config, "hq")?,
        })
    }
}

impl Scorer for ShadowAesthetic {
    fn score(&self, pixels: &Tensor, _prompts: &[String]) -> Result<Tensor> {
        Ok(self.classifier.forward(pixels)?)
    }
}
