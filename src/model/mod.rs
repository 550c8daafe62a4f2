pub mod aesthetic;
pub mod clip;
pub mod dinov2;
pub mod head;
pub mod preference;
pub mod siglip;
pub mod vit;

use std::fmt;
use std::str::FromStr;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use tracing::debug;

use crate::hub::Checkpoint;
use crate::{ImscoreError, Result};

pub use aesthetic::{
    AestheticScorer, ClipAestheticScorer, Dinov2AestheticScorer, ImageEncoder,
    LaionAestheticScorer, ShadowAesthetic, SiglipAestheticScorer,
};
pub use preference::{ClipPreferenceScorer, SiglipPreferenceScorer};

/// Maps an image batch in [0, 1] and one prompt per image to one raw logit
/// per image, shape `(batch,)`.
pub trait Scorer {
    fn score(&self, pixels: &Tensor, prompts: &[String]) -> Result<Tensor>;
}

pub trait FromPretrained: Sized {
    fn from_pretrained(checkpoint: &str, device: &Device, dtype: DType) -> Result<Self>;
}

/// How a scorer gets its weights.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// The scorer's own default checkpoint or base model.
    Default,
    /// A named checkpoint holding backbone and reward head.
    Pretrained(String),
    /// A bare backbone; reward heads start from a fresh initialisation.
    Base(String),
}

impl Source {
    pub fn or(&self, default: Source) -> Source {
        match self {
            Source::Default => default,
            other => other.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelName {
    ShadowAesthetic,
    ClipAesthetic,
    SiglipAesthetic,
    Dinov2Aesthetic,
    LaionAesthetic,
    HpsV2,
    Mps,
    SiglipPreference,
    ClipPreference,
    PickScore,
}

impl ModelName {
    pub const ALL: [ModelName; 10] = [
        ModelName::ShadowAesthetic,
        ModelName::ClipAesthetic,
        ModelName::SiglipAesthetic,
        ModelName::Dinov2Aesthetic,
        ModelName::LaionAesthetic,
        ModelName::HpsV2,
        ModelName::Mps,
        ModelName::SiglipPreference,
        ModelName::ClipPreference,
        ModelName::PickScore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelName::ShadowAesthetic => "ShadowAesthetic",
            ModelName::ClipAesthetic => "CLIPAestheticScorer",
            ModelName::SiglipAesthetic => "SiglipAestheticScorer",
            ModelName::Dinov2Aesthetic => "Dinov2AestheticScorer",
            ModelName::LaionAesthetic => "LAIONAestheticScorer",
            ModelName::HpsV2 => "HPSv2",
            ModelName::Mps => "MPS",
            ModelName::SiglipPreference => "SiglipPreferenceScorer",
            ModelName::ClipPreference => "CLIPPreferenceScorer",
            ModelName::PickScore => "PickScorer",
        }
    }

    /// The source `factory` builds each name from.
    pub fn default_source(&self) -> Source {
        let pretrained = |id: &str| Source::Pretrained(id.to_string());
        match self {
            ModelName::ShadowAesthetic => Source::Default,
            ModelName::ClipAesthetic => pretrained("RE-N-Y/ava-rating-clip-sampled-True"),
            ModelName::SiglipAesthetic => pretrained("RE-N-Y/imreward-overall_rating-siglip"),
            ModelName::Dinov2Aesthetic => pretrained("RE-N-Y/imreward-overall_rating-dinov2"),
            ModelName::LaionAesthetic => pretrained("RE-N-Y/laion-aesthetic"),
            ModelName::HpsV2 => pretrained("RE-N-Y/hpsv21"),
            ModelName::Mps => pretrained("RE-N-Y/mpsv1"),
            ModelName::SiglipPreference => pretrained("RE-N-Y/pickscore-siglip"),
            ModelName::ClipPreference => pretrained("RE-N-Y/pickscore-clip"),
            ModelName::PickScore => Source::Default,
        }
    }

    pub fn uses_prompts(&self) -> bool {
        matches!(
            self,
            ModelName::HpsV2
                | ModelName::Mps
                | ModelName::SiglipPreference
                | ModelName::ClipPreference
                | ModelName::PickScore
        )
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelName {
    type Err = ImscoreError;

    fn from_str(s: &str) -> Result<Self> {
        ModelName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| ImscoreError::UnknownModel(s.to_string()))
    }
}

pub fn build(
    name: ModelName,
    source: &Source,
    device: &Device,
    dtype: DType,
) -> Result<Box<dyn Scorer>> {
    debug!("building {} from {:?}", name, source);
    let scorer: Box<dyn Scorer> = match name {
        ModelName::ShadowAesthetic => Box::new(ShadowAesthetic::load(source, device, dtype)?),
        ModelName::ClipAesthetic => Box::new(ClipAestheticScorer::load(
            source,
            Source::Base(aesthetic::CLIP_BASE.to_string()),
            device,
            dtype,
        )?),
        ModelName::SiglipAesthetic => Box::new(SiglipAestheticScorer::load(
            source,
            Source::Base(aesthetic::SIGLIP_BASE.to_string()),
            device,
            dtype,
        )?),
        ModelName::Dinov2Aesthetic => Box::new(Dinov2AestheticScorer::load(
            source,
            Source::Base(aesthetic::DINOV2_BASE.to_string()),
            device,
            dtype,
        )?),
        ModelName::LaionAesthetic => Box::new(LaionAestheticScorer::load(
            source,
            Source::Pretrained(aesthetic::LAION_CHECKPOINT.to_string()),
            device,
            dtype,
        )?),
        ModelName::HpsV2 => Box::new(ClipPreferenceScorer::load(
            source,
            &preference::HPSV2,
            device,
            dtype,
        )?),
        ModelName::Mps => Box::new(ClipPreferenceScorer::load(
            source,
            &preference::MPS,
            device,
            dtype,
        )?),
        ModelName::ClipPreference => Box::new(ClipPreferenceScorer::load(
            source,
            &preference::CLIP_PREFERENCE,
            device,
            dtype,
        )?),
        ModelName::PickScore => Box::new(ClipPreferenceScorer::load(
            source,
            &preference::PICKSCORE,
            device,
            dtype,
        )?),
        ModelName::SiglipPreference => {
            Box::new(SiglipPreferenceScorer::load(source, device, dtype)?)
        }
    };

    Ok(scorer)
}

/// Builds the scorer registered under `name` from its default source.
pub fn factory(name: &str, device: &Device, dtype: DType) -> Result<Box<dyn Scorer>> {
    let name: ModelName = name.parse()?;
    build(name, &name.default_source(), device, dtype)
}

/// Weights and assets located for one scorer.
pub(crate) struct Resolved {
    /// Backbone weights.
    pub backbone: VarBuilder<'static>,
    /// Reward-head weights; `None` for base models, which get a fresh head.
    pub head: Option<VarBuilder<'static>>,
    /// Where the backbone `config.json` and `tokenizer.json` live.
    pub assets: Checkpoint,
    /// The checkpoint's own `config.json`.
    pub config: serde_json::Value,
}

impl Resolved {
    pub fn pretrained(id: &str, device: &Device, dtype: DType) -> Result<Self> {
        let checkpoint = Checkpoint::open(id);
        let config: serde_json::Value = checkpoint.config()?;
        let root = checkpoint.var_builder(dtype, device)?;

        match config.get("backbone").and_then(|backbone| backbone.as_str()) {
            Some(backbone) => {
                debug!("{} wraps backbone {}", id, backbone);
                Ok(Resolved {
                    backbone: root.pp("backbone"),
                    head: Some(root.pp("head")),
                    assets: Checkpoint::open(backbone),
                    config,
                })
            }
            None => Ok(Resolved {
                backbone: root.clone(),
                head: Some(root.pp("head")),
                assets: checkpoint,
                config,
            }),
        }
    }

    pub fn base(id: &str, device: &Device, dtype: DType) -> Result<Self> {
        let checkpoint = Checkpoint::open(id);
        let backbone = checkpoint.var_builder(dtype, device)?;

        Ok(Resolved {
            backbone,
            head: None,
            assets: checkpoint,
            config: serde_json::Value::Object(Default::default()),
        })
    }

    pub fn backbone_config(&self) -> Result<serde_json::Value> {
        self.assets.config()
    }

    pub fn tokenizer(&self, fallback: &str) -> Result<tokenizers::Tokenizer> {
        match self.assets.tokenizer() {
            Ok(tokenizer) => Ok(tokenizer),
            Err(err) => {
                debug!(
                    "no tokenizer in {} ({}), using {}",
                    self.assets.id(),
                    err,
                    fallback
                );
                Checkpoint::open(fallback).tokenizer()
            }
        }
    }
}
