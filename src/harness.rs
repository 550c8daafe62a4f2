use std::path::PathBuf;

use candle_core::{DType, Device, Tensor, Var};
use tracing::debug;

use crate::batch::Batch;
use crate::model::{build, ModelName, Scorer, Source};
use crate::{ImscoreError, Result};

pub const DEFAULT_PROMPT: &str = "a photo of a cat";
pub const DEFAULT_SIZE: usize = 512;
pub const GOOD_IMAGE: &str = "cat.png";
pub const BAD_IMAGE: &str = "badcat.png";

/// Everything one smoke run needs besides the model name.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub device: Device,
    pub dtype: DType,
    pub images: [PathBuf; 2],
    pub prompt: String,
    pub size: usize,
    /// Fail the run when the score is not linked to the pixels.
    pub check_grad: bool,
    /// Overrides every name's registered source.
    pub source: Option<Source>,
}

impl RunOptions {
    pub fn new(device: Device, dtype: DType) -> Self {
        RunOptions {
            device,
            dtype,
            images: [PathBuf::from(GOOD_IMAGE), PathBuf::from(BAD_IMAGE)],
            prompt: DEFAULT_PROMPT.to_string(),
            size: DEFAULT_SIZE,
            check_grad: true,
            source: None,
        }
    }
}

/// Loads `name`, scores the sample pair once and returns the raw logits.
pub fn testrun(name: &str, options: &RunOptions) -> Result<Tensor> {
    let name: ModelName = name.parse()?;
    let source = options
        .source
        .clone()
        .unwrap_or_else(|| name.default_source());
    let model = build(name, &source, &options.device, options.dtype)?;
    debug!("{} built, prompt-aware: {}", name, name.uses_prompts());

    run_scorer(name.as_str(), model.as_ref(), options)
}

/// Scores the sample pair with an already built `model`. With `check_grad`
/// set, a score that does not depend on the pixels is an error.
pub fn run_scorer(name: &str, model: &dyn Scorer, options: &RunOptions) -> Result<Tensor> {
    let batch = Batch::load(
        &options.images,
        options.size,
        &options.prompt,
        &options.device,
        options.dtype,
    )?;
    debug!(
        "{}: pixels {:?}, {} prompts",
        name,
        batch.pixels.shape(),
        batch.len()
    );

    let pixels = if options.check_grad {
        Var::from_tensor(&batch.pixels)?.as_tensor().clone()
    } else {
        batch.pixels
    };

    let score = model.score(&pixels, &batch.prompts)?;

    if options.check_grad && !score.track_op() {
        return Err(ImscoreError::DetachedScore(name.to_string()));
    }

    Ok(score)
}
