// CLIP towers laid out like the Hugging Face `CLIPModel` checkpoints:
//
// {text,vision}_model.encoder.layers.{i}.self_attn.{q,k,v,out}_proj
// {text,vision}_model.encoder.layers.{i}.layer_norm1 / layer_norm2
// {text,vision}_model.encoder.layers.{i}.mlp.fc1 / fc2
// text_model.embeddings.{token,position}_embedding.weight
// text_model.final_layer_norm
// vision_model.embeddings.class_embedding
// vision_model.embeddings.patch_embedding.weight
// vision_model.embeddings.position_embedding.weight
// vision_model.pre_layrnorm / post_layernorm
// text_projection / visual_projection / logit_scale
//

use candle_core::{DType, Device, IndexOp, Module, Result, Tensor, D};
use candle_nn::{layer_norm, linear, linear_no_bias, Conv2dConfig, LayerNorm, Linear, VarBuilder};
use serde::Deserialize;

use crate::preprocess::Preprocess;

/// MLP activation named by `hidden_act`. OpenAI checkpoints use `quick_gelu`,
/// the OpenCLIP ViT-H/14 family uses `gelu`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HiddenAct {
    #[default]
    QuickGelu,
    #[serde(untagged)]
    Other(candle_nn::Activation),
}

impl Module for HiddenAct {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        match self {
            HiddenAct::QuickGelu => xs * candle_nn::ops::sigmoid(&(xs * 1.702)?)?,
            HiddenAct::Other(activation) => activation.forward(xs),
        }
    }
}

/// `config.json` of a Hugging Face `CLIPModel`.
#[derive(Debug, Clone, Deserialize)]
pub struct HfClipConfig {
    pub text_config: HfClipTextConfig,
    pub vision_config: HfClipVisionConfig,
    #[serde(default = "default_projection_dim")]
    pub projection_dim: usize,
    #[serde(default = "default_logit_scale")]
    pub logit_scale_init_value: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HfClipTextConfig {
    #[serde(default = "default_vocab_size")]
    pub vocab_size: usize,
    #[serde(default = "default_text_hidden")]
    pub hidden_size: usize,
    #[serde(default = "default_text_intermediate")]
    pub intermediate_size: usize,
    #[serde(default = "default_layers")]
    pub num_hidden_layers: usize,
    #[serde(default = "default_text_heads")]
    pub num_attention_heads: usize,
    #[serde(default = "default_max_position")]
    pub max_position_embeddings: usize,
    #[serde(default)]
    pub hidden_act: HiddenAct,
    #[serde(default = "default_eps")]
    pub layer_norm_eps: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HfClipVisionConfig {
    #[serde(default = "default_vision_hidden")]
    pub hidden_size: usize,
    #[serde(default = "default_vision_intermediate")]
    pub intermediate_size: usize,
    #[serde(default = "default_layers")]
    pub num_hidden_layers: usize,
    #[serde(default = "default_vision_heads")]
    pub num_attention_heads: usize,
    #[serde(default = "default_channels")]
    pub num_channels: usize,
    #[serde(default = "default_image_size")]
    pub image_size: usize,
    #[serde(default = "default_patch_size")]
    pub patch_size: usize,
    #[serde(default)]
    pub hidden_act: HiddenAct,
    #[serde(default = "default_eps")]
    pub layer_norm_eps: f64,
}

fn default_projection_dim() -> usize {
    512
}
fn default_logit_scale() -> f32 {
    2.6592
}
fn default_vocab_size() -> usize {
    49408
}
fn default_text_hidden() -> usize {
    512
}
fn default_text_intermediate() -> usize {
    2048
}
fn default_layers() -> usize {
    12
}
fn default_text_heads() -> usize {
    8
}
fn default_max_position() -> usize {
    77
}
fn default_vision_hidden() -> usize {
    768
}
fn default_vision_intermediate() -> usize {
    3072
}
fn default_vision_heads() -> usize {
    12
}
fn default_channels() -> usize {
    3
}
fn default_image_size() -> usize {
    224
}
fn default_patch_size() -> usize {
    32
}
fn default_eps() -> f64 {
    1e-5
}

#[derive(Debug, Clone, Copy)]
struct EncoderConfig {
    hidden_size: usize,
    intermediate_size: usize,
    num_hidden_layers: usize,
    num_attention_heads: usize,
    hidden_act: HiddenAct,
    layer_norm_eps: f64,
}

impl HfClipTextConfig {
    fn encoder(&self) -> EncoderConfig {
        EncoderConfig {
            hidden_size: self.hidden_size,
            intermediate_size: self.intermediate_size,
            num_hidden_layers: self.num_hidden_layers,
            num_attention_heads: self.num_attention_heads,
            hidden_act: self.hidden_act,
            layer_norm_eps: self.layer_norm_eps,
        }
    }
}

impl HfClipVisionConfig {
    fn encoder(&self) -> EncoderConfig {
        EncoderConfig {
            hidden_size: self.hidden_size,
            intermediate_size: self.intermediate_size,
            num_hidden_layers: self.num_hidden_layers,
            num_attention_heads: self.num_attention_heads,
            hidden_act: self.hidden_act,
            layer_norm_eps: self.layer_norm_eps,
        }
    }

    pub fn num_positions(&self) -> usize {
        let side = self.image_size / self.patch_size;
        side * side + 1
    }
}

pub(crate) fn l2_normalize(xs: &Tensor) -> Result<Tensor> {
    let norm = xs.sqr()?.sum_keepdim(1)?.sqrt()?;
    xs.broadcast_div(&norm)
}

#[derive(Debug)]
struct Attention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    out_proj: Linear,
    num_heads: usize,
    scale: f64,
}

impl Attention {
    fn new(c: &EncoderConfig, vs: VarBuilder) -> Result<Self> {
        let h = c.hidden_size;
        Ok(Attention {
            q_proj: linear(h, h, vs.pp("q_proj"))?,
            k_proj: linear(h, h, vs.pp("k_proj"))?,
            v_proj: linear(h, h, vs.pp("v_proj"))?,
            out_proj: linear(h, h, vs.pp("out_proj"))?,
            num_heads: c.num_attention_heads,
            scale: 1. / ((h / c.num_attention_heads) as f64).sqrt(),
        })
    }

    fn heads(&self, xs: &Tensor) -> Result<Tensor> {
        let (b, n, h) = xs.dims3()?;
        xs.reshape((b, n, self.num_heads, h / self.num_heads))?
            .transpose(1, 2)?
            .contiguous()
    }

    fn forward(&self, xs: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
        let (b, n, h) = xs.dims3()?;
        let q = self.heads(&(self.q_proj.forward(xs)? * self.scale)?)?;
        let k = self.heads(&self.k_proj.forward(xs)?)?;
        let v = self.heads(&self.v_proj.forward(xs)?)?;

        let att = q.matmul(&k.t()?)?;
        let att = match mask {
            Some(mask) => att.broadcast_add(mask)?,
            None => att,
        };
        let att = candle_nn::ops::softmax_last_dim(&att)?;
        let xs = att
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b, n, h))?;
        self.out_proj.forward(&xs)
    }
}

#[derive(Debug)]
struct EncoderLayer {
    self_attn: Attention,
    layer_norm1: LayerNorm,
    fc1: Linear,
    fc2: Linear,
    activation: HiddenAct,
    layer_norm2: LayerNorm,
}

impl EncoderLayer {
    fn new(c: &EncoderConfig, vs: VarBuilder) -> Result<Self> {
        let h = c.hidden_size;
        Ok(EncoderLayer {
            self_attn: Attention::new(c, vs.pp("self_attn"))?,
            layer_norm1: layer_norm(h, c.layer_norm_eps, vs.pp("layer_norm1"))?,
            fc1: linear(h, c.intermediate_size, vs.pp("mlp.fc1"))?,
            fc2: linear(c.intermediate_size, h, vs.pp("mlp.fc2"))?,
            activation: c.hidden_act,
            layer_norm2: layer_norm(h, c.layer_norm_eps, vs.pp("layer_norm2"))?,
        })
    }

    fn forward(&self, xs: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
        let residual = xs;
        let xs = self
            .self_attn
            .forward(&self.layer_norm1.forward(xs)?, mask)?;
        let xs = (xs + residual)?;

        let residual = &xs;
        let mlp = self.layer_norm2.forward(&xs)?;
        let mlp = self.activation.forward(&self.fc1.forward(&mlp)?)?;
        self.fc2.forward(&mlp)? + residual
    }
}

#[derive(Debug)]
struct Encoder {
    layers: Vec<EncoderLayer>,
}

impl Encoder {
    fn new(c: &EncoderConfig, vs: VarBuilder) -> Result<Self> {
        let layers = (0..c.num_hidden_layers)
            .map(|i| EncoderLayer::new(c, vs.pp(format!("layers.{i}"))))
            .collect::<Result<Vec<_>>>()?;
        Ok(Encoder { layers })
    }

    fn forward(&self, xs: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
        self.layers
            .iter()
            .try_fold(xs.clone(), |xs, layer| layer.forward(&xs, mask))
    }
}

/// `-inf` above the diagonal so a token only attends to its prefix.
fn causal_mask(len: usize, dtype: DType, device: &Device) -> Result<Tensor> {
    let mask: Vec<f32> = (0..len)
        .flat_map(|i| (0..len).map(move |j| if j > i { f32::NEG_INFINITY } else { 0. }))
        .collect();
    Tensor::from_slice(&mask, (len, len), device)?.to_dtype(dtype)
}

#[derive(Debug)]
struct VisionTransformer {
    class_embedding: Tensor,
    patch_embedding: candle_nn::Conv2d,
    position_embedding: Tensor,
    pre_layrnorm: LayerNorm,
    encoder: Encoder,
    post_layernorm: LayerNorm,
}

impl VisionTransformer {
    fn new(c: &HfClipVisionConfig, vs: VarBuilder) -> Result<Self> {
        let h = c.hidden_size;
        let encoder_config = c.encoder();
        let embeddings = vs.pp("embeddings");
        let conv_config = Conv2dConfig {
            stride: c.patch_size,
            ..Default::default()
        };

        Ok(VisionTransformer {
            class_embedding: embeddings.get(h, "class_embedding")?,
            patch_embedding: candle_nn::conv2d_no_bias(
                c.num_channels,
                h,
                c.patch_size,
                conv_config,
                embeddings.pp("patch_embedding"),
            )?,
            position_embedding: embeddings
                .get((c.num_positions(), h), "position_embedding.weight")?,
            pre_layrnorm: layer_norm(h, c.layer_norm_eps, vs.pp("pre_layrnorm"))?,
            encoder: Encoder::new(&encoder_config, vs.pp("encoder"))?,
            post_layernorm: layer_norm(h, c.layer_norm_eps, vs.pp("post_layernorm"))?,
        })
    }

    /// Pooled CLS state, `(batch, hidden_size)`.
    fn forward(&self, pixels: &Tensor) -> Result<Tensor> {
        let b = pixels.dim(0)?;
        let patches = self
            .patch_embedding
            .forward(pixels)?
            .flatten_from(2)?
            .transpose(1, 2)?;
        let (_, n, h) = patches.dims3()?;
        if n + 1 != self.position_embedding.dim(0)? {
            candle_core::bail!(
                "clip vision tower expects {} patches, got {}",
                self.position_embedding.dim(0)? - 1,
                n
            )
        }
        let class = self.class_embedding.reshape((1, 1, h))?.broadcast_as((b, 1, h))?;
        let xs = Tensor::cat(&[&class, &patches], 1)?
            .broadcast_add(&self.position_embedding.unsqueeze(0)?)?;

        let xs = self.pre_layrnorm.forward(&xs)?;
        let xs = self.encoder.forward(&xs, None)?;
        self.post_layernorm.forward(&xs.i((.., 0, ..))?.contiguous()?)
    }
}

#[derive(Debug)]
struct TextTransformer {
    token_embedding: candle_nn::Embedding,
    position_embedding: Tensor,
    encoder: Encoder,
    final_layer_norm: LayerNorm,
}

impl TextTransformer {
    fn new(c: &HfClipTextConfig, vs: VarBuilder) -> Result<Self> {
        let h = c.hidden_size;
        let encoder_config = c.encoder();
        let embeddings = vs.pp("embeddings");

        Ok(TextTransformer {
            token_embedding: candle_nn::embedding(
                c.vocab_size,
                h,
                embeddings.pp("token_embedding"),
            )?,
            position_embedding: embeddings
                .get((c.max_position_embeddings, h), "position_embedding.weight")?,
            encoder: Encoder::new(&encoder_config, vs.pp("encoder"))?,
            final_layer_norm: layer_norm(h, c.layer_norm_eps, vs.pp("final_layer_norm"))?,
        })
    }

    /// Final state at each row's end-of-text token, the highest id in the row.
    fn forward(&self, input_ids: &Tensor) -> Result<Tensor> {
        let (b, len) = input_ids.dims2()?;
        let max_len = self.position_embedding.dim(0)?;
        if len > max_len {
            candle_core::bail!("prompt of {len} tokens exceeds {max_len} positions")
        }

        let xs = self
            .token_embedding
            .forward(input_ids)?
            .broadcast_add(&self.position_embedding.narrow(0, 0, len)?)?;
        let mask = causal_mask(len, xs.dtype(), xs.device())?;
        let xs = self.encoder.forward(&xs, Some(&mask))?;
        let xs = self.final_layer_norm.forward(&xs)?;

        let rows = input_ids
            .argmax(D::Minus1)?
            .to_vec1::<u32>()?
            .into_iter()
            .enumerate()
            .map(|(i, pos)| (i * len) as u32 + pos)
            .collect::<Vec<_>>();
        let rows = Tensor::from_vec(rows, b, xs.device())?;
        let h = xs.dim(2)?;
        xs.reshape((b * len, h))?.index_select(&rows, 0)
    }
}

/// Vision tower plus projection; yields normalised image embeddings.
#[derive(Debug)]
pub struct ClipVision {
    vision_model: VisionTransformer,
    visual_projection: Linear,
    preprocess: Preprocess,
    projection_dim: usize,
}

impl ClipVision {
    pub fn new(vs: VarBuilder, c: &HfClipConfig) -> Result<Self> {
        let vision = &c.vision_config;
        let vision_model = VisionTransformer::new(vision, vs.pp("vision_model"))?;
        let visual_projection =
            linear_no_bias(vision.hidden_size, c.projection_dim, vs.pp("visual_projection"))?;

        Ok(ClipVision {
            vision_model,
            visual_projection,
            preprocess: Preprocess::clip(vision.image_size),
            projection_dim: c.projection_dim,
        })
    }

    pub fn projection_dim(&self) -> usize {
        self.projection_dim
    }

    pub fn forward(&self, pixels: &Tensor) -> Result<Tensor> {
        let xs = self.preprocess.forward(pixels)?;
        let xs = self.vision_model.forward(&xs)?;
        l2_normalize(&self.visual_projection.forward(&xs)?)
    }
}

/// Text tower plus projection; yields normalised prompt embeddings.
#[derive(Debug)]
pub struct ClipText {
    text_model: TextTransformer,
    text_projection: Linear,
}

impl ClipText {
    pub fn new(vs: VarBuilder, c: &HfClipConfig) -> Result<Self> {
        let text = &c.text_config;
        let text_model = TextTransformer::new(text, vs.pp("text_model"))?;
        let text_projection =
            linear_no_bias(text.hidden_size, c.projection_dim, vs.pp("text_projection"))?;

        Ok(ClipText {
            text_model,
            text_projection,
        })
    }

    pub fn forward(&self, input_ids: &Tensor) -> Result<Tensor> {
        let xs = self.text_model.forward(input_ids)?;
        l2_normalize(&self.text_projection.forward(&xs)?)
    }
}

/// Both towers and the learned temperature, as in `CLIPModel`.
#[derive(Debug)]
pub struct ClipBackbone {
    vision: ClipVision,
    text: ClipText,
    logit_scale: Tensor,
}

impl ClipBackbone {
    pub fn new(vs: VarBuilder, c: &HfClipConfig) -> Result<Self> {
        let vision = ClipVision::new(vs.clone(), c)?;
        let text = ClipText::new(vs.clone(), c)?;
        let logit_scale = if vs.contains_tensor("logit_scale") {
            vs.get((), "logit_scale")?
        } else {
            Tensor::new(c.logit_scale_init_value, vs.device())?.to_dtype(vs.dtype())?
        };

        Ok(ClipBackbone {
            vision,
            text,
            logit_scale,
        })
    }

    /// `exp(logit_scale) * cos(image_i, prompt_i)` for every pair `i`.
    pub fn forward(&self, pixels: &Tensor, input_ids: &Tensor) -> Result<Tensor> {
        let image_embeds = self.vision.forward(pixels)?;
        let text_embeds = self.text.forward(input_ids)?;
        let sims = (image_embeds * text_embeds)?.sum(1)?;
        sims.broadcast_mul(&self.logit_scale.exp()?)
    }
}
