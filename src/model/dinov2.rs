// DINOv2 encoder laid out like the Hugging Face `Dinov2Model` checkpoints:
//
// embeddings.cls_token
// embeddings.position_embeddings
// embeddings.patch_embeddings.projection.{weight,bias}
// encoder.layer.{i}.norm1 / norm2
// encoder.layer.{i}.attention.attention.{query,key,value}
// encoder.layer.{i}.attention.output.dense
// encoder.layer.{i}.layer_scale1.lambda1 / layer_scale2.lambda1
// encoder.layer.{i}.mlp.fc1 / fc2
// layernorm
//

use candle_core::{IndexOp, Module, Result, Tensor};
use candle_nn::{layer_norm, linear, linear_b, Conv2dConfig, LayerNorm, Linear, VarBuilder};
use serde::Deserialize;

use crate::preprocess::Preprocess;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_hidden")]
    pub hidden_size: usize,
    #[serde(default = "default_layers")]
    pub num_hidden_layers: usize,
    #[serde(default = "default_heads")]
    pub num_attention_heads: usize,
    #[serde(default = "default_mlp_ratio")]
    pub mlp_ratio: usize,
    #[serde(default = "default_image_size")]
    pub image_size: usize,
    #[serde(default = "default_patch_size")]
    pub patch_size: usize,
    #[serde(default = "default_channels")]
    pub num_channels: usize,
    #[serde(default = "default_eps")]
    pub layer_norm_eps: f64,
    #[serde(default = "default_qkv_bias")]
    pub qkv_bias: bool,
}

fn default_hidden() -> usize {
    768
}
fn default_layers() -> usize {
    12
}
fn default_heads() -> usize {
    12
}
fn default_mlp_ratio() -> usize {
    4
}
fn default_image_size() -> usize {
    518
}
fn default_patch_size() -> usize {
    14
}
fn default_channels() -> usize {
    3
}
fn default_eps() -> f64 {
    1e-6
}
fn default_qkv_bias() -> bool {
    true
}

impl Config {
    pub fn num_patches(&self) -> usize {
        let side = self.image_size / self.patch_size;
        side * side
    }
}

#[derive(Debug)]
struct Embeddings {
    cls_token: Tensor,
    position_embeddings: Tensor,
    projection: candle_nn::Conv2d,
}

impl Embeddings {
    fn new(c: &Config, vb: VarBuilder) -> Result<Self> {
        let cfg = Conv2dConfig {
            stride: c.patch_size,
            ..Default::default()
        };
        Ok(Embeddings {
            cls_token: vb.get((1, 1, c.hidden_size), "cls_token")?,
            position_embeddings: vb.get(
                (1, c.num_patches() + 1, c.hidden_size),
                "position_embeddings",
            )?,
            projection: candle_nn::conv2d(
                c.num_channels,
                c.hidden_size,
                c.patch_size,
                cfg,
                vb.pp("patch_embeddings.projection"),
            )?,
        })
    }
}

impl Module for Embeddings {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let b = xs.dim(0)?;
        let patches = self.projection.forward(xs)?.flatten_from(2)?.transpose(1, 2)?;
        let (_, n, hidden) = patches.dims3()?;
        let cls = self.cls_token.broadcast_as((b, 1, hidden))?;
        let xs = Tensor::cat(&[&cls, &patches], 1)?;
        if n + 1 != self.position_embeddings.dim(1)? {
            candle_core::bail!(
                "dinov2 expects {} patches, got {}",
                self.position_embeddings.dim(1)? - 1,
                n
            )
        }
        xs.broadcast_add(&self.position_embeddings)
    }
}

#[derive(Debug)]
struct Attention {
    query: Linear,
    key: Linear,
    value: Linear,
    dense: Linear,
    num_heads: usize,
    scale: f64,
}

impl Attention {
    fn new(c: &Config, vb: VarBuilder) -> Result<Self> {
        let h = c.hidden_size;
        let vb_a = vb.pp("attention");
        Ok(Attention {
            query: linear_b(h, h, c.qkv_bias, vb_a.pp("query"))?,
            key: linear_b(h, h, c.qkv_bias, vb_a.pp("key"))?,
            value: linear_b(h, h, c.qkv_bias, vb_a.pp("value"))?,
            dense: linear(h, h, vb.pp("output.dense"))?,
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
}

impl Module for Attention {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (b, n, h) = xs.dims3()?;
        let q = self.heads(&self.query.forward(xs)?)?;
        let k = self.heads(&self.key.forward(xs)?)?;
        let v = self.heads(&self.value.forward(xs)?)?;

        let att = (q.matmul(&k.t()?)? * self.scale)?;
        let att = candle_nn::ops::softmax_last_dim(&att)?;
        let xs = att
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b, n, h))?;
        self.dense.forward(&xs)
    }
}

#[derive(Debug)]
struct Layer {
    norm1: LayerNorm,
    attention: Attention,
    lambda1: Tensor,
    norm2: LayerNorm,
    fc1: Linear,
    fc2: Linear,
    lambda2: Tensor,
}

impl Layer {
    fn new(c: &Config, vb: VarBuilder) -> Result<Self> {
        let h = c.hidden_size;
        Ok(Layer {
            norm1: layer_norm(h, c.layer_norm_eps, vb.pp("norm1"))?,
            attention: Attention::new(c, vb.pp("attention"))?,
            lambda1: vb.get(h, "layer_scale1.lambda1")?,
            norm2: layer_norm(h, c.layer_norm_eps, vb.pp("norm2"))?,
            fc1: linear(h, h * c.mlp_ratio, vb.pp("mlp.fc1"))?,
            fc2: linear(h * c.mlp_ratio, h, vb.pp("mlp.fc2"))?,
            lambda2: vb.get(h, "layer_scale2.lambda1")?,
        })
    }
}

impl Module for Layer {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let residual = xs;
        let xs = self.attention.forward(&self.norm1.forward(xs)?)?;
        let xs = (xs.broadcast_mul(&self.lambda1)? + residual)?;

        let residual = &xs;
        let mlp = self
            .fc2
            .forward(&self.fc1.forward(&self.norm2.forward(&xs)?)?.gelu_erf()?)?;
        mlp.broadcast_mul(&self.lambda2)? + residual
    }
}

/// Returns the final-layer-normed CLS token, `(batch, hidden_size)`.
#[derive(Debug)]
pub struct Dinov2 {
    embeddings: Embeddings,
    layers: Vec<Layer>,
    layernorm: LayerNorm,
    preprocess: Preprocess,
    hidden_size: usize,
}

impl Dinov2 {
    pub fn new(vs: VarBuilder, c: &Config) -> Result<Self> {
        let embeddings = Embeddings::new(c, vs.pp("embeddings"))?;
        let layers = (0..c.num_hidden_layers)
            .map(|i| Layer::new(c, vs.pp(format!("encoder.layer.{i}"))))
            .collect::<Result<Vec<_>>>()?;
        let layernorm = layer_norm(c.hidden_size, c.layer_norm_eps, vs.pp("layernorm"))?;

        Ok(Dinov2 {
            embeddings,
            layers,
            layernorm,
            preprocess: Preprocess::imagenet(c.image_size),
            hidden_size: c.hidden_size,
        })
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }
}

impl Module for Dinov2 {
    fn forward(&self, pixels: &Tensor) -> Result<Tensor> {
        let xs = self.preprocess.forward(pixels)?;
        let xs = self.embeddings.forward(&xs)?;
        let xs = self
            .layers
            .iter()
            .try_fold(xs, |xs, layer| layer.forward(&xs))?;
        self.layernorm.forward(&xs)?.i((.., 0, ..))?.contiguous()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Var};
    use candle_nn::VarMap;

    fn tiny() -> Config {
        serde_json::from_str(
            r#"{
                "hidden_size": 16,
                "num_hidden_layers": 2,
                "num_attention_heads": 2,
                "image_size": 28,
                "patch_size": 14
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn cls_token_per_image() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = Dinov2::new(vb, &tiny()).unwrap();

        let pixels = Tensor::rand(0f32, 1f32, (2, 3, 64, 64), &Device::Cpu).unwrap();
        let cls = model.forward(&pixels).unwrap();
        assert_eq!(cls.dims2().unwrap(), (2, 16));
    }

    #[test]
    fn output_tracks_pixels() {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        let model = Dinov2::new(vb, &tiny()).unwrap();

        let pixels = Var::rand(0f32, 1f32, (1, 3, 28, 28), &Device::Cpu).unwrap();
        let cls = model.forward(pixels.as_tensor()).unwrap();
        assert!(cls.track_op());
    }
}
