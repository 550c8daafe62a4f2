// Two key layouts are understood.
//
// sequential (LAION improved aesthetic predictor, an `nn.Sequential`):
//   layers.0.{weight,bias}   Linear
//   layers.1                 Dropout
//   ...
//   layers.6.{weight,bias}   Linear, last hidden, no dropout after it
//   layers.7.{weight,bias}   Linear projecting to a single logit
//
// named:
//   layers.{i}.linear.{weight,bias}
//   layers.{n}.linear.{weight,bias}   (n = hidden.len())
//

use std::collections::HashMap;

use candle_core::{DType, Device, Module, Result, Tensor};
use candle_nn::{Activation, VarBuilder, VarMap};
use serde::Deserialize;

/// Hidden widths of the LAION improved aesthetic predictor.
pub const LAION_HIDDEN: [usize; 4] = [1024, 128, 64, 16];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadLayout {
    /// `nn.Sequential` indices: each hidden linear but the last is followed by
    /// a dropout, and by the activation when there is one.
    #[default]
    Sequential,
    /// `layers.{i}.linear`, one entry per linear layer.
    Named,
}

impl HeadLayout {
    /// Weight prefix of the `i`-th linear layer out of `n + 1`.
    fn prefix(&self, i: usize, n: usize, activation: bool) -> String {
        match self {
            HeadLayout::Named => format!("layers.{i}.linear"),
            HeadLayout::Sequential => {
                let stride = 1 + usize::from(activation) + 1;
                let index = if i < n {
                    i * stride
                } else {
                    // last hidden linear has its activation but no dropout
                    (n - 1) * stride + 1 + usize::from(activation)
                };
                format!("layers.{index}")
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeadConfig {
    #[serde(default = "default_hidden")]
    pub hidden: Vec<usize>,
    #[serde(default)]
    pub activation: Option<Activation>,
    #[serde(default)]
    pub layout: HeadLayout,
}

fn default_hidden() -> Vec<usize> {
    LAION_HIDDEN.to_vec()
}

impl Default for HeadConfig {
    fn default() -> Self {
        HeadConfig {
            hidden: default_hidden(),
            activation: None,
            layout: HeadLayout::default(),
        }
    }
}

#[derive(Debug)]
pub struct RewardHeadDown {
    linear: candle_nn::Linear,
    activation: Option<Activation>,
}

impl RewardHeadDown {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        activation: Option<Activation>,
        vs: VarBuilder,
    ) -> Result<Self> {
        let linear = candle_nn::linear(in_channels, out_channels, vs)?;

        Ok(RewardHeadDown { linear, activation })
    }
}

impl Module for RewardHeadDown {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = self.linear.forward(xs)?;
        match &self.activation {
            Some(activation) => activation.forward(&xs),
            None => Ok(xs),
        }
    }
}

/// MLP mapping an embedding to one logit per sample, shape `(batch,)`.
#[derive(Debug)]
pub struct RewardHead {
    downs: Vec<RewardHeadDown>,
    out: candle_nn::Linear,
}

impl RewardHead {
    pub fn new(vs: VarBuilder, embed_dim: usize, c: &HeadConfig) -> Result<Self> {
        let n = c.hidden.len();
        if n == 0 && c.layout == HeadLayout::Sequential {
            candle_core::bail!("a sequential reward head needs at least one hidden layer")
        }
        let prefix = |i| c.layout.prefix(i, n, c.activation.is_some());

        let mut downs = Vec::with_capacity(n);
        let mut in_channels = embed_dim;
        for (i, &out_channels) in c.hidden.iter().enumerate() {
            downs.push(RewardHeadDown::new(
                in_channels,
                out_channels,
                c.activation,
                vs.pp(prefix(i)),
            )?);
            in_channels = out_channels;
        }

        let out = candle_nn::linear(in_channels, 1, vs.pp(prefix(n)))?;

        Ok(RewardHead { downs, out })
    }

    /// Randomly initialised head whose weights are plain tensors, so a score
    /// only tracks gradients through its input.
    pub fn fresh(
        embed_dim: usize,
        c: &HeadConfig,
        dtype: DType,
        device: &Device,
    ) -> Result<Self> {
        let varmap = VarMap::new();
        Self::new(VarBuilder::from_varmap(&varmap, dtype, device), embed_dim, c)?;

        let weights = varmap
            .data()
            .lock()
            .map_err(|err| candle_core::Error::Msg(err.to_string()))?
            .iter()
            .map(|(name, var)| (name.clone(), var.as_detached_tensor()))
            .collect::<HashMap<_, _>>();
        Self::new(VarBuilder::from_tensors(weights, dtype, device), embed_dim, c)
    }
}

impl Module for RewardHead {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = self
            .downs
            .iter()
            .try_fold(xs.clone(), |xs, down| down.forward(&xs))?;
        self.out.forward(&xs)?.squeeze(1)
    }
}
