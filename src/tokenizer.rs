use candle_core::{Device, Tensor};
use tokenizers::Tokenizer;

use crate::Result;

pub const CLIP_EOS_TOKEN: &str = "<|endoftext|>";

/// Turns a prompt batch into a `(batch, max_len)` u32 tensor of token ids.
pub struct PromptEncoder {
    tokenizer: Tokenizer,
    max_len: usize,
    pad_id: u32,
    eos_id: Option<u32>,
}

impl PromptEncoder {
    /// Pads with the tokenizer's own padding token when it declares one, then
    /// with the CLIP end-of-text token, and finally with id 0.
    pub fn new(tokenizer: Tokenizer, max_len: usize) -> Self {
        let eos_id = tokenizer.token_to_id(CLIP_EOS_TOKEN);
        let pad_id = tokenizer
            .get_padding()
            .map(|padding| padding.pad_id)
            .or(eos_id)
            .unwrap_or(0);

        PromptEncoder {
            tokenizer,
            max_len,
            pad_id,
            eos_id,
        }
    }

    pub fn with_pad_id(mut self, pad_id: u32) -> Self {
        self.pad_id = pad_id;
        self
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn pad_id(&self) -> u32 {
        self.pad_id
    }

    pub fn encode(&self, prompts: &[String], device: &Device) -> Result<Tensor> {
        let encodings = self.tokenizer.encode_batch(prompts.to_vec(), true)?;

        let mut ids = Vec::with_capacity(prompts.len() * self.max_len);
        for encoding in encodings.iter() {
            let mut row = encoding.get_ids().to_vec();
            if row.len() > self.max_len {
                row.truncate(self.max_len);
                // keep the pooled position on the end-of-text token
                if let (Some(eos), Some(last)) = (self.eos_id, row.last_mut()) {
                    *last = eos;
                }
            }
            row.resize(self.max_len, self.pad_id);
            ids.extend(row);
        }

        Ok(Tensor::from_vec(ids, (prompts.len(), self.max_len), device)?)
    }
}
