#![allow(dead_code)]

use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use image::{DynamicImage, Rgb, RgbImage};
use imscore::model::clip::{ClipBackbone, ClipVision, HfClipConfig};
use imscore::model::dinov2::{self, Dinov2};
use imscore::model::head::{HeadConfig, HeadLayout, RewardHead};
use imscore::model::siglip::{SiglipBackbone, SiglipVision};
use imscore::model::vit::VitClassifier;

pub const TINY_CLIP: &str = r#"{
    "projection_dim": 8,
    "text_config": {
        "vocab_size": 8,
        "hidden_size": 16,
        "intermediate_size": 32,
        "num_hidden_layers": 1,
        "num_attention_heads": 2,
        "max_position_embeddings": 8
    },
    "vision_config": {
        "hidden_size": 16,
        "intermediate_size": 32,
        "num_hidden_layers": 1,
        "num_attention_heads": 2,
        "image_size": 32,
        "patch_size": 16
    }
}"#;

pub const TINY_DINOV2: &str = r#"{
    "hidden_size": 16,
    "num_hidden_layers": 1,
    "num_attention_heads": 2,
    "image_size": 28,
    "patch_size": 14
}"#;

pub const TINY_SIGLIP: &str = r#"{
    "text_config": {
        "vocab_size": 8,
        "hidden_size": 16,
        "intermediate_size": 32,
        "num_hidden_layers": 1,
        "num_attention_heads": 2,
        "max_position_embeddings": 8,
        "pad_token_id": 5
    },
    "vision_config": {
        "hidden_size": 16,
        "intermediate_size": 32,
        "num_hidden_layers": 1,
        "num_attention_heads": 2,
        "image_size": 32,
        "patch_size": 16
    }
}"#;

pub const TINY_VIT: &str = r#"{
    "hidden_size": 16,
    "num_hidden_layers": 1,
    "num_attention_heads": 2,
    "intermediate_size": 32,
    "hidden_act": "gelu",
    "layer_norm_eps": 1e-12,
    "image_size": 32,
    "patch_size": 16,
    "num_channels": 3,
    "qkv_bias": true,
    "id2label": { "0": "hq", "1": "lq" }
}"#;

pub const WORD_LEVEL: &str = r#"{
    "version": "1.0",
    "truncation": null,
    "padding": null,
    "added_tokens": [],
    "normalizer": null,
    "pre_tokenizer": { "type": "Whitespace" },
    "post_processor": null,
    "decoder": null,
    "model": {
        "type": "WordLevel",
        "vocab": { "[UNK]": 0, "a": 1, "photo": 2, "of": 3, "cat": 4, "<|endoftext|>": 5 },
        "unk_token": "[UNK]"
    }
}"#;

pub fn write_png(dir: &Path, name: &str, width: u32, height: u32, shade: u8) -> PathBuf {
    let mut img = RgbImage::new(width, height);
    for (x, _, pixel) in img.enumerate_pixels_mut() {
        *pixel = Rgb([shade, (x % 256) as u8, 255 - shade]);
    }
    let path = dir.join(name);
    DynamicImage::ImageRgb8(img).save(&path).expect("png written");
    path
}

pub fn sample_images(dir: &Path) -> [PathBuf; 2] {
    [
        write_png(dir, "cat.png", 48, 40, 200),
        write_png(dir, "badcat.png", 40, 40, 30),
    ]
}

fn write(dir: &Path, name: &str, contents: &str) {
    std::fs::create_dir_all(dir).expect("checkpoint dir");
    std::fs::write(dir.join(name), contents).expect("file written");
}

/// Inline `CLIPModel` checkpoint with a word-level tokenizer.
pub fn clip_checkpoint(dir: &Path) -> PathBuf {
    write(dir, "config.json", TINY_CLIP);
    write(dir, "tokenizer.json", WORD_LEVEL);

    let config: HfClipConfig = serde_json::from_str(TINY_CLIP).unwrap();
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    ClipBackbone::new(vb, &config).expect("tiny clip");
    varmap.save(dir.join("model.safetensors")).expect("weights saved");

    dir.to_path_buf()
}

/// Wrapped checkpoint: backbone config elsewhere, weights under
/// `backbone.` and `head.`.
pub fn aesthetic_checkpoint(dir: &Path) -> PathBuf {
    let backbone_dir = dir.join("backbone");
    write(&backbone_dir, "config.json", TINY_CLIP);

    let ckpt_dir = dir.join("checkpoint");
    let ckpt_config = serde_json::json!({
        "backbone": backbone_dir.to_str().unwrap(),
        "head": { "hidden": [8, 4] },
    });
    write(&ckpt_dir, "config.json", &ckpt_config.to_string());

    let config: HfClipConfig = serde_json::from_str(TINY_CLIP).unwrap();
    let head = HeadConfig {
        hidden: vec![8, 4],
        activation: None,
        layout: HeadLayout::Sequential,
    };
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    ClipVision::new(vb.pp("backbone"), &config).expect("tiny vision tower");
    RewardHead::new(vb.pp("head"), 8, &head).expect("tiny head");
    varmap
        .save(ckpt_dir.join("model.safetensors"))
        .expect("weights saved");

    ckpt_dir
}

/// Bare DINOv2 backbone, as a base model.
pub fn dinov2_base(dir: &Path) -> PathBuf {
    write(dir, "config.json", TINY_DINOV2);

    let config: dinov2::Config = serde_json::from_str(TINY_DINOV2).unwrap();
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    Dinov2::new(vb, &config).expect("tiny dinov2");
    varmap.save(dir.join("model.safetensors")).expect("weights saved");

    dir.to_path_buf()
}

/// Zero-initialised attention-pool projections would make every image pool
/// to the same vector.
fn randomize(varmap: &mut VarMap, name: &str, shape: (usize, usize)) {
    let value = Tensor::randn(0f32, 0.2, shape, &Device::Cpu).unwrap();
    varmap.set_one(name, value).expect("var exists");
}

/// Inline `SiglipModel` checkpoint with a word-level tokenizer.
pub fn siglip_checkpoint(dir: &Path) -> PathBuf {
    write(dir, "config.json", TINY_SIGLIP);
    write(dir, "tokenizer.json", WORD_LEVEL);

    let config: serde_json::Value = serde_json::from_str(TINY_SIGLIP).unwrap();
    let mut varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    SiglipBackbone::new(vb, &config).expect("tiny siglip");
    randomize(
        &mut varmap,
        "vision_model.head.attention.in_proj_weight",
        (48, 16),
    );
    varmap.save(dir.join("model.safetensors")).expect("weights saved");

    dir.to_path_buf()
}

/// Bare SigLIP vision tower, as a base model.
pub fn siglip_base(dir: &Path) -> PathBuf {
    write(dir, "config.json", TINY_SIGLIP);

    let config: serde_json::Value = serde_json::from_str(TINY_SIGLIP).unwrap();
    let mut varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    SiglipVision::new(vb, &config).expect("tiny siglip vision");
    randomize(
        &mut varmap,
        "vision_model.head.attention.in_proj_weight",
        (48, 16),
    );
    varmap.save(dir.join("model.safetensors")).expect("weights saved");

    dir.to_path_buf()
}

/// `ViTForImageClassification` checkpoint with `hq`/`lq` labels.
pub fn vit_checkpoint(dir: &Path) -> PathBuf {
    write(dir, "config.json", TINY_VIT);

    let config: serde_json::Value = serde_json::from_str(TINY_VIT).unwrap();
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    VitClassifier::new(vb, &config, "hq").expect("tiny vit");
    varmap.save(dir.join("model.safetensors")).expect("weights saved");

    dir.to_path_buf()
}

/// Rewrites `hidden_act` in both towers of a CLIP checkpoint config.
pub fn set_clip_activation(dir: &Path, activation: &str) {
    let mut config: serde_json::Value = serde_json::from_str(TINY_CLIP).unwrap();
    for tower in ["text_config", "vision_config"] {
        config[tower]["hidden_act"] = serde_json::Value::from(activation);
    }
    write(dir, "config.json", &config.to_string());
}

pub fn path_str(path: &Path) -> String {
    path.to_str().expect("utf-8 temp path").to_string()
}
