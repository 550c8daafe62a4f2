mod common;

use candle_core::{DType, Device};
use imscore::model::{build, factory, ModelName, Source};
use imscore::ImscoreError;

#[test]
fn registry_lists_every_scorer() {
    let names: Vec<String> = ModelName::ALL.iter().map(|name| name.to_string()).collect();
    assert_eq!(
        names,
        vec![
            "ShadowAesthetic",
            "CLIPAestheticScorer",
            "SiglipAestheticScorer",
            "Dinov2AestheticScorer",
            "LAIONAestheticScorer",
            "HPSv2",
            "MPS",
            "SiglipPreferenceScorer",
            "CLIPPreferenceScorer",
            "PickScorer",
        ]
    );
}

#[test]
fn unknown_model_fails_before_any_download() {
    let err = factory("NotAModel", &Device::Cpu, DType::F32)
        .err()
        .expect("unknown name rejected");
    assert!(
        matches!(err, ImscoreError::UnknownModel(ref name) if name == "NotAModel"),
        "unexpected error {err:?}"
    );
}

#[test]
fn builds_clip_preference_from_local_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let ckpt = common::clip_checkpoint(dir.path());
    let source = Source::Pretrained(common::path_str(&ckpt));

    for name in [
        ModelName::HpsV2,
        ModelName::Mps,
        ModelName::ClipPreference,
        ModelName::PickScore,
    ] {
        assert!(
            build(name, &source, &Device::Cpu, DType::F32).is_ok(),
            "{name} did not build"
        );
    }
}

#[test]
fn builds_aesthetic_scorers_from_checkpoint_and_base() {
    let dir = tempfile::tempdir().unwrap();
    let ckpt = common::aesthetic_checkpoint(dir.path());
    let pretrained = Source::Pretrained(common::path_str(&ckpt));
    for name in [ModelName::ClipAesthetic, ModelName::LaionAesthetic] {
        assert!(build(name, &pretrained, &Device::Cpu, DType::F32).is_ok());
    }

    let base = common::dinov2_base(&dir.path().join("dinov2"));
    let base = Source::Base(common::path_str(&base));
    assert!(build(ModelName::Dinov2Aesthetic, &base, &Device::Cpu, DType::F32).is_ok());
}

#[test]
fn missing_checkpoint_files_propagate() {
    let dir = tempfile::tempdir().unwrap();
    let source = Source::Pretrained(common::path_str(dir.path()));
    let err = build(ModelName::PickScore, &source, &Device::Cpu, DType::F32)
        .err()
        .expect("empty checkpoint rejected");
    assert!(matches!(err, ImscoreError::Io(_)), "unexpected error {err:?}");
}
