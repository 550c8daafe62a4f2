mod common;

use candle_core::{DType, Device};
use imscore::batch::Batch;
use imscore::ImscoreError;

#[test]
fn two_images_two_prompts() {
    let dir = tempfile::tempdir().unwrap();
    let images = common::sample_images(dir.path());

    let batch = Batch::load(&images, 64, "a photo of a cat", &Device::Cpu, DType::F32)
        .expect("batch loads");
    assert_eq!(batch.pixels.dims4().unwrap(), (2, 3, 64, 64));
    assert_eq!(batch.len(), 2);
    assert!(batch.prompts.iter().all(|p| p == "a photo of a cat"));

    let values = batch
        .pixels
        .flatten_all()
        .unwrap()
        .to_vec1::<f32>()
        .unwrap();
    assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
}

#[test]
fn keeps_requested_dtype() {
    let dir = tempfile::tempdir().unwrap();
    let images = common::sample_images(dir.path());

    let batch = Batch::load(&images, 16, "a photo of a cat", &Device::Cpu, DType::BF16).unwrap();
    assert_eq!(batch.pixels.dtype(), DType::BF16);
}

#[test]
fn missing_image_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = [dir.path().join("cat.png"), dir.path().join("badcat.png")];

    let err = Batch::load(&missing, 16, "a photo of a cat", &Device::Cpu, DType::F32)
        .expect_err("no files on disk");
    assert!(matches!(err, ImscoreError::Io(_)), "unexpected error {err:?}");
}
