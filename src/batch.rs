use std::path::Path;

use candle_core::{DType, Device, Tensor};
use image::DynamicImage;

use crate::Result;

/// Resizes an image to `size × size` and lays it out as a `(1, 3, size, size)`
/// f32 tensor with values in [0, 1].
pub fn image_to_tensor(img: &DynamicImage, size: usize) -> Result<Tensor> {
    let img = img.resize_exact(
        size as u32,
        size as u32,
        image::imageops::FilterType::CatmullRom,
    );
    let img = img.to_rgb8().into_raw();
    let img = Tensor::from_vec(img, (size, size, 3), &Device::Cpu)?
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?
        .affine(1. / 255., 0.)?
        .unsqueeze(0)?;
    Ok(img)
}

pub fn image_preprocess<T: AsRef<Path>>(path: T, size: usize) -> Result<Tensor> {
    let img = image::io::Reader::open(path)?.decode()?;
    image_to_tensor(&img, size)
}

/// Pixels and prompts fed to a scorer in one call.
///
/// The pixel batch dimension and the prompt count agree by construction; the
/// scorers themselves do not check it.
#[derive(Debug, Clone)]
pub struct Batch {
    pub pixels: Tensor,
    pub prompts: Vec<String>,
}

impl Batch {
    pub fn load<P: AsRef<Path>>(
        paths: &[P],
        size: usize,
        prompt: &str,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let images = paths
            .iter()
            .map(|path| image_preprocess(path, size))
            .collect::<Result<Vec<_>>>()?;
        let pixels = Tensor::cat(&images, 0)?.to_device(device)?.to_dtype(dtype)?;

        Ok(Batch {
            pixels,
            prompts: vec![prompt.to_string(); images.len()],
        })
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}
