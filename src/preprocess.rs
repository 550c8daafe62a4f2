// Resize and normalise [0, 1] pixels into the input space of a backbone.
//
// The resize is expressed as two matrix products so gradients flow back to the
// caller's pixels.
use candle_core::{DType, Device, Result, Tensor};

pub const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
pub const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];
pub const HALF: [f32; 3] = [0.5, 0.5, 0.5];

#[derive(Debug, Clone, PartialEq)]
pub struct Preprocess {
    size: usize,
    mean: [f32; 3],
    std: [f32; 3],
}

impl Preprocess {
    pub fn new(size: usize, mean: [f32; 3], std: [f32; 3]) -> Self {
        Preprocess { size, mean, std }
    }

    pub fn clip(size: usize) -> Self {
        Self::new(size, CLIP_MEAN, CLIP_STD)
    }

    pub fn imagenet(size: usize) -> Self {
        Self::new(size, IMAGENET_MEAN, IMAGENET_STD)
    }

    pub fn half(size: usize) -> Self {
        Self::new(size, HALF, HALF)
    }

    /// Shorter side goes to `size`, the longer one keeps the aspect ratio.
    fn compute_sizes(&self, h: usize, w: usize) -> (usize, usize) {
        if h <= w {
            let new_w = (w * self.size + h / 2) / h;
            (self.size, new_w.max(self.size))
        } else {
            let new_h = (h * self.size + w / 2) / w;
            (new_h.max(self.size), self.size)
        }
    }

    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (_, _, h, w) = xs.dims4()?;
        let (new_h, new_w) = self.compute_sizes(h, w);

        let xs = if (new_h, new_w) != (h, w) {
            resize_bilinear(xs, new_h, new_w)?
        } else {
            xs.clone()
        };

        let top = (new_h - self.size) / 2;
        let left = (new_w - self.size) / 2;
        let xs = xs.narrow(2, top, self.size)?.narrow(3, left, self.size)?;

        let mean = channel_tensor(&self.mean, xs.dtype(), xs.device())?;
        let std = channel_tensor(&self.std, xs.dtype(), xs.device())?;
        xs.broadcast_sub(&mean)?.broadcast_div(&std)
    }
}

fn channel_tensor(values: &[f32; 3], dtype: DType, device: &Device) -> Result<Tensor> {
    Tensor::new(values, device)?
        .reshape((1, 3, 1, 1))?
        .to_dtype(dtype)
}

/// Bilinear interpolation weights, `(dst, src)`, using half-pixel centres
/// without antialiasing.
pub fn interpolation_matrix(src: usize, dst: usize, device: &Device) -> Result<Tensor> {
    let mut weights = vec![0f32; dst * src];
    let scale = src as f32 / dst as f32;

    for i in 0..dst {
        let pos = ((i as f32 + 0.5) * scale - 0.5).max(0.);
        let lo = (pos.floor() as usize).min(src - 1);
        let hi = (lo + 1).min(src - 1);
        let frac = pos - lo as f32;
        weights[i * src + lo] += 1. - frac;
        weights[i * src + hi] += frac;
    }

    Tensor::from_vec(weights, (dst, src), device)
}

pub fn resize_bilinear(xs: &Tensor, h: usize, w: usize) -> Result<Tensor> {
    let (b, c, src_h, src_w) = xs.dims4()?;
    let rows = interpolation_matrix(src_h, h, xs.device())?.to_dtype(xs.dtype())?;
    let cols = interpolation_matrix(src_w, w, xs.device())?.to_dtype(xs.dtype())?;

    // (b c src_h, src_w) x (src_w, w)
    let xs = xs
        .contiguous()?
        .reshape((b * c * src_h, src_w))?
        .matmul(&cols.t()?)?
        .reshape((b * c, src_h, w))?;

    // (b c w, src_h) x (src_h, h)
    xs.transpose(1, 2)?
        .contiguous()?
        .reshape((b * c * w, src_h))?
        .matmul(&rows.t()?)?
        .reshape((b * c, w, h))?
        .transpose(1, 2)?
        .contiguous()?
        .reshape((b, c, h, w))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Var;

    #[test]
    fn interpolation_rows_sum_to_one() {
        let m = interpolation_matrix(512, 224, &Device::Cpu).unwrap();
        let sums = m.sum(1).unwrap().to_vec1::<f32>().unwrap();
        assert!(sums.iter().all(|s| (s - 1.).abs() < 1e-5));
    }

    #[test]
    fn constant_image_survives_resize() {
        let xs = Tensor::full(0.25f32, (2, 3, 40, 30), &Device::Cpu).unwrap();
        let out = resize_bilinear(&xs, 16, 12).unwrap();
        assert_eq!(out.dims4().unwrap(), (2, 3, 16, 12));
        let values = out.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(values.iter().all(|v| (v - 0.25).abs() < 1e-5));
    }

    #[test]
    fn crops_to_square_and_normalises() {
        let xs = Tensor::full(0.5f32, (1, 3, 20, 40), &Device::Cpu).unwrap();
        let out = Preprocess::half(10).forward(&xs).unwrap();
        assert_eq!(out.dims4().unwrap(), (1, 3, 10, 10));
        let max = out.abs().unwrap().max_keepdim(3).unwrap().flatten_all().unwrap();
        assert!(max
            .to_vec1::<f32>()
            .unwrap()
            .iter()
            .all(|v| v.abs() < 1e-5));
    }

    #[test]
    fn resize_keeps_gradients() {
        let xs = Var::rand(0f32, 1f32, (1, 3, 8, 8), &Device::Cpu).unwrap();
        let out = Preprocess::clip(4).forward(xs.as_tensor()).unwrap();
        let grads = out.sum_all().unwrap().backward().unwrap();
        let grad = grads.get(xs.as_tensor()).expect("gradient for pixels");
        assert_eq!(grad.dims4().unwrap(), (1, 3, 8, 8));
    }
}
