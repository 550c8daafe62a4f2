pub mod batch;
pub mod error;
pub mod harness;
pub mod hub;
pub mod model;
pub mod preprocess;
pub mod tokenizer;

pub use error::{ImscoreError, Result};
pub use model::{build, factory, ModelName, Scorer, Source};

pub fn parse_device(device: Option<&str>) -> candle_core::Result<candle_core::Device> {
    match device {
        Some("cpu") => Ok(candle_core::Device::Cpu),
        Some("cuda") => candle_core::Device::cuda_if_available(0),
        Some("0") => candle_core::Device::cuda_if_available(0),
        Some("1") => candle_core::Device::cuda_if_available(1),
        Some("2") => candle_core::Device::cuda_if_available(2),
        _ => candle_core::Device::cuda_if_available(0),
    }
}

/// Picks the numeric type models and inputs are cast to.
///
/// Without an explicit choice, CUDA runs in bf16 and CPU stays in f32.
pub fn parse_dtype(
    dtype: Option<&str>,
    device: &candle_core::Device,
) -> Result<candle_core::DType> {
    match dtype {
        Some("f32") | Some("float32") => Ok(candle_core::DType::F32),
        Some("bf16") | Some("bfloat16") => Ok(candle_core::DType::BF16),
        Some("f16") | Some("float16") => Ok(candle_core::DType::F16),
        Some(other) => Err(ImscoreError::InvalidArgument(format!(
            "unsupported dtype {other}"
        ))),
        None if device.is_cuda() => Ok(candle_core::DType::BF16),
        None => Ok(candle_core::DType::F32),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn cpu_defaults_to_f32() {
        let device = parse_device(Some("cpu")).unwrap();
        assert!(device.is_cpu());
        assert_eq!(parse_dtype(None, &device).unwrap(), DType::F32);
    }

    #[test]
    fn explicit_dtype_wins() {
        assert_eq!(
            parse_dtype(Some("bf16"), &Device::Cpu).unwrap(),
            DType::BF16
        );
        assert!(matches!(
            parse_dtype(Some("int4"), &Device::Cpu),
            Err(ImscoreError::InvalidArgument(_))
        ));
    }
}
