use anyhow::{bail, Context, Result};
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::Device;
use image::{DynamicImage, RgbImage};

use crate::{DeviceMap, NamedTensor};

pub fn select_best_device(device_map: DeviceMap) -> Result<Device> {
    match device_map {
        DeviceMap::ForceCpu => Ok(Device::Cpu),
        DeviceMap::Ordinal(ordinal) if cuda_is_available() => Ok(Device::new_cuda(ordinal)?),
        DeviceMap::Ordinal(ordinal) if metal_is_available() => Ok(Device::new_metal(ordinal)?),
        DeviceMap::Ordinal(_) => {
            #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
            {
                tracing::warn!(
                    "running on CPU, to run on GPU(metal), build with `--features metal`"
                );
            }
            #[cfg(not(all(target_os = "macos", target_arch = "aarch64")))]
            {
                tracing::warn!("running on CPU, to run on GPU, build with `--features cuda`");
            }
            Ok(Device::Cpu)
        }
    }
}

/// Converts a u8 tensor with shape (batch, height, width, 3) into RGB images.
pub fn tensor_to_images(tensor: &NamedTensor) -> Result<Vec<DynamicImage>> {
    let &[batch, height, width, channels] = tensor.shape() else {
        bail!(
            "tensor `{}` has shape {:?}, expected (batch, height, width, 3)",
            tensor.name(),
            tensor.shape()
        );
    };
    if channels != 3 {
        bail!("tensor_to_images expects an image with 3 channels, got {channels}");
    }
    let pixels = tensor
        .as_u8()
        .with_context(|| format!("tensor `{}` is not {}", tensor.name(), crate::DataType::U8))?;

    let frame = height * width * channels;
    (0..batch)
        .map(|i| {
            let raw = pixels[i * frame..(i + 1) * frame].to_vec();
            let buffer = RgbImage::from_raw(width as u32, height as u32, raw)
                .context("error converting tensor to image buffer")?;
            Ok(DynamicImage::ImageRgb8(buffer))
        })
        .collect()
}
