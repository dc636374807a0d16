use anyhow::{ensure, Result};

/// Parameters of a single text-to-image generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub prompt: String,
    pub height: usize,
    pub width: usize,
    pub steps: usize,
    pub guidance_scale: f64,
    pub seed: Option<u64>,
}

/// Floating point images in `[batch, height, width, channels]` layout with
/// samples in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageArray {
    shape: [usize; 4],
    data: Vec<f32>,
}

impl ImageArray {
    pub fn new(shape: [usize; 4], data: Vec<f32>) -> Result<Self> {
        ensure!(
            shape.iter().product::<usize>() == data.len(),
            "image array of shape {shape:?} cannot hold {} samples",
            data.len()
        );
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

/// A pretrained text-to-image pipeline placed on its device.
pub trait ImagePipeline: Send {
    fn generate(&mut self, params: &GenerationParams) -> Result<ImageArray>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_array_checks_length() {
        assert!(ImageArray::new([1, 2, 2, 3], vec![0.0; 12]).is_ok());
        assert!(ImageArray::new([1, 2, 2, 3], vec![0.0; 11]).is_err());
    }
}
