//! Serving adapter for pretrained text-to-image pipelines.
//!
//! A host runtime drives [`ServedModel`]: `initialize` resolves a diffusers
//! checkpoint from the model repository and places it on a device,
//! `execute` turns each `prompt` request into a `generated_image` tensor.

#[cfg(feature = "accelerate")]
extern crate accelerate_src;
#[cfg(feature = "mkl")]
extern crate intel_mkl_src;

pub mod config;
pub mod device_map;
pub mod error;
pub mod loader;
pub mod model;
pub mod pipeline;
pub mod repository;
pub mod request;
pub mod stable_diffusion;
pub mod tensor;
mod util;
mod variants;

pub use config::*;
pub use device_map::*;
pub use error::{AdapterError, Result};
pub use loader::*;
pub use model::*;
pub use pipeline::*;
pub use repository::*;
pub use request::*;
pub use stable_diffusion::{StableDiffusionLoader, StableDiffusionPipeline};
pub use tensor::*;
pub use util::*;
pub use variants::*;

/// The adapter wired to the candle Stable Diffusion pipeline.
pub type StableDiffusionModel = ImageGenerationModel<StableDiffusionLoader>;
