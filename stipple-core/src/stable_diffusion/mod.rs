use std::path::Path;

use anyhow::{ensure, Context, Error, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::Module;
use candle_transformers::models::stable_diffusion::{
    self, clip::ClipTextTransformer, schedulers::SchedulerConfig,
    unet_2d::UNet2DConditionModel, vae::AutoEncoderKL, StableDiffusionConfig,
};
use tokenizers::Tokenizer;

mod checkpoint;
mod scheduler;

pub use checkpoint::*;
pub use scheduler::NoiseSchedule;

use crate::{
    select_best_device, DeviceMap, GenerationParams, ImageArray, ImagePipeline, PipelineLoader,
    PipelineOptions, SdVersion,
};

const VAE_SCALE: f64 = 0.18215;
const LATENT_CHANNELS: usize = 4;

pub struct StableDiffusionPipeline {
    device: Device,
    dtype: DType,
    tokenizer: Tokenizer,
    pad_id: u32,
    max_tokens: usize,
    text_model: ClipTextTransformer,
    unet: UNet2DConditionModel,
    vae: AutoEncoderKL,
    scheduler: Box<dyn SchedulerConfig>,
}

impl StableDiffusionPipeline {
    fn encode_prompt(&self, prompt: &str) -> Result<Tensor> {
        let mut tokens = self
            .tokenizer
            .encode(prompt, true)
            .map_err(Error::msg)?
            .get_ids()
            .to_vec();
        if tokens.len() > self.max_tokens {
            tracing::warn!(
                tokens = tokens.len(),
                max = self.max_tokens,
                "prompt truncated to the text encoder context"
            );
            tokens.truncate(self.max_tokens);
        }
        tokens.resize(self.max_tokens, self.pad_id);
        let tokens = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
        Ok(self.text_model.forward(&tokens)?)
    }
}

impl ImagePipeline for StableDiffusionPipeline {
    fn generate(&mut self, params: &GenerationParams) -> Result<ImageArray> {
        ensure!(
            params.height > 0 && params.height % 8 == 0 && params.width > 0 && params.width % 8 == 0,
            "image size {}x{} is not a positive multiple of 8",
            params.width,
            params.height
        );

        if let Some(seed) = params.seed {
            if let Err(err) = self.device.set_seed(seed) {
                tracing::warn!(seed, %err, "device does not support seeding, output is not reproducible");
            }
        }

        let guided = params.guidance_scale > 1.0;
        let text_embeddings = self.encode_prompt(&params.prompt)?;
        let text_embeddings = if guided {
            let uncond_embeddings = self.encode_prompt("")?;
            Tensor::cat(&[uncond_embeddings, text_embeddings], 0)?
        } else {
            text_embeddings
        }
        .to_dtype(self.dtype)?;

        let mut scheduler = self.scheduler.build(params.steps)?;
        let timesteps = scheduler.timesteps().to_vec();

        let latents = Tensor::randn(
            0f32,
            1f32,
            (1, LATENT_CHANNELS, params.height / 8, params.width / 8),
            &self.device,
        )?
        .to_dtype(self.dtype)?;
        let mut latents = (latents * scheduler.init_noise_sigma())?;

        for (index, &timestep) in timesteps.iter().enumerate() {
            let latent_model_input = if guided {
                Tensor::cat(&[&latents, &latents], 0)?
            } else {
                latents.clone()
            };
            let latent_model_input = scheduler.scale_model_input(latent_model_input, timestep)?;
            let noise_pred =
                self.unet
                    .forward(&latent_model_input, timestep as f64, &text_embeddings)?;

            let noise_pred = if guided {
                let chunks = noise_pred.chunk(2, 0)?;
                let (uncond, text) = (&chunks[0], &chunks[1]);
                (uncond + ((text - uncond)? * params.guidance_scale)?)?
            } else {
                noise_pred
            };

            latents = scheduler.step(&noise_pred, timestep, &latents)?;
            tracing::trace!(step = index + 1, total = timesteps.len(), "denoising");
        }

        let decoded = self.vae.decode(&(latents / VAE_SCALE)?)?;
        let images = ((decoded / 2.)? + 0.5)?
            .clamp(0f32, 1f32)?
            .permute((0, 2, 3, 1))?
            .to_dtype(DType::F32)?
            .to_device(&Device::Cpu)?;

        let (batch, height, width, channels) = images.dims4()?;
        let data = images.flatten_all()?.to_vec1::<f32>()?;
        ImageArray::new([batch, height, width, channels], data)
    }
}

pub struct StableDiffusionLoader;

impl PipelineLoader for StableDiffusionLoader {
    type Pipeline = StableDiffusionPipeline;

    fn load(
        checkpoint_dir: &Path,
        options: &PipelineOptions,
        device_map: DeviceMap,
    ) -> Result<Self::Pipeline> {
        // Configure device.
        let device = select_best_device(device_map).context("failed to set up device")?;
        let dtype = options.dtype.for_device(&device);
        let files = CheckpointFiles::resolve(checkpoint_dir, &options.revision)?;

        let sd_config = match options.sd_version {
            SdVersion::V1_5 => StableDiffusionConfig::v1_5(None, None, None),
            SdVersion::V2_1 => StableDiffusionConfig::v2_1(None, None, None),
        };

        let schedule = match &files.scheduler_config {
            Some(path) => NoiseSchedule::from_file(path)?,
            None => {
                tracing::warn!("checkpoint has no scheduler config, using default noise schedule");
                NoiseSchedule::default()
            }
        };
        tracing::debug!(
            exported = schedule.class_name.as_deref().unwrap_or("unknown"),
            using = ?options.scheduler,
            "swapping scheduler"
        );
        let scheduler = schedule.scheduler_config(options.scheduler)?;

        // --- Tokenizer and text encoder ---
        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(Error::msg)
            .context("failed to load CLIP tokenizer")?;
        let pad_token = sd_config.clip.pad_with.as_deref().unwrap_or("<|endoftext|>");
        let pad_id = *tokenizer
            .get_vocab(true)
            .get(pad_token)
            .with_context(|| format!("tokenizer has no `{pad_token}` token"))?;
        let text_model = stable_diffusion::build_clip_transformer(
            &sd_config.clip,
            &files.clip_weights,
            &device,
            DType::F32,
        )
        .context("failed to load CLIP text encoder")?;

        // --- UNet and autoencoder ---
        let unet = sd_config
            .build_unet(
                &files.unet_weights,
                &device,
                LATENT_CHANNELS,
                options.use_flash_attn,
                dtype,
            )
            .context("failed to load unet")?;
        let vae = sd_config
            .build_vae(&files.vae_weights, &device, dtype)
            .context("failed to load vae")?;

        tracing::info!(?dtype, ?device, "stable diffusion pipeline loaded");

        Ok(StableDiffusionPipeline {
            device,
            dtype,
            tokenizer,
            pad_id,
            max_tokens: sd_config.clip.max_position_embeddings,
            text_model,
            unet,
            vae,
            scheduler,
        })
    }
}

