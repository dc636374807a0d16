use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use stipple_core::{
    tensor_to_images, InferenceRequest, InferenceResponse, InstanceKind, ModelConfig,
    ModelRepository, NamedTensor, PipelineSettings, ServedModel, StableDiffusionModel,
    TensorData, IMAGE_OUTPUT, PROMPT_INPUT, SEED_INPUT,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod fetch;

// Define command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Stipple text-to-image model host")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct ModelArgs {
    /// Root of the model repository
    #[arg(long, default_value = "model_repo")]
    repository: PathBuf,

    /// Model name inside the repository
    #[arg(long, default_value = "pipeline_0")]
    model: String,

    /// Model version, defaults to the highest one present
    #[arg(long)]
    model_version: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate one image per prompt
    Generate {
        #[command(flatten)]
        model: ModelArgs,

        /// Prompt to render, may be repeated
        #[arg(long, required = true)]
        prompt: Vec<String>,

        /// Directory the PNG files are written to
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,

        /// Base seed, request `i` uses `seed + i`
        #[arg(long)]
        seed: Option<u64>,

        /// Use CPU instead of GPU
        #[arg(long)]
        cpu: bool,

        /// Accelerator ordinal
        #[arg(long, default_value_t = 0)]
        device_id: usize,
    },
    /// Download a diffusers checkpoint into the model's checkpoint directory
    Fetch {
        #[command(flatten)]
        model: ModelArgs,

        /// Hub repository holding the pipeline
        #[arg(long, default_value = "stabilityai/stable-diffusion-2-1-base")]
        hub_id: String,

        /// Git revision of the hub repository
        #[arg(long, default_value = "main")]
        hub_revision: String,

        /// Hub repository providing the CLIP `tokenizer.json`
        #[arg(long, default_value = "openai/clip-vit-base-patch32")]
        tokenizer_id: String,
    },
}

fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn build_requests(prompts: &[String], seed: Option<u64>) -> Result<Vec<InferenceRequest>> {
    prompts
        .iter()
        .enumerate()
        .map(|(i, prompt)| -> Result<InferenceRequest> {
            let mut inputs = vec![NamedTensor::from_str_element(PROMPT_INPUT, prompt)];
            if let Some(seed) = seed {
                let seed = seed.wrapping_add(i as u64);
                inputs.push(NamedTensor::new(SEED_INPUT, vec![1], TensorData::U64(vec![seed]))?);
            }
            Ok(InferenceRequest::new(inputs).with_id(i.to_string()))
        })
        .collect()
}

fn write_images(
    responses: &[InferenceResponse],
    output_dir: &Path,
    model: &str,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;

    let mut written = Vec::new();
    for (i, response) in responses.iter().enumerate() {
        let tensor = response
            .output_tensor_by_name(IMAGE_OUTPUT)
            .with_context(|| format!("response {i} has no `{IMAGE_OUTPUT}` output"))?;
        for (j, image) in tensor_to_images(tensor)?.into_iter().enumerate() {
            let name = if j == 0 {
                format!("{model}-{i}.png")
            } else {
                format!("{model}-{i}-{j}.png")
            };
            let path = output_dir.join(name);
            image
                .save_with_format(&path, image::ImageFormat::Png)
                .with_context(|| format!("failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), "wrote image");
            written.push(path);
        }
    }
    Ok(written)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    match args.command {
        Command::Generate {
            model,
            prompt,
            output_dir,
            seed,
            cpu,
            device_id,
        } => {
            let repository = ModelRepository::new(&model.repository);
            let kind = if cpu { InstanceKind::Cpu } else { InstanceKind::Gpu };
            let init = repository.initialize_args(&model.model, model.model_version, kind, device_id)?;

            let mut served = StableDiffusionModel::initialize(init)?;
            let responses = served.execute(build_requests(&prompt, seed)?)?;
            write_images(&responses, &output_dir, &model.model)?;
            served.finalize();
        }
        Command::Fetch {
            model,
            hub_id,
            hub_revision,
            tokenizer_id,
        } => {
            let repository = ModelRepository::new(&model.repository);
            let init =
                repository.initialize_args(&model.model, model.model_version, InstanceKind::Cpu, 0)?;
            let settings = PipelineSettings::from_config(&ModelConfig::from_json(&init.model_config)?)?;
            let checkpoint_dir = init.resolve(&settings.checkpoint_dir);

            tracing::info!(
                hub = %hub_id,
                checkpoint = %checkpoint_dir.display(),
                "fetching checkpoint"
            );
            fetch::fetch_checkpoint(fetch::FetchRequest {
                hub_id: &hub_id,
                hub_revision: &hub_revision,
                tokenizer_id: &tokenizer_id,
                weight_revision: &settings.revision,
                checkpoint_dir: &checkpoint_dir,
                cache_dir: init.resolve(&settings.cache_dir),
            })
            .await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_one_request_per_prompt() {
        let prompts = vec!["a cat".to_string(), "a dog".to_string()];
        let requests = build_requests(&prompts, Some(10)).unwrap();

        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].id.as_deref(), Some("1"));
        let prompt = requests[1].input_tensor_by_name(PROMPT_INPUT).unwrap();
        assert_eq!(prompt.first_string().unwrap(), "a dog");
        let seed = requests[1].input_tensor_by_name(SEED_INPUT).unwrap();
        assert_eq!(seed.first_u64().unwrap(), 11);

        let unseeded = build_requests(&prompts, None).unwrap();
        assert!(unseeded[0].input_tensor_by_name(SEED_INPUT).is_none());
    }

    #[test]
    fn writes_png_per_response() {
        let dir = tempfile::tempdir().unwrap();
        let image = NamedTensor::new(
            IMAGE_OUTPUT,
            vec![1, 2, 2, 3],
            TensorData::U8(vec![128; 12]),
        )
        .unwrap();
        let responses = vec![InferenceResponse {
            id: Some("0".to_string()),
            output_tensors: vec![image],
        }];

        let written = write_images(&responses, dir.path(), "pipeline_0").unwrap();
        assert_eq!(written, vec![dir.path().join("pipeline_0-0.png")]);

        let decoded = image::open(&written[0]).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (2, 2));
        assert_eq!(decoded.get_pixel(0, 1).0, [128, 128, 128]);
    }

    #[test]
    fn parses_generate_flags() {
        let args = Args::try_parse_from([
            "stipple",
            "generate",
            "--prompt",
            "a lighthouse",
            "--prompt",
            "a harbour",
            "--cpu",
        ])
        .unwrap();
        match args.command {
            Command::Generate {
                model, prompt, cpu, ..
            } => {
                assert_eq!(prompt.len(), 2);
                assert!(cpu);
                assert_eq!(model.model, "pipeline_0");
                assert_eq!(model.repository, PathBuf::from("model_repo"));
            }
            Command::Fetch { .. } => panic!("expected generate"),
        }
    }
}
