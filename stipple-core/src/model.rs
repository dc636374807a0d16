use std::time::Instant;

use crate::{
    AdapterError, DataType, GenerationParams, ImageArray, ImagePipeline, InferenceRequest,
    InferenceResponse, InitializeArgs, ModelConfig, NamedTensor, PipelineLoader,
    PipelineOptions, PipelineSettings, Result, TensorData,
};

pub const PROMPT_INPUT: &str = "prompt";
pub const SEED_INPUT: &str = "seed";
pub const IMAGE_OUTPUT: &str = "generated_image";

/// Lifecycle hooks a host runtime drives.
pub trait ServedModel: Sized {
    /// Called once before any request is served.
    fn initialize(args: InitializeArgs) -> Result<Self>;

    /// Produces exactly one response per request, in request order.
    fn execute(&mut self, requests: Vec<InferenceRequest>) -> Result<Vec<InferenceResponse>>;

    /// Called once when the host unloads the model.
    fn finalize(&mut self) {}
}

/// Serves a text-to-image pipeline: `prompt` in, `generated_image` out.
pub struct ImageGenerationModel<L: PipelineLoader> {
    output_dtype: DataType,
    settings: PipelineSettings,
    pipeline: Option<L::Pipeline>,
}

impl<L: PipelineLoader> ImageGenerationModel<L> {
    pub fn output_dtype(&self) -> DataType {
        self.output_dtype
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn pipeline(&self) -> Option<&L::Pipeline> {
        self.pipeline.as_ref()
    }
}

impl<L: PipelineLoader> ServedModel for ImageGenerationModel<L> {
    fn initialize(args: InitializeArgs) -> Result<Self> {
        let config = ModelConfig::from_json(&args.model_config)?;

        let output = config
            .output_config_by_name(IMAGE_OUTPUT)
            .ok_or_else(|| AdapterError::MissingOutputConfig(IMAGE_OUTPUT.to_string()))?;
        if output.data_type != DataType::U8 {
            return Err(AdapterError::UnsupportedOutputType {
                name: output.name.clone(),
                data_type: output.data_type,
            });
        }
        let output_dtype = output.data_type;

        let settings = PipelineSettings::from_config(&config)?;
        let checkpoint_dir = args.resolve(&settings.checkpoint_dir);
        if !checkpoint_dir.is_dir() {
            return Err(AdapterError::NotFound(checkpoint_dir));
        }
        let options = PipelineOptions::from_settings(&settings);

        tracing::info!(
            model = %args.model_name,
            version = args.model_version,
            checkpoint = %checkpoint_dir.display(),
            scheduler = ?options.scheduler,
            device = ?args.device_map(),
            "loading pipeline"
        );
        let start = Instant::now();
        let pipeline = L::load(&checkpoint_dir, &options, args.device_map())?;
        tracing::info!(elapsed_ms = start.elapsed().as_millis() as u64, "pipeline ready");

        Ok(Self {
            output_dtype,
            settings,
            pipeline: Some(pipeline),
        })
    }

    fn execute(&mut self, requests: Vec<InferenceRequest>) -> Result<Vec<InferenceResponse>> {
        let pipeline = self.pipeline.as_mut().ok_or(AdapterError::NotInitialized)?;

        let mut responses = Vec::with_capacity(requests.len());
        for request in requests {
            let prompt = request
                .input_tensor_by_name(PROMPT_INPUT)
                .ok_or_else(|| AdapterError::MissingInput(PROMPT_INPUT.to_string()))?
                .first_string()?;
            let seed = request
                .input_tensor_by_name(SEED_INPUT)
                .map(NamedTensor::first_u64)
                .transpose()?;

            let params = GenerationParams {
                prompt,
                height: self.settings.height,
                width: self.settings.width,
                steps: self.settings.num_inference_steps,
                guidance_scale: self.settings.guidance_scale,
                seed,
            };

            let start = Instant::now();
            let images = pipeline.generate(&params)?;
            tracing::debug!(
                request = request.id.as_deref().unwrap_or("-"),
                prompt = %params.prompt,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "generated image"
            );

            responses.push(InferenceResponse {
                id: request.id,
                output_tensors: vec![quantize_image(IMAGE_OUTPUT, &images)?],
            });
        }

        Ok(responses)
    }

    fn finalize(&mut self) {
        if self.pipeline.take().is_some() {
            tracing::info!("pipeline released");
        }
    }
}

/// Maps a `[0, 1]` sample to 8 bits, rounding half to even and saturating.
pub fn quantize_sample(sample: f32) -> u8 {
    // NaN saturates to 0 in the cast.
    (sample * 255.0).round_ties_even().clamp(0.0, 255.0) as u8
}

/// Scales a floating point image array to an 8-bit tensor of the same shape.
pub fn quantize_image(name: &str, images: &ImageArray) -> Result<NamedTensor> {
    let pixels = images.data().iter().copied().map(quantize_sample).collect();
    NamedTensor::new(name, images.shape().to_vec(), TensorData::U8(pixels))
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::*;
    use crate::{DeviceMap, InstanceKind};

    const SAMPLES: [f32; 6] = [0.0, 0.25, 0.5, 0.75, 1.0, 0.2];

    struct StubPipeline {
        checkpoint_dir: PathBuf,
        options: PipelineOptions,
        device_map: DeviceMap,
        calls: Vec<GenerationParams>,
    }

    impl ImagePipeline for StubPipeline {
        fn generate(&mut self, params: &GenerationParams) -> anyhow::Result<ImageArray> {
            if params.prompt == "fail" {
                anyhow::bail!("denoising diverged");
            }
            self.calls.push(params.clone());
            ImageArray::new([1, 1, 2, 3], SAMPLES.to_vec())
        }
    }

    struct StubLoader;

    impl PipelineLoader for StubLoader {
        type Pipeline = StubPipeline;

        fn load(
            checkpoint_dir: &Path,
            options: &PipelineOptions,
            device_map: DeviceMap,
        ) -> anyhow::Result<Self::Pipeline> {
            Ok(StubPipeline {
                checkpoint_dir: checkpoint_dir.to_path_buf(),
                options: options.clone(),
                device_map,
                calls: Vec::new(),
            })
        }
    }

    fn config_json(output_type: &str, parameters: &str) -> String {
        format!(
            r#"{{
                "name": "pipeline_0",
                "input": [{{ "name": "prompt", "data_type": "TYPE_STRING", "dims": [1, 1] }}],
                "output": [{{ "name": "generated_image", "data_type": "{output_type}", "dims": [-1, -1, -1, 3] }}],
                "parameters": {{ {parameters} }}
            }}"#
        )
    }

    fn model_dir(checkpoint: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(checkpoint)).unwrap();
        dir
    }

    fn args(dir: &Path, model_config: String) -> InitializeArgs {
        InitializeArgs {
            model_config,
            model_repository: dir.to_path_buf(),
            model_name: "pipeline_0".to_string(),
            model_version: 1,
            model_instance_kind: InstanceKind::Gpu,
            model_instance_device_id: 0,
        }
    }

    fn prompt_request(prompt: &str) -> InferenceRequest {
        InferenceRequest::new(vec![NamedTensor::from_str_element(PROMPT_INPUT, prompt)])
    }

    #[test]
    fn quantizes_like_numpy() {
        assert_eq!(quantize_sample(0.0), 0);
        assert_eq!(quantize_sample(0.25), 64);
        assert_eq!(quantize_sample(0.5), 128);
        assert_eq!(quantize_sample(0.75), 191);
        assert_eq!(quantize_sample(1.0), 255);
    }

    #[test]
    fn quantize_saturates_out_of_range() {
        assert_eq!(quantize_sample(1.5), 255);
        assert_eq!(quantize_sample(-0.5), 0);
        assert_eq!(quantize_sample(f32::NAN), 0);
    }

    #[test]
    fn initialize_loads_from_default_checkpoint() {
        let dir = model_dir(crate::DEFAULT_CHECKPOINT_DIR);
        let model =
            ImageGenerationModel::<StubLoader>::initialize(args(dir.path(), config_json("TYPE_UINT8", "")))
                .unwrap();

        let pipeline = model.pipeline().unwrap();
        assert_eq!(
            pipeline.checkpoint_dir,
            dir.path().join(crate::DEFAULT_CHECKPOINT_DIR)
        );
        assert_eq!(pipeline.options.revision, "fp16");
        assert_eq!(pipeline.device_map, DeviceMap::Ordinal(0));
        assert_eq!(model.output_dtype(), DataType::U8);
    }

    #[test]
    fn initialize_honours_checkpoint_parameter() {
        let dir = model_dir("weights/sd15");
        let config = config_json(
            "TYPE_UINT8",
            r#""checkpoint_dir": { "string_value": "weights/sd15" },
               "sd_version": { "string_value": "v1_5" }"#,
        );
        let model = ImageGenerationModel::<StubLoader>::initialize(args(dir.path(), config)).unwrap();
        assert_eq!(
            model.pipeline().unwrap().checkpoint_dir,
            dir.path().join("weights/sd15")
        );
        assert_eq!(model.settings().sd_version, crate::SdVersion::V1_5);
    }

    #[test]
    fn initialize_rejects_non_u8_output() {
        let dir = model_dir(crate::DEFAULT_CHECKPOINT_DIR);
        let result = ImageGenerationModel::<StubLoader>::initialize(args(
            dir.path(),
            config_json("TYPE_FP32", ""),
        ));
        assert!(matches!(
            result,
            Err(AdapterError::UnsupportedOutputType {
                data_type: DataType::F32,
                ..
            })
        ));
    }

    #[test]
    fn initialize_requires_output_config() {
        let dir = model_dir(crate::DEFAULT_CHECKPOINT_DIR);
        let result = ImageGenerationModel::<StubLoader>::initialize(args(
            dir.path(),
            r#"{ "name": "pipeline_0" }"#.to_string(),
        ));
        assert!(matches!(result, Err(AdapterError::MissingOutputConfig(_))));
    }

    #[test]
    fn initialize_fails_without_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let result = ImageGenerationModel::<StubLoader>::initialize(args(
            dir.path(),
            config_json("TYPE_UINT8", ""),
        ));
        assert!(matches!(result, Err(AdapterError::NotFound(_))));
    }

    #[test]
    fn execute_scales_pipeline_output() {
        let dir = model_dir(crate::DEFAULT_CHECKPOINT_DIR);
        let mut model =
            ImageGenerationModel::<StubLoader>::initialize(args(dir.path(), config_json("TYPE_UINT8", "")))
                .unwrap();

        let responses = model
            .execute(vec![
                prompt_request("a lighthouse at dusk").with_id("a"),
                prompt_request("a bowl of ramen").with_id("b"),
            ])
            .unwrap();

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].id.as_deref(), Some("a"));
        assert_eq!(responses[1].id.as_deref(), Some("b"));

        let image = responses[0].output_tensor_by_name(IMAGE_OUTPUT).unwrap();
        assert_eq!(image.shape(), &[1, 1, 2, 3]);
        assert_eq!(image.as_u8().unwrap(), &[0, 64, 128, 191, 255, 51]);

        let calls = &model.pipeline().unwrap().calls;
        assert_eq!(calls[0].prompt, "a lighthouse at dusk");
        assert_eq!((calls[0].height, calls[0].width), (512, 512));
        assert_eq!(calls[1].prompt, "a bowl of ramen");
    }

    #[test]
    fn execute_forwards_seed() {
        let dir = model_dir(crate::DEFAULT_CHECKPOINT_DIR);
        let mut model =
            ImageGenerationModel::<StubLoader>::initialize(args(dir.path(), config_json("TYPE_UINT8", "")))
                .unwrap();

        let mut request = prompt_request("a red fox");
        request
            .inputs
            .push(NamedTensor::new(SEED_INPUT, vec![1], TensorData::U64(vec![1234])).unwrap());
        model.execute(vec![request]).unwrap();

        assert_eq!(model.pipeline().unwrap().calls[0].seed, Some(1234));
    }

    #[test]
    fn execute_propagates_failures() {
        let dir = model_dir(crate::DEFAULT_CHECKPOINT_DIR);
        let mut model =
            ImageGenerationModel::<StubLoader>::initialize(args(dir.path(), config_json("TYPE_UINT8", "")))
                .unwrap();

        let missing = model.execute(vec![InferenceRequest::default()]);
        assert!(matches!(missing, Err(AdapterError::MissingInput(name)) if name == PROMPT_INPUT));

        let failed = model.execute(vec![prompt_request("fail")]);
        assert!(matches!(failed, Err(AdapterError::Pipeline(_))));
    }

    #[test]
    fn finalize_releases_pipeline() {
        let dir = model_dir(crate::DEFAULT_CHECKPOINT_DIR);
        let mut model =
            ImageGenerationModel::<StubLoader>::initialize(args(dir.path(), config_json("TYPE_UINT8", "")))
                .unwrap();

        model.finalize();
        assert!(model.pipeline().is_none());
        assert!(matches!(
            model.execute(vec![prompt_request("late")]),
            Err(AdapterError::NotInitialized)
        ));
    }
}
