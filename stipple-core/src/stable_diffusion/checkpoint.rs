use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

pub const TEXT_ENCODER: &str = "text_encoder";
pub const UNET: &str = "unet";
pub const VAE: &str = "vae";
pub const TOKENIZER: &str = "tokenizer";
pub const SCHEDULER: &str = "scheduler";

pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const SCHEDULER_CONFIG_FILE: &str = "scheduler_config.json";

/// Resolved file locations of a diffusers-layout checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointFiles {
    pub clip_weights: PathBuf,
    pub unet_weights: PathBuf,
    pub vae_weights: PathBuf,
    pub tokenizer: PathBuf,
    /// Absent in some exports, in which case scheduler defaults apply.
    pub scheduler_config: Option<PathBuf>,
}

/// Weight file name of a component, optionally for a revision variant.
pub fn weights_file_name(stem: &str, revision: Option<&str>) -> String {
    match revision {
        Some(revision) if !revision.is_empty() => format!("{stem}.{revision}.safetensors"),
        _ => format!("{stem}.safetensors"),
    }
}

/// Stem of the weight file of each component.
pub fn weights_stem(component: &str) -> &'static str {
    if component == TEXT_ENCODER {
        "model"
    } else {
        "diffusion_pytorch_model"
    }
}

fn find_weights(checkpoint_dir: &Path, component: &str, revision: &str) -> Result<PathBuf> {
    let dir = checkpoint_dir.join(component);
    let stem = weights_stem(component);
    let candidates = [
        dir.join(weights_file_name(stem, Some(revision))),
        dir.join(weights_file_name(stem, None)),
    ];
    match candidates.iter().find(|path| path.is_file()) {
        Some(path) => Ok(path.clone()),
        None => bail!(
            "no {component} weights in {} (looked for {})",
            dir.display(),
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

impl CheckpointFiles {
    pub fn resolve(checkpoint_dir: &Path, revision: &str) -> Result<Self> {
        let tokenizer = checkpoint_dir.join(TOKENIZER).join(TOKENIZER_FILE);
        if !tokenizer.is_file() {
            bail!("tokenizer not found at {}", tokenizer.display());
        }
        let scheduler_config = checkpoint_dir.join(SCHEDULER).join(SCHEDULER_CONFIG_FILE);

        Ok(Self {
            clip_weights: find_weights(checkpoint_dir, TEXT_ENCODER, revision)?,
            unet_weights: find_weights(checkpoint_dir, UNET, revision)?,
            vae_weights: find_weights(checkpoint_dir, VAE, revision)?,
            tokenizer,
            scheduler_config: scheduler_config.is_file().then_some(scheduler_config),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: PathBuf) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn prefers_revision_variant() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(root.join("text_encoder/model.safetensors"));
        touch(root.join("unet/diffusion_pytorch_model.safetensors"));
        touch(root.join("unet/diffusion_pytorch_model.fp16.safetensors"));
        touch(root.join("vae/diffusion_pytorch_model.fp16.safetensors"));
        touch(root.join("tokenizer/tokenizer.json"));

        let files = CheckpointFiles::resolve(root, "fp16").unwrap();
        assert_eq!(files.clip_weights, root.join("text_encoder/model.safetensors"));
        assert_eq!(
            files.unet_weights,
            root.join("unet/diffusion_pytorch_model.fp16.safetensors")
        );
        assert_eq!(
            files.vae_weights,
            root.join("vae/diffusion_pytorch_model.fp16.safetensors")
        );
        assert!(files.scheduler_config.is_none());
    }

    #[test]
    fn reports_missing_component() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(root.join("text_encoder/model.safetensors"));
        touch(root.join("tokenizer/tokenizer.json"));
        touch(root.join("scheduler/scheduler_config.json"));

        let err = CheckpointFiles::resolve(root, "fp16").unwrap_err();
        assert!(err.to_string().contains("no unet weights"));
    }

    #[test]
    fn names_weight_files() {
        assert_eq!(
            weights_file_name("model", Some("fp16")),
            "model.fp16.safetensors"
        );
        assert_eq!(weights_file_name("model", Some("")), "model.safetensors");
        assert_eq!(weights_stem(VAE), "diffusion_pytorch_model");
    }
}
