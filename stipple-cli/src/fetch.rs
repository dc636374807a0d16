use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use hf_hub::{
    api::tokio::{ApiBuilder, ApiRepo},
    Repo, RepoType,
};
use stipple_core::stable_diffusion::{
    weights_file_name, weights_stem, SCHEDULER, SCHEDULER_CONFIG_FILE, TEXT_ENCODER, TOKENIZER,
    TOKENIZER_FILE, UNET, VAE,
};

/// One file to place into the checkpoint directory. Hub paths mirror the
/// local layout, so the first candidate found is also the local path.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedFile {
    /// Candidate names in the hub repo, tried in order.
    pub remote: Vec<String>,
}

/// Files of a diffusers checkpoint, preferring the `revision` weight variant.
pub fn checkpoint_plan(revision: &str) -> Vec<PlannedFile> {
    let mut plan: Vec<PlannedFile> = [TEXT_ENCODER, UNET, VAE]
        .into_iter()
        .map(|component| {
            let stem = weights_stem(component);
            let variant = format!("{component}/{}", weights_file_name(stem, Some(revision)));
            let plain = format!("{component}/{}", weights_file_name(stem, None));
            let mut remote = vec![variant.clone()];
            if plain != variant {
                remote.push(plain);
            }
            PlannedFile { remote }
        })
        .collect();
    let scheduler = format!("{SCHEDULER}/{SCHEDULER_CONFIG_FILE}");
    plan.push(PlannedFile {
        remote: vec![scheduler],
    });
    plan
}

async fn get_first(repo: &ApiRepo, candidates: &[String]) -> Result<(String, PathBuf)> {
    let mut last_err = None;
    for name in candidates {
        match repo.get(name).await {
            Ok(path) => return Ok((name.clone(), path)),
            Err(err) => {
                tracing::debug!(file = %name, %err, "not available");
                last_err = Some(err);
            }
        }
    }
    match last_err {
        Some(err) => Err(err).with_context(|| format!("failed to fetch any of {candidates:?}")),
        None => anyhow::bail!("no candidate files given"),
    }
}

async fn place(cached: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(cached, target)
        .await
        .with_context(|| format!("failed to copy into {}", target.display()))?;
    Ok(())
}

pub struct FetchRequest<'a> {
    pub hub_id: &'a str,
    pub hub_revision: &'a str,
    pub tokenizer_id: &'a str,
    pub weight_revision: &'a str,
    pub checkpoint_dir: &'a Path,
    pub cache_dir: PathBuf,
}

pub async fn fetch_checkpoint(request: FetchRequest<'_>) -> Result<()> {
    let api = ApiBuilder::new()
        .with_cache_dir(request.cache_dir)
        .with_progress(true)
        .build()
        .context("failed to create hf hub API")?;
    let repo = api.repo(Repo::with_revision(
        request.hub_id.to_string(),
        RepoType::Model,
        request.hub_revision.to_string(),
    ));

    for file in checkpoint_plan(request.weight_revision) {
        let (name, cached) = get_first(&repo, &file.remote).await?;
        let target = request.checkpoint_dir.join(&name);
        place(&cached, &target).await?;
        tracing::info!(file = %name, target = %target.display(), "fetched");
    }

    let tokenizer = api
        .model(request.tokenizer_id.to_string())
        .get(TOKENIZER_FILE)
        .await
        .context("failed to get CLIP tokenizer")?;
    let target = request.checkpoint_dir.join(TOKENIZER).join(TOKENIZER_FILE);
    place(&tokenizer, &target).await?;
    tracing::info!(target = %target.display(), "fetched tokenizer");

    Ok(())
}
