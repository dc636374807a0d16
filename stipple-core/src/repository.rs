use std::path::{Path, PathBuf};

use crate::{AdapterError, InitializeArgs, InstanceKind, ModelConfig, Result};

pub const CONFIG_FILE: &str = "config.json";

/// A host model repository: `<root>/<model>/config.json` plus numeric
/// version directories `<root>/<model>/<version>/`.
#[derive(Debug, Clone)]
pub struct ModelRepository {
    root: PathBuf,
}

impl ModelRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn model_dir(&self, model: &str) -> PathBuf {
        self.root.join(model)
    }

    /// Reads the raw JSON config of a model.
    pub fn read_config(&self, model: &str) -> Result<String> {
        let path = self.model_dir(model).join(CONFIG_FILE);
        if !path.is_file() {
            return Err(AdapterError::NotFound(path));
        }
        Ok(std::fs::read_to_string(path)?)
    }

    pub fn load_config(&self, model: &str) -> Result<ModelConfig> {
        ModelConfig::from_json(&self.read_config(model)?)
    }

    /// Highest numeric version directory of a model.
    pub fn latest_version(&self, model: &str) -> Result<u64> {
        let dir = self.model_dir(model);
        if !dir.is_dir() {
            return Err(AdapterError::NotFound(dir));
        }
        let mut latest = None;
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(version) = entry.file_name().to_str().and_then(|s| s.parse::<u64>().ok())
            {
                latest = latest.max(Some(version));
            }
        }
        latest.ok_or_else(|| AdapterError::NoVersions(model.to_string()))
    }

    /// Builds the arguments the host hands to `ServedModel::initialize`.
    pub fn initialize_args(
        &self,
        model: &str,
        version: Option<u64>,
        kind: InstanceKind,
        device_id: usize,
    ) -> Result<InitializeArgs> {
        let model_config = self.read_config(model)?;
        let model_version = match version {
            Some(version) => {
                let dir = self.model_dir(model).join(version.to_string());
                if !dir.is_dir() {
                    return Err(AdapterError::NotFound(dir));
                }
                version
            }
            None => self.latest_version(model)?,
        };

        Ok(InitializeArgs {
            model_config,
            model_repository: self.model_dir(model),
            model_name: model.to_string(),
            model_version,
            model_instance_kind: kind,
            model_instance_device_id: device_id,
        })
    }
}
