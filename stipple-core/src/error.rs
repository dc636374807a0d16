use std::path::PathBuf;

use thiserror::Error;

use crate::DataType;

pub type Result<T> = std::result::Result<T, AdapterError>;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("invalid model config: {0}")]
    InvalidConfig(#[from] serde_json::Error),
    #[error("model config has no output named `{0}`")]
    MissingOutputConfig(String),
    #[error("output `{name}` is declared as {data_type}, only TYPE_UINT8 is supported")]
    UnsupportedOutputType { name: String, data_type: DataType },
    #[error("invalid value `{value}` for parameter `{key}`")]
    InvalidParameter { key: String, value: String },
    #[error("unknown data type `{0}`")]
    UnknownDataType(String),
    #[error("request has no input named `{0}`")]
    MissingInput(String),
    #[error("tensor `{name}`: {reason}")]
    InvalidTensor { name: String, reason: String },
    #[error("tensor `{name}` has {len} elements but shape {shape:?}")]
    ShapeMismatch {
        name: String,
        shape: Vec<usize>,
        len: usize,
    },
    #[error("path not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("model `{0}` has no numeric version directories")]
    NoVersions(String),
    #[error("model is not initialized")]
    NotInitialized,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Pipeline(#[from] anyhow::Error),
}
