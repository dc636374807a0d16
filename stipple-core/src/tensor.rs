use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{AdapterError, Result};

/// Tensor element types, named the way the host runtime writes them in model configs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    #[serde(rename = "TYPE_BOOL")]
    Bool,
    #[serde(rename = "TYPE_UINT8")]
    U8,
    #[serde(rename = "TYPE_UINT16")]
    U16,
    #[serde(rename = "TYPE_UINT32")]
    U32,
    #[serde(rename = "TYPE_UINT64")]
    U64,
    #[serde(rename = "TYPE_INT8")]
    I8,
    #[serde(rename = "TYPE_INT16")]
    I16,
    #[serde(rename = "TYPE_INT32")]
    I32,
    #[serde(rename = "TYPE_INT64")]
    I64,
    #[serde(rename = "TYPE_FP16")]
    F16,
    #[serde(rename = "TYPE_FP32")]
    F32,
    #[serde(rename = "TYPE_FP64")]
    F64,
    #[serde(rename = "TYPE_BF16")]
    BF16,
    #[serde(rename = "TYPE_STRING")]
    String,
}

serde_plain::derive_display_from_serialize!(DataType);

impl FromStr for DataType {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self> {
        serde_plain::from_str(s).map_err(|_| AdapterError::UnknownDataType(s.to_string()))
    }
}

impl DataType {
    /// Size in bytes of one element, `None` for variable-length strings.
    pub fn element_size(&self) -> Option<usize> {
        match self {
            DataType::Bool | DataType::U8 | DataType::I8 => Some(1),
            DataType::U16 | DataType::I16 | DataType::F16 | DataType::BF16 => Some(2),
            DataType::U32 | DataType::I32 | DataType::F32 => Some(4),
            DataType::U64 | DataType::I64 | DataType::F64 => Some(8),
            DataType::String => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    Bool(Vec<bool>),
    U8(Vec<u8>),
    U64(Vec<u64>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    /// One byte string per element, the host's `TYPE_STRING` representation.
    Bytes(Vec<Vec<u8>>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::Bool(v) => v.len(),
            TensorData::U8(v) => v.len(),
            TensorData::U64(v) => v.len(),
            TensorData::I64(v) => v.len(),
            TensorData::F32(v) => v.len(),
            TensorData::Bytes(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data_type(&self) -> DataType {
        match self {
            TensorData::Bool(_) => DataType::Bool,
            TensorData::U8(_) => DataType::U8,
            TensorData::U64(_) => DataType::U64,
            TensorData::I64(_) => DataType::I64,
            TensorData::F32(_) => DataType::F32,
            TensorData::Bytes(_) => DataType::String,
        }
    }
}

/// A named tensor exchanged with the host runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedTensor {
    name: String,
    shape: Vec<usize>,
    data: TensorData,
}

impl NamedTensor {
    pub fn new(name: impl Into<String>, shape: Vec<usize>, data: TensorData) -> Result<Self> {
        let name = name.into();
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(AdapterError::ShapeMismatch {
                name,
                shape,
                len: data.len(),
            });
        }
        Ok(Self { name, shape, data })
    }

    /// Builds a `[1, 1]` string tensor, the shape the host uses for a single prompt.
    pub fn from_str_element(name: impl Into<String>, value: &str) -> Self {
        Self {
            name: name.into(),
            shape: vec![1, 1],
            data: TensorData::Bytes(vec![value.as_bytes().to_vec()]),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn into_data(self) -> TensorData {
        self.data
    }

    pub fn data_type(&self) -> DataType {
        self.data.data_type()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_u8(&self) -> Option<&[u8]> {
        match &self.data {
            TensorData::U8(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[Vec<u8>]> {
        match &self.data {
            TensorData::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// Decodes the first element of a string tensor as UTF-8.
    pub fn first_string(&self) -> Result<String> {
        let elements = self.as_bytes().ok_or_else(|| self.invalid(format!(
            "expected {}, got {}",
            DataType::String,
            self.data_type()
        )))?;
        let first = elements
            .first()
            .ok_or_else(|| self.invalid("tensor is empty".to_string()))?;
        String::from_utf8(first.clone()).map_err(|e| self.invalid(e.to_string()))
    }

    /// First element of an integer tensor, as used for scalar inputs like `seed`.
    pub fn first_u64(&self) -> Result<u64> {
        match &self.data {
            TensorData::U64(v) => v
                .first()
                .copied()
                .ok_or_else(|| self.invalid("tensor is empty".to_string())),
            TensorData::I64(v) => {
                let value = v
                    .first()
                    .copied()
                    .ok_or_else(|| self.invalid("tensor is empty".to_string()))?;
                u64::try_from(value).map_err(|_| self.invalid(format!("negative value {value}")))
            }
            _ => Err(self.invalid(format!(
                "expected an integer tensor, got {}",
                self.data_type()
            ))),
        }
    }

    fn invalid(&self, reason: String) -> AdapterError {
        AdapterError::InvalidTensor {
            name: self.name.clone(),
            reason,
        }
    }
}
