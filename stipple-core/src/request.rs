use crate::NamedTensor;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferenceRequest {
    pub id: Option<String>,
    pub inputs: Vec<NamedTensor>,
}

impl InferenceRequest {
    pub fn new(inputs: Vec<NamedTensor>) -> Self {
        Self { id: None, inputs }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn input_tensor_by_name(&self, name: &str) -> Option<&NamedTensor> {
        self.inputs.iter().find(|t| t.name() == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferenceResponse {
    /// Id of the request this response answers.
    pub id: Option<String>,
    pub output_tensors: Vec<NamedTensor>,
}

impl InferenceResponse {
    pub fn output_tensor_by_name(&self, name: &str) -> Option<&NamedTensor> {
        self.output_tensors.iter().find(|t| t.name() == name)
    }
}
