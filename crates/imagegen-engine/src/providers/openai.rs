use imagegen_contracts::{GenerationOptions, ProviderError};
use serde_json::{json, Value};

use super::{ImageProvider, ProviderHttp};

pub const OPENAI_SIZES: &[&str] = &["1024x1024", "1024x1792", "1792x1024"];

pub struct OpenAiProvider {
    id: String,
    transport: ProviderHttp,
    sizes: Vec<String>,
}

impl OpenAiProvider {
    pub fn new(id: impl Into<String>, transport: ProviderHttp) -> Self {
        Self {
            id: id.into(),
            transport,
            sizes: OPENAI_SIZES.iter().map(|size| size.to_string()).collect(),
        }
    }

    /// Replaces the vendor size table, e.g. with a configured `supported_sizes`.
    pub fn with_sizes(mut self, sizes: Vec<String>) -> Self {
        self.sizes = sizes;
        self
    }

    /// `model` is only sent when the caller picked one.
    pub fn payload(prompt: &str, options: &GenerationOptions) -> Value {
        let mut payload = json!({
            "prompt": prompt,
            "n": options.n.unwrap_or(1),
            "size": options.size.as_deref().unwrap_or("1024x1024"),
            "quality": options.quality.as_deref().unwrap_or("standard"),
            "style": options.style.as_deref().unwrap_or("vivid"),
        });
        if let (Some(model), Some(object)) = (options.model.as_deref(), payload.as_object_mut()) {
            object.insert("model".to_string(), Value::String(model.to_string()));
        }
        payload
    }
}

impl ImageProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.id
    }

    fn validate_params(&self, _prompt: &str, options: &GenerationOptions) -> bool {
        options
            .size
            .as_deref()
            .map_or(true, |size| self.sizes.iter().any(|item| item == size))
    }

    fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<Value, ProviderError> {
        if !self.validate_params(prompt, options) {
            return Err(ProviderError::InvalidParameters {
                provider: self.transport.display_name().to_string(),
            });
        }
        self.transport.post_json(&Self::payload(prompt, options))
    }
}
