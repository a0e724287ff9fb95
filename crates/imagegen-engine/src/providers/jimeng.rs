use imagegen_contracts::{GenerationOptions, ProviderError};
use serde_json::{json, Value};

use super::{ImageProvider, ProviderHttp};

pub const JIMENG_SIZES: &[&str] = &["1024x1024", "512x512", "256x256"];

const DEFAULT_MODEL: &str = "jimeng-v1";

pub struct JimengProvider {
    id: String,
    transport: ProviderHttp,
    sizes: Vec<String>,
}

impl JimengProvider {
    pub fn new(id: impl Into<String>, transport: ProviderHttp) -> Self {
        Self {
            id: id.into(),
            transport,
            sizes: JIMENG_SIZES.iter().map(|size| size.to_string()).collect(),
        }
    }

    /// Replaces the vendor size table, e.g. with a configured `supported_sizes`.
    pub fn with_sizes(mut self, sizes: Vec<String>) -> Self {
        self.sizes = sizes;
        self
    }

    pub fn payload(prompt: &str, options: &GenerationOptions) -> Value {
        json!({
            "prompt": prompt,
            "model": options.model.as_deref().unwrap_or(DEFAULT_MODEL),
            "size": options.size.as_deref().unwrap_or("1024x1024"),
            "quality": options.quality.as_deref().unwrap_or("standard"),
            "n": options.n.unwrap_or(1),
            "style": options.style.as_deref().unwrap_or("natural"),
        })
    }
}

impl ImageProvider for JimengProvider {
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
