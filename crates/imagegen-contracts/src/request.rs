use serde::{Deserialize, Serialize};

/// Knobs only the Stability wire format understands.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StabilityOptions {
    /// Prompt adherence, vendor default 7.
    pub cfg_scale: Option<f64>,
    /// Diffusion steps, vendor default 50.
    pub steps: Option<u32>,
    /// Falls back to the width parsed from `size`, then 1024.
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Caller-supplied generation options. Unset fields take the provider's default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// `"{width}x{height}"`, default `1024x1024`.
    pub size: Option<String>,
    /// Default `standard`.
    pub quality: Option<String>,
    /// Default `natural` for Jimeng, `vivid` for OpenAI; ignored by Stability.
    pub style: Option<String>,
    /// Number of images, default 1.
    pub n: Option<u32>,
    /// Model override. Jimeng defaults to `jimeng-v1`; OpenAI sends it only when set.
    pub model: Option<String>,
    /// Attempts before giving up, default from the global settings.
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub stability: StabilityOptions,
}

impl GenerationOptions {
    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = Some(size.into());
        self
    }

    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = Some(quality.into());
        self
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// One call against one provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub provider: String,
    pub prompt: String,
    pub options: GenerationOptions,
}

impl GenerationRequest {
    pub fn new(
        provider: impl Into<String>,
        prompt: impl Into<String>,
        options: GenerationOptions,
    ) -> Self {
        Self {
            provider: provider.into(),
            prompt: prompt.into(),
            options,
        }
    }
}

/// Parses `"{width}x{height}"` into positive dimensions.
pub fn parse_size(size: &str) -> Option<(u32, u32)> {
    let (width, height) = size.split_once('x')?;
    let width = width.trim().parse::<u32>().ok()?;
    let height = height.trim().parse::<u32>().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}
