use imagegen_contracts::request::parse_size;
use imagegen_contracts::{GenerationOptions, ProviderError};
use serde_json::{json, Value};

use super::{ImageProvider, ProviderHttp};

const DEFAULT_CFG_SCALE: f64 = 7.0;
const DEFAULT_STEPS: u32 = 50;
const DEFAULT_DIMENSION: u32 = 1024;

/// Stability text-to-image. Size is expressed as explicit width and height,
/// so there is no size table on the client side.
pub struct StabilityProvider {
    id: String,
    transport: ProviderHttp,
}

impl StabilityProvider {
    pub fn new(id: impl Into<String>, transport: ProviderHttp) -> Self {
        Self {
            id: id.into(),
            transport,
        }
    }

    pub fn payload(prompt: &str, options: &GenerationOptions) -> Value {
        let parsed = options.size.as_deref().and_then(parse_size);
        let extra = &options.stability;
        let width = extra
            .width
            .or(parsed.map(|(width, _)| width))
            .unwrap_or(DEFAULT_DIMENSION);
        let height = extra
            .height
            .or(parsed.map(|(_, height)| height))
            .unwrap_or(DEFAULT_DIMENSION);
        json!({
            "text_prompts": [{"text": prompt}],
            "cfg_scale": extra.cfg_scale.unwrap_or(DEFAULT_CFG_SCALE),
            "height": height,
            "width": width,
            "samples": options.n.unwrap_or(1),
            "steps": extra.steps.unwrap_or(DEFAULT_STEPS),
        })
    }
}

impl ImageProvider for StabilityProvider {
    fn name(&self) -> &str {
        &self.id
    }

    fn validate_params(&self, _prompt: &str, _options: &GenerationOptions) -> bool {
        true
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

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use imagegen_contracts::StabilityOptions;

    use super::*;

    #[test]
    fn payload_wraps_prompt_and_fills_defaults() {
        let payload = StabilityProvider::payload("A mountain", &GenerationOptions::default());
        assert_eq!(
            payload,
            json!({
                "text_prompts": [{"text": "A mountain"}],
                "cfg_scale": 7.0,
                "height": 1024,
                "width": 1024,
                "samples": 1,
                "steps": 50,
            })
        );
    }

    #[test]
    fn dimensions_come_from_size_unless_set_explicitly() {
        let options = GenerationOptions::default().with_size("768x512");
        let payload = StabilityProvider::payload("x", &options);
        assert_eq!(payload["width"], 768);
        assert_eq!(payload["height"], 512);

        let options = GenerationOptions {
            stability: StabilityOptions {
                height: Some(640),
                steps: Some(30),
                cfg_scale: Some(9.5),
                ..StabilityOptions::default()
            },
            ..GenerationOptions::default().with_size("768x512")
        };
        let payload = StabilityProvider::payload("x", &options);
        assert_eq!(payload["width"], 768);
        assert_eq!(payload["height"], 640);
        assert_eq!(payload["steps"], 30);
        assert_eq!(payload["cfg_scale"], 9.5);
    }

    #[test]
    fn unreachable_endpoint_is_a_transport_error() -> anyhow::Result<()> {
        let transport = ProviderHttp::new(
            "Stability AI",
            "http://127.0.0.1:9/v1/generation",
            "sk-s",
            Duration::from_secs(2),
        )?;
        let client = StabilityProvider::new("stability", transport);
        let err = client.generate("x", &GenerationOptions::default()).err();
        match err {
            Some(err @ ProviderError::Transport { .. }) => {
                assert!(err.to_string().starts_with("Stability AI API request failed: "));
            }
            other => panic!("expected transport error, got {other:?}"),
        }
        Ok(())
    }
}
