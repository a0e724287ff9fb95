use serde::Serialize;

use crate::error::RegistryError;
use crate::providers::ProviderRegistry;
use crate::request::GenerationOptions;

pub const MAX_PROMPT_CHARS: usize = 1000;

pub const SENSITIVE_KEYWORDS: &[&str] = &[
    "violence",
    "nudity",
    "explicit",
    "adult",
    "hate",
    "discrimination",
];

/// Outcome of a parameter check. Invalid input is reported here, never thrown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supported_sizes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supported_qualities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supported_styles: Option<Vec<String>>,
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::ok()
    }
}

impl ValidationReport {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            supported_sizes: None,
            supported_qualities: None,
            supported_styles: None,
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            errors: vec![error.into()],
            ..Self::ok()
        }
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.valid &= other.valid;
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        if other.supported_sizes.is_some() {
            self.supported_sizes = other.supported_sizes;
        }
        if other.supported_qualities.is_some() {
            self.supported_qualities = other.supported_qualities;
        }
        if other.supported_styles.is_some() {
            self.supported_styles = other.supported_styles;
        }
    }
}

/// Stateless checks against a registry snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ParameterValidator<'a> {
    registry: &'a ProviderRegistry,
}

impl<'a> ParameterValidator<'a> {
    pub fn new(registry: &'a ProviderRegistry) -> Self {
        Self { registry }
    }

    pub fn validate_prompt(&self, prompt: &str) -> ValidationReport {
        let mut report = ValidationReport::ok();
        if prompt.trim().is_empty() {
            report.valid = false;
            report.errors.push("Prompt cannot be empty".to_string());
        } else if prompt.chars().count() > MAX_PROMPT_CHARS {
            report
                .warnings
                .push("Prompt is very long, consider making it more concise".to_string());
        }

        let lowered = prompt.to_lowercase();
        for keyword in SENSITIVE_KEYWORDS {
            if lowered.contains(keyword) {
                report.warnings.push(format!(
                    "Prompt contains potentially sensitive content: {keyword}"
                ));
            }
        }
        report
    }

    pub fn validate_size(
        &self,
        size: &str,
        provider: &str,
    ) -> Result<ValidationReport, RegistryError> {
        let Some((width, height)) = split_dims(size) else {
            return Ok(ValidationReport::invalid(
                "Size must be in format WIDTHxHEIGHT (e.g., 1024x1024)",
            ));
        };
        if width <= 0 || height <= 0 {
            return Ok(ValidationReport::invalid("Size must be positive"));
        }

        let descriptor = self.registry.get_provider_config(provider)?;
        if !descriptor.supported_sizes.iter().any(|item| item == size) {
            return Ok(ValidationReport {
                supported_sizes: Some(descriptor.supported_sizes.clone()),
                ..ValidationReport::invalid(format!(
                    "Size {size} not supported by provider {provider}"
                ))
            });
        }
        Ok(ValidationReport::ok())
    }

    pub fn validate_quality(
        &self,
        quality: &str,
        provider: &str,
    ) -> Result<ValidationReport, RegistryError> {
        let descriptor = self.registry.get_provider_config(provider)?;
        if !descriptor.supported_qualities.iter().any(|item| item == quality) {
            return Ok(ValidationReport {
                supported_qualities: Some(descriptor.supported_qualities.clone()),
                ..ValidationReport::invalid(format!(
                    "Quality {quality} not supported by provider {provider}"
                ))
            });
        }
        Ok(ValidationReport::ok())
    }

    pub fn validate_style(
        &self,
        style: &str,
        provider: &str,
    ) -> Result<ValidationReport, RegistryError> {
        let descriptor = self.registry.get_provider_config(provider)?;
        if !descriptor.supported_styles.iter().any(|item| item == style) {
            return Ok(ValidationReport {
                supported_styles: Some(descriptor.supported_styles.clone()),
                ..ValidationReport::invalid(format!(
                    "Style {style} not supported by provider {provider}"
                ))
            });
        }
        Ok(ValidationReport::ok())
    }

    /// Prompt plus every option the caller actually set.
    pub fn validate_request(
        &self,
        provider: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<ValidationReport, RegistryError> {
        self.registry.get_provider_config(provider)?;
        let mut report = self.validate_prompt(prompt);
        if let Some(size) = options.size.as_deref() {
            report.merge(self.validate_size(size, provider)?);
        }
        if let Some(quality) = options.quality.as_deref() {
            report.merge(self.validate_quality(quality, provider)?);
        }
        if let Some(style) = options.style.as_deref() {
            report.merge(self.validate_style(style, provider)?);
        }
        Ok(report)
    }
}

fn split_dims(size: &str) -> Option<(i64, i64)> {
    let mut parts = size.split('x');
    let width = parts.next()?.trim().parse::<i64>().ok()?;
    let height = parts.next()?.trim().parse::<i64>().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((width, height))
}
