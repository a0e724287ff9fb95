use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

use super::{GeneratedImage, GenerationResult, ResultMetadata};
use crate::error::GenerateError;
use crate::providers::ProviderFamily;
use crate::validation::ValidationReport;

pub const INLINE_PNG_PREFIX: &str = "data:image/png;base64,";
pub const RATE_LIMIT_RETRY_AFTER_SECS: u64 = 60;

/// Maps a raw vendor response for `provider` into the standard shape.
///
/// The mapping is picked from the provider id. Mapping failures never escape:
/// they come back as `success: false` with the reason in `error`.
pub fn standardize(provider: &str, raw: &Value) -> GenerationResult {
    standardize_as(provider, ProviderFamily::from_id(provider), raw)
}

/// Same as [`standardize`] with an explicit wire family.
pub fn standardize_as(
    provider: &str,
    family: Option<ProviderFamily>,
    raw: &Value,
) -> GenerationResult {
    match map_images(family, raw) {
        Ok(images) => GenerationResult {
            images,
            metadata: Some(ResultMetadata {
                raw_response: raw.clone(),
                timestamp: now_utc_iso(),
            }),
            ..GenerationResult::empty(provider)
        },
        Err(message) => GenerationResult::failed(provider, message),
    }
}

/// Error record for a failed call, with the OpenAI-specific hints.
pub fn handle_error(provider: &str, error: &GenerateError) -> GenerationResult {
    handle_error_as(provider, ProviderFamily::from_id(provider), error)
}

/// Same as [`handle_error`] with an explicit wire family.
pub fn handle_error_as(
    provider: &str,
    family: Option<ProviderFamily>,
    error: &GenerateError,
) -> GenerationResult {
    error_result(provider, family, error.kind(), &error.to_string())
}

/// Hints are matched case-insensitively on the message text.
pub fn error_result(
    provider: &str,
    family: Option<ProviderFamily>,
    error_type: &str,
    message: &str,
) -> GenerationResult {
    let mut result = GenerationResult {
        error_type: Some(error_type.to_string()),
        ..GenerationResult::failed(provider, message)
    };
    if family == Some(ProviderFamily::OpenAi) {
        let lowered = message.to_lowercase();
        if lowered.contains("rate limit") {
            result.retry_after = Some(RATE_LIMIT_RETRY_AFTER_SECS);
        } else if lowered.contains("invalid api key") {
            result.action = Some("check_api_key".to_string());
        }
    }
    result
}

pub fn validation_failure(provider: &str, report: &ValidationReport) -> GenerationResult {
    GenerationResult {
        error_type: Some("ValidationError".to_string()),
        warnings: report.warnings.clone(),
        ..GenerationResult::failed(provider, report.errors.join("; "))
    }
}

fn map_images(
    family: Option<ProviderFamily>,
    raw: &Value,
) -> Result<Vec<GeneratedImage>, String> {
    let Some(family) = family else {
        return Ok(Vec::new());
    };
    match family {
        ProviderFamily::Jimeng => rows(raw, "data")?
            .into_iter()
            .map(|row| {
                Ok(GeneratedImage {
                    url: string_field(row, "url"),
                    revised_prompt: string_field(row, "revised_prompt"),
                    seed: row.get("seed").and_then(Value::as_i64),
                })
            })
            .collect(),
        ProviderFamily::OpenAi => rows(raw, "data")?
            .into_iter()
            .map(|row| {
                let inline = || {
                    string_field(row, "b64_json").map(|data| format!("{INLINE_PNG_PREFIX}{data}"))
                };
                let url = string_field(row, "url").or_else(inline);
                Ok(GeneratedImage {
                    url,
                    revised_prompt: string_field(row, "revised_prompt"),
                    seed: None,
                })
            })
            .collect(),
        ProviderFamily::Stability => rows(raw, "artifacts")?
            .into_iter()
            .enumerate()
            .map(|(idx, row)| {
                let payload = string_field(row, "base64")
                    .ok_or_else(|| format!("artifacts[{idx}] missing base64 payload"))?;
                Ok(GeneratedImage {
                    url: Some(format!("{INLINE_PNG_PREFIX}{payload}")),
                    revised_prompt: None,
                    seed: row.get("seed").and_then(Value::as_i64),
                })
            })
            .collect(),
    }
}

/// Objects under `raw[key]`. An absent key means no images.
fn rows<'a>(raw: &'a Value, key: &str) -> Result<Vec<&'a Map<String, Value>>, String> {
    let Some(container) = raw.get(key) else {
        return Ok(Vec::new());
    };
    let items = container
        .as_array()
        .ok_or_else(|| format!("'{key}' is not a list"))?;
    items
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            item.as_object()
                .ok_or_else(|| format!("'{key}[{idx}]' is not an object"))
        })
        .collect()
}

fn string_field(row: &Map<String, Value>, key: &str) -> Option<String> {
    row.get(key).and_then(Value::as_str).map(str::to_string)
}

pub(crate) fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
