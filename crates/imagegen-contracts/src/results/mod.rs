mod normalize;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub(crate) use normalize::now_utc_iso;
pub use normalize::{
    error_result, handle_error, handle_error_as, standardize, standardize_as, validation_failure,
    INLINE_PNG_PREFIX, RATE_LIMIT_RETRY_AFTER_SECS,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    /// Remote URL or an inline `data:` URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub raw_response: Value,
    pub timestamp: String,
}

/// Vendor-agnostic outcome of one generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub provider: String,
    pub success: bool,
    #[serde(default)]
    pub images: Vec<GeneratedImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResultMetadata>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Seconds, set when the vendor reported rate limiting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    /// Suggested remediation, e.g. `check_api_key`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl GenerationResult {
    pub fn empty(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            success: true,
            images: Vec::new(),
            metadata: None,
            warnings: Vec::new(),
            error: None,
            error_type: None,
            retry_after: None,
            action: None,
        }
    }

    pub fn failed(provider: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::empty(provider)
        }
    }
}

/// One slot of a batch run, in input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BatchEntry {
    Generated(GenerationResult),
    Failed { error: String, prompt: String },
}

impl BatchEntry {
    pub fn result(&self) -> Option<&GenerationResult> {
        match self {
            Self::Generated(result) => Some(result),
            Self::Failed { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result().map(|result| result.success).unwrap_or(false)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Generated(result) => result.error.as_deref(),
            Self::Failed { error, .. } => Some(error.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn failed_batch_entry_serializes_as_error_and_prompt() -> anyhow::Result<()> {
        let entry = BatchEntry::Failed {
            error: "boom".to_string(),
            prompt: "A cute cat".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&entry)?,
            json!({"error": "boom", "prompt": "A cute cat"})
        );
        assert!(!entry.is_success());
        assert_eq!(entry.error(), Some("boom"));
        Ok(())
    }

    #[test]
    fn error_record_omits_unset_fields() -> anyhow::Result<()> {
        let result = GenerationResult::failed("stability", "timeout");
        assert_eq!(
            serde_json::to_value(&result)?,
            json!({
                "provider": "stability",
                "success": false,
                "images": [],
                "error": "timeout",
            })
        );
        Ok(())
    }
}
