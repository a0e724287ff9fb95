use std::path::PathBuf;

use thiserror::Error;

/// Configuration failures: unknown providers and an unusable config store.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Provider '{provider}' not found in configuration")]
    NotFound { provider: String },

    #[error("Could not save config file {}: {message}", path.display())]
    Persistence { path: PathBuf, message: String },

    #[error("Could not parse config file {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
}

impl RegistryError {
    pub fn not_found(provider: impl Into<String>) -> Self {
        Self::NotFound {
            provider: provider.into(),
        }
    }
}

/// Failures raised by a single provider client call.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Invalid parameters for {provider}")]
    InvalidParameters { provider: String },

    #[error("{env_var} not set for provider {provider}")]
    MissingCredential { provider: String, env_var: String },

    #[error("{provider} API request failed: {message}")]
    Transport { provider: String, message: String },

    #[error("{provider} API request failed ({status}): {message}")]
    Http {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("{provider} API request failed: invalid JSON response: {message}")]
    Decode { provider: String, message: String },
}

impl ProviderError {
    /// Errors that a later attempt can never fix.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::InvalidParameters { .. } | Self::MissingCredential { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidParameters { .. } => "InvalidParameters",
            Self::MissingCredential { .. } => "MissingCredential",
            Self::Transport { .. } => "TransportError",
            Self::Http { .. } => "HttpError",
            Self::Decode { .. } => "DecodeError",
        }
    }
}

/// Everything `generate` can surface to its caller as a hard error.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Provider '{provider}' not available. Available providers: {available:?}")]
    Unavailable {
        provider: String,
        available: Vec<String>,
    },

    #[error("Rate limit reached for provider '{provider}', retry after {retry_after_secs:.1}s")]
    RateLimited {
        provider: String,
        retry_after_secs: f64,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Failed to generate image after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

impl GenerateError {
    /// Stable name of the failure class, used as `error_type` in error records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Registry(RegistryError::NotFound { .. }) => "NotFoundError",
            Self::Registry(RegistryError::Persistence { .. }) => "PersistenceError",
            Self::Registry(RegistryError::Parse { .. }) => "ConfigurationError",
            Self::Unavailable { .. } => "ProviderUnavailable",
            Self::RateLimited { .. } => "RateLimited",
            Self::Provider(err) => err.kind(),
            Self::RetriesExhausted { .. } => "RetriesExhausted",
        }
    }
}
