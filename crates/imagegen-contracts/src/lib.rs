//! Provider configuration, validation, rate limiting and result types for
//! multi-provider image generation. Nothing in this crate touches the network.

pub mod error;
pub mod events;
pub mod providers;
pub mod rate_limit;
pub mod request;
pub mod results;
pub mod validation;

pub use error::{GenerateError, ProviderError, RegistryError};
pub use providers::{
    CredentialSource, EnvCredentials, GlobalSettings, ProviderDescriptor, ProviderFamily,
    ProviderRegistry, ProviderUpdate, RateLimitQuota, SupportedParameters,
};
pub use rate_limit::RateLimiter;
pub use request::{GenerationOptions, GenerationRequest, StabilityOptions};
pub use results::{BatchEntry, GeneratedImage, GenerationResult, ResultMetadata};
pub use validation::{ParameterValidator, ValidationReport};
