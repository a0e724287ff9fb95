mod jimeng;
mod openai;
mod stability;

use std::collections::BTreeMap;
use std::time::Duration;

use imagegen_contracts::{
    CredentialSource, GenerationOptions, ProviderError, ProviderFamily, ProviderRegistry,
};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;

pub use jimeng::{JimengProvider, JIMENG_SIZES};
pub use openai::{OpenAiProvider, OPENAI_SIZES};
pub use stability::StabilityProvider;

/// Capability shared by every vendor client.
pub trait ImageProvider: Send + Sync {
    /// Provider id the client is registered under.
    fn name(&self) -> &str;

    fn validate_params(&self, prompt: &str, options: &GenerationOptions) -> bool;

    /// Validates, then issues one POST. Returns the vendor JSON untouched.
    fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<Value, ProviderError>;
}

/// Lookup table from provider id to client.
#[derive(Default)]
pub struct ImageProviderRegistry {
    providers: BTreeMap<String, Box<dyn ImageProvider>>,
}

impl ImageProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: ImageProvider + 'static>(&mut self, provider: P) {
        self.register_boxed(Box::new(provider));
    }

    pub fn register_boxed(&mut self, provider: Box<dyn ImageProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<&dyn ImageProvider> {
        self.providers.get(name).map(|provider| provider.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    /// One client per provider that has a family and a usable credential.
    pub fn from_registry(
        registry: &ProviderRegistry,
        credentials: &dyn CredentialSource,
    ) -> Result<Self, ProviderError> {
        let timeout = Duration::from_secs(registry.global().timeout);
        let mut clients = Self::new();
        for id in registry.available_providers_from(credentials) {
            let Some(family) = registry.family(&id) else {
                tracing::debug!(provider = %id, "no wire family for provider, skipping client");
                continue;
            };
            let Some(api_key) = registry.credential(&id, credentials) else {
                continue;
            };
            let Ok(descriptor) = registry.get_provider_config(&id) else {
                continue;
            };
            let transport =
                ProviderHttp::new(&descriptor.name, &descriptor.endpoint, &api_key, timeout)?;
            clients.register_boxed(build_provider(
                &id,
                family,
                transport,
                &descriptor.supported_sizes,
            ));
        }
        Ok(clients)
    }
}

/// Client for `family`. A non-empty `sizes` list (the provider's configured
/// `supported_sizes`) replaces the vendor's built-in size table.
pub fn build_provider(
    id: &str,
    family: ProviderFamily,
    transport: ProviderHttp,
    sizes: &[String],
) -> Box<dyn ImageProvider> {
    let sizes = (!sizes.is_empty()).then(|| sizes.to_vec());
    match family {
        ProviderFamily::Jimeng => {
            let client = JimengProvider::new(id, transport);
            Box::new(match sizes {
                Some(sizes) => client.with_sizes(sizes),
                None => client,
            })
        }
        ProviderFamily::OpenAi => {
            let client = OpenAiProvider::new(id, transport);
            Box::new(match sizes {
                Some(sizes) => client.with_sizes(sizes),
                None => client,
            })
        }
        ProviderFamily::Stability => Box::new(StabilityProvider::new(id, transport)),
    }
}

/// Bearer-authenticated JSON POST shared by all vendor clients.
#[derive(Debug, Clone)]
pub struct ProviderHttp {
    display_name: String,
    endpoint: String,
    api_key: String,
    http: HttpClient,
}

impl ProviderHttp {
    pub fn new(
        display_name: &str,
        endpoint: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ProviderError::Transport {
                provider: display_name.to_string(),
                message: err.to_string(),
            })?;
        Ok(Self {
            display_name: display_name.to_string(),
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            http,
        })
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn post_json(&self, payload: &Value) -> Result<Value, ProviderError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .json(payload)
            .send()
            .map_err(|err| ProviderError::Transport {
                provider: self.display_name.clone(),
                message: err.to_string(),
            })?;

        let status = response.status();
        let body = response.text().map_err(|err| ProviderError::Transport {
            provider: self.display_name.clone(),
            message: err.to_string(),
        })?;
        if !status.is_success() {
            return Err(ProviderError::Http {
                provider: self.display_name.clone(),
                status: status.as_u16(),
                message: vendor_error_message(&body),
            });
        }
        serde_json::from_str(&body).map_err(|err| ProviderError::Decode {
            provider: self.display_name.clone(),
            message: err.to_string(),
        })
    }
}

/// Vendor message from an error body, falling back to the raw text.
fn vendor_error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let message = parsed.as_ref().and_then(|value| {
        value
            .pointer("/error/message")
            .or_else(|| value.get("message"))
            .or_else(|| value.get("error"))
            .and_then(Value::as_str)
    });
    match message {
        Some(message) => message.to_string(),
        None => truncate_text(body.trim(), 512),
    }
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
