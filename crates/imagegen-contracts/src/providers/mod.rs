pub mod defaults;
mod store;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

pub use store::{ConfigOverrides, ConfigStore, GlobalOverrides, DEFAULT_CONFIG_PATH};

/// Wire format a provider speaks. Picks the client and the response mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderFamily {
    Jimeng,
    #[serde(rename = "openai")]
    OpenAi,
    Stability,
}

impl ProviderFamily {
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "jimeng" => Some(Self::Jimeng),
            "openai" => Some(Self::OpenAi),
            "stability" => Some(Self::Stability),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Jimeng => "jimeng",
            Self::OpenAi => "openai",
            Self::Stability => "stability",
        }
    }

    pub fn default_api_key_env(self) -> &'static str {
        match self {
            Self::Jimeng => "JIMENG_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Stability => "STABILITY_API_KEY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitQuota {
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default)]
    pub tokens_per_minute: u32,
}

impl Default for RateLimitQuota {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            tokens_per_minute: 0,
        }
    }
}

fn default_requests_per_minute() -> u32 {
    60
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub name: String,
    pub endpoint: String,
    #[serde(default)]
    pub required_params: Vec<String>,
    #[serde(default)]
    pub supported_sizes: Vec<String>,
    #[serde(default)]
    pub supported_qualities: Vec<String>,
    #[serde(default)]
    pub supported_styles: Vec<String>,
    #[serde(default)]
    pub rate_limit: RateLimitQuota,
    /// Environment variable holding the bearer token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<ProviderFamily>,
}

/// Partial descriptor applied by [`ProviderRegistry::update_provider`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProviderUpdate {
    pub name: Option<String>,
    pub endpoint: Option<String>,
    pub required_params: Option<Vec<String>>,
    pub supported_sizes: Option<Vec<String>>,
    pub supported_qualities: Option<Vec<String>>,
    pub supported_styles: Option<Vec<String>>,
    pub rate_limit: Option<RateLimitQuota>,
    pub api_key_env: Option<String>,
    pub family: Option<ProviderFamily>,
}

impl ProviderUpdate {
    fn apply(self, descriptor: &mut ProviderDescriptor) {
        if let Some(name) = self.name {
            descriptor.name = name;
        }
        if let Some(endpoint) = self.endpoint {
            descriptor.endpoint = endpoint;
        }
        if let Some(required) = self.required_params {
            descriptor.required_params = required;
        }
        if let Some(sizes) = self.supported_sizes {
            descriptor.supported_sizes = sizes;
        }
        if let Some(qualities) = self.supported_qualities {
            descriptor.supported_qualities = qualities;
        }
        if let Some(styles) = self.supported_styles {
            descriptor.supported_styles = styles;
        }
        if let Some(rate_limit) = self.rate_limit {
            descriptor.rate_limit = rate_limit;
        }
        if let Some(env_var) = self.api_key_env {
            descriptor.api_key_env = Some(env_var);
        }
        if let Some(family) = self.family {
            descriptor.family = Some(family);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalSettings {
    /// Per-request timeout in seconds.
    pub timeout: u64,
    pub max_retries: u32,
    /// Base backoff in seconds, doubled after every failed attempt.
    pub retry_delay: f64,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            timeout: 30,
            max_retries: 3,
            retry_delay: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupportedParameters {
    pub required: Vec<String>,
    pub sizes: Vec<String>,
    pub qualities: Vec<String>,
    pub styles: Vec<String>,
}

/// Where credential values come from. The process environment in production.
pub trait CredentialSource {
    fn lookup(&self, key: &str) -> Option<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn lookup(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl CredentialSource for HashMap<String, String> {
    fn lookup(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl CredentialSource for BTreeMap<String, String> {
    fn lookup(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Provider descriptors plus global settings, optionally backed by a YAML file.
///
/// Built once at startup and passed by reference to whatever needs it.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: IndexMap<String, ProviderDescriptor>,
    global: GlobalSettings,
    store: Option<ConfigStore>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ProviderRegistry {
    /// Seeded defaults only; mutations are not persisted.
    pub fn with_defaults() -> Self {
        Self {
            providers: defaults::default_providers(),
            global: GlobalSettings::default(),
            store: None,
        }
    }

    /// Seeded defaults merged with the file at `path`.
    ///
    /// A missing file is fine. A malformed one is logged and skipped so the
    /// defaults survive. Mutations are persisted back to `path`.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let store = ConfigStore::new(path);
        let mut registry = Self::with_defaults();
        match store.load() {
            Ok(Some(overrides)) => registry.merge(overrides),
            Ok(None) => {
                tracing::debug!(
                    path = %store.path().display(),
                    "no provider config file, using defaults"
                );
            }
            Err(err) => {
                tracing::warn!("{err}; falling back to default provider config");
            }
        }
        registry.store = Some(store);
        registry
    }

    /// Shallow merge: a provider id in `overrides` replaces the whole
    /// descriptor for that id, global settings are replaced field by field.
    pub fn merge(&mut self, overrides: ConfigOverrides) {
        for (id, descriptor) in overrides.providers {
            self.providers.insert(id, descriptor);
        }
        overrides.global.apply(&mut self.global);
    }

    pub fn store_path(&self) -> Option<&Path> {
        self.store.as_ref().map(ConfigStore::path)
    }

    pub fn global(&self) -> &GlobalSettings {
        &self.global
    }

    pub fn get_provider_config(&self, id: &str) -> Result<&ProviderDescriptor, RegistryError> {
        self.providers
            .get(id)
            .ok_or_else(|| RegistryError::not_found(id))
    }

    pub fn get_all_providers(&self) -> &IndexMap<String, ProviderDescriptor> {
        &self.providers
    }

    pub fn ids(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    /// Family declared on the descriptor, else inferred from the id.
    pub fn family(&self, id: &str) -> Option<ProviderFamily> {
        self.providers
            .get(id)
            .and_then(|descriptor| descriptor.family)
            .or_else(|| ProviderFamily::from_id(id))
    }

    /// Name of the environment variable carrying the credential for `id`.
    pub fn credential_env(&self, id: &str) -> Option<String> {
        let descriptor = self.providers.get(id)?;
        descriptor.api_key_env.clone().or_else(|| {
            self.family(id)
                .map(|family| family.default_api_key_env().to_string())
        })
    }

    /// Trimmed credential value, `None` when absent or blank.
    pub fn credential(&self, id: &str, source: &dyn CredentialSource) -> Option<String> {
        let key = self.credential_env(id)?;
        source
            .lookup(&key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    pub fn has_credential(&self, id: &str, source: &dyn CredentialSource) -> bool {
        self.credential(id, source).is_some()
    }

    pub fn get_available_providers(&self) -> Vec<String> {
        self.available_providers_from(&EnvCredentials)
    }

    pub fn available_providers_from(&self, source: &dyn CredentialSource) -> Vec<String> {
        self.providers
            .keys()
            .filter(|id| self.has_credential(id, source))
            .cloned()
            .collect()
    }

    pub fn get_rate_limit_info(&self, id: &str) -> Result<RateLimitQuota, RegistryError> {
        Ok(self.get_provider_config(id)?.rate_limit)
    }

    pub fn get_supported_parameters(
        &self,
        id: &str,
    ) -> Result<SupportedParameters, RegistryError> {
        let descriptor = self.get_provider_config(id)?;
        Ok(SupportedParameters {
            required: descriptor.required_params.clone(),
            sizes: descriptor.supported_sizes.clone(),
            qualities: descriptor.supported_qualities.clone(),
            styles: descriptor.supported_styles.clone(),
        })
    }

    pub fn add_provider(
        &mut self,
        id: impl Into<String>,
        descriptor: ProviderDescriptor,
    ) -> Result<(), RegistryError> {
        self.providers.insert(id.into(), descriptor);
        self.persist()
    }

    /// Unknown ids are ignored and nothing is written.
    pub fn remove_provider(
        &mut self,
        id: &str,
    ) -> Result<Option<ProviderDescriptor>, RegistryError> {
        let Some(removed) = self.providers.shift_remove(id) else {
            return Ok(None);
        };
        self.persist()?;
        Ok(Some(removed))
    }

    pub fn update_provider(
        &mut self,
        id: &str,
        update: ProviderUpdate,
    ) -> Result<(), RegistryError> {
        let descriptor = self
            .providers
            .get_mut(id)
            .ok_or_else(|| RegistryError::not_found(id))?;
        update.apply(descriptor);
        self.persist()
    }

    pub fn save(&self) -> Result<(), RegistryError> {
        self.persist()
    }

    fn persist(&self) -> Result<(), RegistryError> {
        match &self.store {
            Some(store) => store.save(&self.providers, &self.global),
            None => Ok(()),
        }
    }
}
