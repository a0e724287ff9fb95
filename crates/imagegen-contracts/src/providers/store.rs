use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{GlobalSettings, ProviderDescriptor};
use crate::error::RegistryError;

pub const DEFAULT_CONFIG_PATH: &str = "references/provider_configs.yaml";

/// Contents of a user configuration file. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigOverrides {
    #[serde(default)]
    pub providers: IndexMap<String, ProviderDescriptor>,
    #[serde(default)]
    pub global: GlobalOverrides,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GlobalOverrides {
    pub timeout: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_delay: Option<f64>,
}

impl GlobalOverrides {
    pub fn apply(&self, settings: &mut GlobalSettings) {
        if let Some(timeout) = self.timeout {
            settings.timeout = timeout;
        }
        if let Some(max_retries) = self.max_retries {
            settings.max_retries = max_retries;
        }
        if let Some(retry_delay) = self.retry_delay {
            settings.retry_delay = retry_delay;
        }
    }
}

#[derive(Debug, Serialize)]
struct ConfigSnapshot<'a> {
    providers: &'a IndexMap<String, ProviderDescriptor>,
    global: &'a GlobalSettings,
}

/// YAML file backing a [`super::ProviderRegistry`].
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when the file does not exist.
    pub fn load(&self) -> Result<Option<ConfigOverrides>, RegistryError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path).map_err(|err| RegistryError::Parse {
            path: self.path.clone(),
            message: err.to_string(),
        })?;
        if raw.trim().is_empty() {
            return Ok(Some(ConfigOverrides::default()));
        }
        serde_yaml::from_str::<ConfigOverrides>(&raw)
            .map(Some)
            .map_err(|err| RegistryError::Parse {
                path: self.path.clone(),
                message: err.to_string(),
            })
    }

    pub fn save(
        &self,
        providers: &IndexMap<String, ProviderDescriptor>,
        global: &GlobalSettings,
    ) -> Result<(), RegistryError> {
        let persistence = |message: String| RegistryError::Persistence {
            path: self.path.clone(),
            message,
        };
        let raw = serde_yaml::to_string(&ConfigSnapshot { providers, global })
            .map_err(|err| persistence(err.to_string()))?;
        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|err| persistence(err.to_string()))?;
        }
        std::fs::write(&self.path, raw).map_err(|err| persistence(err.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::defaults::default_providers;

    #[test]
    fn missing_file_loads_as_none() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = ConfigStore::new(temp.path().join("absent.yaml"));
        assert!(store.load()?.is_none());
        Ok(())
    }

    #[test]
    fn save_then_load_keeps_declaration_order() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = ConfigStore::new(temp.path().join("nested/provider_configs.yaml"));
        store.save(&default_providers(), &GlobalSettings::default())?;

        let loaded = store.load()?.unwrap_or_default();
        let ids: Vec<&str> = loaded.providers.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["jimeng", "openai", "stability"]);
        assert_eq!(loaded.global.max_retries, Some(3));
        assert_eq!(loaded.global.timeout, Some(30));
        Ok(())
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("bad.yaml");
        std::fs::write(&path, "providers: [not, a, map")?;
        let err = ConfigStore::new(&path).load().err();
        assert!(matches!(err, Some(RegistryError::Parse { .. })));
        Ok(())
    }
}
