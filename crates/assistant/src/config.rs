use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

pub const API_KEY_MASK: &str = "********";
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";
pub const DEFAULT_MODEL: &str = "llama3";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Local generation API (`/api/generate`).
    #[default]
    #[serde(alias = "ollama")]
    Local,
    /// Chat-completion API (`/chat/completions`) with bearer auth.
    #[serde(alias = "openai")]
    Cloud,
}

/// AI settings shared by every request. Replaced as a whole; never serialized with the key.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuntimeConfig {
    pub provider: Provider,
    pub base_url: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub api_key: String,
    pub model: String,
    pub cloud_enabled: bool,
    pub allow_sensitive: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Local,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            cloud_enabled: false,
            allow_sensitive: false,
        }
    }
}

impl fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("api_key", &mask_key(&self.api_key))
            .field("model", &self.model)
            .field("cloud_enabled", &self.cloud_enabled)
            .field("allow_sensitive", &self.allow_sensitive)
            .finish()
    }
}

impl RuntimeConfig {
    pub fn masked(&self) -> RuntimeConfigView {
        RuntimeConfigView {
            provider: self.provider,
            base_url: self.base_url.clone(),
            api_key: mask_key(&self.api_key).to_string(),
            model: self.model.clone(),
            cloud_enabled: self.cloud_enabled,
            allow_sensitive: self.allow_sensitive,
        }
    }
}

/// Read-side form of [`RuntimeConfig`]: the key is a fixed placeholder when set, empty otherwise.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfigView {
    pub provider: Provider,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub cloud_enabled: bool,
    pub allow_sensitive: bool,
}

fn mask_key(key: &str) -> &'static str {
    if key.is_empty() {
        ""
    } else {
        API_KEY_MASK
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Holds the current [`RuntimeConfig`]. Readers take a snapshot `Arc`; writers swap the whole
/// value, so a reader sees either the old or the new record, never a mix.
#[derive(Debug, Default)]
pub struct ConfigStore {
    current: RwLock<Arc<RuntimeConfig>>,
}

impl ConfigStore {
    pub fn new(initial: RuntimeConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn snapshot(&self) -> Arc<RuntimeConfig> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn replace(&self, next: RuntimeConfig) {
        let next = Arc::new(next);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = next;
    }

    pub fn masked(&self) -> RuntimeConfigView {
        self.snapshot().masked()
    }
}
