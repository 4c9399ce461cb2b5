use crate::config::{Provider, RuntimeConfig};
use crate::{AssistantError, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

pub const COMPLETION_TIMEOUT: Duration = Duration::from_secs(30);
pub const NO_RESPONSE: &str = "No response from Ollama.";

/// Prompt-in, text-out contract shared by every completion backend.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Prefix used when a failure is rendered as text, e.g. `Ollama` -> `Ollama Error: ...`.
    fn label(&self) -> &'static str;

    async fn try_complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;

    /// Never fails: errors come back as `"<label> Error: <message>"`.
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> String {
        match self.try_complete(system_prompt, user_prompt).await {
            Ok(text) => text,
            Err(err) => {
                log::warn!("{} completion failed: {err}", self.label());
                render_error(self.label(), &err)
            }
        }
    }
}

pub fn render_error(label: &str, err: &AssistantError) -> String {
    format!("{label} Error: {err}")
}

/// HTTP client used by the completion backends, bounded by [`COMPLETION_TIMEOUT`].
pub fn completion_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(COMPLETION_TIMEOUT)
        .build()?)
}

/// Picks the backend for the given settings. A cloud provider that has not been enabled gets a
/// backend that refuses every request without touching the network.
pub fn provider_for(
    config: &RuntimeConfig,
    client: reqwest::Client,
) -> Box<dyn CompletionProvider> {
    match config.provider {
        Provider::Local => Box::new(LocalGenerate::new(client, &config.base_url, &config.model)),
        Provider::Cloud if !config.cloud_enabled => Box::new(DisabledCloud),
        Provider::Cloud => Box::new(ChatCompletions::new(
            client,
            &config.base_url,
            &config.model,
            &config.api_key,
        )),
    }
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{path}", base_url.trim().trim_end_matches('/'))
}

/// Single-prompt generation API (`POST {base}/api/generate`).
#[derive(Debug, Clone)]
pub struct LocalGenerate {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl LocalGenerate {
    pub fn new(client: reqwest::Client, base_url: &str, model: &str) -> Self {
        Self {
            client,
            url: endpoint(base_url, "/api/generate"),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl CompletionProvider for LocalGenerate {
    fn label(&self) -> &'static str {
        "Ollama"
    }

    async fn try_complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "prompt": format!("{system_prompt}\n\nUser: {user_prompt}\nAssistant:"),
            "stream": false,
        });
        let payload: Value = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(payload
            .get("response")
            .and_then(Value::as_str)
            .unwrap_or(NO_RESPONSE)
            .to_string())
    }
}

/// Chat-completion API (`POST {base}/chat/completions`) with bearer auth.
#[derive(Clone)]
pub struct ChatCompletions {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: String,
}

impl ChatCompletions {
    pub fn new(client: reqwest::Client, base_url: &str, model: &str, api_key: &str) -> Self {
        Self {
            client,
            url: endpoint(base_url, "/chat/completions"),
            model: model.to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl CompletionProvider for ChatCompletions {
    fn label(&self) -> &'static str {
        "Cloud Provider"
    }

    async fn try_complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
        });
        let payload: Value = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(AssistantError::MissingField("choices[0].message.content"))
    }
}

struct DisabledCloud;

#[async_trait]
impl CompletionProvider for DisabledCloud {
    fn label(&self) -> &'static str {
        "Cloud Provider"
    }

    async fn try_complete(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String> {
        Err(AssistantError::CloudDisabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_tolerate_trailing_slashes() {
        assert_eq!(
            endpoint("http://127.0.0.1:11434/", "/api/generate"),
            "http://127.0.0.1:11434/api/generate"
        );
        assert_eq!(
            endpoint(" https://api.example.com/v1 ", "/chat/completions"),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[tokio::test]
    async fn disabled_cloud_refuses_without_network() {
        let config = RuntimeConfig {
            provider: Provider::Cloud,
            cloud_enabled: false,
            base_url: "http://127.0.0.1:9".to_string(),
            ..RuntimeConfig::default()
        };
        let provider = provider_for(&config, completion_client().unwrap());
        assert_eq!(
            provider.complete("sys", "user").await,
            "Cloud Provider Error: cloud provider disabled"
        );
    }

    #[test]
    fn error_rendering_uses_backend_label() {
        assert_eq!(
            render_error("Ollama", &AssistantError::MissingField("response")),
            "Ollama Error: response missing response"
        );
    }
}
