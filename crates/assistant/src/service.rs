use crate::config::{ConfigStore, RuntimeConfig};
use crate::context::{
    chat_system_prompt, sanitized_context, EXPLAIN_SYSTEM_PROMPT, NLQ_SYSTEM_PROMPT,
    REPORT_SYSTEM_PROMPT,
};
use crate::nlq::{extract_filter, NlqOutcome};
use crate::provider::{completion_client, provider_for, CompletionProvider};
use crate::Result;
use nebula_topology::{MeshSource, Redactor};
use serde_json::Value;
use std::sync::Arc;

pub const REPORT_PEER_LIMIT: usize = 10;

/// Natural-language features over the mesh. Each call reads one config snapshot, so a
/// concurrent config update only affects later calls.
#[derive(Clone)]
pub struct Assistant {
    config: Arc<ConfigStore>,
    mesh: Arc<dyn MeshSource>,
    client: reqwest::Client,
    redactor: Redactor,
}

impl Assistant {
    pub fn new(config: Arc<ConfigStore>, mesh: Arc<dyn MeshSource>) -> Result<Self> {
        Ok(Self {
            config,
            mesh,
            client: completion_client()?,
            redactor: Redactor::global().clone(),
        })
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    fn provider(&self, config: &RuntimeConfig) -> Box<dyn CompletionProvider> {
        provider_for(config, self.client.clone())
    }

    fn sanitize(&self, text: &str, config: &RuntimeConfig) -> String {
        self.redactor.redact(text, config.allow_sensitive)
    }

    pub async fn chat(&self, message: &str) -> String {
        let config = self.config.snapshot();
        let snapshot = self.mesh.fetch_snapshot().await;
        let context = sanitized_context(&snapshot, &self.redactor, config.allow_sensitive);
        self.provider(&config)
            .complete(&chat_system_prompt(&context), message)
            .await
    }

    pub async fn nlq(&self, query: &str) -> NlqOutcome {
        let config = self.config.snapshot();
        let user_prompt = format!("Translate: {query}");
        match self
            .provider(&config)
            .try_complete(NLQ_SYSTEM_PROMPT, &user_prompt)
            .await
        {
            Ok(text) => {
                let outcome = extract_filter(&text);
                if let NlqOutcome::NoStructuredOutput { raw } = &outcome {
                    log::debug!("nlq: no JSON object in model output: {raw}");
                }
                outcome
            }
            Err(err) => {
                log::warn!("nlq completion failed: {err}");
                NlqOutcome::NoStructuredOutput {
                    raw: err.to_string(),
                }
            }
        }
    }

    pub async fn explain(&self, node_data: &Value) -> String {
        let config = self.config.snapshot();
        let user_prompt = self.sanitize(&format!("Node Data: {node_data}"), &config);
        self.provider(&config)
            .complete(EXPLAIN_SYSTEM_PROMPT, &user_prompt)
            .await
    }

    /// Narrative over at most [`REPORT_PEER_LIMIT`] peers.
    pub async fn report(&self, peers: &[Value]) -> String {
        let config = self.config.snapshot();
        let head = &peers[..peers.len().min(REPORT_PEER_LIMIT)];
        let listing = Value::Array(head.to_vec());
        let user_prompt = self.sanitize(&format!("Peers: {listing}"), &config);
        self.provider(&config)
            .complete(REPORT_SYSTEM_PROMPT, &user_prompt)
            .await
    }
}
