pub mod config;
pub mod context;
mod error;
pub mod nlq;
pub mod provider;
mod service;

pub use config::{ConfigStore, Provider, RuntimeConfig, RuntimeConfigView};
pub use error::{AssistantError, Result};
pub use nlq::NlqOutcome;
pub use provider::{provider_for, ChatCompletions, CompletionProvider, LocalGenerate};
pub use service::{Assistant, REPORT_PEER_LIMIT};
