use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Result of turning free-form model output into a filter object.
#[derive(Debug, Clone, PartialEq)]
pub enum NlqOutcome {
    /// The model produced a JSON object (possibly `{}`).
    Filter(Map<String, Value>),
    /// Nothing in the output parsed as a JSON object.
    NoStructuredOutput { raw: String },
}

impl NlqOutcome {
    /// Wire form: the filter, or `{}` when nothing was extracted.
    pub fn into_filter(self) -> Map<String, Value> {
        match self {
            NlqOutcome::Filter(map) => map,
            NlqOutcome::NoStructuredOutput { .. } => Map::new(),
        }
    }
}

fn object_span() -> &'static Regex {
    static SPAN: OnceLock<Regex> = OnceLock::new();
    SPAN.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("object span pattern compiles"))
}

/// Best-effort extraction: the widest `{...}` span in the text, parsed as a JSON object.
/// Markdown fences and chatter around the object are ignored.
pub fn extract_filter(text: &str) -> NlqOutcome {
    let parsed = object_span()
        .find(text)
        .and_then(|span| serde_json::from_str::<Value>(span.as_str()).ok());
    match parsed {
        Some(Value::Object(map)) => NlqOutcome::Filter(map),
        _ => NlqOutcome::NoStructuredOutput {
            raw: text.to_string(),
        },
    }
}
