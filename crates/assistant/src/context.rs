use nebula_topology::{MeshSnapshot, Redactor};
use std::fmt::Write;

/// Plain-text topology description fed to the chat system prompt. Not redacted.
pub fn topology_context(snapshot: &MeshSnapshot) -> String {
    let mut context = String::from("CURRENT NETWORK TOPOLOGY:\n");
    if let Some(me) = snapshot.self_record() {
        let _ = writeln!(
            context,
            "- THIS DEVICE: {} ({}) Status: Online",
            me.host_name,
            me.primary_address()
        );
    }
    for (_, peer) in snapshot.peers() {
        let status = if peer.online { "Online" } else { "Offline" };
        let _ = writeln!(
            context,
            "- NODE: {} ({}) Status: {status}, OS: {}",
            peer.host_name,
            peer.primary_address(),
            peer.os
        );
    }
    context
}

/// [`topology_context`] passed through the redactor.
pub fn sanitized_context(
    snapshot: &MeshSnapshot,
    redactor: &Redactor,
    allow_sensitive: bool,
) -> String {
    redactor.redact(&topology_context(snapshot), allow_sensitive)
}

pub fn chat_system_prompt(context: &str) -> String {
    format!(
        "You are Nebula Assistant, a read-only network analyzer for a Tailscale mesh. {context} \
         Be concise and technical. Do not suggest running commands unless they are discovery \
         commands (ping, dig)."
    )
}

pub const NLQ_SYSTEM_PROMPT: &str = "Translate the user request into a JSON filter object. \
    Valid keys: status (online/offline), role (gateway/storage/ai/gpu). \
    Example: 'show me busy gpu nodes' -> {\"status\": \"online\", \"role\": \"gpu\"}. \
    Return ONLY valid JSON.";

pub const EXPLAIN_SYSTEM_PROMPT: &str = "Explain this network node's role and services in simple \
    terms. Suggest why it might be important for an AI developer.";

pub const REPORT_SYSTEM_PROMPT: &str = "Generate a professional narrative for a network export. \
    Summarize node health and service distribution.";
