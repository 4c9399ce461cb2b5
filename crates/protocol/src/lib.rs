use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Coarse functional classification of a mesh node.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Gateway,
    Storage,
    Ai,
    Gpu,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Gateway, Role::Storage, Role::Ai, Role::Gpu];

    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Gateway => "gateway",
            Role::Storage => "storage",
            Role::Ai => "ai",
            Role::Gpu => "gpu",
        }
    }

    /// Accepts a role label from an upstream payload. Matching ignores case and surrounding
    /// whitespace; anything outside the fixed set is rejected.
    pub fn parse_label(raw: &str) -> Option<Role> {
        let label = raw.trim();
        Role::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(label))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Role::parse_label(s).ok_or_else(|| format!("unknown role: {s}"))
    }
}

/// One entry of the stable topology schema.
///
/// The name is always trimmed and non-empty; construction goes through [`NormalizedNode::new`]
/// (deserialization included), so a value of this type cannot violate that.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(try_from = "RawNormalizedNode")]
pub struct NormalizedNode {
    name: String,
    role: Role,
    online: bool,
}

#[derive(Deserialize)]
struct RawNormalizedNode {
    name: String,
    role: Role,
    online: bool,
}

impl TryFrom<RawNormalizedNode> for NormalizedNode {
    type Error = String;

    fn try_from(raw: RawNormalizedNode) -> std::result::Result<Self, Self::Error> {
        NormalizedNode::new(&raw.name, raw.role, raw.online)
            .ok_or_else(|| "node name must be non-empty".to_string())
    }
}

impl NormalizedNode {
    pub fn new(name: &str, role: Role, online: bool) -> Option<Self> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            role,
            online,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn online(&self) -> bool {
        self.online
    }

    /// Key used for case-insensitive de-duplication.
    pub fn dedup_key(&self) -> String {
        self.name.to_lowercase()
    }
}

/// Where a topology answer came from.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TopologySource {
    Remote,
    Fallback,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TopologyResult {
    pub nodes: Vec<NormalizedNode>,
    pub source: TopologySource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TopologyResult {
    pub fn is_fallback(&self) -> bool {
        self.source == TopologySource::Fallback
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    pub name: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ScanResult {
    #[serde(rename = "targetAddress", alias = "ip")]
    pub target_address: String,
    pub services: Vec<ServiceEntry>,
}

/// Mesh record as served by the peers listing: Tailscale field names plus `ID`/`Active`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct PeerRecord {
    #[serde(rename = "ID")]
    pub id: String,
    pub host_name: String,
    #[serde(rename = "DNSName")]
    pub dns_name: String,
    #[serde(rename = "TailscaleIPs")]
    pub tailscale_ips: Vec<String>,
    pub online: bool,
    #[serde(rename = "OS")]
    pub os: String,
    pub active: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct HealthResponse {
    pub ok: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StatusAck {
    pub status: String,
}

impl StatusAck {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatResponse {
    pub response: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NlqRequest {
    pub query: String,
}

/// `{"nodeData": {...}}` or the bare node object.
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum ExplainRequest {
    Wrapped {
        #[serde(rename = "nodeData")]
        node_data: serde_json::Value,
    },
    Bare(serde_json::Value),
}

impl ExplainRequest {
    pub fn into_node_data(self) -> serde_json::Value {
        match self {
            ExplainRequest::Wrapped { node_data } => node_data,
            ExplainRequest::Bare(value) => value,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ExplainResponse {
    pub explanation: String,
}

/// `{"peers": [...]}` or the bare array.
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum ReportRequest {
    Wrapped { peers: Vec<serde_json::Value> },
    Bare(Vec<serde_json::Value>),
}

impl ReportRequest {
    pub fn into_peers(self) -> Vec<serde_json::Value> {
        match self {
            ReportRequest::Wrapped { peers } => peers,
            ReportRequest::Bare(peers) => peers,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReportResponse {
    pub narrative: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub hint: Option<String>,
}

pub fn serialize_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn role_labels_are_case_insensitive_and_closed() {
        assert_eq!(Role::parse_label(" GPU "), Some(Role::Gpu));
        assert_eq!(Role::parse_label("Gateway"), Some(Role::Gateway));
        assert_eq!(Role::parse_label("bogus"), None);
        assert_eq!(Role::parse_label(""), None);
        assert!("host".parse::<Role>().is_err());
    }

    #[test]
    fn node_names_are_trimmed_and_never_empty() {
        let node = NormalizedNode::new("  gpu1 ", Role::Gpu, true).unwrap();
        assert_eq!(node.name(), "gpu1");
        assert!(NormalizedNode::new("   ", Role::Ai, true).is_none());

        let err = serde_json::from_value::<NormalizedNode>(json!({
            "name": " ",
            "role": "ai",
            "online": true
        }));
        assert!(err.is_err());
    }

    #[test]
    fn topology_result_omits_absent_error() {
        let result = TopologyResult {
            nodes: vec![NormalizedNode::new("gpu1", Role::Gpu, true).unwrap()],
            source: TopologySource::Remote,
            error: None,
        };
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({
                "nodes": [{"name": "gpu1", "role": "gpu", "online": true}],
                "source": "remote"
            })
        );
    }

    #[test]
    fn peer_record_uses_mesh_field_names() {
        let record = PeerRecord {
            id: "self".to_string(),
            host_name: "nebula-host".to_string(),
            dns_name: "nebula-host.tailscale.net".to_string(),
            tailscale_ips: vec!["100.64.0.1".to_string()],
            online: true,
            os: "linux".to_string(),
            active: true,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["ID"], "self");
        assert_eq!(value["HostName"], "nebula-host");
        assert_eq!(value["DNSName"], "nebula-host.tailscale.net");
        assert_eq!(value["TailscaleIPs"], json!(["100.64.0.1"]));
        assert_eq!(value["OS"], "linux");
        assert_eq!(value["Active"], true);
    }

    #[test]
    fn explain_and_report_accept_wrapped_or_bare_bodies() {
        let wrapped: ExplainRequest =
            serde_json::from_value(json!({"nodeData": {"HostName": "homelab"}})).unwrap();
        assert_eq!(wrapped.into_node_data(), json!({"HostName": "homelab"}));

        let bare: ExplainRequest = serde_json::from_value(json!({"HostName": "homelab"})).unwrap();
        assert_eq!(bare.into_node_data(), json!({"HostName": "homelab"}));

        let peers: ReportRequest = serde_json::from_value(json!({"peers": [1, 2]})).unwrap();
        assert_eq!(peers.into_peers().len(), 2);
        let peers: ReportRequest = serde_json::from_value(json!([1, 2, 3])).unwrap();
        assert_eq!(peers.into_peers().len(), 3);
    }
}
