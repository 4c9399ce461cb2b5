use crate::mesh::{MeshSnapshot, MeshSource};
use crate::role::RoleClassifier;
use crate::{Result, TopologyError};
use nebula_protocol::{NormalizedNode, Role, TopologyResult, TopologySource};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_STATUS_API_URL: &str = "http://127.0.0.1:5050";
pub const STATUS_API_URL_ENV: &str = "NEBULA_STATUS_API_URL";
pub const REMOTE_TIMEOUT: Duration = Duration::from_secs(5);

const SELF_NAME_FALLBACK: &str = "minibeast";
const TRUTHY_STATUS: &[&str] = &["1", "true", "yes", "online", "up"];

/// How a topology answer was reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyOutcome {
    Remote(Vec<NormalizedNode>),
    Fallback {
        nodes: Vec<NormalizedNode>,
        reason: String,
    },
}

impl TopologyOutcome {
    pub fn into_result(self) -> TopologyResult {
        match self {
            TopologyOutcome::Remote(nodes) => TopologyResult {
                nodes,
                source: TopologySource::Remote,
                error: None,
            },
            TopologyOutcome::Fallback { nodes, reason } => TopologyResult {
                nodes,
                source: TopologySource::Fallback,
                error: Some(reason),
            },
        }
    }
}

/// Builds the node list: remote status source first, then the mesh adapter, then the built-in
/// defaults. The answer is never empty.
#[derive(Clone)]
pub struct StatusAggregator {
    client: reqwest::Client,
    remote_base: Option<String>,
    mesh: Arc<dyn MeshSource>,
    classifier: RoleClassifier,
}

impl StatusAggregator {
    pub fn new(remote_base: Option<String>, mesh: Arc<dyn MeshSource>) -> Result<Self> {
        Self::with_timeout(remote_base, mesh, REMOTE_TIMEOUT)
    }

    pub fn with_timeout(
        remote_base: Option<String>,
        mesh: Arc<dyn MeshSource>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let remote_base = remote_base
            .map(|base| base.trim().trim_end_matches('/').to_string())
            .filter(|base| !base.is_empty());
        Ok(Self {
            client,
            remote_base,
            mesh,
            classifier: RoleClassifier::default(),
        })
    }

    pub async fn get_topology(&self) -> TopologyResult {
        self.resolve().await.into_result()
    }

    pub async fn resolve(&self) -> TopologyOutcome {
        match self.fetch_remote().await {
            Ok(nodes) => TopologyOutcome::Remote(nodes),
            Err(err) => {
                log::warn!("status backend unreachable, deriving topology locally: {err}");
                let snapshot = self.mesh.fetch_snapshot().await;
                let mut nodes = nodes_from_snapshot(&snapshot, &self.classifier);
                if nodes.is_empty() {
                    log::warn!("mesh snapshot produced no nodes; serving built-in defaults");
                    nodes = default_nodes();
                }
                TopologyOutcome::Fallback {
                    nodes,
                    reason: format!("Status backend unreachable: {err}"),
                }
            }
        }
    }

    async fn fetch_remote(&self) -> Result<Vec<NormalizedNode>> {
        let base = self
            .remote_base
            .as_deref()
            .ok_or(TopologyError::RemoteNotConfigured)?;
        let payload: Value = self
            .client
            .get(format!("{base}/api/status"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        normalize_remote_payload(&payload, &self.classifier)
    }
}

/// Validates a remote `{"nodes": [...]}` payload into normalized nodes.
///
/// Entries without a usable name are skipped; roles outside the fixed set are re-derived from
/// the name. An absent node list or one with no valid entries is an error.
pub fn normalize_remote_payload(
    payload: &Value,
    classifier: &RoleClassifier,
) -> Result<Vec<NormalizedNode>> {
    let raw_nodes = payload
        .get("nodes")
        .and_then(Value::as_array)
        .ok_or_else(|| TopologyError::InvalidPayload("status payload missing nodes[]".into()))?;

    let mut nodes = NodeSet::default();
    for raw in raw_nodes {
        let Some(entry) = raw.as_object() else {
            continue;
        };
        let Some(name) = entry.get("name").and_then(name_text) else {
            continue;
        };
        let role = entry
            .get("role")
            .and_then(Value::as_str)
            .and_then(Role::parse_label)
            .unwrap_or_else(|| classifier.infer(&name, false));
        nodes.push(&name, role, coerce_online(entry.get("online")));
    }

    let nodes = nodes.into_vec();
    if nodes.is_empty() {
        return Err(TopologyError::InvalidPayload(
            "status payload had no valid nodes".into(),
        ));
    }
    Ok(nodes)
}

/// Self first (always gateway and online), then peers with classifier roles.
pub fn nodes_from_snapshot(
    snapshot: &MeshSnapshot,
    classifier: &RoleClassifier,
) -> Vec<NormalizedNode> {
    let mut nodes = NodeSet::default();
    if let Some(me) = snapshot.self_record() {
        let name = match me.display_name() {
            "" => SELF_NAME_FALLBACK,
            name => name,
        };
        nodes.push(name, classifier.infer(name, true), true);
    }
    for (_, peer) in snapshot.peers() {
        let name = peer.display_name();
        nodes.push(name, classifier.infer(name, false), peer.online);
    }
    nodes.into_vec()
}

/// Last-resort list for when no source yields a single node.
pub fn default_nodes() -> Vec<NormalizedNode> {
    [
        ("minibeast", Role::Gateway, true),
        ("hermes", Role::Storage, false),
        ("kratos", Role::Ai, false),
        ("hades", Role::Gpu, false),
    ]
    .into_iter()
    .filter_map(|(name, role, online)| NormalizedNode::new(name, role, online))
    .collect()
}

/// Online flag from a loosely typed upstream value.
///
/// Booleans pass through, strings are matched against a small truthy vocabulary, everything
/// else uses ordinary truthiness (non-zero numbers, non-empty containers). Missing is offline.
pub fn coerce_online(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(text)) => {
            let text = text.to_lowercase();
            TRUTHY_STATUS.contains(&text.as_str())
        }
        Some(Value::Number(num)) => num.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
    }
}

fn name_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(num) => Some(num.to_string()),
        _ => None,
    }
}

/// Ordered node list that drops blank names and case-insensitive duplicates (first wins).
#[derive(Default)]
struct NodeSet {
    nodes: Vec<NormalizedNode>,
    seen: HashSet<String>,
}

impl NodeSet {
    fn push(&mut self, name: &str, role: Role, online: bool) {
        let Some(node) = NormalizedNode::new(name, role, online) else {
            return;
        };
        if self.seen.insert(node.dedup_key()) {
            self.nodes.push(node);
        }
    }

    fn into_vec(self) -> Vec<NormalizedNode> {
        self.nodes
    }
}
