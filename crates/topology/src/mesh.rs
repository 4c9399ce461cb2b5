use crate::{Result, TopologyError};
use async_trait::async_trait;
use nebula_protocol::PeerRecord;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

pub const DEFAULT_MESH_BIN: &str = "tailscale";
pub const MESH_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// One device as reported by the mesh client (`tailscale status --json` field names).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MeshRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    pub host_name: String,
    #[serde(rename = "DNSName", default, deserialize_with = "null_as_default")]
    pub dns_name: String,
    #[serde(rename = "TailscaleIPs", default, deserialize_with = "null_as_default")]
    pub addresses: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub online: bool,
    #[serde(rename = "OS", default, deserialize_with = "null_as_default")]
    pub os: String,
}

impl MeshRecord {
    pub fn new(host_name: &str, dns_name: &str, address: &str, online: bool, os: &str) -> Self {
        Self {
            host_name: host_name.to_string(),
            dns_name: dns_name.to_string(),
            addresses: vec![address.to_string()],
            online,
            os: os.to_string(),
        }
    }

    /// Host name, or the first DNS label when the client left the host name blank.
    pub fn display_name(&self) -> &str {
        let host = self.host_name.trim();
        if !host.is_empty() {
            return host;
        }
        self.dns_name.split('.').next().unwrap_or("").trim()
    }

    pub fn primary_address(&self) -> &str {
        self.addresses.first().map(String::as_str).unwrap_or("")
    }
}

/// Raw mesh membership: the local device plus peers keyed by peer id.
///
/// Peers iterate in peer-id order. Snapshots are fetched per request and never cached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshSnapshot {
    #[serde(rename = "Self", default)]
    self_record: Option<MeshRecord>,
    #[serde(rename = "Peer", default, deserialize_with = "lenient_peers")]
    peers: BTreeMap<String, MeshRecord>,
}

impl MeshSnapshot {
    pub fn new<I>(self_record: Option<MeshRecord>, peers: I) -> Self
    where
        I: IntoIterator<Item = (String, MeshRecord)>,
    {
        Self {
            self_record,
            peers: peers.into_iter().collect(),
        }
    }

    /// Deterministic dataset served whenever the mesh client is unavailable.
    pub fn builtin() -> Self {
        Self::new(
            Some(MeshRecord::new(
                "nebula-host",
                "nebula-host.tailscale.net",
                "100.64.0.1",
                true,
                "",
            )),
            [
                (
                    "node-1".to_string(),
                    MeshRecord::new(
                        "gpu-server",
                        "gpu-server.tailscale.net",
                        "100.64.0.2",
                        true,
                        "linux",
                    ),
                ),
                (
                    "node-2".to_string(),
                    MeshRecord::new(
                        "macbook-pro",
                        "macbook-pro.tailscale.net",
                        "100.64.0.3",
                        false,
                        "macos",
                    ),
                ),
                (
                    "node-3".to_string(),
                    MeshRecord::new(
                        "homelab",
                        "homelab.tailscale.net",
                        "100.64.0.4",
                        true,
                        "linux",
                    ),
                ),
            ],
        )
    }

    pub fn self_record(&self) -> Option<&MeshRecord> {
        self.self_record.as_ref()
    }

    pub fn peers(&self) -> impl Iterator<Item = (&str, &MeshRecord)> {
        self.peers.iter().map(|(id, record)| (id.as_str(), record))
    }

    /// Self-then-peers listing with `ID`/`Active` annotations.
    pub fn peer_records(&self) -> Vec<PeerRecord> {
        let mut out = Vec::with_capacity(self.peers.len() + 1);
        if let Some(record) = &self.self_record {
            out.push(peer_record("self", record, true));
        }
        for (id, record) in &self.peers {
            out.push(peer_record(id, record, record.online));
        }
        out
    }
}

fn peer_record(id: &str, record: &MeshRecord, active: bool) -> PeerRecord {
    PeerRecord {
        id: id.to_string(),
        host_name: record.host_name.clone(),
        dns_name: record.dns_name.clone(),
        tailscale_ips: record.addresses.clone(),
        online: record.online,
        os: record.os.clone(),
        active,
    }
}

/// Peers are parsed one entry at a time; a malformed entry is dropped, the rest are kept.
fn lenient_peers<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, MeshRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::Object(entries)) => entries,
        Some(other) => {
            log::debug!("ignoring mesh peer table that is not an object: {other}");
            return Ok(BTreeMap::new());
        }
        None => return Ok(BTreeMap::new()),
    };
    Ok(entries
        .into_iter()
        .filter_map(|(id, entry)| match MeshRecord::deserialize(entry) {
            Ok(record) => Some((id, record)),
            Err(err) => {
                log::debug!("skipping malformed mesh peer {id}: {err}");
                None
            }
        })
        .collect())
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotOrigin {
    Live,
    Builtin { reason: String },
}

/// A snapshot together with how it was obtained.
#[derive(Debug, Clone)]
pub struct MeshFetch {
    pub snapshot: MeshSnapshot,
    pub origin: SnapshotOrigin,
}

impl MeshFetch {
    pub fn live(snapshot: MeshSnapshot) -> Self {
        Self {
            snapshot,
            origin: SnapshotOrigin::Live,
        }
    }

    pub fn builtin(reason: impl Into<String>) -> Self {
        Self {
            snapshot: MeshSnapshot::builtin(),
            origin: SnapshotOrigin::Builtin {
                reason: reason.into(),
            },
        }
    }

    pub fn is_live(&self) -> bool {
        self.origin == SnapshotOrigin::Live
    }
}

/// Source of mesh membership. Implementations never fail outwardly: a broken source hands back
/// the built-in snapshot and says so in [`MeshFetch::origin`].
#[async_trait]
pub trait MeshSource: Send + Sync {
    async fn fetch(&self) -> MeshFetch;

    async fn fetch_snapshot(&self) -> MeshSnapshot {
        self.fetch().await.snapshot
    }
}

/// Runs the mesh client (`tailscale status --json` by default) with a bounded wait.
#[derive(Debug, Clone)]
pub struct TailscaleCli {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl Default for TailscaleCli {
    fn default() -> Self {
        Self::new(DEFAULT_MESH_BIN)
    }
}

impl TailscaleCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec!["status".to_string(), "--json".to_string()],
            timeout: MESH_QUERY_TIMEOUT,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn query(&self) -> Result<MeshSnapshot> {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(TopologyError::MeshTimeout(self.timeout.as_millis() as u64));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TopologyError::MeshClient(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

#[async_trait]
impl MeshSource for TailscaleCli {
    async fn fetch(&self) -> MeshFetch {
        match self.query().await {
            Ok(snapshot) => MeshFetch::live(snapshot),
            Err(err) => {
                log::debug!("mesh client unavailable, using built-in snapshot: {err}");
                MeshFetch::builtin(err.to_string())
            }
        }
    }
}

/// Fixed snapshot; reports itself as live.
#[derive(Debug, Clone, Default)]
pub struct StaticMeshSource {
    snapshot: MeshSnapshot,
}

impl StaticMeshSource {
    pub fn new(snapshot: MeshSnapshot) -> Self {
        Self { snapshot }
    }
}

#[async_trait]
impl MeshSource for StaticMeshSource {
    async fn fetch(&self) -> MeshFetch {
        MeshFetch::live(self.snapshot.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const STATUS_JSON: &str = r#"{
        "Version": "1.70.0",
        "Self": {"HostName": "minibeast", "DNSName": "minibeast.tailscale.net.",
                 "TailscaleIPs": ["100.101.0.1", "fd7a::1"], "Online": true, "OS": "linux"},
        "Peer": {
            "nodekey:b": {"HostName": "", "DNSName": "kratos.tailscale.net.",
                          "TailscaleIPs": null, "Online": false, "OS": "linux"},
            "nodekey:a": {"HostName": "hades", "TailscaleIPs": ["100.101.0.2"], "Online": true}
        }
    }"#;

    #[test]
    fn parses_client_output_and_tolerates_nulls() {
        let snapshot: MeshSnapshot = serde_json::from_str(STATUS_JSON).unwrap();
        let me = snapshot.self_record().unwrap();
        assert_eq!(me.display_name(), "minibeast");
        assert_eq!(me.primary_address(), "100.101.0.1");

        let peers: Vec<_> = snapshot.peers().collect();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].0, "nodekey:a");
        assert_eq!(peers[1].1.display_name(), "kratos");
        assert!(peers[1].1.addresses.is_empty());
        assert_eq!(peers[1].1.primary_address(), "");
    }

    #[test]
    fn malformed_peers_are_skipped_individually() {
        let snapshot: MeshSnapshot = serde_json::from_str(
            r#"{
                "Self": {"HostName": "minibeast", "Online": true},
                "Peer": {
                    "a": "not-an-object",
                    "b": {"HostName": "hades", "Online": "yes"},
                    "c": {"HostName": "kratos", "Online": true},
                    "d": {"HostName": ["x"]}
                }
            }"#,
        )
        .unwrap();
        let names: Vec<_> = snapshot.peers().map(|(_, p)| p.display_name()).collect();
        assert_eq!(names, vec!["kratos"]);

        let snapshot: MeshSnapshot =
            serde_json::from_str(r#"{"Self": null, "Peer": [1, 2]}"#).unwrap();
        assert_eq!(snapshot, MeshSnapshot::default());
    }

    #[test]
    fn peer_listing_is_self_then_peers() {
        let records = MeshSnapshot::builtin().peer_records();
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["self", "node-1", "node-2", "node-3"]);
        assert!(records[0].active);
        assert!(!records[2].active);
        assert_eq!(records[2].host_name, "macbook-pro");
        assert_eq!(records[3].active, records[3].online);
    }

    #[tokio::test]
    async fn missing_binary_falls_back_to_builtin() {
        let source = TailscaleCli::new("/nonexistent/nebula-mesh-client");
        let fetch = source.fetch().await;
        assert!(!fetch.is_live());
        assert_eq!(fetch.snapshot, MeshSnapshot::builtin());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_falls_back_to_builtin() {
        let source = TailscaleCli::new("sh").with_args(["-c", "echo '{}'; exit 3"]);
        let fetch = source.fetch().await;
        match fetch.origin {
            SnapshotOrigin::Builtin { reason } => assert!(reason.contains("exited"), "{reason}"),
            SnapshotOrigin::Live => panic!("expected fallback"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn malformed_output_falls_back_to_builtin() {
        let source = TailscaleCli::new("sh").with_args(["-c", "echo 'not json'"]);
        let fetch = source.fetch().await;
        assert!(!fetch.is_live());
        assert_eq!(fetch.snapshot, MeshSnapshot::builtin());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_client_is_bounded() {
        let source = TailscaleCli::new("sh")
            .with_args(["-c", "sleep 5"])
            .with_timeout(Duration::from_millis(100));
        let started = std::time::Instant::now();
        let fetch = source.fetch().await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(matches!(
            fetch.origin,
            SnapshotOrigin::Builtin { ref reason } if reason.contains("timed out")
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn live_output_is_used_verbatim() {
        let script = format!("cat <<'EOF'\n{STATUS_JSON}\nEOF");
        let source = TailscaleCli::new("sh").with_args(["-c".to_string(), script]);
        let fetch = source.fetch().await;
        assert!(fetch.is_live());
        assert_eq!(
            fetch.snapshot.self_record().map(MeshRecord::display_name),
            Some("minibeast")
        );
    }
}
