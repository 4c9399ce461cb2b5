use assert_cmd::prelude::*;
use std::process::Command;

fn nebula() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("nebula"));
    cmd.env_remove("NEBULA_AUTH_TOKEN")
        .env("NEBULA_TAILSCALE_BIN", "/nonexistent/tailscale")
        .env("NEBULA_STATUS_API_URL", "http://127.0.0.1:1");
    cmd
}

#[test]
fn serve_refuses_non_loopback_without_public() {
    nebula()
        .args(["serve", "--bind", "0.0.0.0:0"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("Refusing to bind"));
}

#[test]
fn serve_public_requires_auth_token() {
    nebula()
        .args(["serve", "--public", "--bind", "0.0.0.0:0"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("--public requires an auth token"));
}

#[test]
fn serve_rejects_blank_auth_token() {
    nebula()
        .args(["serve", "--bind", "127.0.0.1:0", "--auth-token", "   "])
        .assert()
        .failure()
        .stderr(predicates::str::contains("auth token must be non-empty"));
}

#[test]
fn topology_command_prints_fallback_grid_when_everything_is_down() {
    let output = nebula().args(["--quiet", "topology"]).output().unwrap();
    assert!(output.status.success());

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["source"], "fallback");
    assert!(result["error"]
        .as_str()
        .unwrap()
        .starts_with("Status backend unreachable"));
    let nodes = result["nodes"].as_array().unwrap();
    assert!(!nodes.is_empty());
    assert!(nodes
        .iter()
        .any(|node| node["role"] == "gateway" && node["online"] == true));
}

#[test]
fn peers_command_prints_builtin_snapshot_without_mesh_client() {
    let output = nebula().args(["--quiet", "peers"]).output().unwrap();
    assert!(output.status.success());

    let peers: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let peers = peers.as_array().unwrap();
    assert_eq!(peers[0]["ID"], "self");
    assert!(peers.iter().any(|peer| peer["HostName"] == "gpu-server"));
}

#[test]
fn scan_command_with_blank_address_lists_nothing() {
    let output = nebula().args(["--quiet", "scan", " "]).output().unwrap();
    assert!(output.status.success());

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["services"], serde_json::json!([]));
}
