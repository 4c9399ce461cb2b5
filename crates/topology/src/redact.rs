use regex::{Captures, Regex};
use std::sync::OnceLock;

pub const IP_PLACEHOLDER: &str = "<IP_REDACTED>";
pub const HOST_PLACEHOLDER: &str = "<HOST_REDACTED>";
pub const DEFAULT_MESH_SUFFIX: &str = "tailscale.net";

// No `\b` anchors: `_` and non-ASCII letters count as word characters there, which would let
// `ip_100.64.0.2` through. Neighbours are checked in `is_standalone_address` instead.
const IPV4_PATTERN: &str = r"100\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})";

/// Masks mesh addresses (100.64.0.0/10) and mesh-domain hostnames before text leaves the
/// process. Both passes are plain substitutions; text without matches comes back unchanged and
/// placeholders never match again, so redacting twice equals redacting once.
#[derive(Debug, Clone)]
pub struct Redactor {
    mesh_ip: Regex,
    mesh_host: Regex,
}

impl Redactor {
    pub fn new(mesh_suffix: &str) -> Result<Self, regex::Error> {
        let suffix = mesh_suffix.trim().trim_matches('.');
        // A host is the whole run of labels in front of the suffix; `\w` keeps `my_box` and
        // non-ASCII labels inside the match.
        let host_pattern = format!(r"(?i)[\w-]+(?:\.[\w-]+)*\.{}", regex::escape(suffix));
        Ok(Self {
            mesh_ip: Regex::new(IPV4_PATTERN)?,
            mesh_host: Regex::new(&host_pattern)?,
        })
    }

    /// Shared instance for the default mesh suffix.
    pub fn global() -> &'static Redactor {
        static REDACTOR: OnceLock<Redactor> = OnceLock::new();
        REDACTOR.get_or_init(|| {
            Redactor::new(DEFAULT_MESH_SUFFIX).expect("default redaction patterns compile")
        })
    }

    pub fn redact(&self, text: &str, allow_sensitive: bool) -> String {
        if allow_sensitive {
            return text.to_string();
        }
        let masked = self.mesh_ip.replace_all(text, |caps: &Captures<'_>| {
            if is_standalone_address(text, caps) && is_mesh_octets(caps) {
                IP_PLACEHOLDER.to_string()
            } else {
                caps[0].to_string()
            }
        });
        self.mesh_host
            .replace_all(&masked, |caps: &Captures<'_>| {
                if ends_host(&masked, caps) {
                    HOST_PLACEHOLDER.to_string()
                } else {
                    caps[0].to_string()
                }
            })
            .into_owned()
    }
}

/// [`Redactor::redact`] with the default mesh suffix.
pub fn redact(text: &str, allow_sensitive: bool) -> String {
    Redactor::global().redact(text, allow_sensitive)
}

/// Rejects matches that are a slice of a longer number: `1100.64.0.1`, `1.100.64.0.1`,
/// `100.64.0.1234`.
fn is_standalone_address(text: &str, caps: &Captures<'_>) -> bool {
    let Some(whole) = caps.get(0) else {
        return false;
    };
    let before = text[..whole.start()].chars().next_back();
    let after = text[whole.end()..].chars().next();
    !matches!(before, Some(c) if c.is_ascii_digit() || c == '.')
        && !matches!(after, Some(c) if c.is_ascii_digit())
}

/// The suffix must end the host: `box.tailscale.network` is some other domain.
fn ends_host(text: &str, caps: &Captures<'_>) -> bool {
    let Some(whole) = caps.get(0) else {
        return false;
    };
    !matches!(
        text[whole.end()..].chars().next(),
        Some(c) if c.is_alphanumeric() || c == '_' || c == '-'
    )
}

fn is_mesh_octets(caps: &Captures<'_>) -> bool {
    let octet = |idx: usize| caps.get(idx).and_then(|m| m.as_str().parse::<u16>().ok());
    match (octet(1), octet(2), octet(3)) {
        (Some(second), Some(third), Some(fourth)) => {
            (64..=127).contains(&second) && third <= 255 && fourth <= 255
        }
        _ => false,
    }
}
