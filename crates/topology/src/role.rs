use nebula_protocol::Role;

const GATEWAY_KEYWORDS: &[&str] = &["gateway", "router", "edge"];
const GPU_KEYWORDS: &[&str] = &["gpu", "cuda", "rtx"];
const AI_KEYWORDS: &[&str] = &["ai", "llm", "ollama"];
const STORAGE_KEYWORDS: &[&str] = &["storage", "nas", "backup"];

/// Maps hostnames to roles by keyword.
///
/// Buckets are checked in a fixed order (gateway, gpu, ai, storage); the first bucket with a
/// keyword contained in the lower-cased hostname wins. Hosts that match nothing are `storage`.
/// Per-deployment aliases extend the gpu, ai and storage buckets.
#[derive(Debug, Clone)]
pub struct RoleClassifier {
    gpu_aliases: Vec<String>,
    ai_aliases: Vec<String>,
    storage_aliases: Vec<String>,
}

impl Default for RoleClassifier {
    fn default() -> Self {
        Self::with_aliases(["hades"], ["kratos"], ["hermes"])
    }
}

impl RoleClassifier {
    pub fn without_aliases() -> Self {
        Self {
            gpu_aliases: Vec::new(),
            ai_aliases: Vec::new(),
            storage_aliases: Vec::new(),
        }
    }

    pub fn with_aliases<G, A, S>(gpu: G, ai: A, storage: S) -> Self
    where
        G: IntoIterator,
        G::Item: AsRef<str>,
        A: IntoIterator,
        A::Item: AsRef<str>,
        S: IntoIterator,
        S::Item: AsRef<str>,
    {
        fn normalize<I>(items: I) -> Vec<String>
        where
            I: IntoIterator,
            I::Item: AsRef<str>,
        {
            items
                .into_iter()
                .map(|item| item.as_ref().trim().to_lowercase())
                .filter(|item| !item.is_empty())
                .collect()
        }

        Self {
            gpu_aliases: normalize(gpu),
            ai_aliases: normalize(ai),
            storage_aliases: normalize(storage),
        }
    }

    pub fn infer(&self, hostname: &str, is_self: bool) -> Role {
        if is_self {
            return Role::Gateway;
        }
        let host = hostname.to_lowercase();
        if contains_any(&host, GATEWAY_KEYWORDS.iter().copied()) {
            return Role::Gateway;
        }
        if contains_any(&host, keywords(GPU_KEYWORDS, &self.gpu_aliases)) {
            return Role::Gpu;
        }
        if contains_any(&host, keywords(AI_KEYWORDS, &self.ai_aliases)) {
            return Role::Ai;
        }
        if contains_any(&host, keywords(STORAGE_KEYWORDS, &self.storage_aliases)) {
            return Role::Storage;
        }
        Role::Storage
    }
}

/// [`RoleClassifier::infer`] with the default aliases.
pub fn infer_role(hostname: &str, is_self: bool) -> Role {
    RoleClassifier::default().infer(hostname, is_self)
}

fn keywords<'a>(
    fixed: &'a [&'a str],
    aliases: &'a [String],
) -> impl Iterator<Item = &'a str> + 'a {
    fixed
        .iter()
        .copied()
        .chain(aliases.iter().map(String::as_str))
}

fn contains_any<'a>(host: &str, mut needles: impl Iterator<Item = &'a str>) -> bool {
    needles.any(|needle| host.contains(needle))
}
