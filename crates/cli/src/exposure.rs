//! Who may reach the API.
//!
//! Topology, peers, scan and stats are read-only mesh views. The `/api/ai/*` routes hold the
//! provider key and spend provider quota, so they take a bearer token whenever one is set, and
//! listening beyond loopback is only allowed with that token in place.

use anyhow::{Context as AnyhowContext, Result};
use axum::http::{header::AUTHORIZATION, HeaderMap};
use std::fmt;
use std::net::SocketAddr;

pub const AI_TOKEN_ENV: &str = "NEBULA_AUTH_TOKEN";

/// Bearer token guarding the AI routes.
#[derive(Clone)]
pub struct AiToken(String);

impl fmt::Debug for AiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AiToken(********)")
    }
}

impl AiToken {
    /// Absent is `None`; present but blank is an error.
    pub fn parse(raw: Option<&str>) -> Result<Option<Self>> {
        match raw.map(str::trim) {
            None => Ok(None),
            Some("") => anyhow::bail!("auth token must be non-empty"),
            Some(token) => Ok(Some(Self(token.to_string()))),
        }
    }

    /// `--auth-token` wins over the environment.
    pub fn resolve(flag: Option<&str>, env: Option<String>) -> Result<Option<Self>> {
        Self::parse(flag.or(env.as_deref()))
    }

    /// True when the request carries `Authorization: Bearer <token>` (scheme case-insensitive).
    pub fn admits(&self, headers: &HeaderMap) -> bool {
        let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
            return false;
        };
        let Some((scheme, credentials)) = value.trim().split_once(' ') else {
            return false;
        };
        scheme.eq_ignore_ascii_case("bearer") && same_secret(credentials.trim(), &self.0)
    }
}

/// Resolved listen addresses and whether they reach beyond this host.
#[derive(Debug)]
pub struct Exposure {
    pub addrs: Vec<SocketAddr>,
    pub public: bool,
}

impl Exposure {
    pub async fn resolve(bind: &str, public: bool, token: Option<&AiToken>) -> Result<Self> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host(bind)
            .await
            .with_context(|| format!("Failed to resolve bind address: {bind}"))?
            .collect();
        if addrs.is_empty() {
            anyhow::bail!("Bind address resolved to zero socket addrs: {bind}")
        }
        Self::check(bind, addrs, public, token)
    }

    fn check(
        bind: &str,
        addrs: Vec<SocketAddr>,
        public: bool,
        token: Option<&AiToken>,
    ) -> Result<Self> {
        if addrs.iter().all(|addr| addr.ip().is_loopback()) {
            return Ok(Self {
                addrs,
                public: false,
            });
        }
        if !public {
            anyhow::bail!(
                "Refusing to bind the mesh API to {bind}: pass --public to listen beyond loopback"
            )
        }
        if token.is_none() {
            anyhow::bail!(
                "--public requires an auth token for the AI routes: set --auth-token or export {AI_TOKEN_ENV}"
            )
        }
        Ok(Self {
            addrs,
            public: true,
        })
    }
}

fn same_secret(given: &str, expected: &str) -> bool {
    given.len() == expected.len()
        && given
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |diff, (x, y)| diff | (x ^ y))
            == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    fn addr(text: &str) -> SocketAddr {
        text.parse().unwrap()
    }

    #[test]
    fn token_admits_bearer_header_only() {
        let token = AiToken::parse(Some("  s3cret ")).unwrap().unwrap();
        assert!(token.admits(&headers("Bearer s3cret")));
        assert!(token.admits(&headers("bearer  s3cret ")));
        assert!(!token.admits(&headers("Bearer s3cre")));
        assert!(!token.admits(&headers("Basic s3cret")));
        assert!(!token.admits(&headers("s3cret")));
        assert!(!token.admits(&HeaderMap::new()));
        assert_eq!(format!("{token:?}"), "AiToken(********)");
    }

    #[test]
    fn flag_wins_over_environment_and_blank_is_rejected() {
        let token = AiToken::resolve(Some("flag"), Some("env".to_string()))
            .unwrap()
            .unwrap();
        assert!(token.admits(&headers("Bearer flag")));
        assert!(AiToken::resolve(None, Some("env".to_string()))
            .unwrap()
            .is_some());
        assert!(AiToken::resolve(None, None).unwrap().is_none());
        assert!(AiToken::resolve(Some("  "), None).is_err());
    }

    #[test]
    fn loopback_needs_nothing() {
        let exposure = Exposure::check("localhost:8000", vec![addr("127.0.0.1:8000")], true, None)
            .unwrap();
        assert!(!exposure.public);
    }

    #[test]
    fn leaving_loopback_needs_public_and_a_token() {
        let wide = || vec![addr("0.0.0.0:8000")];
        let token = AiToken::parse(Some("t")).unwrap();

        let err = Exposure::check("0.0.0.0:8000", wide(), false, token.as_ref()).unwrap_err();
        assert!(err.to_string().contains("pass --public"));

        let err = Exposure::check("0.0.0.0:8000", wide(), true, None).unwrap_err();
        assert!(err.to_string().contains("--public requires an auth token"));

        let exposure = Exposure::check("0.0.0.0:8000", wide(), true, token.as_ref()).unwrap();
        assert!(exposure.public);
    }

    #[tokio::test]
    async fn resolves_host_names() {
        let exposure = Exposure::resolve("localhost:0", false, None).await.unwrap();
        assert!(exposure.addrs.iter().all(|a| a.ip().is_loopback()));
    }
}
