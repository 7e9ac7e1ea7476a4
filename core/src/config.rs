//! Client and per-call configuration.
//!
//! # Design
//! Options form a closed set. `ClientConfig` and the JSON form of
//! `RequestOptions` deserialize with `deny_unknown_fields`, so a misspelt or
//! unsupported option is a `ConfigError` at construction instead of being
//! silently ignored or forwarded.

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::http::RequestBuilder;

/// Shared client configuration, as loaded from a JSON document.
///
/// ```json
/// {"proxy": "noproxy", "timeout_ms": 5000, "headers": {"X-Env": "prod"}}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Proxy URL, or `"noproxy"` to bypass proxies from the environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
}

impl ClientConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|e| ConfigError::InvalidConfig(e.to_string()))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Per-call overrides layered over the client defaults.
///
/// In a parallel dispatch the same options apply to every bare-URL target;
/// explicit `HttpRequest` targets keep their own settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    pub timeout: Option<Duration>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    pub proxy: Option<String>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Parse options from JSON: `timeout_ms`, `headers`, `body` (text) and
    /// `proxy`.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let raw: RawRequestOptions =
            serde_json::from_str(raw).map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            timeout: raw.timeout_ms.map(Duration::from_millis),
            headers: raw.headers.into_iter().collect(),
            body: raw.body.map(Bytes::from),
            proxy: raw.proxy,
        })
    }

    pub(crate) fn apply(&self, mut builder: RequestBuilder) -> RequestBuilder {
        builder = builder.headers(self.headers.iter().cloned());
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = &self.body {
            builder = builder.body(body.clone());
        }
        if let Some(proxy) = &self.proxy {
            builder = builder.proxy(proxy.clone());
        }
        builder
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRequestOptions {
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    proxy: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpMethod, HttpRequest};

    #[test]
    fn client_config_parses_all_fields() {
        let config = ClientConfig::from_json(
            r#"{
                "proxy": "http://127.0.0.1:7890",
                "timeout_ms": 1500,
                "headers": {"X-Env": "prod"},
                "user_agent": "tests/1.0",
                "verbose": true,
                "max_concurrency": 4
            }"#,
        )
        .unwrap();
        assert_eq!(config.proxy.as_deref(), Some("http://127.0.0.1:7890"));
        assert_eq!(config.timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(config.headers["X-Env"], "prod");
        assert_eq!(config.user_agent.as_deref(), Some("tests/1.0"));
        assert!(config.verbose);
        assert_eq!(config.max_concurrency, Some(4));
    }

    #[test]
    fn empty_document_is_default() {
        assert_eq!(ClientConfig::from_json("{}").unwrap(), ClientConfig::default());
    }

    #[test]
    fn unknown_client_option_is_rejected() {
        let err = ClientConfig::from_json(r#"{"retries": 3}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidConfig(ref msg) if msg.contains("retries")));
    }

    #[test]
    fn serialization_skips_unset_fields() {
        let config = ClientConfig {
            timeout_ms: Some(10),
            ..ClientConfig::default()
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json, serde_json::json!({"timeout_ms": 10, "verbose": false}));
    }

    #[test]
    fn request_options_from_json() {
        let options = RequestOptions::from_json(
            r#"{"timeout_ms": 250, "headers": {"X-Req": "1"}, "body": "hi", "proxy": "noproxy"}"#,
        )
        .unwrap();
        assert_eq!(options.timeout, Some(Duration::from_millis(250)));
        assert_eq!(options.headers, vec![("X-Req".to_string(), "1".to_string())]);
        assert_eq!(options.body.as_deref(), Some(&b"hi"[..]));
        assert_eq!(options.proxy.as_deref(), Some("noproxy"));
    }

    #[test]
    fn unknown_request_option_is_rejected() {
        let err = RequestOptions::from_json(r#"{"callback": "x"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidConfig(_)));
    }

    #[test]
    fn apply_sets_builder_fields() {
        let options = RequestOptions::new()
            .timeout(Duration::from_secs(2))
            .header("X-Req", "1")
            .body("payload");
        let req = options
            .apply(HttpRequest::builder(HttpMethod::Put, "https://a.test/"))
            .build()
            .unwrap();
        assert_eq!(req.timeout(), Some(Duration::from_secs(2)));
        assert_eq!(req.header("x-req"), Some("1"));
        assert_eq!(req.body().unwrap().as_ref(), b"payload");
    }
}
