//! Request-side HTTP types.
//!
//! # Design
//! `HttpRequest` is immutable once built. All validation (URL shape, header
//! syntax, body-vs-method) happens in `RequestBuilder::build`, so a request
//! that reaches the transport or the dispatcher is always well formed and a
//! bad input surfaces as `ConfigError` before any I/O.
//!
//! Headers are kept in an `http::HeaderMap`, which gives case-insensitive
//! names for free. A request holds one value per name; a later insert of the
//! same name replaces the earlier one.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::error::ConfigError;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Only POST and PUT requests may carry a body.
    pub fn allows_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "HEAD" => Ok(HttpMethod::Head),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            _ => Err(ConfigError::InvalidMethod(s.to_string())),
        }
    }
}

impl From<HttpMethod> for http::Method {
    fn from(m: HttpMethod) -> Self {
        match m {
            HttpMethod::Get => http::Method::GET,
            HttpMethod::Head => http::Method::HEAD,
            HttpMethod::Post => http::Method::POST,
            HttpMethod::Put => http::Method::PUT,
            HttpMethod::Delete => http::Method::DELETE,
        }
    }
}

/// Proxy routing for a client or a single request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Proxy {
    /// Connect directly, ignoring any proxy from the environment.
    Disabled,
    /// Route every request through this proxy.
    Via(Url),
}

impl FromStr for Proxy {
    type Err = ConfigError;

    /// `"noproxy"` disables proxying; anything else must be a proxy URL.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "noproxy" {
            return Ok(Proxy::Disabled);
        }
        Url::parse(s)
            .map(Proxy::Via)
            .map_err(|_| ConfigError::InvalidProxy(s.to_string()))
    }
}

/// An outbound HTTP request described as plain, validated data.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub(crate) method: HttpMethod,
    pub(crate) url: Url,
    pub(crate) headers: HeaderMap,
    pub(crate) timeout: Option<Duration>,
    pub(crate) body: Option<Bytes>,
    pub(crate) proxy: Option<Proxy>,
}

impl HttpRequest {
    pub fn builder(method: HttpMethod, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(method, url)
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Value of a header, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Per-request proxy override. `None` means the client's routing applies.
    pub fn proxy(&self) -> Option<&Proxy> {
        self.proxy.as_ref()
    }
}

/// Collects request parts as raw strings and validates them in `build`.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    method: HttpMethod,
    url: String,
    headers: Vec<(String, String)>,
    timeout: Option<Duration>,
    body: Option<Bytes>,
    proxy: Option<String>,
}

impl RequestBuilder {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            timeout: None,
            body: None,
            proxy: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
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

    pub fn build(self) -> Result<HttpRequest, ConfigError> {
        let url = parse_url(&self.url)?;
        if self.body.is_some() && !self.method.allows_body() {
            return Err(ConfigError::BodyNotAllowed(self.method));
        }
        let headers = parse_headers(self.headers)?;
        let proxy = self.proxy.as_deref().map(str::parse).transpose()?;
        Ok(HttpRequest {
            method: self.method,
            url,
            headers,
            timeout: self.timeout,
            body: self.body,
            proxy,
        })
    }
}

/// Parse an absolute http(s) URL.
pub fn parse_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::UnsupportedScheme(other.to_string())),
    }
}

/// Validate raw header pairs into a `HeaderMap`, last value per name wins.
pub fn parse_headers<I, K, V>(headers: I) -> Result<HeaderMap, ConfigError>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let (name, value) = (name.as_ref(), value.as_ref());
        let header_name = HeaderName::from_str(name)
            .map_err(|_| ConfigError::InvalidHeaderName(name.to_string()))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|_| ConfigError::InvalidHeaderValue(name.to_string()))?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

/// Overlay `overrides` on `defaults`, replacing defaults that share a name.
pub fn merge_headers(defaults: &HeaderMap, overrides: &HeaderMap) -> HeaderMap {
    let mut merged = defaults.clone();
    for name in overrides.keys() {
        merged.remove(name);
        for value in overrides.get_all(name) {
            merged.append(name.clone(), value.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_parses_case_insensitively() {
        assert_eq!("get".parse::<HttpMethod>().unwrap(), HttpMethod::Get);
        assert_eq!("Delete".parse::<HttpMethod>().unwrap(), HttpMethod::Delete);
        let err = "PATCH".parse::<HttpMethod>().unwrap_err();
        assert_eq!(err, ConfigError::InvalidMethod("PATCH".to_string()));
    }

    #[test]
    fn build_get_request() {
        let req = HttpRequest::builder(HttpMethod::Get, "https://a.test/path?q=1")
            .header("Accept", "text/plain")
            .timeout(Duration::from_secs(3))
            .build()
            .unwrap();
        assert_eq!(req.method(), HttpMethod::Get);
        assert_eq!(req.url().as_str(), "https://a.test/path?q=1");
        assert_eq!(req.header("accept"), Some("text/plain"));
        assert_eq!(req.timeout(), Some(Duration::from_secs(3)));
        assert!(req.body().is_none());
        assert!(req.proxy().is_none());
    }

    #[test]
    fn header_names_are_case_insensitive() {
        let req = HttpRequest::builder(HttpMethod::Get, "https://a.test")
            .header("X-Env", "prod")
            .header("x-env", "test")
            .build()
            .unwrap();
        assert_eq!(req.headers().len(), 1);
        assert_eq!(req.header("X-ENV"), Some("test"));
    }

    #[test]
    fn body_rejected_for_get() {
        let err = HttpRequest::builder(HttpMethod::Get, "https://a.test")
            .body("payload")
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::BodyNotAllowed(HttpMethod::Get));
    }

    #[test]
    fn body_accepted_for_post() {
        let req = HttpRequest::builder(HttpMethod::Post, "https://a.test")
            .body("payload")
            .build()
            .unwrap();
        assert_eq!(req.body().unwrap().as_ref(), b"payload");
    }

    #[test]
    fn malformed_url_is_config_error() {
        let err = HttpRequest::builder(HttpMethod::Get, "not a url")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));
    }

    #[test]
    fn non_http_scheme_is_rejected() {
        let err = parse_url("ftp://a.test/file").unwrap_err();
        assert_eq!(err, ConfigError::UnsupportedScheme("ftp".to_string()));
    }

    #[test]
    fn invalid_header_name_is_rejected() {
        let err = parse_headers([("bad header", "v")]).unwrap_err();
        assert_eq!(err, ConfigError::InvalidHeaderName("bad header".to_string()));
    }

    #[test]
    fn invalid_header_value_is_rejected() {
        let err = parse_headers([("x-ok", "line\nbreak")]).unwrap_err();
        assert_eq!(err, ConfigError::InvalidHeaderValue("x-ok".to_string()));
    }

    #[test]
    fn merge_overrides_defaults_by_name() {
        let defaults = parse_headers([("X-Env", "prod")]).unwrap();
        let overrides = parse_headers([("x-env", "test"), ("X-Req", "1")]).unwrap();
        let merged = merge_headers(&defaults, &overrides);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.get("x-env").unwrap(), "test");
        assert_eq!(merged.get("x-req").unwrap(), "1");
    }

    #[test]
    fn merge_keeps_defaults_without_override() {
        let defaults = parse_headers([("X-Env", "prod"), ("Accept", "*/*")]).unwrap();
        let overrides = parse_headers([("X-Env", "test")]).unwrap();
        let merged = merge_headers(&defaults, &overrides);
        assert_eq!(merged.get("accept").unwrap(), "*/*");
        assert_eq!(merged.get("x-env").unwrap(), "test");
    }

    #[test]
    fn proxy_parses_noproxy_and_urls() {
        assert_eq!("noproxy".parse::<Proxy>().unwrap(), Proxy::Disabled);
        let proxy: Proxy = "http://127.0.0.1:7890".parse().unwrap();
        assert!(matches!(proxy, Proxy::Via(url) if url.port() == Some(7890)));
        assert!(matches!(
            "::".parse::<Proxy>(),
            Err(ConfigError::InvalidProxy(_))
        ));
    }
}
