//! The seam between the client and the network.
//!
//! # Design
//! `Transport` performs exactly one request and returns one raw response or
//! a `RequestError`. It owns connection reuse and proxy routing; the client
//! and the dispatcher only ever call `send`, possibly many times at once, so
//! implementations must be safe to share across tasks.
//!
//! Timeouts are enforced by the client around `send`. Implementations may
//! also honour `HttpRequest::timeout` themselves, but must tolerate their
//! future being dropped at any await point.

use std::collections::HashMap;
use std::error::Error;
use std::io;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::HeaderMap;
use http::StatusCode;
use url::Url;

use crate::error::{ConfigError, RequestError};
use crate::http::{HttpRequest, Proxy};

/// What a transport hands back before the client stamps timing and
/// correlation data on it.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request. The request's headers are already merged with the
    /// client defaults and its timeout is the effective one. `proxy()` is a
    /// per-request override on top of whatever routing the transport was
    /// built with.
    async fn send(&self, request: &HttpRequest) -> Result<RawResponse, RequestError>;
}

/// Client-wide settings a transport is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    /// `None` follows the environment (`HTTP_PROXY` and friends).
    pub proxy: Option<Proxy>,
    pub user_agent: String,
    /// Log connection-level reads and writes at trace level.
    pub verbose: bool,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            proxy: None,
            user_agent: crate::DEFAULT_USER_AGENT.to_string(),
            verbose: false,
        }
    }
}

/// Transport backed by a pooled `reqwest::Client`.
///
/// reqwest fixes proxy routing per client, so requests carrying a proxy
/// override get their own lazily built client, cached by proxy and reused
/// for later requests through the same proxy. The cache is unbounded and
/// lives as long as the transport: each distinct override keeps its own
/// connection pool. Callers rotating through many proxies should build a
/// client per proxy instead.
pub struct ReqwestTransport {
    settings: TransportSettings,
    client: reqwest::Client,
    overrides: Mutex<HashMap<Proxy, reqwest::Client>>,
}

impl ReqwestTransport {
    pub fn new(settings: TransportSettings) -> Result<Self, ConfigError> {
        let client = build_client(&settings, settings.proxy.as_ref())?;
        Ok(Self {
            settings,
            client,
            overrides: Mutex::new(HashMap::new()),
        })
    }

    fn client_for(&self, proxy: Option<&Proxy>) -> Result<reqwest::Client, RequestError> {
        let Some(proxy) = proxy else {
            return Ok(self.client.clone());
        };
        if self.settings.proxy.as_ref() == Some(proxy) {
            return Ok(self.client.clone());
        }
        let mut overrides = self.overrides.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = overrides.get(proxy) {
            return Ok(client.clone());
        }
        let client = build_client(&self.settings, Some(proxy))
            .map_err(|e| RequestError::Connect(e.to_string()))?;
        overrides.insert(proxy.clone(), client.clone());
        Ok(client)
    }
}

fn build_client(
    settings: &TransportSettings,
    proxy: Option<&Proxy>,
) -> Result<reqwest::Client, ConfigError> {
    let mut builder = reqwest::Client::builder()
        .user_agent(settings.user_agent.as_str())
        .connection_verbose(settings.verbose);
    match proxy {
        Some(Proxy::Disabled) => builder = builder.no_proxy(),
        Some(Proxy::Via(url)) => {
            let proxy = reqwest::Proxy::all(url.as_str())
                .map_err(|_| ConfigError::InvalidProxy(url.to_string()))?;
            builder = builder.proxy(proxy);
        }
        None => {}
    }
    builder
        .build()
        .map_err(|e| ConfigError::InvalidConfig(error_chain(&e)))
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<RawResponse, RequestError> {
        let client = self.client_for(request.proxy())?;

        let mut req = reqwest::Request::new(request.method().into(), request.url().clone());
        *req.headers_mut() = request.headers().clone();
        *req.timeout_mut() = request.timeout();
        if let Some(body) = request.body() {
            *req.body_mut() = Some(body.clone().into());
        }

        let timeout = request.timeout();
        let resp = client
            .execute(req)
            .await
            .map_err(|e| classify(&e, timeout))?;

        let status = resp.status();
        let url = resp.url().clone();
        let headers = resp.headers().clone();
        let body = resp.bytes().await.map_err(|e| classify(&e, timeout))?;

        Ok(RawResponse {
            status,
            url,
            headers,
            body,
        })
    }
}

/// Map a reqwest failure onto the transport error taxonomy.
fn classify(err: &reqwest::Error, timeout: Option<Duration>) -> RequestError {
    if err.is_timeout() {
        return RequestError::Timeout(timeout.unwrap_or_default());
    }
    let message = error_chain(err);
    if err.is_connect() && tls_failure(err) {
        RequestError::Tls(message)
    } else if err.is_connect() {
        RequestError::Connect(message)
    } else {
        RequestError::Protocol(message)
    }
}

/// Render an error and all of its sources as one line.
fn error_chain(err: &(dyn Error + 'static)) -> String {
    let mut message = err.to_string();
    for cause in sources(err) {
        message.push_str(": ");
        message.push_str(&cause.to_string());
    }
    message
}

fn sources<'a>(err: &'a (dyn Error + 'static)) -> impl Iterator<Item = &'a (dyn Error + 'static)> {
    std::iter::successors(err.source(), |&cause| cause.source())
}

/// Whether a connect failure happened during the TLS handshake.
///
/// Only the causes are inspected: the top-level reqwest message embeds the
/// request URL. The TLS connector reports handshake failures as an
/// `io::Error` of kind `InvalidData`; the rustls error below it names the
/// certificate or alert.
fn tls_failure(err: &(dyn Error + 'static)) -> bool {
    sources(err).any(|cause| {
        let invalid_data = cause
            .downcast_ref::<io::Error>()
            .is_some_and(|io| io.kind() == io::ErrorKind::InvalidData);
        invalid_data || mentions_tls(&cause.to_string())
    })
}

fn mentions_tls(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    ["tls", "certificate", "handshake"]
        .iter()
        .any(|needle| lower.contains(needle))
}
