//! The shared, immutable HTTP client.
//!
//! # Design
//! `Client` holds only configuration and a transport handle behind an `Arc`.
//! It is never mutated after `build`, so clones can be handed to any number
//! of concurrent tasks without locking. Every request goes through
//! `prepare`, which overlays the per-call values on the client defaults, and
//! then through the transport under the effective timeout.

use std::fmt;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use http::header::{HeaderMap, HeaderValue, USER_AGENT};
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::debug;

use crate::callback::Callback;
use crate::config::{ClientConfig, RequestOptions};
use crate::dispatch::{CallbackOutcome, Dispatcher, Target};
use crate::error::{ConfigError, DispatchError, Error, RequestError};
use crate::http::{merge_headers, parse_headers, HttpMethod, HttpRequest, Proxy};
use crate::response::HttpResponse;
use crate::transport::{ReqwestTransport, Transport, TransportSettings};

/// Concurrent HTTP client with shared defaults.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    default_timeout: Option<Duration>,
    default_headers: HeaderMap,
    max_concurrency: Option<NonZeroUsize>,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("default_timeout", &self.inner.default_timeout)
            .field("default_headers", &self.inner.default_headers)
            .field("max_concurrency", &self.inner.max_concurrency)
            .finish_non_exhaustive()
    }
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// A client with no defaults over the reqwest transport.
    pub fn new() -> Result<Self, ConfigError> {
        Self::builder().build()
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ConfigError> {
        ClientBuilder::from_config(config).build()
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.inner.default_timeout
    }

    pub fn default_headers(&self) -> &HeaderMap {
        &self.inner.default_headers
    }

    pub fn max_concurrency(&self) -> Option<NonZeroUsize> {
        self.inner.max_concurrency
    }

    /// Overlay `request` on the client defaults. Headers merge by name with
    /// the request's value winning; a missing timeout takes the default.
    pub fn prepare(&self, mut request: HttpRequest) -> HttpRequest {
        request.headers = merge_headers(&self.inner.default_headers, &request.headers);
        request.timeout = request.timeout.or(self.inner.default_timeout);
        request
    }

    /// Send a prebuilt request after merging client defaults.
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, RequestError> {
        self.send_prepared(self.prepare(request)).await
    }

    /// Send a request that already went through `prepare`.
    pub(crate) async fn send_prepared(
        &self,
        request: HttpRequest,
    ) -> Result<HttpResponse, RequestError> {
        debug!(method = %request.method(), url = %request.url(), "executing request");
        let started = Instant::now();
        let send = self.inner.transport.send(&request);
        let raw = match request.timeout() {
            Some(limit) => tokio::time::timeout(limit, send)
                .await
                .map_err(|_| RequestError::Timeout(limit))??,
            None => send.await?,
        };
        let elapsed = started.elapsed();
        debug!(url = %request.url(), status = raw.status.as_u16(), ?elapsed, "request completed");

        Ok(HttpResponse {
            status: raw.status,
            url: raw.url,
            headers: raw.headers,
            body: raw.body,
            elapsed,
            request,
        })
    }

    pub async fn request(
        &self,
        method: HttpMethod,
        url: &str,
        options: &RequestOptions,
    ) -> Result<HttpResponse, Error> {
        let request = options.apply(HttpRequest::builder(method, url)).build()?;
        Ok(self.execute(request).await?)
    }

    pub async fn get(&self, url: &str, options: &RequestOptions) -> Result<HttpResponse, Error> {
        self.request(HttpMethod::Get, url, options).await
    }

    pub async fn head(&self, url: &str, options: &RequestOptions) -> Result<HttpResponse, Error> {
        self.request(HttpMethod::Head, url, options).await
    }

    pub async fn post(&self, url: &str, options: &RequestOptions) -> Result<HttpResponse, Error> {
        self.request(HttpMethod::Post, url, options).await
    }

    pub async fn put(&self, url: &str, options: &RequestOptions) -> Result<HttpResponse, Error> {
        self.request(HttpMethod::Put, url, options).await
    }

    pub async fn delete(&self, url: &str, options: &RequestOptions) -> Result<HttpResponse, Error> {
        self.request(HttpMethod::Delete, url, options).await
    }

    /// A dispatcher bound to this client, inheriting its `max_concurrency`.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.clone())
    }

    /// Send every target concurrently and apply `callback` to each response.
    /// The result is index-aligned with `targets`.
    pub async fn parallel_request<T, I>(
        &self,
        method: HttpMethod,
        targets: I,
        options: &RequestOptions,
        callback: Callback<T>,
    ) -> Result<Vec<CallbackOutcome<T>>, DispatchError<T>>
    where
        T: Send + 'static,
        I: IntoIterator,
        I::Item: Into<Target>,
    {
        self.dispatcher().run(method, targets, options, callback).await
    }

    pub async fn parallel_get<T, I>(
        &self,
        targets: I,
        options: &RequestOptions,
        callback: Callback<T>,
    ) -> Result<Vec<CallbackOutcome<T>>, DispatchError<T>>
    where
        T: Send + 'static,
        I: IntoIterator,
        I::Item: Into<Target>,
    {
        self.parallel_request(HttpMethod::Get, targets, options, callback).await
    }

    pub async fn parallel_head<T, I>(
        &self,
        targets: I,
        options: &RequestOptions,
        callback: Callback<T>,
    ) -> Result<Vec<CallbackOutcome<T>>, DispatchError<T>>
    where
        T: Send + 'static,
        I: IntoIterator,
        I::Item: Into<Target>,
    {
        self.parallel_request(HttpMethod::Head, targets, options, callback).await
    }

    pub async fn parallel_post<T, I>(
        &self,
        targets: I,
        options: &RequestOptions,
        callback: Callback<T>,
    ) -> Result<Vec<CallbackOutcome<T>>, DispatchError<T>>
    where
        T: Send + 'static,
        I: IntoIterator,
        I::Item: Into<Target>,
    {
        self.parallel_request(HttpMethod::Post, targets, options, callback).await
    }

    pub async fn parallel_put<T, I>(
        &self,
        targets: I,
        options: &RequestOptions,
        callback: Callback<T>,
    ) -> Result<Vec<CallbackOutcome<T>>, DispatchError<T>>
    where
        T: Send + 'static,
        I: IntoIterator,
        I::Item: Into<Target>,
    {
        self.parallel_request(HttpMethod::Put, targets, options, callback).await
    }

    pub async fn parallel_delete<T, I>(
        &self,
        targets: I,
        options: &RequestOptions,
        callback: Callback<T>,
    ) -> Result<Vec<CallbackOutcome<T>>, DispatchError<T>>
    where
        T: Send + 'static,
        I: IntoIterator,
        I::Item: Into<Target>,
    {
        self.parallel_request(HttpMethod::Delete, targets, options, callback).await
    }

    /// GET `url` and write the body to `path`. Returns the bytes written.
    ///
    /// The transport buffers the whole body before it is written, so this is
    /// meant for resources that fit in memory.
    pub async fn download(&self, url: &str, path: impl AsRef<Path>) -> Result<u64, Error> {
        let resp = self.get(url, &RequestOptions::default()).await?;
        debug!(url, path = %path.as_ref().display(), "downloading resource");
        Ok(write_body(path.as_ref(), &resp).await?)
    }

    /// Download every `(url, path)` pair concurrently. Each pair is its own
    /// slot, so one URL may be saved under several paths. A failed write
    /// lands in that slot as `CallbackFailed`.
    pub async fn parallel_download<I, S, P>(
        &self,
        items: I,
    ) -> Result<Vec<CallbackOutcome<u64>>, DispatchError<u64>>
    where
        I: IntoIterator<Item = (S, P)>,
        S: AsRef<str>,
        P: Into<PathBuf>,
    {
        let slots = items
            .into_iter()
            .map(|(url, path)| -> Result<_, ConfigError> {
                let request = HttpRequest::builder(HttpMethod::Get, url.as_ref()).build()?;
                Ok((self.prepare(request), save_to(path.into())))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        self.dispatcher()
            .run_slots(slots, std::future::pending())
            .await
    }
}

/// Callback writing each response body to `path`.
fn save_to(path: PathBuf) -> Callback<u64> {
    let path = Arc::new(path);
    Callback::suspending(move |resp: HttpResponse| {
        let path = Arc::clone(&path);
        async move { Ok::<u64, anyhow::Error>(write_body(&path, &resp).await?) }
    })
}

async fn write_body(path: &Path, resp: &HttpResponse) -> std::io::Result<u64> {
    let mut file = tokio::io::BufWriter::new(tokio::fs::File::create(path).await?);
    file.write_all(resp.body()).await?;
    file.flush().await?;
    Ok(resp.body().len() as u64)
}

/// Builder for `Client`. Raw values are validated in `build`.
#[derive(Default)]
pub struct ClientBuilder {
    proxy: Option<String>,
    timeout: Option<Duration>,
    headers: Vec<(String, String)>,
    user_agent: Option<String>,
    verbose: bool,
    max_concurrency: Option<usize>,
    transport: Option<Arc<dyn Transport>>,
}

impl ClientBuilder {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            proxy: config.proxy.clone(),
            timeout: config.timeout(),
            headers: config
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            user_agent: config.user_agent.clone(),
            verbose: config.verbose,
            max_concurrency: config.max_concurrency,
            transport: None,
        }
    }

    /// Route through `proxy`, or bypass proxies with `"noproxy"`.
    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn no_proxy(self) -> Self {
        self.proxy("noproxy")
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    /// Use a custom transport instead of reqwest. Proxy, user agent and
    /// verbose settings only configure the built-in transport.
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn build(self) -> Result<Client, ConfigError> {
        let proxy = self.proxy.as_deref().map(str::parse::<Proxy>).transpose()?;
        let max_concurrency = match self.max_concurrency {
            Some(limit) => Some(NonZeroUsize::new(limit).ok_or(ConfigError::ZeroConcurrency)?),
            None => None,
        };
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| crate::DEFAULT_USER_AGENT.to_string());

        if HeaderValue::from_str(&user_agent).is_err() {
            return Err(ConfigError::InvalidHeaderValue(USER_AGENT.to_string()));
        }
        let default_headers = parse_headers(self.headers)?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(TransportSettings {
                proxy,
                user_agent,
                verbose: self.verbose,
            })?),
        };

        Ok(Client {
            inner: Arc::new(ClientInner {
                default_timeout: self.timeout,
                default_headers,
                max_concurrency,
                transport,
            }),
        })
    }
}
