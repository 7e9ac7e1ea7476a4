//! The result of one completed HTTP call.

use std::borrow::Cow;
use std::time::Duration;

use bytes::Bytes;
use http::header::HeaderMap;
use http::StatusCode;
use serde::de::DeserializeOwned;
use url::Url;

use crate::http::HttpRequest;

/// A completed HTTP response, immutable once produced.
///
/// Headers keep every value in the order the transport received them, so a
/// repeated name such as `set-cookie` yields all of its values through
/// `header_all`. The originating request travels with the response so that a
/// callback can tell which dispatch slot it is looking at.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub(crate) status: StatusCode,
    pub(crate) url: Url,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) elapsed: Duration,
    pub(crate) request: HttpRequest,
}

impl HttpResponse {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// True for any 2xx status.
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Final URL after redirects.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a header, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Every value of a header in received order.
    pub fn header_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Wall time from handing the request to the transport until the body
    /// was fully read.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }
}
