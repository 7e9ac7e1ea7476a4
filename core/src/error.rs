//! Error types for the volley client.
//!
//! # Design
//! Failures are split by who caused them. `RequestError` means the transport
//! never produced a response, `CallbackError` means a response arrived but the
//! user callback rejected it, and `ConfigError` means the input was malformed
//! and nothing was sent. Inside a parallel dispatch the first two are captured
//! per slot; only `ConfigError` and cancellation abort the whole call.

use std::time::Duration;

use crate::dispatch::CallbackOutcome;
use crate::http::HttpMethod;

/// The transport failed to produce a response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// Connection refused, DNS failure, or the peer went away.
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("tls failure: {0}")]
    Tls(String),

    /// The effective timeout elapsed before the response completed.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The peer answered with something that is not valid HTTP, or the body
    /// could not be read.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The slot's task ended before producing an outcome.
    #[error("request aborted: {0}")]
    Aborted(String),
}

impl RequestError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RequestError::Timeout(_))
    }
}

/// Invalid input detected before anything is sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported url scheme `{0}`, expected http or https")]
    UnsupportedScheme(String),

    #[error("invalid header name `{0}`")]
    InvalidHeaderName(String),

    #[error("invalid value for header `{0}`")]
    InvalidHeaderValue(String),

    #[error("unknown http method `{0}`")]
    InvalidMethod(String),

    #[error("{0} requests cannot carry a body")]
    BodyNotAllowed(HttpMethod),

    #[error("invalid proxy `{0}`")]
    InvalidProxy(String),

    #[error("no targets given")]
    EmptyTargets,

    #[error("max_concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("parallel dispatch needs a tokio runtime")]
    NoRuntime,

    /// A configuration document failed to parse, including unknown keys.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Failure raised by, or while awaiting, a user callback.
#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    #[error("callback failed: {0}")]
    Raised(anyhow::Error),

    #[error("callback panicked: {0}")]
    Panicked(String),
}

/// Errors returned by single-request operations on `Client`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that abort a whole parallel dispatch.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError<T> {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The shutdown signal fired first. `partial` is index-aligned with the
    /// targets; slots that had not finished are `None`.
    #[error("dispatch cancelled with {completed} of {} slots completed", .partial.len())]
    Cancelled {
        completed: usize,
        partial: Vec<Option<CallbackOutcome<T>>>,
    },
}

impl<T> DispatchError<T> {
    /// Outcomes gathered before cancellation, if any.
    pub fn into_partial(self) -> Option<Vec<Option<CallbackOutcome<T>>>> {
        match self {
            DispatchError::Cancelled { partial, .. } => Some(partial),
            DispatchError::Config(_) => None,
        }
    }
}
