//! Concurrent HTTP client with per-response callbacks.
//!
//! # Overview
//! A `Client` carries shared, immutable configuration (proxy, default
//! timeout, default headers) and sends single requests through a pluggable
//! `Transport`. A `Dispatcher` sends many requests at once under one client
//! and applies a `Callback` to every response as it arrives, returning one
//! `CallbackOutcome` per target in target order.
//!
//! # Design
//! - The transport is the only I/O boundary. The default one wraps a pooled
//!   `reqwest::Client`; tests plug in scripted transports.
//! - Plain and async callbacks are told apart once, when the `Callback` is
//!   built, and awaited the same way afterwards.
//! - Failures are tagged by origin: `RequestFailed` when no response came
//!   back, `CallbackFailed` when the callback rejected one. They never cross
//!   dispatch slots.
//! - The library only emits `tracing` events; installing a subscriber is up
//!   to the application.

pub mod callback;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod response;
pub mod transport;

pub use callback::Callback;
pub use client::{Client, ClientBuilder};
pub use config::{ClientConfig, RequestOptions};
pub use dispatch::{CallbackOutcome, Dispatcher, Target};
pub use error::{CallbackError, ConfigError, DispatchError, Error, RequestError};
pub use crate::http::{HttpMethod, HttpRequest, Proxy, RequestBuilder};
pub use response::HttpResponse;
pub use transport::{RawResponse, ReqwestTransport, Transport, TransportSettings};

/// User agent of the built-in transport when neither the client nor the
/// request sets one.
pub const DEFAULT_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
