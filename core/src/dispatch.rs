//! Parallel request dispatch.
//!
//! # Design
//! Every target becomes one slot: a task on a `JoinSet` that sends the
//! request, awaits the response and runs the callback on it. Slots never
//! share mutable state; each reports `(index, outcome)` back to the
//! collecting loop, which writes it into a pre-sized vector. Completion order
//! is whatever the network produces, the returned vector is in target order.
//!
//! Failures stay inside their slot. A transport error skips the callback and
//! becomes `RequestFailed`, a callback error or panic becomes
//! `CallbackFailed`. Only malformed input (before any task is spawned) and
//! the shutdown signal end the whole dispatch.
//!
//! The `JoinSet` aborts its tasks when dropped, so cancelling the dispatch,
//! either through `run_until` or by dropping its future, drops every pending
//! transport future and releases its connection.

use std::future::Future;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn, Instrument};
use uuid::Uuid;

use crate::callback::{panic_message, Callback};
use crate::client::Client;
use crate::config::RequestOptions;
use crate::error::{CallbackError, ConfigError, DispatchError, RequestError};
use crate::http::{HttpMethod, HttpRequest};

/// One entry of a parallel dispatch: a bare URL shaped by the shared
/// options, or a fully specified request used as is.
#[derive(Debug, Clone)]
pub enum Target {
    Url(String),
    Request(HttpRequest),
}

impl From<&str> for Target {
    fn from(url: &str) -> Self {
        Target::Url(url.to_string())
    }
}

impl From<String> for Target {
    fn from(url: String) -> Self {
        Target::Url(url)
    }
}

impl From<&String> for Target {
    fn from(url: &String) -> Self {
        Target::Url(url.clone())
    }
}

impl From<HttpRequest> for Target {
    fn from(request: HttpRequest) -> Self {
        Target::Request(request)
    }
}

/// What happened in one dispatch slot.
#[derive(Debug)]
pub enum CallbackOutcome<T> {
    /// The response arrived and the callback returned this value.
    Completed(T),
    /// The transport never produced a response; the callback did not run.
    RequestFailed(RequestError),
    /// The response arrived but the callback failed on it.
    CallbackFailed(CallbackError),
}

impl<T> CallbackOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, CallbackOutcome::Completed(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            CallbackOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            CallbackOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn request_error(&self) -> Option<&RequestError> {
        match self {
            CallbackOutcome::RequestFailed(err) => Some(err),
            _ => None,
        }
    }

    pub fn callback_error(&self) -> Option<&CallbackError> {
        match self {
            CallbackOutcome::CallbackFailed(err) => Some(err),
            _ => None,
        }
    }
}

/// Runs many requests concurrently under one client.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    client: Client,
    max_concurrency: Option<NonZeroUsize>,
    handle: Option<Handle>,
}

impl Dispatcher {
    /// Bound to `client`, with the client's `max_concurrency` as the limit.
    pub fn new(client: Client) -> Self {
        Self {
            max_concurrency: client.max_concurrency(),
            client,
            handle: None,
        }
    }

    /// Allow at most `limit` transport calls in flight.
    pub fn max_concurrency(mut self, limit: usize) -> Result<Self, ConfigError> {
        self.max_concurrency = Some(NonZeroUsize::new(limit).ok_or(ConfigError::ZeroConcurrency)?);
        Ok(self)
    }

    /// Drop any in-flight limit and let the transport pool gate concurrency.
    pub fn unbounded(mut self) -> Self {
        self.max_concurrency = None;
        self
    }

    /// Spawn slot tasks on `handle` instead of the runtime polling `run`.
    pub fn on(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Turn targets into fully prepared requests, failing on the first
    /// invalid one.
    pub fn normalize<I>(
        &self,
        method: HttpMethod,
        targets: I,
        options: &RequestOptions,
    ) -> Result<Vec<HttpRequest>, ConfigError>
    where
        I: IntoIterator,
        I::Item: Into<Target>,
    {
        let requests = targets
            .into_iter()
            .map(|target| -> Result<HttpRequest, ConfigError> {
                let request = match target.into() {
                    Target::Url(url) => options.apply(HttpRequest::builder(method, url)).build()?,
                    Target::Request(request) => request,
                };
                Ok(self.client.prepare(request))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        if requests.is_empty() {
            return Err(ConfigError::EmptyTargets);
        }
        Ok(requests)
    }

    /// Dispatch every target and wait for all slots.
    pub async fn run<T, I>(
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
        self.run_until(method, targets, options, callback, std::future::pending())
            .await
    }

    /// Like `run`, but stop when `shutdown` resolves. Pending slots are
    /// aborted and the outcomes gathered so far come back in
    /// `DispatchError::Cancelled`.
    pub async fn run_until<T, I, S>(
        &self,
        method: HttpMethod,
        targets: I,
        options: &RequestOptions,
        callback: Callback<T>,
        shutdown: S,
    ) -> Result<Vec<CallbackOutcome<T>>, DispatchError<T>>
    where
        T: Send + 'static,
        I: IntoIterator,
        I::Item: Into<Target>,
        S: Future<Output = ()>,
    {
        let requests = self.normalize(method, targets, options)?;
        debug!(%method, "normalized parallel targets");
        let slots = requests
            .into_iter()
            .map(|request| (request, callback.clone()))
            .collect();
        self.run_slots(slots, shutdown).await
    }

    /// Dispatch prepared requests, each with its own callback. The caller has
    /// already normalized and validated every request.
    pub(crate) async fn run_slots<T, S>(
        &self,
        slots: Vec<(HttpRequest, Callback<T>)>,
        shutdown: S,
    ) -> Result<Vec<CallbackOutcome<T>>, DispatchError<T>>
    where
        T: Send + 'static,
        S: Future<Output = ()>,
    {
        if slots.is_empty() {
            return Err(ConfigError::EmptyTargets.into());
        }
        let handle = match &self.handle {
            Some(handle) => handle.clone(),
            None => Handle::try_current().map_err(|_| ConfigError::NoRuntime)?,
        };
        let total = slots.len();
        let span = tracing::debug_span!("dispatch", id = %Uuid::new_v4(), slots = total);

        async move {
            debug!(limit = ?self.max_concurrency, "starting parallel dispatch");
            let limiter = self
                .max_concurrency
                .map(|limit| Arc::new(Semaphore::new(limit.get())));

            let mut tasks = JoinSet::new();
            for (index, (request, callback)) in slots.into_iter().enumerate() {
                let slot = run_slot(self.client.clone(), request, callback, limiter.clone());
                let slot = async move {
                    let outcome = AssertUnwindSafe(slot).catch_unwind().await.unwrap_or_else(
                        |panic| {
                            CallbackOutcome::RequestFailed(RequestError::Aborted(panic_message(
                                panic.as_ref(),
                            )))
                        },
                    );
                    (index, outcome)
                };
                tasks.spawn_on(slot.in_current_span(), &handle);
            }

            let mut outcomes: Vec<Option<CallbackOutcome<T>>> =
                std::iter::repeat_with(|| None).take(total).collect();
            let mut completed = 0;
            tokio::pin!(shutdown);

            loop {
                tokio::select! {
                    joined = tasks.join_next() => match joined {
                        Some(Ok((index, outcome))) => {
                            outcomes[index] = Some(outcome);
                            completed += 1;
                        }
                        Some(Err(err)) => warn!(error = %err, "dispatch slot task failed"),
                        None => break,
                    },
                    () = &mut shutdown => {
                        tasks.abort_all();
                        warn!(completed, total, "parallel dispatch cancelled");
                        return Err(DispatchError::Cancelled { completed, partial: outcomes });
                    }
                }
            }

            debug!(completed, total, "parallel dispatch finished");
            Ok(outcomes
                .into_iter()
                .map(|outcome| {
                    outcome.unwrap_or_else(|| {
                        CallbackOutcome::RequestFailed(RequestError::Aborted(
                            "slot task ended without an outcome".to_string(),
                        ))
                    })
                })
                .collect())
        }
        .instrument(span)
        .await
    }
}

async fn run_slot<T: Send + 'static>(
    client: Client,
    request: HttpRequest,
    callback: Callback<T>,
    limiter: Option<Arc<Semaphore>>,
) -> CallbackOutcome<T> {
    let url = request.url().clone();
    let response = {
        // A closed semaphore is never produced here; proceed unpermitted if it is.
        let _permit = match &limiter {
            Some(limiter) => limiter.acquire().await.ok(),
            None => None,
        };
        client.send_prepared(request).await
    };

    match response {
        Ok(response) => match callback.invoke(response).await {
            Ok(value) => CallbackOutcome::Completed(value),
            Err(err) => {
                warn!(%url, error = %err, "callback failed");
                CallbackOutcome::CallbackFailed(err)
            }
        },
        Err(err) => {
            warn!(%url, error = %err, "request failed");
            CallbackOutcome::RequestFailed(err)
        }
    }
}
