//! Uniform invocation of user callbacks.
//!
//! # Design
//! A callback is either a plain function or one returning a future. The kind
//! is fixed when the `Callback` is constructed, so `invoke` dispatches on an
//! enum tag instead of inspecting anything per call. Both kinds are awaited
//! through the same `invoke` and both have their errors and panics folded
//! into `CallbackError`, which keeps the dispatcher free of special cases.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::CallbackError;
use crate::response::HttpResponse;

type ImmediateFn<T> = dyn Fn(HttpResponse) -> anyhow::Result<T> + Send + Sync;
type SuspendingFn<T> = dyn Fn(HttpResponse) -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync;

/// A user callback applied to each successful response.
///
/// Cloning is cheap; every dispatch slot holds its own handle to the same
/// function.
pub enum Callback<T> {
    Immediate(Arc<ImmediateFn<T>>),
    Suspending(Arc<SuspendingFn<T>>),
}

impl<T> Clone for Callback<T> {
    fn clone(&self) -> Self {
        match self {
            Callback::Immediate(f) => Callback::Immediate(Arc::clone(f)),
            Callback::Suspending(f) => Callback::Suspending(Arc::clone(f)),
        }
    }
}

impl<T> fmt::Debug for Callback<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callback::Immediate(_) => f.write_str("Callback::Immediate"),
            Callback::Suspending(_) => f.write_str("Callback::Suspending"),
        }
    }
}

impl<T: Send + 'static> Callback<T> {
    /// Wrap a plain function.
    pub fn immediate<F>(f: F) -> Self
    where
        F: Fn(HttpResponse) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Callback::Immediate(Arc::new(f))
    }

    /// Wrap a function whose result is awaited.
    pub fn suspending<F, Fut>(f: F) -> Self
    where
        F: Fn(HttpResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Callback::Suspending(Arc::new(move |resp: HttpResponse| f(resp).boxed()))
    }

    pub fn is_suspending(&self) -> bool {
        matches!(self, Callback::Suspending(_))
    }

    /// Run the callback on one response and wait for its result.
    pub async fn invoke(&self, response: HttpResponse) -> Result<T, CallbackError> {
        let result = match self {
            Callback::Immediate(f) => {
                std::panic::catch_unwind(AssertUnwindSafe(|| f(response)))
            }
            Callback::Suspending(f) => {
                match std::panic::catch_unwind(AssertUnwindSafe(|| f(response))) {
                    Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
                    Err(panic) => Err(panic),
                }
            }
        };
        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(CallbackError::Raised(err)),
            Err(panic) => Err(CallbackError::Panicked(panic_message(panic.as_ref()))),
        }
    }
}

impl Callback<HttpResponse> {
    /// Hand every response back unchanged.
    pub fn identity() -> Self {
        Callback::immediate(Ok)
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
