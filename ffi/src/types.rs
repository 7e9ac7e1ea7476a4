//! `#[repr(C)]` types for the FFI boundary.
//!
//! # Design
//! Everything handed to C is plain data: NUL-terminated strings, pointer and
//! length pairs for byte buffers and arrays, and error codes with explicit
//! discriminants. Buffers are allocated as boxed slices so they can be
//! released with the exact layout they were created with. Conversion and
//! release helpers live here to keep `lib.rs` focused on the `extern "C"`
//! surface.

use std::ffi::{c_void, CString};
use std::os::raw::c_char;
use std::ptr;

use volley_core::{
    CallbackError, CallbackOutcome, ConfigError, Error, HttpResponse, RequestError,
};

/// Opaque handle to a client and the runtime that drives it. C callers
/// receive a pointer to this and pass it back into every call.
pub struct FfiClient {
    pub(crate) runtime: tokio::runtime::Runtime,
    pub(crate) client: volley_core::Client,
}

/// Signature of a per-response C callback. The response is only valid for
/// the duration of the call. Return `0` to accept it; any other value marks
/// the slot as a callback failure. Called from runtime worker threads, so it
/// must be thread-safe.
pub type FfiResponseCallback =
    Option<extern "C" fn(response: *const FfiHttpResponse, user_data: *mut c_void) -> i32>;

/// Caller context passed through to every callback invocation.
#[derive(Clone, Copy)]
pub(crate) struct UserData(pub(crate) *mut c_void);

impl UserData {
    pub(crate) fn get(self) -> *mut c_void {
        self.0
    }
}

// The pointer is opaque to us; the caller vouches for its thread safety.
unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// A single response header. Repeated headers appear once per value.
#[repr(C)]
pub struct FfiHeader {
    pub name: *mut c_char,
    pub value: *mut c_char,
}

/// An HTTP response as C-compatible plain data. `body` is not
/// NUL-terminated; read `body_len` bytes.
#[repr(C)]
pub struct FfiHttpResponse {
    pub status: u16,
    pub url: *mut c_char,
    pub headers: *mut FfiHeader,
    pub headers_len: u32,
    pub body: *mut u8,
    pub body_len: usize,
    pub elapsed_ms: u64,
}

impl FfiHttpResponse {
    pub(crate) fn from_core(resp: &HttpResponse) -> Self {
        let headers: Vec<FfiHeader> = resp
            .headers()
            .iter()
            .map(|(name, value)| FfiHeader {
                name: c_string(name.as_str()),
                value: c_string(value.as_bytes()),
            })
            .collect();
        let headers_len = headers.len() as u32;
        let (body, body_len) = boxed_slice(resp.body().to_vec());

        FfiHttpResponse {
            status: resp.status().as_u16(),
            url: c_string(resp.url().as_str()),
            headers: boxed_slice(headers).0,
            headers_len,
            body,
            body_len,
            elapsed_ms: resp.elapsed().as_millis() as u64,
        }
    }

    /// Release everything this response points to, leaving the struct
    /// itself to its owner.
    pub(crate) unsafe fn free_fields(&mut self) {
        free_c_string(self.url);
        let headers = take_boxed_slice(self.headers, self.headers_len as usize);
        for header in headers.iter() {
            free_c_string(header.name);
            free_c_string(header.value);
        }
        drop(take_boxed_slice(self.body, self.body_len));
        self.url = ptr::null_mut();
        self.headers = ptr::null_mut();
        self.headers_len = 0;
        self.body = ptr::null_mut();
        self.body_len = 0;
    }
}

// ---------------------------------------------------------------------------
// Error codes
// ---------------------------------------------------------------------------

/// Outcome category carried by every result and outcome.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiErrorCode {
    Ok = 0,
    NullArg = 1,
    InvalidArgument = 2,
    Connect = 3,
    Tls = 4,
    Timeout = 5,
    Protocol = 6,
    Aborted = 7,
    Io = 8,
    CallbackFailed = 9,
    Panic = 10,
}

impl From<&RequestError> for FfiErrorCode {
    fn from(err: &RequestError) -> Self {
        match err {
            RequestError::Connect(_) => FfiErrorCode::Connect,
            RequestError::Tls(_) => FfiErrorCode::Tls,
            RequestError::Timeout(_) => FfiErrorCode::Timeout,
            RequestError::Protocol(_) => FfiErrorCode::Protocol,
            RequestError::Aborted(_) => FfiErrorCode::Aborted,
        }
    }
}

impl From<&Error> for FfiErrorCode {
    fn from(err: &Error) -> Self {
        match err {
            Error::Config(_) => FfiErrorCode::InvalidArgument,
            Error::Request(err) => err.into(),
            Error::Io(_) => FfiErrorCode::Io,
        }
    }
}

/// Non-zero status returned by a C callback.
#[derive(Debug, thiserror::Error)]
#[error("callback returned status {0}")]
pub(crate) struct CallbackStatus(pub(crate) i32);

// ---------------------------------------------------------------------------
// Single request result
// ---------------------------------------------------------------------------

/// Result envelope for `volley_request`.
///
/// On success `error_code` is `Ok`, `error_message` is null and `response`
/// points to the response. On failure `error_message` is a human-readable C
/// string and `response` is null.
#[repr(C)]
pub struct FfiResult {
    pub error_code: FfiErrorCode,
    pub error_message: *mut c_char,
    pub response: *mut FfiHttpResponse,
}

impl FfiResult {
    pub(crate) fn ok(resp: &HttpResponse) -> *mut Self {
        Box::into_raw(Box::new(FfiResult {
            error_code: FfiErrorCode::Ok,
            error_message: ptr::null_mut(),
            response: Box::into_raw(Box::new(FfiHttpResponse::from_core(resp))),
        }))
    }

    pub(crate) fn error(code: FfiErrorCode, msg: impl AsRef<str>) -> *mut Self {
        Box::into_raw(Box::new(FfiResult {
            error_code: code,
            error_message: c_string(msg.as_ref()),
            response: ptr::null_mut(),
        }))
    }

    pub(crate) fn from_error(err: &Error) -> *mut Self {
        Self::error(err.into(), err.to_string())
    }

    pub(crate) fn null_arg(name: &str) -> *mut Self {
        Self::error(FfiErrorCode::NullArg, format!("null argument: {name}"))
    }
}

// ---------------------------------------------------------------------------
// Parallel outcomes
// ---------------------------------------------------------------------------

/// One slot of a parallel dispatch, index-aligned with the submitted URLs.
///
/// - `Ok`: the response arrived and the callback accepted it. Without a
///   callback, `response` holds it; with one, `response` is null.
/// - `CallbackFailed`: `callback_status` holds the callback's non-zero
///   return value.
/// - any other code: the request failed and the callback never ran.
#[repr(C)]
pub struct FfiOutcome {
    pub error_code: FfiErrorCode,
    pub error_message: *mut c_char,
    pub callback_status: i32,
    pub response: *mut FfiHttpResponse,
}

impl FfiOutcome {
    pub(crate) fn from_core(outcome: CallbackOutcome<Option<HttpResponse>>) -> Self {
        match outcome {
            CallbackOutcome::Completed(resp) => FfiOutcome {
                error_code: FfiErrorCode::Ok,
                error_message: ptr::null_mut(),
                callback_status: 0,
                response: resp.map_or(ptr::null_mut(), |resp| {
                    Box::into_raw(Box::new(FfiHttpResponse::from_core(&resp)))
                }),
            },
            CallbackOutcome::RequestFailed(err) => FfiOutcome {
                error_code: (&err).into(),
                error_message: c_string(err.to_string()),
                callback_status: 0,
                response: ptr::null_mut(),
            },
            CallbackOutcome::CallbackFailed(err) => {
                let (error_code, callback_status) = match &err {
                    CallbackError::Raised(inner) => (
                        FfiErrorCode::CallbackFailed,
                        inner.downcast_ref::<CallbackStatus>().map_or(-1, |s| s.0),
                    ),
                    CallbackError::Panicked(_) => (FfiErrorCode::Panic, -1),
                };
                FfiOutcome {
                    error_code,
                    error_message: c_string(err.to_string()),
                    callback_status,
                    response: ptr::null_mut(),
                }
            }
        }
    }
}

/// Every slot of a parallel dispatch. When the dispatch itself was rejected
/// (no URLs, a malformed URL, bad options) `error_code` says why and `items`
/// is null.
#[repr(C)]
pub struct FfiOutcomeList {
    pub error_code: FfiErrorCode,
    pub error_message: *mut c_char,
    pub items: *mut FfiOutcome,
    pub len: u32,
}

impl FfiOutcomeList {
    pub(crate) fn ok(outcomes: Vec<CallbackOutcome<Option<HttpResponse>>>) -> *mut Self {
        let items: Vec<FfiOutcome> = outcomes.into_iter().map(FfiOutcome::from_core).collect();
        let len = items.len() as u32;
        Box::into_raw(Box::new(FfiOutcomeList {
            error_code: FfiErrorCode::Ok,
            error_message: ptr::null_mut(),
            items: boxed_slice(items).0,
            len,
        }))
    }

    pub(crate) fn error(code: FfiErrorCode, msg: impl AsRef<str>) -> *mut Self {
        Box::into_raw(Box::new(FfiOutcomeList {
            error_code: code,
            error_message: c_string(msg.as_ref()),
            items: ptr::null_mut(),
            len: 0,
        }))
    }

    pub(crate) fn from_config(err: &ConfigError) -> *mut Self {
        Self::error(FfiErrorCode::InvalidArgument, err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Allocation helpers
// ---------------------------------------------------------------------------

/// Heap C string. Interior NULs are dropped rather than failing.
pub(crate) fn c_string(s: impl Into<Vec<u8>>) -> *mut c_char {
    let s = CString::new(s).unwrap_or_else(|err| {
        let mut bytes = err.into_vec();
        bytes.retain(|b| *b != 0);
        CString::new(bytes).unwrap_or_default()
    });
    s.into_raw()
}

pub(crate) unsafe fn free_c_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

/// Leak `items` as a boxed slice. Empty input yields a null pointer.
pub(crate) fn boxed_slice<T>(items: Vec<T>) -> (*mut T, usize) {
    if items.is_empty() {
        return (ptr::null_mut(), 0);
    }
    let len = items.len();
    (Box::into_raw(items.into_boxed_slice()).cast::<T>(), len)
}

/// Reclaim a slice leaked by `boxed_slice`.
pub(crate) unsafe fn take_boxed_slice<T>(data: *mut T, len: usize) -> Box<[T]> {
    if data.is_null() || len == 0 {
        return Box::default();
    }
    Box::from_raw(ptr::slice_from_raw_parts_mut(data, len))
}
