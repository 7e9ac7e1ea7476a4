//! C-ABI wrapper around `volley-core`.
//!
//! # Overview
//! Exposes single requests and parallel dispatch through `extern "C"`
//! functions so any language with a C FFI can drive the client without
//! knowing about Rust futures or executors.
//!
//! # Design
//! - A client handle owns a multi-threaded tokio runtime next to the
//!   `Client`. Every call blocks the calling thread on that runtime, so C
//!   sees a synchronous API while dispatch still runs concurrently.
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - Options arrive as JSON strings and go through the same serde parsing
//!   as the Rust API, so unknown keys are rejected the same way.
//! - The C caller owns all returned pointers and must call the matching
//!   `volley_free_*` function to release them.

pub mod types;

use std::collections::BTreeMap;
use std::ffi::{c_void, CStr};
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};

use volley_core::{
    Callback, Client, ClientConfig, ConfigError, DispatchError, HttpMethod, HttpResponse,
    RequestOptions,
};

use types::*;

/// Borrow a C string as UTF-8. `None` for null, `Err` for invalid UTF-8.
unsafe fn read_str<'a>(s: *const c_char) -> Option<Result<&'a str, ConfigError>> {
    if s.is_null() {
        return None;
    }
    Some(
        CStr::from_ptr(s)
            .to_str()
            .map_err(|_| ConfigError::InvalidConfig("string argument is not utf-8".to_string())),
    )
}

// ---------------------------------------------------------------------------
// Client lifecycle
// ---------------------------------------------------------------------------

/// Create a client from a JSON `ClientConfig` document, or with defaults
/// when `config_json` is null.
///
/// Returns null if the config is invalid, the runtime cannot start, or an
/// internal panic occurs. Free with `volley_client_free`.
#[unsafe(no_mangle)]
pub extern "C" fn volley_client_new(config_json: *const c_char) -> *mut FfiClient {
    catch_unwind(AssertUnwindSafe(|| {
        let config = match unsafe { read_str(config_json) } {
            None => ClientConfig::default(),
            Some(Ok(raw)) => match ClientConfig::from_json(raw) {
                Ok(config) => config,
                Err(_) => return std::ptr::null_mut(),
            },
            Some(Err(_)) => return std::ptr::null_mut(),
        };
        let Ok(client) = Client::from_config(&config) else {
            return std::ptr::null_mut();
        };
        let Ok(runtime) = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("volley-ffi")
            .build()
        else {
            return std::ptr::null_mut();
        };
        Box::into_raw(Box::new(FfiClient { runtime, client }))
    }))
    .unwrap_or(std::ptr::null_mut())
}

/// Free a client created by `volley_client_new`. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn volley_client_free(client: *mut FfiClient) {
    if !client.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(client) });
        }));
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Send one request and wait for the response.
///
/// `method` is one of `GET`, `HEAD`, `POST`, `PUT`, `DELETE` (any case).
/// `headers_json` is a JSON object of header names to values and may be
/// null. `body` may be null; otherwise `body_len` bytes are sent.
/// A non-2xx status is still a successful result. Free the result with
/// `volley_free_result`.
#[unsafe(no_mangle)]
pub extern "C" fn volley_request(
    client: *const FfiClient,
    method: *const c_char,
    url: *const c_char,
    headers_json: *const c_char,
    body: *const u8,
    body_len: usize,
) -> *mut FfiResult {
    catch_unwind(AssertUnwindSafe(|| {
        if client.is_null() {
            return FfiResult::null_arg("client");
        }
        let handle = unsafe { &*client };
        let method = match unsafe { read_str(method) } {
            None => return FfiResult::null_arg("method"),
            Some(raw) => match raw.and_then(str::parse::<HttpMethod>) {
                Ok(method) => method,
                Err(e) => return FfiResult::from_error(&e.into()),
            },
        };
        let url = match unsafe { read_str(url) } {
            None => return FfiResult::null_arg("url"),
            Some(Ok(url)) => url,
            Some(Err(e)) => return FfiResult::from_error(&e.into()),
        };

        let mut options = RequestOptions::new();
        match unsafe { read_str(headers_json) } {
            None => {}
            Some(raw) => {
                let headers = raw.and_then(|raw| {
                    serde_json::from_str::<BTreeMap<String, String>>(raw)
                        .map_err(|e| ConfigError::InvalidConfig(e.to_string()))
                });
                match headers {
                    Ok(headers) => options.headers.extend(headers),
                    Err(e) => return FfiResult::from_error(&e.into()),
                }
            }
        }
        if !body.is_null() {
            let bytes = unsafe { std::slice::from_raw_parts(body, body_len) };
            options = options.body(bytes.to_vec());
        }

        match handle
            .runtime
            .block_on(handle.client.request(method, url, &options))
        {
            Ok(resp) => FfiResult::ok(&resp),
            Err(e) => FfiResult::from_error(&e),
        }
    }))
    .unwrap_or_else(|_| FfiResult::error(FfiErrorCode::Panic, "panic in volley_request"))
}

/// Send every URL concurrently with the same method and options.
///
/// `options_json` is a JSON `RequestOptions` document (`timeout_ms`,
/// `headers`, `body`, `proxy`) and may be null. When `callback` is null
/// every outcome carries its response; otherwise each response is passed to
/// `callback` along with `user_data` and dropped afterwards. Outcomes are
/// index-aligned with `urls`. Free with `volley_free_outcomes`.
#[unsafe(no_mangle)]
pub extern "C" fn volley_parallel_request(
    client: *const FfiClient,
    method: *const c_char,
    urls: *const *const c_char,
    urls_len: u32,
    options_json: *const c_char,
    callback: FfiResponseCallback,
    user_data: *mut c_void,
) -> *mut FfiOutcomeList {
    catch_unwind(AssertUnwindSafe(|| {
        if client.is_null() {
            return FfiOutcomeList::error(FfiErrorCode::NullArg, "null argument: client");
        }
        if urls.is_null() && urls_len > 0 {
            return FfiOutcomeList::error(FfiErrorCode::NullArg, "null argument: urls");
        }
        let handle = unsafe { &*client };
        let method = match unsafe { read_str(method) } {
            None => return FfiOutcomeList::error(FfiErrorCode::NullArg, "null argument: method"),
            Some(raw) => match raw.and_then(str::parse::<HttpMethod>) {
                Ok(method) => method,
                Err(e) => return FfiOutcomeList::from_config(&e),
            },
        };

        let mut targets = Vec::with_capacity(urls_len as usize);
        for i in 0..urls_len as usize {
            match unsafe { read_str(*urls.add(i)) } {
                None => {
                    return FfiOutcomeList::error(
                        FfiErrorCode::NullArg,
                        format!("null argument: urls[{i}]"),
                    )
                }
                Some(Ok(url)) => targets.push(url.to_string()),
                Some(Err(e)) => return FfiOutcomeList::from_config(&e),
            }
        }

        let options = match unsafe { read_str(options_json) } {
            None => RequestOptions::default(),
            Some(raw) => match raw.and_then(RequestOptions::from_json) {
                Ok(options) => options,
                Err(e) => return FfiOutcomeList::from_config(&e),
            },
        };

        let callback = match callback {
            Some(callback) => c_callback(callback, UserData(user_data)),
            None => Callback::immediate(|resp: HttpResponse| Ok(Some(resp))),
        };

        match handle.runtime.block_on(handle.client.parallel_request(
            method,
            targets,
            &options,
            callback,
        )) {
            Ok(outcomes) => FfiOutcomeList::ok(outcomes),
            Err(DispatchError::Config(e)) => FfiOutcomeList::from_config(&e),
            Err(e) => FfiOutcomeList::error(FfiErrorCode::Aborted, e.to_string()),
        }
    }))
    .unwrap_or_else(|_| {
        FfiOutcomeList::error(FfiErrorCode::Panic, "panic in volley_parallel_request")
    })
}

/// Adapt a C callback. The response view lives only for the call.
fn c_callback(
    callback: extern "C" fn(*const FfiHttpResponse, *mut c_void) -> i32,
    user_data: UserData,
) -> Callback<Option<HttpResponse>> {
    Callback::immediate(move |resp: HttpResponse| {
        let mut view = FfiHttpResponse::from_core(&resp);
        let status = callback(&view, user_data.get());
        unsafe { view.free_fields() };
        if status == 0 {
            Ok(None)
        } else {
            Err(CallbackStatus(status).into())
        }
    })
}

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Free a result returned by `volley_request`. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn volley_free_result(result: *mut FfiResult) {
    if result.is_null() {
        return;
    }
    let _ = catch_unwind(AssertUnwindSafe(|| {
        let result = unsafe { Box::from_raw(result) };
        unsafe {
            free_c_string(result.error_message);
            free_response(result.response);
        }
    }));
}

/// Free an outcome list returned by `volley_parallel_request`. Safe to call
/// with null.
#[unsafe(no_mangle)]
pub extern "C" fn volley_free_outcomes(list: *mut FfiOutcomeList) {
    if list.is_null() {
        return;
    }
    let _ = catch_unwind(AssertUnwindSafe(|| {
        let list = unsafe { Box::from_raw(list) };
        unsafe {
            free_c_string(list.error_message);
            for outcome in take_boxed_slice(list.items, list.len as usize).iter() {
                free_c_string(outcome.error_message);
                free_response(outcome.response);
            }
        }
    }));
}

/// Free a string allocated by this library. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn volley_free_string(s: *mut c_char) {
    if !s.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| unsafe { free_c_string(s) }));
    }
}

unsafe fn free_response(resp: *mut FfiHttpResponse) {
    if !resp.is_null() {
        let mut resp = Box::from_raw(resp);
        resp.free_fields();
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
