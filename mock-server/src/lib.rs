//! Local HTTP server for exercising the client over real sockets.
//!
//! Routes:
//! - `ANY /echo` returns the request's method, headers and body as JSON
//! - `GET /delay/{ms}` answers after sleeping `ms` milliseconds
//! - `GET /status/{code}` answers with that status
//! - `GET /cookies` sets two cookies through repeated `set-cookie` headers
//! - `GET /bytes/{n}` returns `n` bytes
//! - `GET /requests` lists every request served so far
//!
//! Every response carries an `x-request-id` header matching its entry in
//! `/requests`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

/// One request as seen by the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Served {
    pub id: Uuid,
    pub method: String,
    pub path: String,
}

/// Body of an `/echo` response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Echo {
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

pub type Log = Arc<RwLock<Vec<Served>>>;

pub fn app() -> Router {
    let log: Log = Arc::new(RwLock::new(Vec::new()));
    Router::new()
        .route("/echo", any(echo))
        .route("/delay/{ms}", get(delay))
        .route("/status/{code}", get(status))
        .route("/cookies", get(cookies))
        .route("/bytes/{n}", get(payload))
        .route("/requests", get(list_requests))
        .layer(middleware::from_fn_with_state(log.clone(), record))
        .with_state(log)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn record(State(log): State<Log>, request: Request, next: Next) -> Response {
    let served = Served {
        id: Uuid::new_v4(),
        method: request.method().to_string(),
        path: request.uri().path().to_string(),
    };
    let id = served.id;
    log.write().await.push(served);

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

async fn echo(method: Method, headers: HeaderMap, body: Bytes) -> Json<Echo> {
    let headers = headers
        .iter()
        .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or("").to_string()))
        .collect();
    Json(Echo {
        method: method.to_string(),
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

async fn delay(Path(ms): Path<u64>) -> String {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    format!("delayed {ms}ms")
}

async fn status(Path(code): Path<u16>) -> Result<(StatusCode, String), StatusCode> {
    let status = StatusCode::from_u16(code).map_err(|_| StatusCode::BAD_REQUEST)?;
    Ok((status, format!("status {code}")))
}

async fn cookies() -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    headers.append(header::SET_COOKIE, HeaderValue::from_static("a=1"));
    headers.append(header::SET_COOKIE, HeaderValue::from_static("b=2"));
    (headers, "cookies set")
}

async fn payload(Path(n): Path<usize>) -> Vec<u8> {
    vec![b'x'; n]
}

async fn list_requests(State(log): State<Log>) -> Json<Vec<Served>> {
    Json(log.read().await.clone())
}
