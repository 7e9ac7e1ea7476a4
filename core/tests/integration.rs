//! End-to-end tests against the live mock server.
//!
//! # Design
//! Each test starts the mock server on a random port inside its own runtime,
//! then drives the client over real sockets through the default reqwest
//! transport. Nothing here mocks the network; the scripted transport tests
//! in `dispatch.rs` cover timing-sensitive behaviour.

use std::time::Duration;

use mock_server::{Echo, Served};
use tokio::net::TcpListener;
use volley_core::{
    Callback, CallbackOutcome, Client, ConfigError, DispatchError, Error, HttpMethod,
    HttpResponse, RequestError, RequestOptions, DEFAULT_USER_AGENT,
};

async fn serve() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(mock_server::run(listener));
    format!("http://{addr}")
}

fn client() -> Client {
    Client::builder()
        .no_proxy()
        .header("X-Env", "prod")
        .build()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn get_merges_headers_and_sends_user_agent() {
    let base = serve().await;
    let resp = client()
        .get(
            &format!("{base}/echo"),
            &RequestOptions::new().header("x-req", "1"),
        )
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 200);
    assert!(resp.ok());
    assert!(resp.header("x-request-id").is_some());
    let echo: Echo = resp.json().unwrap();
    assert_eq!(echo.method, "GET");
    assert_eq!(echo.headers["x-env"], "prod");
    assert_eq!(echo.headers["x-req"], "1");
    assert_eq!(echo.headers["user-agent"], DEFAULT_USER_AGENT);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn request_header_overrides_user_agent() {
    let base = serve().await;
    let client = Client::builder()
        .no_proxy()
        .user_agent("fleet/2")
        .build()
        .unwrap();

    let echo: Echo = client
        .get(&format!("{base}/echo"), &RequestOptions::default())
        .await
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(echo.headers["user-agent"], "fleet/2");

    let echo: Echo = client
        .get(
            &format!("{base}/echo"),
            &RequestOptions::new().header("User-Agent", "probe"),
        )
        .await
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(echo.headers["user-agent"], "probe");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn post_put_and_delete_carry_their_method() {
    let base = serve().await;
    let client = client();
    let url = format!("{base}/echo");

    let posted: Echo = client
        .post(&url, &RequestOptions::new().body("{\"n\":1}"))
        .await
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(posted.method, "POST");
    assert_eq!(posted.body, "{\"n\":1}");

    let put: Echo = client
        .put(&url, &RequestOptions::new().body("replace"))
        .await
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(put.method, "PUT");
    assert_eq!(put.body, "replace");

    let deleted: Echo = client
        .delete(&url, &RequestOptions::default())
        .await
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(deleted.method, "DELETE");
    assert_eq!(deleted.body, "");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn head_returns_headers_without_body() {
    let base = serve().await;
    let resp = client()
        .head(&format!("{base}/bytes/32"), &RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert!(resp.body().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn error_status_is_a_response() {
    let base = serve().await;
    let resp = client()
        .get(&format!("{base}/status/503"), &RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 503);
    assert!(!resp.ok());
    assert_eq!(resp.text(), "status 503");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn repeated_headers_are_kept() {
    let base = serve().await;
    let resp = client()
        .get(&format!("{base}/cookies"), &RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(resp.header_all("Set-Cookie"), vec!["a=1", "b=2"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_server_times_out() {
    let base = serve().await;
    let err = client()
        .get(
            &format!("{base}/delay/2000"),
            &RequestOptions::new().timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Request(RequestError::Timeout(_))), "{err:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refused_connection_is_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client()
        .get(&format!("http://{addr}/echo"), &RequestOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Request(RequestError::Connect(_))), "{err:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tls_words_in_url_do_not_change_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    for path in ["tls", "certificate/handshake"] {
        let err = client()
            .get(&format!("http://{addr}/{path}"), &RequestOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Request(RequestError::Connect(_))), "{path}: {err:?}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_get_over_real_sockets() {
    let base = serve().await;
    let dead = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let targets = vec![
        format!("{base}/delay/150"),
        format!("{base}/status/404"),
        format!("http://{dead}/echo"),
        format!("{base}/delay/20000"),
        format!("{base}/bytes/3"),
    ];
    let options = RequestOptions::new().timeout(Duration::from_millis(1000));

    let outcomes = client()
        .parallel_get(&targets, &options, Callback::identity())
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 5);
    assert_eq!(outcomes[0].value().unwrap().text(), "delayed 150ms");
    assert_eq!(outcomes[1].value().unwrap().status().as_u16(), 404);
    assert!(matches!(outcomes[2], CallbackOutcome::RequestFailed(RequestError::Connect(_))));
    assert!(matches!(outcomes[3], CallbackOutcome::RequestFailed(RequestError::Timeout(_))));
    assert_eq!(outcomes[4].value().unwrap().body().as_ref(), b"xxx");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_requests_reach_the_server_once_each() {
    let base = serve().await;
    let targets: Vec<String> = (0..8).map(|n| format!("{base}/bytes/{n}")).collect();

    let lengths = client()
        .dispatcher()
        .max_concurrency(3)
        .unwrap()
        .run(
            HttpMethod::Get,
            &targets,
            &RequestOptions::default(),
            Callback::suspending(|resp: HttpResponse| async move { Ok(resp.body().len()) }),
        )
        .await
        .unwrap();
    let lengths: Vec<_> = lengths.into_iter().map(|o| o.into_value().unwrap()).collect();
    assert_eq!(lengths, (0..8).collect::<Vec<usize>>());

    let served: Vec<Served> = client()
        .get(&format!("{base}/requests"), &RequestOptions::default())
        .await
        .unwrap()
        .json()
        .unwrap();
    let byte_hits = served.iter().filter(|s| s.path.starts_with("/bytes/")).count();
    assert_eq!(byte_hits, 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn download_writes_body_to_disk() {
    let base = serve().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("payload.bin");

    let written = client()
        .download(&format!("{base}/bytes/128"), &path)
        .await
        .unwrap();
    assert_eq!(written, 128);
    assert_eq!(std::fs::read(&path).unwrap(), vec![b'x'; 128]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_download_isolates_write_failures() {
    let base = serve().await;
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.bin");
    let missing_dir = dir.path().join("absent").join("bad.bin");

    let outcomes = client()
        .parallel_download([
            (format!("{base}/bytes/10"), good.clone()),
            (format!("{base}/bytes/20"), missing_dir),
        ])
        .await
        .unwrap();

    assert!(matches!(outcomes[0], CallbackOutcome::Completed(10)));
    assert!(outcomes[1].callback_error().is_some());
    assert_eq!(std::fs::read(&good).unwrap().len(), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_download_saves_one_url_under_several_paths() {
    let base = serve().await;
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first.bin");
    let second = dir.path().join("second.bin");
    let url = format!("{base}/bytes/16");

    let outcomes = client()
        .parallel_download([(url.clone(), first.clone()), (url, second.clone())])
        .await
        .unwrap();

    assert!(matches!(outcomes[0], CallbackOutcome::Completed(16)));
    assert!(matches!(outcomes[1], CallbackOutcome::Completed(16)));
    assert_eq!(std::fs::read(&first).unwrap(), vec![b'x'; 16]);
    assert_eq!(std::fs::read(&second).unwrap(), vec![b'x'; 16]);
}

#[tokio::test]
async fn parallel_download_rejects_bad_url_before_sending() {
    let dir = tempfile::tempdir().unwrap();
    let err = client()
        .parallel_download([("ftp://files.test/a", dir.path().join("a"))])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Config(ConfigError::UnsupportedScheme(ref scheme)) if scheme == "ftp"
    ));
}
