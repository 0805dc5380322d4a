//! Helpers for testing the signed URL cache against a storage API.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`SigningServer`], make sure that the server is held until all requests to
//!    the server have been made. The server stops serving when dropped, and all further
//!    requests fail. To avoid this, assign it to a variable: `let server = SigningServer::new();`.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;
use url::Url;

/// The token the [`SigningServer`] accepts.
pub const STORAGE_TOKEN: &str = "test-service-role-key";

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the cache crates and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("signed_url_cache=trace,signed_url=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// A test server that binds to a random port and serves a web app.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    pub handle: tokio::task::JoinHandle<()>,
    pub socket: SocketAddr,
}

impl Server {
    fn with_router(router: Router) -> Self {
        let listener = std::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.socket.port()
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.port(), path)
            .parse()
            .unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignRequest {
    expires_in: u64,
}

type Hits = Arc<Mutex<BTreeMap<String, usize>>>;

/// A mock of the storage API signing endpoint.
///
/// `POST /storage/v1/object/sign/{bucket}/{key}` answers with a signed path whose `token`
/// query parameter counts the requests made for that object, starting at `t1`. The first path
/// segment of the key selects special behavior:
///
///  - `missing/...` answers `404 Not Found`
///  - `error/...` answers `500 Internal Server Error`
///  - `garbage/...` answers `200 OK` with a body that is not a signing response
///  - `slow/...` answers normally after 100ms
///
/// Requests without the [`STORAGE_TOKEN`] are rejected with `403 Forbidden`.
pub struct SigningServer {
    server: Server,
    hits: Hits,
}

impl SigningServer {
    pub fn new() -> Self {
        let hits = Hits::default();

        let router = Router::new()
            .route("/storage/v1/object/sign/:bucket/*key", post(sign))
            .with_state(hits.clone());

        let server = Server::with_router(router);

        Self { server, hits }
    }

    /// The base URL of the storage API, to be used as `storage.url`.
    pub fn storage_url(&self) -> Url {
        self.server.url("storage/v1")
    }

    /// The number of signing requests for the given bucket-relative object path.
    pub fn hits(&self, bucket: &str, key: &str) -> usize {
        let path = format!("{bucket}/{key}");
        self.hits.lock().unwrap().get(&path).copied().unwrap_or_default()
    }

    /// The total number of signing requests, including rejected ones.
    pub fn accesses(&self) -> usize {
        self.hits.lock().unwrap().values().sum()
    }
}

impl Default for SigningServer {
    fn default() -> Self {
        Self::new()
    }
}

async fn sign(
    State(hits): State<Hits>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    Json(request): Json<SignRequest>,
) -> Response {
    let object = format!("{bucket}/{key}");
    let hit = {
        let mut hits = hits.lock().unwrap();
        let hit = hits.entry(object.clone()).or_default();
        *hit += 1;
        *hit
    };

    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        == Some(format!("Bearer {STORAGE_TOKEN}").as_str());
    if !authorized {
        return (StatusCode::FORBIDDEN, "invalid signature").into_response();
    }

    match key.split('/').next().unwrap_or_default() {
        "missing" => return (StatusCode::NOT_FOUND, "object not found").into_response(),
        "error" => return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
        "garbage" => return "definitely not json".into_response(),
        "slow" => tokio::time::sleep(Duration::from_millis(100)).await,
        _ => {}
    }

    let signed_url = format!(
        "/object/sign/{object}?token=t{hit}&expiresIn={}",
        request.expires_in
    );
    Json(json!({ "signedURL": signed_url })).into_response()
}
