//! A throwaway asset server for integration tests.
//!
//! Routes under `/play/`:
//! - `missing.swf` answers 404
//! - `broken.swf` answers 500
//! - `flaky.swf` answers 503 twice, then succeeds
//! - anything else answers 200 with `asset:<path>` as the body

#![allow(dead_code)]

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct ServerState {
    pub flaky_hits: Arc<AtomicUsize>,
    pub requests: Arc<AtomicUsize>,
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: ServerState,
}

impl TestServer {
    pub fn base_url(&self) -> String {
        format!("http://{}/play/", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}/play/{}", self.addr, path)
    }

    pub fn requests(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }
}

async fn serve_asset(State(state): State<ServerState>, Path(path): Path<String>) -> (StatusCode, String) {
    state.requests.fetch_add(1, Ordering::SeqCst);
    match path.as_str() {
        "missing.swf" => (StatusCode::NOT_FOUND, "gone".to_string()),
        "broken.swf" => (StatusCode::INTERNAL_SERVER_ERROR, "boom".to_string()),
        "flaky.swf" => {
            if state.flaky_hits.fetch_add(1, Ordering::SeqCst) < 2 {
                (StatusCode::SERVICE_UNAVAILABLE, "busy".to_string())
            } else {
                (StatusCode::OK, "asset:flaky.swf".to_string())
            }
        }
        other => (StatusCode::OK, format!("asset:{}", other)),
    }
}

pub async fn spawn_server() -> TestServer {
    let state = ServerState::default();
    let app = Router::new()
        .route("/play/{*path}", get(serve_asset))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer { addr, state }
}
