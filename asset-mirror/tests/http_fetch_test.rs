mod common;

use asset_mirror::transfer::fetcher::part_path;
use asset_mirror::transfer::{FetchError, Fetcher, HttpFetcher};
use std::time::Duration;

fn fetcher() -> HttpFetcher {
    HttpFetcher::new(Duration::from_secs(5), "asset-mirror-test").unwrap()
}

#[tokio::test]
async fn test_fetch_writes_body_and_leaves_no_part_file() {
    let server = common::spawn_server().await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("hero.swf");

    let written = fetcher().fetch(&server.url("ui/hero.swf"), &dest).await.unwrap();

    assert_eq!(written, "asset:ui/hero.swf".len() as u64);
    assert_eq!(std::fs::read_to_string(&dest).unwrap(), "asset:ui/hero.swf");
    assert!(!part_path(&dest).exists());
}

#[tokio::test]
async fn test_404_is_terminal_and_writes_nothing() {
    let server = common::spawn_server().await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("missing.swf");

    let err = fetcher().fetch(&server.url("missing.swf"), &dest).await.unwrap_err();

    assert_eq!(err, FetchError::NotFound);
    assert!(err.is_terminal());
    assert!(!dest.exists());
    assert!(!part_path(&dest).exists());
}

#[tokio::test]
async fn test_server_error_is_retryable() {
    let server = common::spawn_server().await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("broken.swf");

    let err = fetcher().fetch(&server.url("broken.swf"), &dest).await.unwrap_err();

    assert_eq!(err, FetchError::Status(500));
    assert!(!err.is_terminal());
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_refused_connection_is_network_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("a.swf");
    let err = fetcher()
        .fetch(&format!("http://{}/play/a.swf", addr), &dest)
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Network(_)), "got {:?}", err);
    assert!(!err.is_terminal());
}
