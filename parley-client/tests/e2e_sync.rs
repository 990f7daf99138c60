use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parley_client::{
    config::ClientConfig,
    instance::PendingActions,
    runtime::{RuntimeOptions, SyncSummary, run_client_runtime},
};
use parley_core::MemoryStorage;
use parley_server::{AppState, Directory};
use tokio::{net::TcpListener, time::timeout};
use tokio_tungstenite::{accept_async, tungstenite::Message};

async fn start_server(directory: Directory) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral rpc socket");
    let address = listener.local_addr().expect("rpc local addr");
    tokio::spawn(parley_server::serve(listener, AppState::new(directory)));
    format!("ws://{address}/rpc")
}

async fn sync_once(
    server_url: String,
    filter: Option<&str>,
    preload_all: bool,
) -> Result<SyncSummary, String> {
    let options = RuntimeOptions {
        config: ClientConfig {
            server_url,
            preload_all,
            ..ClientConfig::default()
        },
        filter: filter.map(str::to_owned),
        exit_when_synced: true,
    };
    timeout(
        Duration::from_secs(10),
        run_client_runtime(
            options,
            Box::new(MemoryStorage::new()),
            None,
            PendingActions::new(),
        ),
    )
    .await
    .expect("runtime did not finish")
}

fn matches_prefix(name: &str, prefix: &str) -> bool {
    name.split_whitespace()
        .any(|word| word.to_lowercase().starts_with(prefix))
}

#[tokio::test]
async fn full_sync_then_filter() {
    let directory = Directory::generate(123);
    let dialog_ids: Vec<u64> = directory.dialogs.iter().map(|d| d.peer.id).collect();
    let expected: Vec<String> = directory
        .dialogs
        .iter()
        .map(|dialog| dialog.peer.name.clone())
        .chain(
            directory
                .contacts
                .iter()
                .filter(|peer| !dialog_ids.contains(&peer.id))
                .map(|peer| peer.name.clone()),
        )
        .filter(|name| matches_prefix(name, "jo"))
        .collect();
    assert!(!expected.is_empty());

    let url = start_server(directory).await;
    let summary = sync_once(url, Some("jo"), false)
        .await
        .expect("sync completes");

    assert_eq!(summary.dialogs, 123);
    assert_eq!(summary.contacts, 10);
    assert_eq!(summary.visible, expected);
}

#[tokio::test]
async fn reported_count_ends_sync_without_short_page() {
    let url = start_server(Directory::generate(70).with_report_count(true)).await;
    let summary = sync_once(url, None, true).await.expect("sync completes");

    assert_eq!(summary.dialogs, 70);
    assert_eq!(summary.visible.len(), 70 + summary.contacts);
}

#[tokio::test]
async fn empty_directory_completes() {
    let url = start_server(Directory::default()).await;
    let summary = sync_once(url, None, false).await.expect("sync completes");

    assert_eq!(summary.dialogs, 0);
    assert_eq!(summary.contacts, 0);
    assert!(summary.visible.is_empty());
}

#[tokio::test]
async fn unreachable_server_is_reported() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral socket");
    let address = listener.local_addr().expect("local addr");
    drop(listener);

    let err = sync_once(format!("ws://{address}/rpc"), None, false)
        .await
        .expect_err("nothing is listening");
    assert!(err.contains("connect failed"), "unexpected error: {err}");
}

#[tokio::test]
async fn server_closing_mid_sync_fails_the_runtime() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral socket");
    let address = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept client");
        let mut ws = accept_async(stream).await.expect("websocket handshake");
        // Take the first page request, then hang up instead of answering.
        loop {
            match ws.next().await {
                Some(Ok(Message::Binary(_))) => break,
                Some(Ok(_)) => {}
                other => panic!("client went away first: {other:?}"),
            }
        }
        let _ = ws.send(Message::Close(None)).await;
    });

    let err = sync_once(format!("ws://{address}/rpc"), None, false)
        .await
        .expect_err("sync cannot finish");
    assert_eq!(err, "server closed the connection");
    server.await.expect("server task panicked");
}
