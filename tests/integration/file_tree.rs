//! Debounced file-tree loading against the fake server

use std::time::Duration;

use sterling::api::{FileTreeLoader, FileTreeUpdate};
use sterling::RunnerClient;
use tokio::sync::mpsc;

use super::common::FakeRunnerServer;

/// Typing a directory path fetches the tree once, for the settled value
#[tokio::test]
async fn test_burst_of_edits_fetches_once() {
    let server = FakeRunnerServer::start().await;
    let client = RunnerClient::new(server.base_url()).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut loader = FileTreeLoader::new(client, Duration::from_millis(200), tx);

    for typed in ["/re", "/repos", "/repos/ca", "/repos/calc"] {
        loader.project_dir_changed(typed);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(loader.is_pending());

    let update = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("file tree update")
        .unwrap();
    match update {
        FileTreeUpdate::Loaded { project_dir, tree } => {
            assert_eq!(project_dir, "/repos/calc");
            assert!(!tree.truncated);
            assert_eq!(tree.file_tree[0]["name"], "calc.rs");
        }
        FileTreeUpdate::Failed { error, .. } => panic!("unexpected failure: {error}"),
    }

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(rx.try_recv().is_err());
    let queries = server.recorded().file_tree_queries;
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0]["projectDir"], "/repos/calc");
}

/// Clearing the input drops the pending fetch
#[tokio::test]
async fn test_cleared_input_cancels_fetch() {
    let server = FakeRunnerServer::start().await;
    let client = RunnerClient::new(server.base_url()).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut loader = FileTreeLoader::new(client, Duration::from_millis(100), tx);

    loader.project_dir_changed("/repos/calc");
    loader.project_dir_changed("   ");
    assert!(!loader.is_pending());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(rx.try_recv().is_err());
    assert!(server.recorded().file_tree_queries.is_empty());
}
