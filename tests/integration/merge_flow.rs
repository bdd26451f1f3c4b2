//! Merge and branch actions over HTTP
//!
//! A pushed run becomes mergeable; merge success locks it, failure keeps
//! the button available for a retry.

use serde_json::json;
use sterling::git::DiffRequest;
use sterling::{MergePhase, Runner, RunnerClient};

use super::common::{successful_run_script, FakeRunnerServer};

async fn ready_runner(server: &FakeRunnerServer) -> Runner {
    server.set_default_script(successful_run_script("41", "sterling/calc-41"));
    let mut runner = Runner::new(server.config()).unwrap();
    runner
        .start_run("/repos/calc", "Build a calculator.")
        .await
        .unwrap();
    runner.run_to_completion().await;
    assert_eq!(runner.state().merge().phase(), &MergePhase::Ready);
    runner
}

#[tokio::test]
async fn test_merge_success_locks_run() {
    let server = FakeRunnerServer::start().await;
    let mut runner = ready_runner(&server).await;

    runner.merge().await.unwrap();

    let merge = runner.state().merge();
    assert_eq!(merge.phase(), &MergePhase::Merged);
    assert!(merge.is_diff_locked());
    assert_eq!(
        server.recorded().merge_bodies,
        vec![json!({
            "projectDir": "/repos/calc",
            "runId": "41",
            "branchName": "sterling/calc-41"
        })]
    );

    // A merged run can't be merged again
    assert!(runner.merge().await.is_err());
    assert_eq!(server.recorded().merge_bodies.len(), 1);
}

#[tokio::test]
async fn test_merge_failure_allows_retry() {
    let server = FakeRunnerServer::start().await;
    let mut runner = ready_runner(&server).await;

    server.set_merge_response(json!({
        "output": "",
        "error": "Merge conflict in calc.rs"
    }));
    runner.merge().await.unwrap();
    assert_eq!(
        runner.state().merge().phase(),
        &MergePhase::Failed("Merge conflict in calc.rs".to_string())
    );
    assert!(!runner.state().merge().is_diff_locked());

    server.set_merge_response(json!({ "output": "Merged." }));
    runner.merge().await.unwrap();
    assert_eq!(runner.state().merge().phase(), &MergePhase::Merged);
    assert_eq!(server.recorded().merge_bodies.len(), 2);
}

#[tokio::test]
async fn test_update_branch_posts_branch() {
    let server = FakeRunnerServer::start().await;
    let mut runner = ready_runner(&server).await;

    runner.update_branch().await.unwrap();

    assert_eq!(
        server.recorded().update_branch_bodies,
        vec![json!({
            "projectDir": "/repos/calc",
            "branchName": "sterling/calc-41"
        })]
    );
}

/// The diff endpoint is reachable through the href the merge machine exposes
#[tokio::test]
async fn test_diff_href_resolves_against_server() {
    let server = FakeRunnerServer::start().await;
    let runner = ready_runner(&server).await;

    let href = runner.state().merge().diff_href().unwrap();
    let client = RunnerClient::new(server.base_url()).unwrap();
    assert_eq!(
        client.absolute(href),
        format!(
            "{}/agent/git-diff?projectDir=%2Frepos%2Fcalc&runId=41",
            server.base_url()
        )
    );

    let request = runner
        .state()
        .merge()
        .diff_target()
        .map(|target| DiffRequest::new("/repos/calc", target))
        .unwrap();
    let diff = client.git_diff(&request).await.unwrap();
    assert!(diff.starts_with("diff --git"));
}
