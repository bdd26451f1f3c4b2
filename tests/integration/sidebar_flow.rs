//! Run history sidebar against the fake runner server
//!
//! Covers fetching and caching the run list, follow-up grouping, badges,
//! reopening a persisted run, archive actions and the background poller.

use std::time::Duration;

use serde_json::{json, Value};
use sterling::history::{LoadRunsOptions, RunsPollerUpdate};
use sterling::{MergePhase, RunBadge, Runner};
use tokio::sync::mpsc;

use super::common::FakeRunnerServer;

fn history() -> Vec<Value> {
    vec![
        json!({
            "id": "41",
            "numericId": 41,
            "projectDir": "/repos/calc",
            "userPrompt": "Build a calculator.",
            "statusHistory": ["Running agent", "Running git_fpush.sh"],
            "metaMessages": ["git_fpush.sh exited with code 0."],
            "stdout": "3 files changed, 1 insertion(+)\ncodex\nCalculator added.",
            "exitCode": 0,
            "gitFpushExitCode": 0,
            "gitFpushDetectedChanges": true,
            "finishedAt": "2025-06-01T10:00:00Z",
            "branchName": "sterling/calc-41"
        }),
        json!({
            "id": "42",
            "projectDir": "/repos/calc",
            "userPrompt": "Add tests.",
            "stdout": "codex\nTests added.",
            "exitCode": 0,
            "finishedAt": "2025-06-01T10:05:00Z",
            "followupParentId": "41"
        }),
        json!({
            "id": "40",
            "projectDir": "/repos/calc",
            "userPrompt": "Merge it.",
            "statusHistory": ["Merging..."],
            "exitCode": 0,
            "finishedAt": "2025-06-01T09:00:00Z"
        }),
        json!({
            "id": "39",
            "projectDir": "/repos/calc",
            "userPrompt": "Old experiment.",
            "exitCode": 2,
            "finishedAt": "2025-05-30T09:00:00Z",
            "archived": true
        }),
        json!({
            "id": "38",
            "projectDir": "/repos/calc",
            "userPrompt": "Still going."
        }),
    ]
}

async fn runner_with_history() -> (FakeRunnerServer, Runner) {
    let server = FakeRunnerServer::start().await;
    server.set_runs(history());
    let runner = Runner::new(server.config()).unwrap();
    (server, runner)
}

/// The list is fetched for the repo, follow-ups are grouped under parents
#[tokio::test]
async fn test_load_groups_followups_and_badges() {
    let (server, mut runner) = runner_with_history().await;
    runner
        .load_runs_sidebar(LoadRunsOptions::new("/repos/calc").forced())
        .await
        .unwrap();

    let recorded = server.recorded();
    assert_eq!(recorded.runs_queries.len(), 1);
    assert_eq!(recorded.runs_queries[0]["repo_directory"], "/repos/calc");

    let sidebar = runner.state().sidebar();
    let ids: Vec<&str> = sidebar.runs().iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["41", "40", "39", "38"]);
    assert_eq!(sidebar.followups_for("41").len(), 1);
    assert_eq!(sidebar.followups_for("41")[0].id, "42");

    let badge = |id: &str| sidebar.find(id).and_then(|r| sidebar.badge_for(r));
    assert_eq!(badge("41"), Some(RunBadge::Complete));
    assert_eq!(badge("40"), Some(RunBadge::Merging));
    assert_eq!(badge("39"), Some(RunBadge::Exit(2)));
    assert_eq!(badge("38"), Some(RunBadge::Running));

    // Archived runs only show in the archived partition
    let visible: Vec<&str> = sidebar.visible().iter().map(|r| r.id.as_str()).collect();
    assert_eq!(visible, vec!["41", "40", "38"]);
}

/// Unforced loads inside the cache window reuse the list
#[tokio::test]
async fn test_cached_list_is_reused() {
    let (server, mut runner) = runner_with_history().await;
    runner
        .load_runs_sidebar(LoadRunsOptions::new("/repos/calc").forced())
        .await
        .unwrap();
    runner
        .load_runs_sidebar(LoadRunsOptions::new("/repos/calc"))
        .await
        .unwrap();
    assert_eq!(server.recorded().runs_queries.len(), 1);

    // Another project misses the cache
    runner
        .load_runs_sidebar(LoadRunsOptions::new("/repos/weather"))
        .await
        .unwrap();
    assert_eq!(server.recorded().runs_queries.len(), 2);

    runner
        .load_runs_sidebar(LoadRunsOptions::new("/repos/weather").forced())
        .await
        .unwrap();
    assert_eq!(server.recorded().runs_queries.len(), 3);
}

/// Reopening a pushed run restores its output, follow-ups and merge state
#[tokio::test]
async fn test_load_run_restores_merge_state() {
    let (server, mut runner) = runner_with_history().await;
    runner
        .load_runs_sidebar(LoadRunsOptions::new("/repos/calc").forced())
        .await
        .unwrap();

    let record = runner.state().sidebar().find("41").cloned().unwrap();
    runner.load_run(&record).await;

    let state = runner.state();
    assert_eq!(state.context().run_id.as_deref(), Some("41"));
    assert_eq!(state.output().final_output(), "Calculator added.");
    assert_eq!(state.followups().len(), 1);
    assert_eq!(state.sidebar().active_run_id(), Some("41"));

    assert_eq!(state.merge().phase(), &MergePhase::Ready);
    assert_eq!(state.merge().branch_name(), Some("sterling/calc-41"));
    assert_eq!(
        state.merge().diff_href(),
        Some("/agent/git-diff?projectDir=%2Frepos%2Fcalc&runId=41")
    );
    assert!(server
        .recorded()
        .diff_queries
        .iter()
        .any(|q| q.get("prefetch").map(String::as_str) == Some("1")));
}

/// Archiving posts the action and reloads the list
#[tokio::test]
async fn test_archive_reloads_sidebar() {
    let (server, mut runner) = runner_with_history().await;
    let response = runner.archive_run("40").await.unwrap();

    assert!(!response.is_error());
    assert_eq!(response.summary(), "Archived.");
    let recorded = server.recorded();
    assert_eq!(recorded.archived, vec!["40".to_string()]);
    assert_eq!(recorded.runs_queries.len(), 1);
    assert_eq!(runner.state().sidebar().runs().len(), 4);
}

/// The poller delivers the list without an explicit load
#[tokio::test]
async fn test_poller_delivers_runs() {
    let (_server, mut runner) = runner_with_history().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let poller = runner.spawn_runs_poller(tx);
    poller.refresh_now();

    let update = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("poller should report")
        .expect("poller channel open");
    assert!(matches!(update, RunsPollerUpdate::RunsLoaded { .. }));

    runner.apply_poller_update(update);
    assert_eq!(runner.state().sidebar().runs().len(), 4);
    poller.shutdown();
}
