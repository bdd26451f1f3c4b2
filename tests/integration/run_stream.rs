//! End-to-end run sessions against the fake runner server
//!
//! Drives [`Runner`] over real HTTP + SSE: stream parameters, output
//! routing, merge readiness, superseded streams and usage-limit failures.

use axum::http::StatusCode;
use serde_json::json;
use sterling::output::OutputTab;
use sterling::{MergePhase, RunPhase, Runner};

use super::common::{frame, successful_run_script, FakeRunnerServer};

/// A pushed run completes, exposes its diff and prefetched it first
#[tokio::test]
async fn test_run_reaches_merge_ready() {
    let server = FakeRunnerServer::start().await;
    server.set_default_script(successful_run_script("41", "sterling/calc-41"));

    let mut runner = Runner::new(server.config()).unwrap();
    runner
        .start_run("/repos/calc", "Build a calculator.")
        .await
        .unwrap();
    let phase = runner.run_to_completion().await;

    assert_eq!(phase, RunPhase::Complete);
    let state = runner.state();
    assert!(state.controls_enabled());
    assert_eq!(state.context().run_id.as_deref(), Some("41"));
    assert_eq!(state.context().branch_name.as_deref(), Some("sterling/calc-41"));
    assert_eq!(state.merge().phase(), &MergePhase::Ready);
    assert_eq!(
        state.merge().diff_href(),
        Some("/agent/git-diff?projectDir=%2Frepos%2Fcalc&runId=41")
    );
    assert_eq!(state.merge().diff_stats().map(|s| s.files_changed), Some(3));
    assert_eq!(state.output().final_output(), "Calculator added.");
    assert_eq!(state.output().active_tab(), OutputTab::Final);

    let recorded = server.recorded();
    let query = &recorded.stream_queries[0];
    assert_eq!(query["prompt"], "Build a calculator.");
    assert_eq!(query["projectDir"], "/repos/calc");
    assert_eq!(query["gitFpush"], "1");

    let prefetch = recorded
        .diff_queries
        .iter()
        .find(|q| q.get("prefetch").map(String::as_str) == Some("1"))
        .expect("diff should be prefetched");
    assert_eq!(prefetch["runId"], "41");

    assert_eq!(recorded.meta_queries[0]["projectDir"], "/repos/calc");
    assert_eq!(state.context().repo_name.as_deref(), Some("calc"));
    assert!(!recorded.runs_queries.is_empty(), "sidebar refreshes after the run");
}

/// Status lines and stdout land in the combined log in arrival order
#[tokio::test]
async fn test_output_is_multiplexed() {
    let server = FakeRunnerServer::start().await;
    server.set_default_script(vec![
        frame("status", "Running agent"),
        frame("output", "thinking about it\ncodex\nAll done."),
        frame("stderr", "warning: unused variable"),
        frame("end", "Run complete"),
    ]);

    let mut runner = Runner::new(server.config()).unwrap();
    runner.start_run("/repos/calc", "Tidy up.").await.unwrap();
    assert_eq!(runner.run_to_completion().await, RunPhase::Complete);

    let output = runner.state().output();
    let combined = output.combined_text();
    assert!(combined.contains("Running agent"));
    assert!(combined.contains("thinking about it"));
    assert!(combined.contains("warning: unused variable"));
    assert_eq!(output.final_output(), "All done.");

    // Nothing was pushed, so there is nothing to merge
    assert_eq!(runner.state().merge().phase(), &MergePhase::NotReady);
    assert!(runner.state().merge().diff_href().is_none());
}

/// Starting a second run closes the first stream; only the second drives state
#[tokio::test]
async fn test_second_run_supersedes_first() {
    let server = FakeRunnerServer::start().await;
    server.script_for(
        "first",
        vec![
            frame("output", "from the first run"),
            frame("end", "first finished"),
        ],
    );
    server.script_for(
        "second",
        vec![
            frame("output", "codex\nfrom the second run"),
            frame("end", "Run complete"),
        ],
    );

    let mut runner = Runner::new(server.config()).unwrap();
    runner.start_run("/repos/calc", "first").await.unwrap();
    runner.start_run("/repos/calc", "second").await.unwrap();
    assert_eq!(runner.run_to_completion().await, RunPhase::Complete);

    let combined = runner.state().output().combined_text();
    assert!(!combined.contains("from the first run"));
    assert!(!combined.contains("first finished"));
    assert_eq!(runner.state().output().final_output(), "from the second run");
}

/// Push success without any `run-info` still leaves a mergeable run
#[tokio::test]
async fn test_push_without_run_info_is_mergeable() {
    let server = FakeRunnerServer::start().await;
    server.set_default_script(vec![
        frame("status", "Running git_fpush.sh"),
        frame("output", "3 files changed, 1 insertion(+)"),
        frame("end", "git_fpush.sh exited with code 0."),
    ]);

    let mut runner = Runner::new(server.config()).unwrap();
    runner
        .start_run("/repos/calc", "Build a calculator.")
        .await
        .unwrap();
    assert_eq!(runner.run_to_completion().await, RunPhase::Complete);

    let merge = runner.state().merge();
    assert!(merge.phase().can_merge());
    assert_eq!(
        merge.diff_href(),
        Some("/agent/git-diff?projectDir=%2Frepos%2Fcalc")
    );

    runner.merge().await.unwrap();
    assert_eq!(runner.state().merge().phase(), &MergePhase::Merged);
    assert_eq!(
        server.recorded().merge_bodies,
        vec![json!({ "projectDir": "/repos/calc", "branchName": null })]
    );
}

/// A stream that closes without `end` is an interruption, not a success
#[tokio::test]
async fn test_stream_closed_without_end_is_interrupted() {
    let server = FakeRunnerServer::start().await;
    server.set_default_script(vec![
        frame("status", "Running agent"),
        frame("output", "codex\nHalf done."),
    ]);

    let mut runner = Runner::new(server.config()).unwrap();
    runner.start_run("/repos/calc", "Tidy up.").await.unwrap();

    assert_eq!(runner.run_to_completion().await, RunPhase::Error);
    let state = runner.state();
    assert_eq!(state.status().text, "Connection interrupted");
    assert!(state.status().is_error);
    assert!(!state.usage_limit_reached());
    assert_eq!(state.merge().phase(), &MergePhase::NotReady);
}

/// A rejected stream that mentions a usage limit fails the run and flags it
#[tokio::test]
async fn test_usage_limit_rejection() {
    let server = FakeRunnerServer::start().await;
    server.reject_streams(
        StatusCode::TOO_MANY_REQUESTS,
        "You've hit your usage limit. Try again later.",
    );

    let mut runner = Runner::new(server.config()).unwrap();
    runner
        .start_run("/repos/calc", "Build a calculator.")
        .await
        .unwrap();

    assert_eq!(runner.run_to_completion().await, RunPhase::Error);
    let state = runner.state();
    assert!(state.controls_enabled());
    assert!(state.usage_limit_reached());
    assert!(state
        .usage_limit_message()
        .is_some_and(|m| m.contains("usage limit")));
    assert_eq!(state.merge().phase(), &MergePhase::NotReady);
}

/// A server-side `stream-error` ends the run as failed
#[tokio::test]
async fn test_stream_error_event() {
    let server = FakeRunnerServer::start().await;
    server.set_default_script(vec![
        frame("status", "Running agent"),
        frame("stream-error", "agent crashed"),
    ]);

    let mut runner = Runner::new(server.config()).unwrap();
    runner.start_run("/repos/calc", "Crash.").await.unwrap();

    assert_eq!(runner.run_to_completion().await, RunPhase::Error);
    assert!(runner
        .state()
        .output()
        .combined_text()
        .contains("agent crashed"));
}

/// A prompt sent while a finished run is visible continues that run
#[tokio::test]
async fn test_followup_continues_visible_run() {
    let server = FakeRunnerServer::start().await;
    server.set_default_script(successful_run_script("41", "sterling/calc-41"));
    server.script_for(
        "Add tests.",
        vec![
            frame("run-info", r#"{"runId":"42"}"#),
            frame("output", "codex\nTests added."),
            frame("end", "Run complete"),
        ],
    );

    let mut runner = Runner::new(server.config()).unwrap();
    runner
        .start_run("/repos/calc", "Build a calculator.")
        .await
        .unwrap();
    runner.run_to_completion().await;

    runner.submit_prompt("/repos/calc/", "Add tests.").await.unwrap();
    assert_eq!(runner.run_to_completion().await, RunPhase::Complete);

    let recorded = server.recorded();
    let followup_query = recorded.stream_queries.last().unwrap();
    assert_eq!(followup_query["followupParentId"], "41");

    let state = runner.state();
    assert_eq!(state.followups().len(), 1);
    let session = state.followups().iter().next().unwrap();
    assert_eq!(session.parent_run_id, "41");
    assert_eq!(session.run_id.as_deref(), Some("42"));
    assert_eq!(session.phase, RunPhase::Complete);
    assert_eq!(session.output.final_output(), "Tests added.");

    // The parent run's output is left alone
    assert_eq!(state.output().final_output(), "Calculator added.");
    assert_eq!(state.context().run_id.as_deref(), Some("41"));
    assert_eq!(state.merge().branch_name(), Some("sterling/calc-41"));
}
