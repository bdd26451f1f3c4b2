//! Merge/branch state machine
//!
//! Decides when a finished run has pushed changes worth merging, which diff
//! to show for it, and tracks the merge request through to completion.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use reqwest::Url;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::error::{Result, RunnerError};
use crate::git::status::{detect_change_signal, parse_push_exit_code, ChangeSignal, GitDiffStats};
use crate::history::RunRecord;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MergePhase {
    #[default]
    NotReady,
    Ready,
    Merging,
    Merged,
    Failed(String),
}

impl MergePhase {
    pub fn can_merge(&self) -> bool {
        matches!(self, MergePhase::Ready | MergePhase::Failed(_))
    }
}

/// What the diff view should compare
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffTarget {
    Branch(String),
    Commit(String),
    Run(String),
    /// Nothing identifies the change yet; the server diffs the project
    Project,
}

fn branch_marker() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"STERLING_BRANCH_NAME:(\S+)").ok())
        .as_ref()
}

fn commit_hash() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[0-9a-f]{7,40}\b").ok())
        .as_ref()
}

/// Branch marker first, then the last commit-looking hash.
///
/// All-digit tokens are skipped so timestamps and counters never pass for
/// abbreviated hashes.
pub fn extract_diff_target(text: &str) -> Option<DiffTarget> {
    if let Some(branch) = branch_marker().and_then(|re| {
        re.captures_iter(text)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
            .last()
    }) {
        return Some(DiffTarget::Branch(branch));
    }

    commit_hash().and_then(|re| {
        re.find_iter(text)
            .map(|m| m.as_str())
            .filter(|hash| !hash.bytes().all(|b| b.is_ascii_digit()))
            .last()
            .map(|hash| DiffTarget::Commit(hash.to_string()))
    })
}

/// Base used only to build relative hrefs with proper encoding
const HREF_BASE: &str = "http://localhost/";

/// A diff endpoint plus its query parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffRequest {
    pub path: &'static str,
    pub params: Vec<(&'static str, String)>,
}

impl DiffRequest {
    pub fn new(project_dir: &str, target: &DiffTarget) -> Self {
        let project = ("projectDir", project_dir.to_string());
        match target {
            DiffTarget::Branch(branch) => Self {
                path: "/agent/git-diff-branch-merge",
                params: vec![project, ("branch", branch.clone())],
            },
            DiffTarget::Commit(commit) => Self {
                path: "/agent/git-diff",
                params: vec![project, ("commit", commit.clone())],
            },
            DiffTarget::Run(run_id) => Self {
                path: "/agent/git-diff",
                params: vec![project, ("runId", run_id.clone())],
            },
            DiffTarget::Project => Self {
                path: "/agent/git-diff",
                params: vec![project],
            },
        }
    }

    /// Same request with `prefetch=1` appended
    pub fn prefetch(&self) -> Self {
        let mut params = self.params.clone();
        params.push(("prefetch", "1".to_string()));
        Self {
            path: self.path,
            params,
        }
    }

    /// Server-relative href with an encoded query string
    pub fn href(&self) -> Result<String> {
        let mut url = Url::parse(HREF_BASE).map_err(|e| RunnerError::Url(e.to_string()))?;
        url.set_path(self.path);
        url.query_pairs_mut()
            .extend_pairs(self.params.iter().map(|(k, v)| (*k, v.as_str())));
        Ok(match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        })
    }
}

/// Body of `POST /agent/merge`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    pub project_dir: String,
    /// Absent when the stream never reported a run id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub branch_name: Option<String>,
}

/// Body of `POST /agent/update-branch`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBranchRequest {
    pub project_dir: String,
    pub branch_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct MergeStateMachine {
    phase: MergePhase,
    run_id: Option<String>,
    project_dir: String,
    branch_name: Option<String>,
    push_exit_code: Option<i32>,
    changes_detected: Option<bool>,
    diff_target: Option<DiffTarget>,
    diff_href: Option<String>,
    diff_stats: Option<GitDiffStats>,
    /// Runs whose diff button stays locked after a successful merge
    locked_runs: HashSet<String>,
}

impl MergeStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Back to `NotReady` for a new run; locks survive
    pub fn reset_for_run(&mut self, run_id: Option<String>, project_dir: impl Into<String>) {
        self.phase = MergePhase::NotReady;
        self.run_id = run_id;
        self.project_dir = project_dir.into();
        self.branch_name = None;
        self.push_exit_code = None;
        self.changes_detected = None;
        self.diff_target = None;
        self.diff_href = None;
        self.diff_stats = None;
    }

    pub fn phase(&self) -> &MergePhase {
        &self.phase
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    pub fn set_run_id(&mut self, run_id: impl Into<String>) {
        self.run_id = Some(run_id.into());
    }

    pub fn set_project_dir(&mut self, project_dir: impl Into<String>) {
        self.project_dir = project_dir.into();
    }

    pub fn branch_name(&self) -> Option<&str> {
        self.branch_name.as_deref()
    }

    pub fn set_branch_name(&mut self, branch_name: Option<String>) {
        self.branch_name = branch_name.filter(|b| !b.is_empty());
    }

    pub fn push_exit_code(&self) -> Option<i32> {
        self.push_exit_code
    }

    pub fn set_push_exit_code(&mut self, code: i32) {
        self.push_exit_code = Some(code);
    }

    pub fn set_changes_detected(&mut self, detected: bool) {
        self.changes_detected = Some(detected);
    }

    /// Pick up a live push exit code from a chunk of output or status text
    pub fn observe(&mut self, text: &str) {
        if let Some(code) = parse_push_exit_code(text) {
            tracing::debug!(code, "Push script exit code observed");
            self.push_exit_code = Some(code);
        }
    }

    fn changes_present(&self, text: &str) -> bool {
        if self.changes_detected == Some(true) {
            return true;
        }
        detect_change_signal(text) == ChangeSignal::Changes
    }

    /// Re-check readiness against the run's accumulated raw text.
    ///
    /// Returns the diff request to prefetch when the machine just became
    /// `Ready`; the href is exposed later through [`Self::expose_diff`].
    pub fn evaluate(&mut self, text: &str) -> Option<DiffRequest> {
        if self.phase != MergePhase::NotReady {
            return None;
        }
        self.observe(text);
        if self.push_exit_code != Some(0) || !self.changes_present(text) {
            return None;
        }

        let target = match extract_diff_target(text) {
            Some(DiffTarget::Branch(branch)) => {
                self.branch_name.get_or_insert_with(|| branch.clone());
                DiffTarget::Branch(branch)
            }
            Some(target) => target,
            None => match self.run_id.clone() {
                Some(run_id) => DiffTarget::Run(run_id),
                None => DiffTarget::Project,
            },
        };
        tracing::debug!(run_id = ?self.run_id, target = ?target, "Run is ready to merge");

        let request = DiffRequest::new(&self.project_dir, &target);
        self.diff_stats = GitDiffStats::from_output(text);
        self.diff_target = Some(target);
        self.phase = MergePhase::Ready;
        Some(request)
    }

    /// Seed from a persisted run, then evaluate its text
    pub fn evaluate_record(&mut self, record: &RunRecord) -> Option<DiffRequest> {
        self.reset_for_run(Some(record.id.clone()), record.working_dir());
        self.set_branch_name(record.branch_name.clone());
        if let Some(code) = record.git_fpush_exit_code {
            self.push_exit_code = Some(code);
        }
        self.changes_detected = record.git_fpush_detected_changes;

        let text = [
            record.meta_messages.join("\n"),
            record.stdout.clone(),
            record.stderr.clone(),
        ]
        .join("\n");
        let request = self.evaluate(&text);

        if record.merge_exit_code == Some(0) {
            self.phase = MergePhase::Merged;
            self.locked_runs.insert(record.id.clone());
        }
        request
    }

    pub fn diff_target(&self) -> Option<&DiffTarget> {
        self.diff_target.as_ref()
    }

    /// Make the diff link visible once the prefetch has been attempted
    pub fn expose_diff(&mut self, href: String) {
        self.diff_href = Some(href);
    }

    /// Shortstat of the pushed change, when the output printed one
    pub fn diff_stats(&self) -> Option<&GitDiffStats> {
        self.diff_stats.as_ref()
    }

    pub fn diff_href(&self) -> Option<&str> {
        self.diff_href.as_deref()
    }

    pub fn is_diff_locked(&self) -> bool {
        self.phase == MergePhase::Merged
            || self
                .run_id
                .as_ref()
                .is_some_and(|id| self.locked_runs.contains(id))
    }

    /// Move to `Merging` and build the request body
    pub fn begin_merge(&mut self) -> Result<MergeRequest> {
        if !self.phase.can_merge() {
            return Err(RunnerError::InvalidState(format!(
                "cannot merge while {:?}",
                self.phase
            )));
        }
        if self.project_dir.trim().is_empty() {
            return Err(RunnerError::InvalidState("no project to merge".to_string()));
        }

        self.phase = MergePhase::Merging;
        Ok(MergeRequest {
            project_dir: self.project_dir.clone(),
            run_id: self.run_id.clone(),
            branch_name: self.branch_name.clone(),
        })
    }

    pub fn merge_succeeded(&mut self) {
        self.phase = MergePhase::Merged;
        if let Some(run_id) = &self.run_id {
            self.locked_runs.insert(run_id.clone());
        }
    }

    pub fn merge_failed(&mut self, error: impl Into<String>) {
        let error = error.into();
        tracing::error!(run_id = ?self.run_id, error = %error, "Merge failed");
        self.phase = MergePhase::Failed(error);
    }

    pub fn update_branch_request(&self) -> Result<UpdateBranchRequest> {
        let branch_name = self
            .branch_name
            .clone()
            .ok_or_else(|| RunnerError::InvalidState("no branch to update".to_string()))?;
        Ok(UpdateBranchRequest {
            project_dir: self.project_dir.clone(),
            branch_name,
        })
    }
}

/// Loading indicator for the diff view that hides itself after a fallback
/// timeout in case the view never reports back
#[derive(Debug)]
pub struct DiffViewLoader {
    visible: Arc<AtomicBool>,
    timeout: Duration,
    fallback: Option<JoinHandle<()>>,
}

impl DiffViewLoader {
    pub fn new(timeout: Duration) -> Self {
        Self {
            visible: Arc::new(AtomicBool::new(false)),
            timeout,
            fallback: None,
        }
    }

    /// Requires a tokio runtime
    pub fn show(&mut self) {
        self.cancel_fallback();
        self.visible.store(true, Ordering::SeqCst);
        let visible = Arc::clone(&self.visible);
        let timeout = self.timeout;
        self.fallback = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            visible.store(false, Ordering::SeqCst);
        }));
    }

    pub fn hide(&mut self) {
        self.cancel_fallback();
        self.visible.store(false, Ordering::SeqCst);
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    fn cancel_fallback(&mut self) {
        if let Some(task) = self.fallback.take() {
            task.abort();
        }
    }
}

impl Drop for DiffViewLoader {
    fn drop(&mut self) {
        self.cancel_fallback();
    }
}
