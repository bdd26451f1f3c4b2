//! Status badge shown next to each run in the sidebar

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::history::RunRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunBadge {
    /// A follow-up under this run is still streaming
    FollowupRunning,
    Merging,
    Merged,
    Running,
    Error,
    Cancelled,
    Complete,
    Exit(i32),
}

impl RunBadge {
    /// CSS-ish class name for renderers that style badges
    pub fn class_name(&self) -> &'static str {
        match self {
            RunBadge::FollowupRunning | RunBadge::Running => "running",
            RunBadge::Merging => "merging",
            RunBadge::Merged => "merged",
            RunBadge::Error | RunBadge::Exit(_) => "error",
            RunBadge::Cancelled => "cancelled",
            RunBadge::Complete => "complete",
        }
    }
}

impl fmt::Display for RunBadge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunBadge::FollowupRunning => write!(f, "Follow-up running"),
            RunBadge::Merging => write!(f, "Merging"),
            RunBadge::Merged => write!(f, "Merged"),
            RunBadge::Running => write!(f, "Running"),
            RunBadge::Error => write!(f, "Error"),
            RunBadge::Cancelled => write!(f, "Cancelled"),
            RunBadge::Complete => write!(f, "Complete"),
            RunBadge::Exit(code) => write!(f, "Exit {code}"),
        }
    }
}

fn merging_status() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*merging\b").ok()).as_ref()
}

fn merge_success_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)\bmerge(?:d)? (?:completed|succeeded|successful(?:ly)?)\b",
            r"(?i)\bsuccessfully merged\b",
            r"git_merge_parent(?:\.sh)? exited with code 0\b",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

fn cancelled_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)connection (?:interrupted|lost)",
            r"(?i)\brun cancel(?:l)?ed\b",
            r"(?i)cancel(?:l)?ed by user",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// Whether any merge success marker appears in `text`
pub fn mentions_merge_success(text: &str) -> bool {
    merge_success_patterns().iter().any(|re| re.is_match(text))
}

fn is_merged(record: &RunRecord) -> bool {
    if record.merge_exit_code == Some(0) {
        return true;
    }
    record
        .status_history
        .iter()
        .map(String::as_str)
        .chain([record.stdout.as_str(), record.stderr.as_str()])
        .any(mentions_merge_success)
}

fn is_cancelled(record: &RunRecord) -> bool {
    record
        .status_history
        .iter()
        .any(|status| cancelled_patterns().iter().any(|re| re.is_match(status)))
}

/// Pick the badge for `record`; first matching rule wins
pub fn derive_badge(record: &RunRecord, followup_running: bool) -> Option<RunBadge> {
    if followup_running {
        return Some(RunBadge::FollowupRunning);
    }
    if record
        .latest_status()
        .is_some_and(|status| merging_status().is_some_and(|re| re.is_match(status)))
    {
        return Some(RunBadge::Merging);
    }
    if is_merged(record) {
        return Some(RunBadge::Merged);
    }
    if !record.is_finished() {
        return Some(RunBadge::Running);
    }
    if record.error.as_deref().is_some_and(|e| !e.trim().is_empty()) {
        return Some(RunBadge::Error);
    }
    if is_cancelled(record) {
        return Some(RunBadge::Cancelled);
    }
    let has_final = record
        .final_message
        .as_deref()
        .is_some_and(|m| !m.trim().is_empty());
    if record.exit_code == Some(0) || record.git_fpush_exit_code.is_some() || has_final {
        return Some(RunBadge::Complete);
    }
    record.exit_code.map(RunBadge::Exit)
}
