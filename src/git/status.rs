//! Git signals scraped from run output: diff stats, change markers and the
//! push script's exit code

use std::sync::OnceLock;

use regex::Regex;

/// Git diff statistics (additions, deletions, files changed)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitDiffStats {
    pub additions: usize,
    pub deletions: usize,
    pub files_changed: usize,
}

impl GitDiffStats {
    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.files_changed > 0 || self.additions > 0 || self.deletions > 0
    }

    /// Stats from the last shortstat summary line in `text`
    pub fn from_output(text: &str) -> Option<Self> {
        text.lines()
            .rev()
            .find(|line| shortstat_line().is_some_and(|re| re.is_match(line)))
            .map(Self::parse_shortstat)
    }

    /// Parse from `git diff --shortstat` output
    /// Format: "1 file changed, 44 insertions(+), 10 deletions(-)"
    fn parse_shortstat(output: &str) -> Self {
        let mut stats = GitDiffStats::default();
        let leading_number = |part: &str| {
            part.split_whitespace()
                .next()
                .and_then(|n| n.parse().ok())
                .unwrap_or(0)
        };

        for part in output.trim().split(',') {
            let part = part.trim();
            if part.contains("insertion") {
                stats.additions = leading_number(part);
            } else if part.contains("deletion") {
                stats.deletions = leading_number(part);
            } else if part.contains("file") {
                stats.files_changed = leading_number(part);
            }
        }

        stats
    }
}

fn shortstat_line() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*\d+ files? changed\b").ok())
        .as_ref()
}

/// What the run output says about the working tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSignal {
    Changes,
    NoChanges,
    Unknown,
}

fn change_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"\b[1-9]\d* files? changed\b",
            r"\b[1-9]\d* insertions?\(\+\)",
            r"\b[1-9]\d* deletions?\(-\)",
            r"^\s*(?:create|delete) mode \d{6} ",
            r"^\s*mode change \d{6} => \d{6} ",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

fn no_change_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)nothing to commit",
            r"(?i)working tree clean",
            r"\b0 files changed\b",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// Scan `text` line by line; the last line carrying a signal decides
pub fn detect_change_signal(text: &str) -> ChangeSignal {
    text.lines()
        .rev()
        .find_map(|line| {
            if no_change_patterns().iter().any(|re| re.is_match(line)) {
                Some(ChangeSignal::NoChanges)
            } else if change_patterns().iter().any(|re| re.is_match(line)) {
                Some(ChangeSignal::Changes)
            } else {
                None
            }
        })
        .unwrap_or(ChangeSignal::Unknown)
}

fn push_exit_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"git_fpush(?:\.sh)? exited with code (-?\d+)").ok())
        .as_ref()
}

/// Exit code from the last `git_fpush.sh exited with code N` line
pub fn parse_push_exit_code(text: &str) -> Option<i32> {
    let re = push_exit_pattern()?;
    re.captures_iter(text)
        .filter_map(|caps| caps.get(1)?.as_str().parse().ok())
        .last()
}
