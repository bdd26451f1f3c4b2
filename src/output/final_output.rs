//! Final-output extraction for plain (non-JSON) agent stdout
//!
//! The agent prints a bare `codex` line before its answer. Everything after
//! the last such line is the candidate final output.

use std::sync::OnceLock;

use regex::Regex;

use crate::output::classifier::{GitPullNoise, LineAction, LineClassifier};
use crate::output::prompt_filter::HiddenPromptFilter;

/// Sentinel line that precedes the agent's answer
pub const FINAL_OUTPUT_SENTINEL: &str = "codex";

fn is_sentinel(line: &str) -> bool {
    line.trim() == FINAL_OUTPUT_SENTINEL
}

fn header_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // Markdown headings
            r"^\s*#{1,6}\s",
            // Bold-only lines ("**Summary**")
            r"^\s*\*\*[^*]+\*\*\s*:?\s*$",
            // Bracketed timestamps printed by the agent CLI
            r"^\s*\[\d{4}-\d{2}-\d{2}[T ][^\]]*\]",
            // Horizontal rules
            r"^\s*(?:-{3,}|\*{3,}|_{3,})\s*$",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

fn is_header_line(line: &str) -> bool {
    header_patterns().iter().any(|re| re.is_match(line))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Section {
    /// No sentinel yet
    #[default]
    Preamble,
    LeadingBlank,
    Header,
    Body,
}

/// Final output built one complete stdout line at a time.
///
/// Each line is looked at once, so a long run costs linear time. A new
/// sentinel line discards everything collected so far.
#[derive(Debug, Clone, Default)]
pub struct FinalOutputTracker {
    section: Section,
    noise: GitPullNoise,
    text: String,
}

impl FinalOutputTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Feed one stdout line without its newline. Lines the prompt filter
    /// hides are left out after header and git-pull stripping.
    pub fn push_line(&mut self, line: &str, hidden: Option<&HiddenPromptFilter>) {
        if is_sentinel(line) {
            self.section = Section::LeadingBlank;
            self.noise.reset();
            self.text.clear();
            return;
        }

        if self.section == Section::LeadingBlank {
            if line.trim().is_empty() {
                return;
            }
            self.section = Section::Header;
        }
        match self.section {
            Section::Preamble | Section::LeadingBlank => return,
            Section::Header if is_header_line(line) => return,
            Section::Header | Section::Body => self.section = Section::Body,
        }

        if self.noise.classify(line) != LineAction::Keep
            || hidden.is_some_and(|filter| filter.is_hidden(line))
        {
            return;
        }
        if !self.text.is_empty() {
            self.text.push('\n');
        }
        self.text.push_str(line);
    }

    pub fn has_sentinel(&self) -> bool {
        self.section != Section::Preamble
    }

    /// The final output so far; empty until a sentinel was seen
    pub fn text(&self) -> &str {
        self.text.trim()
    }
}

/// Extract the final output from accumulated stdout.
///
/// Returns an empty string when no sentinel was printed.
pub fn extract_final_output(text: &str) -> String {
    let mut tracker = FinalOutputTracker::new();
    for line in text.lines() {
        tracker.push_line(line, None);
    }
    tracker.text().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_sentinel() {
        let text = "thinking...\nexec ls\ncodex\n## Result\n\nBuilt a calculator in `calc.py`.\nAlready up to date.\nRun it with `python calc.py`.\n\n";
        assert_eq!(
            extract_final_output(text),
            "Built a calculator in `calc.py`.\nRun it with `python calc.py`."
        );
    }

    #[test]
    fn test_no_sentinel_yields_empty() {
        assert_eq!(extract_final_output("just logs\nno answer marker\n"), "");
        assert_eq!(extract_final_output("codex is great\n"), "");
    }

    #[test]
    fn test_last_sentinel_wins() {
        let text = "codex\nfirst draft\ncodex\nfinal answer\n";
        assert_eq!(extract_final_output(text), "final answer");
    }

    #[test]
    fn test_sentinel_with_surrounding_whitespace() {
        let text = "log\n  codex  \r\nanswer\r\n";
        assert_eq!(extract_final_output(text), "answer");
    }

    #[test]
    fn test_strips_timestamp_header_and_pull_block() {
        let text = "codex\n[2025-06-01T10:00:00] tokens used: 1200\n**Summary**\nAdded tests.\nUpdating 1a2b3c4..5d6e7f8\nFast-forward\n a.rs | 2 +-\n 1 file changed, 1 insertion(+), 1 deletion(-)\n";
        assert_eq!(extract_final_output(text), "Added tests.");
    }

    #[test]
    fn test_tracker_matches_whole_text_extraction() {
        let text = "log\ncodex\n\n## Done\n**Summary**\n\nAdded tests.\nUpdating 1a2b3c4..5d6e7f8\nFast-forward\n a.rs | 2 +-\nRun them with cargo.\n\n";
        let mut tracker = FinalOutputTracker::new();
        assert!(!tracker.has_sentinel());
        for line in text.lines() {
            tracker.push_line(line, None);
        }
        assert!(tracker.has_sentinel());
        assert_eq!(tracker.text(), "Added tests.\nRun them with cargo.");
        assert_eq!(tracker.text(), extract_final_output(text));
    }

    #[test]
    fn test_tracker_drops_hidden_lines() {
        let filter = HiddenPromptFilter::new(["You are Sterling."]);
        let mut tracker = FinalOutputTracker::new();
        for line in ["codex", "You are Sterling.", "ok"] {
            tracker.push_line(line, Some(&filter));
        }
        assert_eq!(tracker.text(), "ok");

        tracker.push_line("codex", Some(&filter));
        assert_eq!(tracker.text(), "");
    }
}
