//! Line classification for agent stdout
//!
//! Each classifier looks at one complete stdout line and decides whether it is
//! kept, dropped or routed to a different chunk kind. Rules are heuristic, so
//! they live behind [`LineClassifier`] and can be swapped without touching the
//! stream loop.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Source tag of a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Output,
    Stderr,
    Status,
    Meta,
}

/// Decision for a single line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineAction {
    Keep,
    Drop,
    RouteTo(ChunkKind),
}

pub trait LineClassifier: Send + Sync {
    /// Short name for logging
    fn name(&self) -> &'static str;

    /// Classify one stdout line (without its trailing newline)
    fn classify(&mut self, line: &str) -> LineAction;

    /// Forget any multi-line state (called when a new run starts)
    fn reset(&mut self) {}
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::error!(pattern = p, error = %e, "Invalid classifier pattern");
                None
            }
        })
        .collect()
}

fn matches_any(patterns: &[Regex], line: &str) -> bool {
    patterns.iter().any(|re| re.is_match(line))
}

/// Drops tool-trace lines (`[trace] ...`)
#[derive(Debug, Default, Clone)]
pub struct TraceNoise;

impl LineClassifier for TraceNoise {
    fn name(&self) -> &'static str {
        "trace"
    }

    fn classify(&mut self, line: &str) -> LineAction {
        if line.contains("[trace]") {
            LineAction::Drop
        } else {
            LineAction::Keep
        }
    }
}

/// Drops tree-drawing output (`├`, `└`, `│`)
#[derive(Debug, Default, Clone)]
pub struct TreeDrawingNoise;

impl LineClassifier for TreeDrawingNoise {
    fn name(&self) -> &'static str {
        "tree-drawing"
    }

    fn classify(&mut self, line: &str) -> LineAction {
        if line.contains(['├', '└', '│']) {
            LineAction::Drop
        } else {
            LineAction::Keep
        }
    }
}

/// Drops lines mentioning a literal substring
#[derive(Debug, Clone)]
pub struct LiteralNoise {
    needle: String,
}

impl LiteralNoise {
    pub fn new(needle: impl Into<String>) -> Self {
        Self {
            needle: needle.into(),
        }
    }

    /// The agent's provider table dump
    pub fn model_providers() -> Self {
        Self::new("model_providers")
    }
}

impl LineClassifier for LiteralNoise {
    fn name(&self) -> &'static str {
        "literal"
    }

    fn classify(&mut self, line: &str) -> LineAction {
        if line.contains(&self.needle) {
            LineAction::Drop
        } else {
            LineAction::Keep
        }
    }
}

fn git_pull_line_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        compile(&[
            r"^\s*Already up[ -]to[ -]date\.?\s*$",
            r"^\s*remote:",
            r"^\s*From\s+\S+\s*$",
            r"^\s*\+?\s*[0-9a-f]{7,40}\.{2,3}[0-9a-f]{7,40}\s+\S+\s+->\s+\S+",
            r"^\s*\*\s+branch\s+\S+\s+->\s+\S+",
            r"^\s*\*\s+\[new (?:branch|tag)\]\s+",
            r"^\s*Fast-forward\s*$",
        ])
    })
}

fn git_pull_block_start() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^\s*Updating\s+[0-9a-f]{7,40}\.\.[0-9a-f]{7,40}\s*$").ok())
        .as_ref()
}

fn git_pull_block_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        compile(&[
            r"^\s*Fast-forward\s*$",
            r"^\s+\S.*\|\s+(?:\d+\s*[+-]*|Bin .*)\s*$",
            r"^\s*\d+ files? changed",
            r"^\s*(?:create|delete) mode \d{6}\s",
            r"^\s*mode change \d{6} => \d{6}\s",
            r"^\s*(?:rename|copy) .+\(\d+%\)\s*$",
        ])
    })
}

/// Drops `git pull` boilerplate, including an `Updating <a>..<b>` block and
/// the diffstat lines that follow it.
#[derive(Debug, Default, Clone)]
pub struct GitPullNoise {
    in_update_block: bool,
}

impl GitPullNoise {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `line` is boilerplate regardless of block context
    pub fn is_boilerplate(line: &str) -> bool {
        matches_any(git_pull_line_patterns(), line)
            || git_pull_block_start().is_some_and(|re| re.is_match(line))
    }
}

impl LineClassifier for GitPullNoise {
    fn name(&self) -> &'static str {
        "git-pull"
    }

    fn classify(&mut self, line: &str) -> LineAction {
        if git_pull_block_start().is_some_and(|re| re.is_match(line)) {
            self.in_update_block = true;
            return LineAction::Drop;
        }

        if self.in_update_block {
            if matches_any(git_pull_block_patterns(), line) {
                return LineAction::Drop;
            }
            self.in_update_block = false;
        }

        if matches_any(git_pull_line_patterns(), line) {
            LineAction::Drop
        } else {
            LineAction::Keep
        }
    }

    fn reset(&mut self) {
        self.in_update_block = false;
    }
}

/// The stdout classifier chain used for live and rehydrated runs
pub fn default_classifiers() -> Vec<Box<dyn LineClassifier>> {
    vec![
        Box::new(TraceNoise),
        Box::new(GitPullNoise::new()),
        Box::new(TreeDrawingNoise),
        Box::new(LiteralNoise::model_providers()),
    ]
}

/// Run `line` through `chain`; the first non-`Keep` decision wins.
///
/// Every classifier still sees the line so stateful ones keep their block
/// tracking in sync.
pub fn classify_line(chain: &mut [Box<dyn LineClassifier>], line: &str) -> LineAction {
    let mut decision = LineAction::Keep;
    for classifier in chain.iter_mut() {
        let action = classifier.classify(line);
        if decision == LineAction::Keep && action != LineAction::Keep {
            tracing::trace!(classifier = classifier.name(), ?action, "Classified stdout line");
            decision = action;
        }
    }
    decision
}
