//! Error types shared by the runner client.

use std::sync::OnceLock;

use regex::Regex;

/// Errors surfaced by the runner client.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// Missing or invalid user input (empty prompt, empty branch name, ...).
    #[error("{0}")]
    Validation(String),

    /// Server answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Network or protocol failure below the HTTP status level.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The agent backend reported a usage, quota or rate limit.
    #[error("Usage limit reached: {0}")]
    UsageLimit(String),

    /// The stream ended abnormally or the server sent `stream-error`.
    #[error("Stream error: {0}")]
    Stream(String),

    /// Response body was not the JSON we expected.
    #[error("Failed to parse response: {0}")]
    Parse(#[from] serde_json::Error),

    /// Configuration file could not be read or updated.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server URL could not be built.
    #[error("Invalid URL: {0}")]
    Url(String),

    /// A state transition was requested from the wrong phase.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure of a request whose result was shared by several callers.
    #[error(transparent)]
    Shared(std::sync::Arc<RunnerError>),
}

/// Coarse error category used to decide how an error is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Inline status text, non-fatal.
    Validation,
    /// Red status banner plus a stderr-styled line in the output log.
    Transport,
    /// Same as transport, and additionally pops the usage-limit dialog.
    UsageLimit,
    /// Logged only; callers fall back to defaults.
    Parse,
}

impl RunnerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RunnerError::Shared(inner) => inner.kind(),
            RunnerError::Validation(_) | RunnerError::InvalidState(_) => ErrorKind::Validation,
            RunnerError::UsageLimit(_) => ErrorKind::UsageLimit,
            RunnerError::Parse(_) => ErrorKind::Parse,
            RunnerError::Http { body, .. } if is_usage_limit_text(body) => ErrorKind::UsageLimit,
            RunnerError::Http { .. }
            | RunnerError::Transport(_)
            | RunnerError::Stream(_)
            | RunnerError::Config(_)
            | RunnerError::Url(_)
            | RunnerError::Io(_) => ErrorKind::Transport,
        }
    }

    pub fn is_usage_limit(&self) -> bool {
        self.kind() == ErrorKind::UsageLimit
    }

    /// Build an HTTP error, promoting it to [`RunnerError::UsageLimit`] when the
    /// body mentions a usage limit.
    pub fn from_status(status: u16, body: String) -> Self {
        if is_usage_limit_text(&body) {
            RunnerError::UsageLimit(body)
        } else {
            RunnerError::Http { status, body }
        }
    }
}

fn usage_limit_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)usage[ _-]limit|quota|rate[ _-]limit").ok())
        .as_ref()
}

/// Whether `text` looks like a usage/quota/rate-limit message.
pub fn is_usage_limit_text(text: &str) -> bool {
    usage_limit_pattern().is_some_and(|re| re.is_match(text))
}

pub type Result<T, E = RunnerError> = std::result::Result<T, E>;
