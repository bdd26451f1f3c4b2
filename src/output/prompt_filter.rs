//! Hides the server-injected system prompt from rendered text

use std::collections::HashSet;

/// Removes whole lines that belong to the injected prompt.
///
/// Phrases are split into lines; any rendered line whose trimmed text equals
/// one of those lines is dropped. Lines are only ever removed, never edited,
/// so filtering already-filtered text is a no-op.
#[derive(Debug, Clone, Default)]
pub struct HiddenPromptFilter {
    hidden: HashSet<String>,
}

impl HiddenPromptFilter {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let hidden = phrases
            .into_iter()
            .flat_map(|phrase| {
                phrase
                    .as_ref()
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect();
        Self { hidden }
    }

    pub fn is_empty(&self) -> bool {
        self.hidden.is_empty()
    }

    pub fn is_hidden(&self, line: &str) -> bool {
        let trimmed = line.trim();
        !trimmed.is_empty() && self.hidden.contains(trimmed)
    }

    /// Strip hidden lines from `text`, keeping line endings of what remains
    pub fn strip(&self, text: &str) -> String {
        if self.hidden.is_empty() {
            return text.to_string();
        }
        text.split_inclusive('\n')
            .filter(|line| !self.is_hidden(line))
            .collect()
    }
}
