//! Combined / final output views for one run
//!
//! Consumes tagged chunks, filters agent stdout line by line, keeps the
//! combined log for display, and maintains the extracted final output.

use crate::history::RunRecord;
use crate::output::classifier::{
    classify_line, default_classifiers, ChunkKind, LineAction, LineClassifier,
};
use crate::output::final_output::FinalOutputTracker;
use crate::output::prompt_filter::HiddenPromptFilter;
use crate::output::qwen::QwenTranscript;

/// Output tabs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputTab {
    #[default]
    Combined,
    Final,
}

/// One rendered line in the combined log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub kind: ChunkKind,
    pub text: String,
}

impl OutputLine {
    pub fn new(kind: ChunkKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

pub struct OutputMultiplexer {
    classifiers: Vec<Box<dyn LineClassifier>>,
    prompt_filter: Option<HiddenPromptFilter>,
    combined: Vec<OutputLine>,
    /// Raw stdout and stderr, for git signal detection
    raw_text: String,
    /// Incomplete trailing stdout line
    pending: String,
    /// Fed every complete stdout line, before classification
    final_tracker: FinalOutputTracker,
    /// Qwen result or stored final message; wins over the tracker
    final_override: Option<String>,
    active_tab: OutputTab,
    in_flight: bool,
    qwen_cli: bool,
    qwen: QwenTranscript,
}

impl std::fmt::Debug for OutputMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputMultiplexer")
            .field("lines", &self.combined.len())
            .field("final_output", &self.final_output())
            .field("active_tab", &self.active_tab)
            .field("in_flight", &self.in_flight)
            .field("qwen_cli", &self.qwen_cli)
            .finish()
    }
}

impl Default for OutputMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputMultiplexer {
    pub fn new() -> Self {
        Self::with_classifiers(default_classifiers())
    }

    pub fn with_classifiers(classifiers: Vec<Box<dyn LineClassifier>>) -> Self {
        Self {
            classifiers,
            prompt_filter: None,
            combined: Vec::new(),
            raw_text: String::new(),
            pending: String::new(),
            final_tracker: FinalOutputTracker::new(),
            final_override: None,
            active_tab: OutputTab::Combined,
            in_flight: false,
            qwen_cli: false,
            qwen: QwenTranscript::default(),
        }
    }

    /// Hide the injected prompt from everything rendered from now on
    pub fn with_prompt_filter(mut self, filter: HiddenPromptFilter) -> Self {
        self.set_prompt_filter(Some(filter));
        self
    }

    pub fn set_prompt_filter(&mut self, filter: Option<HiddenPromptFilter>) {
        self.prompt_filter = filter.filter(|f| !f.is_empty());
    }

    /// Clear all buffers for a new run
    pub fn reset(&mut self) {
        for classifier in &mut self.classifiers {
            classifier.reset();
        }
        self.combined.clear();
        self.raw_text.clear();
        self.pending.clear();
        self.final_tracker.reset();
        self.final_override = None;
        self.active_tab = OutputTab::Combined;
        self.in_flight = false;
        self.qwen_cli = false;
        self.qwen = QwenTranscript::default();
    }

    /// Switch stdout interpretation to the Qwen stream-json format
    pub fn set_qwen_cli(&mut self, qwen_cli: bool) {
        self.qwen_cli = qwen_cli;
    }

    pub fn is_qwen_cli(&self) -> bool {
        self.qwen_cli
    }

    pub fn set_in_flight(&mut self, in_flight: bool) {
        self.in_flight = in_flight;
        if in_flight && self.active_tab == OutputTab::Final {
            self.active_tab = OutputTab::Combined;
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Feed one chunk; returns the lines newly added to the combined log
    pub fn push(&mut self, kind: ChunkKind, chunk: &str) -> Vec<OutputLine> {
        match kind {
            ChunkKind::Output => self.push_stdout(chunk),
            ChunkKind::Stderr => {
                self.raw_text.push_str(chunk);
                self.render_text(ChunkKind::Stderr, chunk)
            }
            ChunkKind::Status | ChunkKind::Meta => self.render_text(kind, chunk),
        }
    }

    fn push_stdout(&mut self, chunk: &str) -> Vec<OutputLine> {
        self.raw_text.push_str(chunk);
        self.pending.push_str(chunk);

        let mut added = Vec::new();
        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']).to_string();
            added.extend(self.render_stdout_line(&line));
        }
        added
    }

    fn render_stdout_line(&mut self, line: &str) -> Vec<OutputLine> {
        if self.qwen_cli {
            let before = self.qwen.lines.len();
            self.qwen.push_line(line);
            let rendered: Vec<String> = self.qwen.lines[before..].to_vec();
            if self.qwen.final_output.is_some() {
                self.refresh_qwen_final_output();
            }
            return rendered
                .into_iter()
                .filter_map(|text| self.emit(ChunkKind::Output, text))
                .collect();
        }

        self.final_tracker.push_line(line, self.prompt_filter.as_ref());
        match classify_line(&mut self.classifiers, line) {
            LineAction::Drop => Vec::new(),
            LineAction::Keep => self
                .emit(ChunkKind::Output, line.to_string())
                .into_iter()
                .collect(),
            LineAction::RouteTo(kind) => self.emit(kind, line.to_string()).into_iter().collect(),
        }
    }

    fn render_text(&mut self, kind: ChunkKind, text: &str) -> Vec<OutputLine> {
        text.lines()
            .filter_map(|line| self.emit(kind, line.to_string()))
            .collect()
    }

    fn emit(&mut self, kind: ChunkKind, text: String) -> Option<OutputLine> {
        if self
            .prompt_filter
            .as_ref()
            .is_some_and(|filter| filter.is_hidden(&text))
        {
            return None;
        }
        let line = OutputLine::new(kind, text);
        self.combined.push(line.clone());
        Some(line)
    }

    /// Flush the trailing partial line and settle the final output.
    ///
    /// Called when the run ends. Shows the final tab if there is a final
    /// output.
    pub fn finish(&mut self) -> Vec<OutputLine> {
        let mut added = Vec::new();
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            let line = line.trim_end_matches('\r').to_string();
            added = self.render_stdout_line(&line);
        }
        self.in_flight = false;
        if self.qwen_cli {
            self.refresh_qwen_final_output();
        }
        if self.final_tab_visible() {
            self.active_tab = OutputTab::Final;
        }
        added
    }

    fn refresh_qwen_final_output(&mut self) {
        let Some(result) = self.qwen.final_output.as_deref() else {
            return;
        };
        let result = match &self.prompt_filter {
            Some(filter) => filter.strip(result),
            None => result.to_string(),
        };
        self.final_override = Some(result.trim().to_string());
    }

    /// Rebuild the views from a persisted run instead of a live stream
    pub fn rehydrate(&mut self, record: &RunRecord) {
        self.reset();
        self.qwen_cli = record.qwen_cli;

        for message in &record.meta_messages {
            self.push(ChunkKind::Meta, message);
        }
        if !record.stdout.is_empty() {
            self.push(ChunkKind::Output, &record.stdout);
        }
        if !record.stderr.is_empty() {
            self.push(ChunkKind::Stderr, &record.stderr);
        }
        self.finish();

        if let Some(message) = record.final_message.as_deref() {
            let message = match &self.prompt_filter {
                Some(filter) => filter.strip(message),
                None => message.to_string(),
            };
            if !message.trim().is_empty() {
                self.final_override = Some(message.trim().to_string());
            }
        }

        self.active_tab = if self.final_tab_visible() {
            OutputTab::Final
        } else {
            OutputTab::Combined
        };
    }

    pub fn combined(&self) -> &[OutputLine] {
        &self.combined
    }

    pub fn combined_text(&self) -> String {
        self.combined
            .iter()
            .map(|line| line.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn final_output(&self) -> &str {
        match &self.final_override {
            Some(text) => text,
            None => self.final_tracker.text(),
        }
    }

    /// Raw stdout + stderr seen so far (unfiltered)
    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    /// Hidden while in flight; shown once a non-empty final output exists
    pub fn final_tab_visible(&self) -> bool {
        !self.in_flight && !self.final_output().is_empty()
    }

    pub fn active_tab(&self) -> OutputTab {
        self.active_tab
    }

    /// Select a tab; the final tab can only be selected while visible
    pub fn select_tab(&mut self, tab: OutputTab) -> bool {
        if tab == OutputTab::Final && !self.final_tab_visible() {
            return false;
        }
        self.active_tab = tab;
        true
    }

    /// Text of the active tab
    pub fn active_text(&self) -> String {
        match self.active_tab {
            OutputTab::Combined => self.combined_text(),
            OutputTab::Final => self.final_output().to_string(),
        }
    }
}
