//! Qwen CLI stream-json output
//!
//! When a run uses the Qwen CLI, stdout is newline-delimited JSON instead of
//! plain text. `result` events carry the final output; everything else is
//! rendered into readable lines.

use serde::Deserialize;
use serde_json::Value;

/// Tool results containing this text are bookkeeping noise
const TODO_REMINDER: &str = "Todos have been modified successfully";

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum QwenRawEvent {
    #[serde(rename = "assistant")]
    Assistant(QwenMessageEvent),

    #[serde(rename = "user")]
    User(QwenMessageEvent),

    #[serde(rename = "result")]
    Result(QwenResultEvent),

    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QwenMessageEvent {
    pub message: Option<QwenMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QwenMessage {
    #[serde(default)]
    pub content: QwenContent,
}

/// Message content is either a bare string or a list of typed parts
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum QwenContent {
    Text(String),
    Parts(Vec<QwenContentPart>),
}

impl Default for QwenContent {
    fn default() -> Self {
        QwenContent::Parts(Vec::new())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum QwenContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "thinking")]
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QwenResultEvent {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub is_error: bool,
}

/// Rendered view of a Qwen stdout transcript
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QwenTranscript {
    /// Human-readable lines, in order
    pub lines: Vec<String>,
    /// Text of the last `result` event with a string `result`, failed or not
    pub final_output: Option<String>,
}

impl QwenTranscript {
    /// Parse a whole stdout buffer
    pub fn parse(stdout: &str) -> Self {
        let mut transcript = Self::default();
        for line in stdout.lines() {
            transcript.push_line(line);
        }
        transcript
    }

    /// Parse one stdout line and append its rendering
    pub fn push_line(&mut self, line: &str) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }

        if !trimmed.starts_with('{') {
            self.lines.push(line.to_string());
            return;
        }

        match serde_json::from_str::<QwenRawEvent>(trimmed) {
            Ok(event) => self.push_event(event),
            Err(e) => {
                tracing::trace!(error = %e, "Qwen line is not a known event, keeping raw");
                self.lines.push(line.to_string());
            }
        }
    }

    fn push_event(&mut self, event: QwenRawEvent) {
        match event {
            QwenRawEvent::Result(result) => {
                if let Some(Value::String(text)) = result.result {
                    if result.is_error {
                        self.lines.push(format!("[error] {text}"));
                    }
                    self.final_output = Some(text);
                }
            }
            QwenRawEvent::Assistant(event) => {
                if let Some(message) = event.message {
                    self.push_content(message.content);
                }
            }
            QwenRawEvent::User(event) => {
                let Some(message) = event.message else {
                    return;
                };
                // Plain user text is the echoed prompt
                if let QwenContent::Parts(parts) = message.content {
                    let results = parts
                        .into_iter()
                        .filter(|part| matches!(part, QwenContentPart::ToolResult { .. }));
                    for part in results {
                        self.push_part(part);
                    }
                }
            }
            QwenRawEvent::Unknown => {}
        }
    }

    fn push_content(&mut self, content: QwenContent) {
        match content {
            QwenContent::Text(text) => self.push_text(&text),
            QwenContent::Parts(parts) => {
                for part in parts {
                    self.push_part(part);
                }
            }
        }
    }

    fn push_part(&mut self, part: QwenContentPart) {
        match part {
            QwenContentPart::Text { text } => self.push_text(&text),
            QwenContentPart::Thinking { thinking } => {
                if !thinking.trim().is_empty() {
                    self.lines.push(format!("[thinking] {}", thinking.trim()));
                }
            }
            QwenContentPart::ToolUse { name, input } => {
                let args = summarize_tool_input(&input);
                if args.is_empty() {
                    self.lines.push(format!("[tool] {name}"));
                } else {
                    self.lines.push(format!("[tool] {name} {args}"));
                }
            }
            QwenContentPart::ToolResult { content, is_error } => {
                let text = tool_result_text(&content);
                if text.contains(TODO_REMINDER) || text.trim().is_empty() {
                    return;
                }
                let prefix = if is_error { "[tool error]" } else { "[tool result]" };
                self.lines.push(format!("{prefix} {}", text.trim()));
            }
            QwenContentPart::Other => {}
        }
    }

    fn push_text(&mut self, text: &str) {
        for line in text.lines() {
            self.lines.push(line.to_string());
        }
    }

    /// Rendered lines joined for the combined view
    pub fn rendered(&self) -> String {
        self.lines.join("\n")
    }
}

fn summarize_tool_input(input: &Value) -> String {
    match input {
        Value::Null => String::new(),
        Value::Object(map) => {
            // Prefer the field that usually says what the tool does
            for key in ["command", "file_path", "path", "pattern", "query"] {
                if let Some(Value::String(value)) = map.get(key) {
                    return value.clone();
                }
            }
            input.to_string()
        }
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn tool_result_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                item.get("text")
                    .and_then(Value::as_str)
                    .or_else(|| item.as_str())
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
