use serde::{Deserialize, Serialize};

/// Named events pushed by `GET /agent/stream`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum StreamEvent {
    /// Human-readable progress line ("Running git_fpush.sh", "Merging...")
    Status(String),

    /// Server-side identity of the run (may differ from what was requested)
    RunInfo(RunInfo),

    /// Agent stdout chunk
    Output(String),

    /// Agent stderr chunk
    Stderr(String),

    /// Server-reported failure; terminal
    StreamError(String),

    /// Normal end of the run; terminal
    End(String),
}

impl StreamEvent {
    /// Map an SSE `event:` name and `data:` payload onto a typed event.
    ///
    /// Unknown event names yield `None`. A `run-info` payload that isn't JSON
    /// is treated as a bare run id.
    pub fn from_sse(event: &str, data: &str) -> Option<Self> {
        match event {
            "status" => Some(StreamEvent::Status(data.to_string())),
            "output" => Some(StreamEvent::Output(data.to_string())),
            "stderr" => Some(StreamEvent::Stderr(data.to_string())),
            "stream-error" => Some(StreamEvent::StreamError(data.to_string())),
            "end" => Some(StreamEvent::End(data.to_string())),
            "run-info" => {
                let info = serde_json::from_str::<RunInfo>(data).unwrap_or_else(|e| {
                    tracing::debug!(error = %e, "run-info payload is not JSON, using it as run id");
                    RunInfo {
                        run_id: Some(data.trim().to_string()).filter(|id| !id.is_empty()),
                        ..RunInfo::default()
                    }
                });
                Some(StreamEvent::RunInfo(info))
            }
            other => {
                tracing::trace!(event = other, "Ignoring unknown stream event");
                None
            }
        }
    }

    /// `end` and `stream-error` close the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::End(_) | StreamEvent::StreamError(_))
    }

    /// SSE event name for this event
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamEvent::Status(_) => "status",
            StreamEvent::RunInfo(_) => "run-info",
            StreamEvent::Output(_) => "output",
            StreamEvent::Stderr(_) => "stderr",
            StreamEvent::StreamError(_) => "stream-error",
            StreamEvent::End(_) => "end",
        }
    }
}

/// Payload of the `run-info` event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunInfo {
    #[serde(default, alias = "id")]
    pub run_id: Option<String>,
    #[serde(default)]
    pub project_dir: Option<String>,
    #[serde(default)]
    pub effective_project_dir: Option<String>,
    #[serde(default)]
    pub branch_name: Option<String>,
    #[serde(default)]
    pub qwen_cli: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_sse_named_events() {
        assert_eq!(
            StreamEvent::from_sse("status", "Running git_fpush.sh"),
            Some(StreamEvent::Status("Running git_fpush.sh".to_string()))
        );
        assert_eq!(
            StreamEvent::from_sse("end", "done"),
            Some(StreamEvent::End("done".to_string()))
        );
        assert!(StreamEvent::from_sse("message", "hi").is_none());
    }

    #[test]
    fn test_run_info_json() {
        let event = StreamEvent::from_sse(
            "run-info",
            r#"{"runId":"42","effectiveProjectDir":"/snap/repo-42","qwenCli":true}"#,
        )
        .unwrap();
        let StreamEvent::RunInfo(info) = event else {
            panic!("expected run-info");
        };
        assert_eq!(info.run_id.as_deref(), Some("42"));
        assert_eq!(info.effective_project_dir.as_deref(), Some("/snap/repo-42"));
        assert!(info.qwen_cli);
    }

    #[test]
    fn test_run_info_bare_id() {
        let event = StreamEvent::from_sse("run-info", " 17 \n").unwrap();
        assert_eq!(
            event,
            StreamEvent::RunInfo(RunInfo {
                run_id: Some("17".to_string()),
                ..RunInfo::default()
            })
        );
    }

    #[test]
    fn test_terminal_events() {
        assert!(StreamEvent::End(String::new()).is_terminal());
        assert!(StreamEvent::StreamError("x".into()).is_terminal());
        assert!(!StreamEvent::Output("x".into()).is_terminal());
    }
}
