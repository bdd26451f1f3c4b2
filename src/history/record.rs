//! Persisted run records
//!
//! The server has written several generations of run files, so the wire
//! format is read leniently through [`WireRecord`] and normalized into one
//! canonical [`RunRecord`].

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A run as persisted by the server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "WireRecord")]
pub struct RunRecord {
    pub id: String,
    pub numeric_id: Option<u64>,
    pub project_dir: String,
    pub effective_project_dir: Option<String>,
    pub user_prompt: String,
    pub effective_prompt: Option<String>,
    pub model: Option<String>,
    pub status_history: Vec<String>,
    pub meta_messages: Vec<String>,
    pub stdout: String,
    pub stderr: String,
    pub final_message: Option<String>,
    pub exit_code: Option<i32>,
    pub git_fpush_exit_code: Option<i32>,
    pub git_fpush_detected_changes: Option<bool>,
    /// Exit code of the merge step, migrated from every legacy field name
    pub merge_exit_code: Option<i32>,
    /// RFC 3339 timestamp; `None` while the run is still going
    pub finished_at: Option<String>,
    pub error: Option<String>,
    pub archived: bool,
    pub branch_name: Option<String>,
    pub qwen_cli: bool,
    pub followup_parent_id: Option<String>,
}

/// Field names the merge exit code has been stored under, newest first
const MERGE_EXIT_CODE_FIELDS: &[&str] = &[
    "mergeExitCode",
    "merge_exit_code",
    "gitMergeExitCode",
    "git_merge_exit_code",
    "gitMergeParentExitCode",
    "git_merge_parent_exit_code",
];

/// Raw JSON object as the server sent it
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct WireRecord(Map<String, Value>);

impl WireRecord {
    fn get(&self, names: &[&str]) -> Option<&Value> {
        names
            .iter()
            .filter_map(|name| self.0.get(*name))
            .find(|value| !value.is_null())
    }

    fn string(&self, names: &[&str]) -> Option<String> {
        self.get(names).and_then(value_to_string)
    }

    fn int(&self, names: &[&str]) -> Option<i32> {
        self.get(names).and_then(value_to_i32)
    }

    fn flag(&self, names: &[&str]) -> Option<bool> {
        self.get(names).and_then(value_to_bool)
    }

    fn lines(&self, names: &[&str]) -> Vec<String> {
        match self.get(names) {
            Some(Value::Array(items)) => items.iter().filter_map(value_to_string).collect(),
            Some(other) => value_to_string(other).into_iter().collect(),
            None => Vec::new(),
        }
    }
}

impl From<WireRecord> for RunRecord {
    fn from(wire: WireRecord) -> Self {
        let id = wire.string(&["id", "runId", "run_id"]).unwrap_or_default();
        let numeric_id = wire
            .get(&["numericId", "numeric_id"])
            .and_then(Value::as_u64)
            .or_else(|| id.parse().ok());

        RunRecord {
            numeric_id,
            project_dir: wire
                .string(&["projectDir", "project_dir", "repoDirectory"])
                .unwrap_or_default(),
            effective_project_dir: wire.string(&["effectiveProjectDir", "effective_project_dir"]),
            user_prompt: wire
                .string(&["userPrompt", "user_prompt", "prompt"])
                .unwrap_or_default(),
            effective_prompt: wire.string(&["effectivePrompt", "effective_prompt"]),
            model: wire.string(&["model"]),
            status_history: wire.lines(&["statusHistory", "status_history"]),
            meta_messages: wire.lines(&["metaMessages", "meta_messages"]),
            stdout: wire.string(&["stdout"]).unwrap_or_default(),
            stderr: wire.string(&["stderr"]).unwrap_or_default(),
            final_message: wire.string(&["finalMessage", "final_message"]),
            exit_code: wire.int(&["exitCode", "exit_code"]),
            git_fpush_exit_code: wire.int(&["gitFpushExitCode", "git_fpush_exit_code"]),
            git_fpush_detected_changes: wire
                .flag(&["gitFpushDetectedChanges", "git_fpush_detected_changes"]),
            merge_exit_code: wire.int(MERGE_EXIT_CODE_FIELDS),
            finished_at: wire
                .get(&["finishedAt", "finished_at"])
                .and_then(timestamp_to_string),
            error: wire.string(&["error"]),
            archived: wire.flag(&["archived"]).unwrap_or(false),
            branch_name: wire.string(&["branchName", "branch_name"]),
            qwen_cli: wire.flag(&["qwenCli", "qwen_cli"]).unwrap_or(false),
            followup_parent_id: wire.string(&["followupParentId", "followup_parent_id"]),
            id,
        }
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Object(map) => ["message", "status", "text"]
            .iter()
            .find_map(|key| map.get(*key).and_then(value_to_string)),
        _ => None,
    }
}

fn value_to_i32(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|n| i32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Millisecond epoch numbers become RFC 3339; strings are kept verbatim
fn timestamp_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .map(|dt| dt.to_rfc3339()),
        _ => None,
    }
}

impl RunRecord {
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn finished_at_time(&self) -> Option<DateTime<Utc>> {
        self.finished_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn is_followup(&self) -> bool {
        self.followup_parent_id
            .as_deref()
            .is_some_and(|parent| !parent.is_empty() && parent != self.id)
    }

    /// Most recent status line, if any
    pub fn latest_status(&self) -> Option<&str> {
        self.status_history.last().map(String::as_str)
    }

    /// Directory the run actually executed in
    pub fn working_dir(&self) -> &str {
        self.effective_project_dir
            .as_deref()
            .filter(|d| !d.is_empty())
            .unwrap_or(&self.project_dir)
    }

    /// Case-insensitive match across id, branch, project dir, prompt and final message
    pub fn matches_text(&self, needle: &str) -> bool {
        let needle = needle.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        let fields = [
            Some(self.id.as_str()),
            self.branch_name.as_deref(),
            Some(self.project_dir.as_str()),
            self.effective_project_dir.as_deref(),
            Some(self.user_prompt.as_str()),
            self.final_message.as_deref(),
        ];
        fields
            .into_iter()
            .flatten()
            .any(|field| field.to_lowercase().contains(&needle))
    }

    /// Whether the run belongs to repository directory `dir`
    pub fn in_repo(&self, dir: &str) -> bool {
        let dir = normalize_dir(dir);
        if dir.is_empty() {
            return true;
        }
        normalize_dir(&self.project_dir) == dir
            || self
                .effective_project_dir
                .as_deref()
                .is_some_and(|d| normalize_dir(d) == dir)
    }

    /// Short single-line prompt for list rendering
    pub fn prompt_summary(&self, max_chars: usize) -> String {
        let first = self.user_prompt.lines().next().unwrap_or("").trim();
        if first.chars().count() <= max_chars {
            first.to_string()
        } else {
            let cut: String = first.chars().take(max_chars.saturating_sub(1)).collect();
            format!("{cut}…")
        }
    }
}

/// Strip trailing slashes so `/repo/` and `/repo` compare equal
pub fn normalize_dir(dir: &str) -> &str {
    let trimmed = dir.trim();
    let stripped = trimmed.trim_end_matches('/');
    if stripped.is_empty() && trimmed.starts_with('/') {
        "/"
    } else {
        stripped
    }
}

/// Query for `GET /agent/runs/data`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunsQuery {
    pub run_id: Option<String>,
    pub repo_directory: Option<String>,
    pub session_id: Option<String>,
}

impl RunsQuery {
    pub fn for_repo(repo_directory: impl Into<String>) -> Self {
        Self {
            repo_directory: Some(repo_directory.into()),
            ..Self::default()
        }
    }

    /// Non-empty parameters as query pairs
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        [
            ("run_id", &self.run_id),
            ("repo_directory", &self.repo_directory),
            ("sessionId", &self.session_id),
        ]
        .into_iter()
        .filter_map(|(key, value)| {
            value
                .as_deref()
                .filter(|v| !v.is_empty())
                .map(|v| (key, v.to_string()))
        })
        .collect()
    }
}

/// Body of `GET /agent/runs/data`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunsResponse {
    #[serde(default)]
    pub runs: Vec<Value>,
}

impl RunsResponse {
    /// Normalize every object entry; non-objects are logged and skipped
    pub fn into_records(self) -> Vec<RunRecord> {
        self.runs
            .into_iter()
            .filter_map(|value| match value {
                Value::Object(map) => Some(RunRecord::from(WireRecord(map))),
                other => {
                    tracing::warn!(entry = %other, "Skipping malformed run entry");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_current_schema() {
        let record: RunRecord = serde_json::from_value(json!({
            "id": "41",
            "projectDir": "/repos/calc",
            "userPrompt": "Build a calculator.",
            "statusHistory": ["Running agent", "Running git_fpush.sh"],
            "stdout": "codex\nDone",
            "exitCode": 0,
            "gitFpushExitCode": "0",
            "gitFpushDetectedChanges": true,
            "finishedAt": "2025-06-01T10:00:00Z",
            "archived": false,
            "qwenCli": false
        }))
        .unwrap();

        assert_eq!(record.id, "41");
        assert_eq!(record.numeric_id, Some(41));
        assert_eq!(record.git_fpush_exit_code, Some(0));
        assert_eq!(record.git_fpush_detected_changes, Some(true));
        assert_eq!(record.latest_status(), Some("Running git_fpush.sh"));
        assert!(record.is_finished());
        assert!(record.finished_at_time().is_some());
    }

    #[test]
    fn test_legacy_merge_fields_migrate() {
        for field in MERGE_EXIT_CODE_FIELDS {
            let record: RunRecord =
                serde_json::from_value(json!({ "id": "1", *field: 0 })).unwrap();
            assert_eq!(record.merge_exit_code, Some(0), "field {field}");
        }
    }

    #[test]
    fn test_epoch_millis_finished_at() {
        let record: RunRecord =
            serde_json::from_value(json!({ "id": "1", "finishedAt": 1_717_236_000_000i64 }))
                .unwrap();
        assert!(record.finished_at_time().is_some());
    }

    #[test]
    fn test_status_history_objects() {
        let record: RunRecord = serde_json::from_value(json!({
            "id": "1",
            "statusHistory": [{"status": "Merging...", "at": 1}, "Merged"]
        }))
        .unwrap();
        assert_eq!(record.status_history, vec!["Merging...", "Merged"]);
    }

    #[test]
    fn test_canonical_round_trip() {
        let record = RunRecord {
            id: "9".to_string(),
            project_dir: "/r".to_string(),
            merge_exit_code: Some(1),
            archived: true,
            ..RunRecord::default()
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["mergeExitCode"], json!(1));
        let back: RunRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back.merge_exit_code, Some(1));
        assert!(back.archived);
    }

    #[test]
    fn test_filters() {
        let record = RunRecord {
            id: "12".to_string(),
            project_dir: "/repos/calc/".to_string(),
            user_prompt: "Build a Calculator".to_string(),
            branch_name: Some("sterling/calc-12".to_string()),
            ..RunRecord::default()
        };
        assert!(record.matches_text("calculator"));
        assert!(record.matches_text("CALC-12"));
        assert!(!record.matches_text("weather"));
        assert!(record.in_repo("/repos/calc"));
        assert!(!record.in_repo("/repos/other"));
        assert!(record.in_repo(""));
    }

    #[test]
    fn test_into_records_skips_non_objects() {
        let response: RunsResponse =
            serde_json::from_value(json!({ "runs": [{"id": "1"}, 42, "x"] })).unwrap();
        assert_eq!(response.into_records().len(), 1);
    }
}
